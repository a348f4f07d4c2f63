/*!
 * Signal Types
 * Fault signal identifiers, handler dispositions and result types
 */

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Signal operation result
pub type SignalResult<T> = Result<T, SignalError>;

/// Signal errors
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
pub enum SignalError {
    #[error("Invalid fault signal: {0}")]
    #[diagnostic(
        code(signals::invalid_signal),
        help("Only SIGILL, SIGFPE, SIGSEGV and SIGBUS are tracked by the registry.")
    )]
    InvalidSignal(i32),

    #[error("sigaction failed for {signal}: {errno}")]
    #[diagnostic(code(signals::install_failed))]
    InstallFailed { signal: FaultSignal, errno: nix::errno::Errno },

    #[error("Handler chain for {0} is full")]
    #[diagnostic(
        code(signals::chain_full),
        help("A signal was re-claimed too many times; another facility keeps stealing it.")
    )]
    ChainFull(FaultSignal),
}

/// Signals through which hardware faults are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultSignal {
    /// Illegal instruction
    SIGILL,
    /// Floating-point / integer arithmetic exception
    SIGFPE,
    /// Invalid memory reference
    SIGSEGV,
    /// Bus error (bad memory access)
    SIGBUS,
}

impl FaultSignal {
    /// Every signal the trap interceptor claims
    pub const ALL: [FaultSignal; 4] = [
        FaultSignal::SIGILL,
        FaultSignal::SIGFPE,
        FaultSignal::SIGSEGV,
        FaultSignal::SIGBUS,
    ];

    /// Convert from the platform signal number
    pub fn from_number(n: i32) -> SignalResult<Self> {
        Self::ALL
            .into_iter()
            .find(|signal| signal.number() == n)
            .ok_or(SignalError::InvalidSignal(n))
    }

    /// Position in [`FaultSignal::ALL`]
    pub(crate) fn index(&self) -> usize {
        match self {
            FaultSignal::SIGILL => 0,
            FaultSignal::SIGFPE => 1,
            FaultSignal::SIGSEGV => 2,
            FaultSignal::SIGBUS => 3,
        }
    }

    /// Platform signal number
    pub fn number(&self) -> i32 {
        self.as_nix() as i32
    }

    pub fn as_nix(&self) -> Signal {
        match self {
            FaultSignal::SIGILL => Signal::SIGILL,
            FaultSignal::SIGFPE => Signal::SIGFPE,
            FaultSignal::SIGSEGV => Signal::SIGSEGV,
            FaultSignal::SIGBUS => Signal::SIGBUS,
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FaultSignal::SIGILL => "Illegal instruction",
            FaultSignal::SIGFPE => "Floating point exception",
            FaultSignal::SIGSEGV => "Segmentation fault",
            FaultSignal::SIGBUS => "Bus error",
        }
    }
}

impl fmt::Display for FaultSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

impl From<FaultSignal> for Signal {
    fn from(signal: FaultSignal) -> Self {
        signal.as_nix()
    }
}

/// OS-visible disposition of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Default action (terminate for every fault signal)
    Default,
    /// Signal is ignored
    Ignore,
    /// A handler function at this address
    Handler(usize),
}

impl Disposition {
    pub(crate) fn from_raw(sa_sigaction: usize) -> Self {
        match sa_sigaction {
            x if x == nix::libc::SIG_DFL => Disposition::Default,
            x if x == nix::libc::SIG_IGN => Disposition::Ignore,
            addr => Disposition::Handler(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_number_roundtrips_fault_signals() {
        for signal in FaultSignal::ALL {
            assert_eq!(FaultSignal::from_number(signal.number()).unwrap(), signal);
        }
        assert_eq!(
            FaultSignal::from_number(nix::libc::SIGTERM),
            Err(SignalError::InvalidSignal(nix::libc::SIGTERM))
        );
    }

    #[test]
    fn test_disposition_from_raw() {
        assert_eq!(Disposition::from_raw(nix::libc::SIG_DFL), Disposition::Default);
        assert_eq!(Disposition::from_raw(nix::libc::SIG_IGN), Disposition::Ignore);
        assert_eq!(Disposition::from_raw(0xdead), Disposition::Handler(0xdead));
    }

    #[test]
    fn test_display_includes_number() {
        let shown = FaultSignal::SIGILL.to_string();
        assert!(shown.starts_with("SIGILL("));
    }
}
