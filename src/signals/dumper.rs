/*!
 * Diagnostic Dumper
 * Crash-reporter style facility: print the fatal signal, then die with it
 *
 * This is the kind of facility that competes with the trap interceptor. It never
 * chains to the handler it displaced, so whenever it owns a fault signal, a guest
 * fault terminates the process.
 */

use super::registry::{self, RegistrationHandle, SignalRegistry};
use super::traits::FaultFacility;
use super::types::{Disposition, FaultSignal, SignalResult};
use nix::libc::{self, c_int, c_void, siginfo_t};
use tracing::info;

pub const COMPONENT: &str = "diagnostic-dumper";

fn write_stderr(bytes: &[u8]) {
    // SAFETY: write(2) is async-signal-safe; the buffer outlives the call
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

fn banner(signal: FaultSignal) -> &'static [u8] {
    match signal {
        FaultSignal::SIGILL => b"Fatal signal: SIGILL (Illegal instruction)\n",
        FaultSignal::SIGFPE => b"Fatal signal: SIGFPE (Floating point exception)\n",
        FaultSignal::SIGSEGV => b"Fatal signal: SIGSEGV (Segmentation fault)\n",
        FaultSignal::SIGBUS => b"Fatal signal: SIGBUS (Bus error)\n",
    }
}

extern "C" fn on_fatal(signum: c_int, _info: *mut siginfo_t, _context: *mut c_void) {
    match FaultSignal::from_number(signum) {
        Ok(signal) => {
            write_stderr(banner(signal));
            registry::resume_default_action(signal);
        }
        Err(_) => write_stderr(b"Fatal signal: unknown\n"),
    }
}

/// Installs a dump-and-terminate handler for every fault signal
#[derive(Debug)]
pub struct DiagnosticDumper {
    registry: &'static SignalRegistry,
}

impl DiagnosticDumper {
    pub fn new() -> Self {
        Self {
            registry: SignalRegistry::global(),
        }
    }
}

impl Default for DiagnosticDumper {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultFacility for DiagnosticDumper {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn install(&self) -> SignalResult<Vec<RegistrationHandle>> {
        let handles = FaultSignal::ALL
            .into_iter()
            .map(|signal| self.registry.register(signal, COMPONENT, on_fatal))
            .collect::<SignalResult<Vec<_>>>()?;
        info!("Diagnostic dumper installed");
        Ok(handles)
    }

    fn is_active(&self) -> SignalResult<bool> {
        for signal in FaultSignal::ALL {
            let active = self.registry.active_handler(signal)?;
            if active.disposition != Disposition::Handler(on_fatal as *const () as usize) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banners_name_the_signal() {
        for signal in FaultSignal::ALL {
            let text = std::str::from_utf8(banner(signal)).unwrap();
            assert!(text.contains(&format!("{signal:?}")));
            assert!(text.contains(signal.description()));
        }
    }

    #[test]
    fn test_debug_shows_registry() {
        assert!(format!("{:?}", DiagnosticDumper::new()).contains("SignalRegistry"));
    }
}
