/*!
 * Error Types
 * Uniform error shape for traps, protocol failures and configuration problems
 */

use crate::signals::{SignalError, TrapEvent, TrapKind};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What went wrong, at the granularity callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "error_type", content = "trap", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Guest fault; recoverable, becomes a non-2xx invocation result
    Trap(TrapKind),
    /// Malformed or out-of-sequence protocol exchange
    Protocol,
    /// A required external dependency or setting is missing
    Configuration,
    /// Capability exists only in a different build configuration
    UnsupportedOperation,
}

impl ErrorKind {
    /// Stable diagnostic code
    pub fn code(&self) -> String {
        match self {
            ErrorKind::Trap(kind) => format!("trap::{}", kind.code()),
            ErrorKind::Protocol => "host::protocol".to_string(),
            ErrorKind::Configuration => "host::configuration".to_string(),
            ErrorKind::UnsupportedOperation => "host::unsupported_operation".to_string(),
        }
    }

    /// Status posted when this error ends an invocation
    pub fn status_code(&self) -> i32 {
        match self {
            ErrorKind::Trap(_) => 500,
            ErrorKind::Protocol => 502,
            ErrorKind::Configuration => 500,
            ErrorKind::UnsupportedOperation => 501,
        }
    }

    /// Process exit status when this error is fatal
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Trap(_) => 0,
            ErrorKind::Protocol => 1,
            ErrorKind::Configuration | ErrorKind::UnsupportedOperation => 2,
        }
    }

    fn help(&self) -> Option<&'static str> {
        match self {
            ErrorKind::Trap(_) => None,
            ErrorKind::Protocol => {
                Some("Check that AWS_LAMBDA_RUNTIME_API points at a live runtime API.")
            }
            ErrorKind::Configuration => {
                Some("Review the TRAP_HOST_* settings and the build dependency directory.")
            }
            ErrorKind::UnsupportedOperation => {
                Some("Rebuild with the native backend (TRAP_HOST_BACKEND=native).")
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Trap(_) => f.write_str("trap"),
            ErrorKind::Protocol => f.write_str("protocol error"),
            ErrorKind::Configuration => f.write_str("configuration error"),
            ErrorKind::UnsupportedOperation => f.write_str("unsupported operation"),
        }
    }
}

/// Error returned to the caller of an invocation. Immutable once built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    /// Set when the error came from an intercepted fault
    pub trap: Option<TrapEvent>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trap: None,
        }
    }

    pub fn trap(event: TrapEvent) -> Self {
        Self {
            kind: ErrorKind::Trap(event.kind),
            message: event.kind.description().to_string(),
            trap: Some(event),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedOperation, message)
    }

    pub fn is_trap(&self) -> bool {
        matches!(self.kind, ErrorKind::Trap(_))
    }
}

impl Diagnostic for StructuredError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.kind
            .help()
            .map(|help| Box::new(help) as Box<dyn fmt::Display>)
    }
}

// Handler installation failures happen before any invocation is served
impl From<SignalError> for StructuredError {
    fn from(err: SignalError) -> Self {
        StructuredError::configuration(format!("fault handler installation failed: {err}"))
    }
}

impl From<reqwest::Error> for StructuredError {
    fn from(err: reqwest::Error) -> Self {
        StructuredError::protocol(format!("runtime API request failed: {err}"))
    }
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, StructuredError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{ExecutionId, FaultSignal};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trap_error_carries_event() {
        let event = TrapEvent {
            kind: TrapKind::IntegerDivision,
            execution: ExecutionId::next(),
            signal: FaultSignal::SIGFPE,
        };
        let error = StructuredError::trap(event);
        assert_eq!(error.kind, ErrorKind::Trap(TrapKind::IntegerDivision));
        assert_eq!(error.trap, Some(event));
        assert_eq!(error.to_string(), "trap: integer divide by zero or overflow");
        assert!(error.is_trap());
    }

    #[test]
    fn test_status_and_exit_codes() {
        assert_eq!(ErrorKind::Trap(TrapKind::Unreachable).status_code(), 500);
        assert_eq!(ErrorKind::UnsupportedOperation.status_code(), 501);
        assert_eq!(ErrorKind::Protocol.exit_code(), 1);
        assert_eq!(ErrorKind::Configuration.exit_code(), 2);
    }

    #[test]
    fn test_diagnostic_code() {
        let error = StructuredError::unsupported("aws.response is only available in native builds");
        let code = error.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("host::unsupported_operation"));
        assert!(error.help().is_some());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::Trap(TrapKind::StackExhausted)).unwrap();
        assert_eq!(json, r#"{"error_type":"trap","trap":"stack_exhausted"}"#);
        let json = serde_json::to_string(&ErrorKind::Protocol).unwrap();
        assert_eq!(json, r#"{"error_type":"protocol"}"#);
    }

    #[test]
    fn test_signal_error_is_configuration() {
        let error: StructuredError = SignalError::InvalidSignal(99).into();
        assert_eq!(error.kind, ErrorKind::Configuration);
    }
}
