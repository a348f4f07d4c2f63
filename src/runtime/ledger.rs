/*!
 * Invocation Ledger
 * State of the single invocation the runtime API peer serves
 */

use super::types::{InvocationEvent, InvocationResult};
use crate::core::config::ServerConfig;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

/// The invocation handed out by `next`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvocation {
    pub request_id: String,
    pub event: InvocationEvent,
    pub deadline: Duration,
}

impl From<&ServerConfig> for PendingInvocation {
    fn from(config: &ServerConfig) -> Self {
        Self {
            request_id: config.request_id.clone(),
            event: InvocationEvent::new(config.body.clone(), config.method.clone()),
            deadline: config.deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting { issued: bool },
    Completed,
}

/// Why a request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The invocation already completed; nothing more to hand out
    Closed,
    UnknownRequest(String),
    NotIssued,
    AlreadyCompleted,
}

impl Rejection {
    pub fn error_type(&self) -> &'static str {
        match self {
            Rejection::Closed => "Runtime.InvocationClosed",
            Rejection::UnknownRequest(_) => "Runtime.UnknownRequestId",
            Rejection::NotIssued => "Runtime.InvocationNotIssued",
            Rejection::AlreadyCompleted => "Runtime.DuplicateResponse",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Closed => f.write_str("no invocation pending"),
            Rejection::UnknownRequest(id) => write!(f, "unknown request id '{id}'"),
            Rejection::NotIssued => f.write_str("invocation has not been issued yet"),
            Rejection::AlreadyCompleted => f.write_str("invocation already has a response"),
        }
    }
}

enum LedgerState {
    Waiting { issued: bool },
    Completed(InvocationResult),
}

pub struct InvocationLedger {
    pending: PendingInvocation,
    state: Mutex<LedgerState>,
    completion: flume::Sender<InvocationResult>,
}

impl InvocationLedger {
    /// Returns the ledger and the receiving end of its completion signal
    pub fn new(pending: PendingInvocation) -> (Self, flume::Receiver<InvocationResult>) {
        let (completion, completed) = flume::bounded(1);
        let ledger = Self {
            pending,
            state: Mutex::new(LedgerState::Waiting { issued: false }),
            completion,
        };
        (ledger, completed)
    }

    pub fn request_id(&self) -> &str {
        &self.pending.request_id
    }

    /// Hand out the pending invocation; repeatable until a response arrives
    pub fn next(&self) -> Result<PendingInvocation, Rejection> {
        let mut state = self.state.lock();
        match &mut *state {
            LedgerState::Waiting { issued } => {
                *issued = true;
                Ok(self.pending.clone())
            }
            LedgerState::Completed(_) => Err(Rejection::Closed),
        }
    }

    /// Record the response for `request_id`. Only the first valid one is kept.
    pub fn respond(&self, request_id: &str, result: InvocationResult) -> Result<(), Rejection> {
        if request_id != self.pending.request_id {
            return Err(Rejection::UnknownRequest(request_id.to_string()));
        }

        {
            let mut state = self.state.lock();
            match *state {
                LedgerState::Waiting { issued: false } => return Err(Rejection::NotIssued),
                LedgerState::Completed(_) => return Err(Rejection::AlreadyCompleted),
                LedgerState::Waiting { issued: true } => {}
            }
            *state = LedgerState::Completed(result.clone());
        }

        // Only the transition into Completed reaches here, so this runs once
        let _ = self.completion.try_send(result);
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        match &*self.state.lock() {
            LedgerState::Waiting { issued } => Phase::Waiting { issued: *issued },
            LedgerState::Completed(_) => Phase::Completed,
        }
    }

    pub fn recorded(&self) -> Option<InvocationResult> {
        match &*self.state.lock() {
            LedgerState::Completed(result) => Some(result.clone()),
            LedgerState::Waiting { .. } => None,
        }
    }
}

impl fmt::Debug for InvocationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationLedger")
            .field("request_id", &self.pending.request_id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ledger() -> (InvocationLedger, flume::Receiver<InvocationResult>) {
        InvocationLedger::new(PendingInvocation::from(&ServerConfig::default()))
    }

    #[test]
    fn test_respond_before_issue_is_rejected() {
        let (ledger, _completed) = ledger();
        let result = InvocationResult::new(200, "early");
        assert_eq!(ledger.respond("test-request-123", result), Err(Rejection::NotIssued));
        assert_eq!(ledger.phase(), Phase::Waiting { issued: false });
    }

    #[test]
    fn test_first_response_wins() {
        let (ledger, completed) = ledger();
        let pending = ledger.next().unwrap();
        assert_eq!(pending.event.body, "test-body-from-mock");

        let first = InvocationResult::new(200, "first");
        ledger.respond("test-request-123", first.clone()).unwrap();
        assert_eq!(
            ledger.respond("test-request-123", InvocationResult::new(500, "second")),
            Err(Rejection::AlreadyCompleted)
        );

        assert_eq!(ledger.phase(), Phase::Completed);
        assert_eq!(ledger.recorded(), Some(first.clone()));
        assert_eq!(completed.try_recv().unwrap(), first);
        assert!(completed.try_recv().is_err());
    }

    #[test]
    fn test_unknown_request_and_closed() {
        let (ledger, _completed) = ledger();
        ledger.next().unwrap();
        assert_eq!(
            ledger.respond("other", InvocationResult::new(200, "")),
            Err(Rejection::UnknownRequest("other".to_string()))
        );
        ledger
            .respond("test-request-123", InvocationResult::new(200, ""))
            .unwrap();
        assert_eq!(ledger.next(), Err(Rejection::Closed));
    }

    #[test]
    fn test_completion_with_dropped_receiver() {
        let (ledger, completed) = ledger();
        drop(completed);
        ledger.next().unwrap();
        assert!(ledger
            .respond("test-request-123", InvocationResult::new(200, "ok"))
            .is_ok());
        assert!(ledger.recorded().is_some());
    }
}
