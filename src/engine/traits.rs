/*!
 * Engine Traits
 * The boundary between the host and whatever executes guest code
 */

use crate::runtime::Invocation;
use crate::signals::TrapEvent;
use std::collections::BTreeMap;

/// What guest code sees of an invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestInput {
    pub request_id: String,
    pub body: Vec<u8>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

impl From<&Invocation> for GuestInput {
    fn from(invocation: &Invocation) -> Self {
        Self {
            request_id: invocation.request_id.clone(),
            body: invocation.body.clone(),
            method: invocation.method.clone(),
            headers: invocation.headers.to_map(),
        }
    }
}

/// What guest code produced
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestOutput {
    /// `None` means the default success status
    pub status_code: Option<i32>,
    pub body: Vec<u8>,
}

/// Executes guest code
///
/// A guest fault must be reported with [`crate::signals::deliver_fault`] and the
/// returned event propagated out of `execute` unchanged.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionEngine: Send {
    fn execute(&mut self, input: &GuestInput) -> Result<GuestOutput, TrapEvent>;
}
