/*!
 * Runtime API
 * Single-invocation Lambda-style exchange: the peer that serves it and the host
 * client that answers it
 */

pub mod client;
pub mod lambda;
pub mod ledger;
pub mod server;
pub mod types;

pub use client::{InvocationClient, RuntimeApiClient, ServeStatus};
pub use lambda::{LambdaModule, RUNTIME_API_ENV};
pub use ledger::{InvocationLedger, PendingInvocation, Phase, Rejection};
pub use server::{InvocationServer, RunningServer, ServeOutcome};
pub use types::{
    Invocation, InvocationEvent, InvocationHeaders, InvocationResult, DEADLINE_HEADER,
    REQUEST_ID_HEADER,
};
