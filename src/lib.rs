/*!
 * Trap Host Library
 * Guest execution host with signal-based trap conversion and a
 * single-invocation runtime API exchange
 */

pub mod core;
pub mod engine;
pub mod monitoring;
pub mod runtime;
pub mod signals;

// Re-exports
pub use crate::core::{
    ensure_deps, Backend, BuildConfig, CrashReporterOrder, ErrorKind, GcMode, HostConfig, Result,
    ServerConfig, StructuredError,
};
pub use engine::{ExecutionEngine, GuestInput, GuestOutput, GuestProgram, StackMachine};
pub use monitoring::init_tracing;
pub use runtime::{
    Invocation, InvocationClient, InvocationResult, InvocationServer, LambdaModule, RunningServer,
    ServeOutcome, ServeStatus,
};
pub use signals::{
    deliver_fault, DiagnosticDumper, FaultFacility, FaultSignal, OwnershipPolicy, SignalRegistry,
    TrapEvent, TrapInterceptor, TrapKind,
};
