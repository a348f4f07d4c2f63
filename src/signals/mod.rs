/*!
 * Signals Module
 * Fault-signal ownership, trap interception and competing facilities
 */

pub mod dumper;
pub mod interceptor;
pub mod registry;
pub mod traits;
pub mod traps;
pub mod types;

// Re-export public API
pub use dumper::DiagnosticDumper;
pub use interceptor::{deliver_fault, OwnershipPolicy, TrapInterceptor};
pub use registry::{
    ActiveHandler, Predecessor, RegistrationHandle, SignalHandlerRegistration, SignalRegistry,
};
pub use traits::FaultFacility;
pub use traps::{ExecutionId, TrapEvent, TrapKind};
pub use types::{Disposition, FaultSignal, SignalError, SignalResult};
