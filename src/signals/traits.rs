/*!
 * Signal Traits
 * Abstractions over process-wide fault-handling facilities
 */

use super::registry::RegistrationHandle;
use super::types::SignalResult;

/// A component that installs fault-signal handlers through the registry
pub trait FaultFacility: Send + Sync {
    /// Name recorded in every registration this facility makes
    fn component(&self) -> &'static str;

    /// Register handlers for every signal this facility cares about
    fn install(&self) -> SignalResult<Vec<RegistrationHandle>>;

    /// Whether this facility is the OS-visible handler for all of its signals
    fn is_active(&self) -> SignalResult<bool>;
}
