/*!
 * Trap Interceptor
 * Converts fault signals raised by guest code into structured errors
 *
 * Guest code reports a fault through [`deliver_fault`], which arms the fault site and
 * raises the fault's signal on the current thread. If the interceptor is the active
 * handler and a guarded execution is running, the handler records a [`TrapEvent`]
 * and returns; the engine then unwinds with it. Any other fault is forwarded to the
 * disposition the interceptor displaced.
 *
 * Re-entrant traps during unwind are not supported: a guarded execution must fully
 * unwind before the next one starts on the same thread.
 */

use super::registry::{self, RegistrationHandle, SignalRegistry};
use super::traits::FaultFacility;
use super::traps::{ExecutionId, TrapEvent, TrapKind};
use super::types::{Disposition, FaultSignal, SignalResult};
use crate::core::errors::StructuredError;
use nix::libc::{c_int, c_void, siginfo_t};
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, info_span, warn};

pub const COMPONENT: &str = "trap-interceptor";

/// When the interceptor (re-)claims its signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    /// Re-claim every owned signal immediately before each guarded execution
    #[default]
    ReclaimBeforeUse,
    /// Claim once at install; later installs by other facilities win
    InstallOnce,
}

impl FromStr for OwnershipPolicy {
    type Err = StructuredError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reclaim" | "reclaim-before-use" => Ok(OwnershipPolicy::ReclaimBeforeUse),
            "install-once" => Ok(OwnershipPolicy::InstallOnce),
            other => Err(StructuredError::configuration(format!(
                "unknown ownership policy '{other}' (expected reclaim or install-once)"
            ))),
        }
    }
}

impl fmt::Display for OwnershipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipPolicy::ReclaimBeforeUse => f.write_str("reclaim"),
            OwnershipPolicy::InstallOnce => f.write_str("install-once"),
        }
    }
}

/// Per-thread guard state; only `Cell`s so the handler can touch it
struct GuardState {
    execution: Cell<Option<ExecutionId>>,
    armed: Cell<Option<TrapKind>>,
    pending: Cell<Option<TrapEvent>>,
    forwarding: Cell<usize>,
}

impl GuardState {
    const fn new() -> Self {
        Self {
            execution: Cell::new(None),
            armed: Cell::new(None),
            pending: Cell::new(None),
            forwarding: Cell::new(0),
        }
    }

    fn intercept(&self, signal: FaultSignal) -> bool {
        let Some(execution) = self.execution.get() else {
            return false;
        };
        match self.armed.get() {
            Some(kind) if kind.signal() == signal => {
                self.armed.set(None);
                self.pending.set(Some(TrapEvent {
                    kind,
                    execution,
                    signal,
                }));
                true
            }
            _ => false,
        }
    }
}

thread_local! {
    static GUARD: GuardState = const { GuardState::new() };
}

extern "C" fn on_fault(signum: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let Ok(signal) = FaultSignal::from_number(signum) else {
        return;
    };
    if GUARD
        .try_with(|guard| guard.intercept(signal))
        .unwrap_or(false)
    {
        return;
    }

    // Each re-entry while forwarding walks one install further back, so a chain
    // that leads back here terminates.
    let depth = GUARD
        .try_with(|guard| guard.forwarding.replace(guard.forwarding.get() + 1))
        .unwrap_or(0);
    let previous = registry::predecessor_of(signal, on_fault, depth);
    // SAFETY: called from the handler with the kernel's pointers
    unsafe { registry::forward(signal, previous, info, context) };
    let _ = GUARD.try_with(|guard| guard.forwarding.set(depth));
}

/// Report a guest fault through its hardware signal.
///
/// Returns the recorded event when the interceptor converted the fault. If another
/// disposition received it and let execution continue, the fault is escalated to the
/// default action: a fault is never stepped over.
pub fn deliver_fault(kind: TrapKind) -> TrapEvent {
    let signal = kind.signal();
    GUARD.with(|guard| guard.armed.set(Some(kind)));
    let _ = nix::sys::signal::raise(signal.as_nix());
    let event = GUARD.with(|guard| {
        guard.armed.set(None);
        guard.pending.take()
    });

    match event {
        Some(event) => event,
        None => {
            registry::resume_default_action(signal);
            std::process::abort()
        }
    }
}

/// Marks the current thread as running a guarded execution until dropped
struct GuardScope {
    execution: ExecutionId,
}

impl GuardScope {
    fn enter() -> Result<Self, StructuredError> {
        GUARD.with(|guard| {
            if let Some(active) = guard.execution.get() {
                return Err(StructuredError::unsupported(format!(
                    "nested guarded execution while {active} is still running"
                )));
            }
            let execution = ExecutionId::next();
            guard.execution.set(Some(execution));
            guard.armed.set(None);
            guard.pending.set(None);
            Ok(Self { execution })
        })
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        let _ = GUARD.try_with(|guard| {
            guard.execution.set(None);
            guard.armed.set(None);
            guard.pending.set(None);
        });
    }
}

/// Owns the fault signals in [`FaultSignal::ALL`] and runs guest code under them
#[derive(Debug)]
pub struct TrapInterceptor {
    policy: OwnershipPolicy,
    registry: &'static SignalRegistry,
}

impl TrapInterceptor {
    pub fn new(policy: OwnershipPolicy) -> Self {
        Self {
            policy,
            registry: SignalRegistry::global(),
        }
    }

    pub fn policy(&self) -> OwnershipPolicy {
        self.policy
    }

    fn is_active_for(&self, signal: FaultSignal) -> SignalResult<bool> {
        let active = self.registry.active_handler(signal)?;
        Ok(active.disposition == Disposition::Handler(on_fault as *const () as usize))
    }

    /// Claim ownership now: re-register for every signal another facility took
    pub fn claim(&self) -> SignalResult<Vec<RegistrationHandle>> {
        let mut handles = Vec::new();
        for signal in FaultSignal::ALL {
            if self.is_active_for(signal)? {
                continue;
            }
            debug!(signal = %signal, "Re-claiming fault signal");
            handles.push(self.registry.register(signal, COMPONENT, on_fault)?);
        }
        Ok(handles)
    }

    /// Run guest code, converting an intercepted fault into a `StructuredError`
    pub fn run_guarded<T, F>(&self, execution: F) -> Result<T, StructuredError>
    where
        F: FnOnce(ExecutionId) -> Result<T, TrapEvent>,
    {
        if self.policy == OwnershipPolicy::ReclaimBeforeUse {
            self.claim()?;
        }

        let scope = GuardScope::enter()?;
        let span = info_span!("guarded_execution", execution = %scope.execution);
        let _entered = span.enter();

        match execution(scope.execution) {
            Ok(value) => Ok(value),
            Err(event) => {
                warn!(trap = %event, "Guest execution trapped");
                Err(StructuredError::trap(event))
            }
        }
    }
}

impl Default for TrapInterceptor {
    fn default() -> Self {
        Self::new(OwnershipPolicy::default())
    }
}

impl FaultFacility for TrapInterceptor {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn install(&self) -> SignalResult<Vec<RegistrationHandle>> {
        let handles = FaultSignal::ALL
            .into_iter()
            .map(|signal| self.registry.register(signal, COMPONENT, on_fault))
            .collect::<SignalResult<Vec<_>>>()?;
        info!(policy = %self.policy, "Trap interceptor installed");
        Ok(handles)
    }

    fn is_active(&self) -> SignalResult<bool> {
        for signal in FaultSignal::ALL {
            if !self.is_active_for(signal)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
