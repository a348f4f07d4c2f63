/*!
 * Signal Handler Registry
 * Process-wide, append-only record of which component owns which fault signal
 *
 * Every fault-signal install in the process goes through [`SignalRegistry::register`].
 * A registration records the disposition it displaced so that handlers can chain to
 * it. The chain is mirrored into a fixed, lock-free table because it is read from
 * signal context, where the registry lock must never be taken.
 */

use super::types::{Disposition, FaultSignal, SignalError, SignalResult};
use nix::libc::{self, c_int, c_void, siginfo_t};
use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet};
use parking_lot::Mutex;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Signature of an `SA_SIGINFO` handler
pub type SigInfoHandler = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);

const MAX_LINKS: usize = 32;

/// Handle to a registration; ordered by install time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationHandle(u64);

impl RegistrationHandle {
    pub fn ordinal(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a registration displaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predecessor {
    /// Another registration made through this registry
    Registered(RegistrationHandle),
    /// A disposition installed outside the registry
    External(Disposition),
}

/// One install of a handler for one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalHandlerRegistration {
    pub handle: RegistrationHandle,
    pub signal: FaultSignal,
    pub component: &'static str,
    /// Address of the installed handler
    pub entry: usize,
    /// `None` when the default action was in place
    pub predecessor: Option<Predecessor>,
    pub ordinal: u64,
}

/// The handler the OS will currently run for a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveHandler {
    pub signal: FaultSignal,
    pub disposition: Disposition,
    pub owner: Option<SignalHandlerRegistration>,
}

impl ActiveHandler {
    pub fn component(&self) -> Option<&'static str> {
        self.owner.as_ref().map(|registration| registration.component)
    }

    pub fn is_owned_by(&self, component: &str) -> bool {
        self.component() == Some(component)
    }
}

struct ChainLink {
    entry: AtomicUsize,
    previous: AtomicPtr<libc::sigaction>,
}

struct Chain {
    links: [ChainLink; MAX_LINKS],
    len: AtomicUsize,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_LINK: ChainLink = ChainLink {
    entry: AtomicUsize::new(0),
    previous: AtomicPtr::new(ptr::null_mut()),
};

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_CHAIN: Chain = Chain {
    links: [EMPTY_LINK; MAX_LINKS],
    len: AtomicUsize::new(0),
};

/// Indexed by [`FaultSignal::index`]. Links are leaked on purpose: registrations live
/// until the process exits.
static CHAINS: [Chain; 4] = [EMPTY_CHAIN; 4];

impl Chain {
    /// Caller holds the registry lock, so there is a single writer
    fn push(&self, entry: usize, previous: libc::sigaction) -> bool {
        let n = self.len.load(Ordering::Acquire);
        if n == MAX_LINKS {
            return false;
        }
        let previous = Box::into_raw(Box::new(previous));
        self.links[n].entry.store(entry, Ordering::Relaxed);
        self.links[n].previous.store(previous, Ordering::Relaxed);
        self.len.store(n + 1, Ordering::Release);
        true
    }

    /// Drop the newest link after its install failed. Same single-writer rule as
    /// `push`; the action stays leaked since a reader may still hold it.
    fn retract(&self) {
        let n = self.len.load(Ordering::Acquire);
        if n > 0 {
            self.len.store(n - 1, Ordering::Release);
        }
    }

    /// Predecessor of the `depth`-th newest install of `entry`
    fn predecessor(&self, entry: usize, depth: usize) -> Option<&'static libc::sigaction> {
        let n = self.len.load(Ordering::Acquire);
        (0..n)
            .rev()
            .filter(|&i| self.links[i].entry.load(Ordering::Relaxed) == entry)
            .nth(depth)
            .and_then(|i| {
                let previous = self.links[i].previous.load(Ordering::Relaxed);
                // SAFETY: published before `len` and never freed
                unsafe { previous.as_ref() }
            })
    }
}

/// Process-wide registry of fault-signal handlers
#[derive(Debug)]
pub struct SignalRegistry {
    table: Mutex<Vec<SignalHandlerRegistration>>,
    next_ordinal: AtomicU64,
}

impl SignalRegistry {
    /// The registry; there is exactly one per process
    pub fn global() -> &'static SignalRegistry {
        static REGISTRY: OnceLock<SignalRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| SignalRegistry {
            table: Mutex::new(Vec::new()),
            next_ordinal: AtomicU64::new(1),
        })
    }

    /// Make `entry` the active handler for `signal`, recording what it displaced
    pub fn register(
        &self,
        signal: FaultSignal,
        component: &'static str,
        entry: SigInfoHandler,
    ) -> SignalResult<RegistrationHandle> {
        let mut table = self.table.lock();

        let previous = current_action(signal)?;
        let entry_addr = entry as *const () as usize;
        let predecessor = match Disposition::from_raw(previous.sa_sigaction) {
            Disposition::Default => None,
            Disposition::Handler(addr) => Some(
                newest_with_entry(&table, signal, addr)
                    .map(|registration| Predecessor::Registered(registration.handle))
                    .unwrap_or(Predecessor::External(Disposition::Handler(addr))),
            ),
            other => Some(Predecessor::External(other)),
        };

        // The chain link must be visible before the handler can fire
        let chain = &CHAINS[signal.index()];
        if !chain.push(entry_addr, previous) {
            return Err(SignalError::ChainFull(signal));
        }

        let action = SigAction::new(
            SigHandler::SigAction(entry),
            SaFlags::SA_ONSTACK,
            SigSet::empty(),
        );
        // SAFETY: `entry` only touches async-signal-safe state
        if let Err(errno) = unsafe { nix_signal::sigaction(signal.as_nix(), &action) } {
            chain.retract();
            return Err(SignalError::InstallFailed { signal, errno });
        }

        let ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
        let handle = RegistrationHandle(ordinal);
        table.push(SignalHandlerRegistration {
            handle,
            signal,
            component,
            entry: entry_addr,
            predecessor,
            ordinal,
        });

        info!(
            signal = %signal,
            component,
            handle = %handle,
            predecessor = ?predecessor,
            "Registered fault handler"
        );
        Ok(handle)
    }

    /// Handler the OS currently delivers `signal` to
    pub fn active_handler(&self, signal: FaultSignal) -> SignalResult<ActiveHandler> {
        let table = self.table.lock();
        let disposition = Disposition::from_raw(current_action(signal)?.sa_sigaction);
        let owner = match disposition {
            Disposition::Handler(addr) => newest_with_entry(&table, signal, addr).cloned(),
            _ => None,
        };
        debug!(signal = %signal, ?disposition, owner = ?owner.as_ref().map(|o| o.component), "Queried active handler");
        Ok(ActiveHandler {
            signal,
            disposition,
            owner,
        })
    }

    /// Install history for `signal`, oldest first
    pub fn registrations(&self, signal: FaultSignal) -> Vec<SignalHandlerRegistration> {
        self.table
            .lock()
            .iter()
            .filter(|registration| registration.signal == signal)
            .cloned()
            .collect()
    }

    pub fn get(&self, handle: RegistrationHandle) -> Option<SignalHandlerRegistration> {
        self.table
            .lock()
            .iter()
            .find(|registration| registration.handle == handle)
            .cloned()
    }
}

fn newest_with_entry(
    table: &[SignalHandlerRegistration],
    signal: FaultSignal,
    entry: usize,
) -> Option<&SignalHandlerRegistration> {
    table
        .iter()
        .rev()
        .find(|registration| registration.signal == signal && registration.entry == entry)
}

fn current_action(signal: FaultSignal) -> SignalResult<libc::sigaction> {
    // SAFETY: a null `act` only reads the current disposition
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal.number(), ptr::null(), &mut current) != 0 {
            return Err(SignalError::InstallFailed {
                signal,
                errno: nix::errno::Errno::last(),
            });
        }
        Ok(current)
    }
}

/// Disposition `entry` displaced, `depth` installs back. Async-signal-safe.
pub fn predecessor_of(
    signal: FaultSignal,
    entry: SigInfoHandler,
    depth: usize,
) -> Option<&'static libc::sigaction> {
    CHAINS[signal.index()].predecessor(entry as *const () as usize, depth)
}

/// Hand a fault on to a displaced disposition. Async-signal-safe.
///
/// # Safety
/// Must be called from a signal handler for `signal`, with the `info` and `context`
/// pointers the kernel passed to it.
pub unsafe fn forward(
    signal: FaultSignal,
    previous: Option<&libc::sigaction>,
    info: *mut siginfo_t,
    context: *mut c_void,
) {
    let Some(previous) = previous else {
        resume_default_action(signal);
        return;
    };
    match Disposition::from_raw(previous.sa_sigaction) {
        Disposition::Default => resume_default_action(signal),
        Disposition::Ignore => {}
        Disposition::Handler(addr) => {
            if previous.sa_flags & libc::SA_SIGINFO != 0 {
                let handler: SigInfoHandler = std::mem::transmute(addr);
                handler(signal.number(), info, context);
            } else {
                let handler: extern "C" fn(c_int) = std::mem::transmute(addr);
                handler(signal.number());
            }
        }
    }
}

/// Restore the default action and re-raise. Inside a handler the signal stays blocked
/// until the handler returns, so the process dies right after. Async-signal-safe.
pub fn resume_default_action(signal: FaultSignal) {
    // SAFETY: SIG_DFL carries no Rust state
    unsafe {
        let _ = nix_signal::signal(signal.as_nix(), SigHandler::SigDfl);
    }
    let _ = nix_signal::raise(signal.as_nix());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    extern "C" fn noop_handler(_: c_int, _: *mut siginfo_t, _: *mut c_void) {}
    extern "C" fn other_handler(_: c_int, _: *mut siginfo_t, _: *mut c_void) {}

    #[test]
    fn test_chain_walks_newest_first() {
        let chain = EMPTY_CHAIN;
        // SAFETY: zeroed sigaction is SIG_DFL
        let mut first: libc::sigaction = unsafe { std::mem::zeroed() };
        first.sa_sigaction = libc::SIG_IGN;
        let second: libc::sigaction = unsafe { std::mem::zeroed() };

        assert!(chain.push(7, first));
        assert!(chain.push(9, second));
        assert!(chain.push(7, second));

        assert_eq!(chain.predecessor(7, 0).map(|a| a.sa_sigaction), Some(libc::SIG_DFL));
        assert_eq!(chain.predecessor(7, 1).map(|a| a.sa_sigaction), Some(libc::SIG_IGN));
        assert!(chain.predecessor(7, 2).is_none());
        assert!(chain.predecessor(8, 0).is_none());
    }

    #[test]
    fn test_chain_is_bounded() {
        let chain = EMPTY_CHAIN;
        let action: libc::sigaction = unsafe { std::mem::zeroed() };
        for _ in 0..MAX_LINKS {
            assert!(chain.push(1, action));
        }
        assert!(!chain.push(1, action));
    }

    #[test]
    fn test_retracted_link_frees_capacity() {
        let chain = EMPTY_CHAIN;
        let action: libc::sigaction = unsafe { std::mem::zeroed() };
        for _ in 0..MAX_LINKS - 1 {
            assert!(chain.push(1, action));
        }
        assert!(chain.push(2, action));
        chain.retract();

        assert!(chain.predecessor(2, 0).is_none());
        assert_eq!(chain.len.load(Ordering::Acquire), MAX_LINKS - 1);
        assert!(chain.push(3, action));
        assert!(!chain.push(3, action));
    }

    #[test]
    fn test_registry_debug_lists_registrations() {
        let rendered = format!("{:?}", SignalRegistry::global());
        assert!(rendered.starts_with("SignalRegistry"));
        assert!(rendered.contains("next_ordinal"));
    }

    #[test]
    #[serial]
    fn test_register_records_predecessor() {
        let registry = SignalRegistry::global();
        let signal = FaultSignal::SIGBUS;

        let first = registry.register(signal, "first", noop_handler).unwrap();
        let second = registry.register(signal, "second", other_handler).unwrap();
        assert!(second > first);

        let record = registry.get(second).unwrap();
        assert_eq!(record.predecessor, Some(Predecessor::Registered(first)));
        assert_eq!(record.component, "second");

        let active = registry.active_handler(signal).unwrap();
        assert!(active.is_owned_by("second"));
        assert_eq!(active.disposition, Disposition::Handler(other_handler as *const () as usize));

        let history = registry.registrations(signal);
        let position = |h| history.iter().position(|r| r.handle == h).unwrap();
        assert!(position(first) < position(second));

        let displaced = predecessor_of(signal, other_handler, 0).unwrap();
        assert_eq!(displaced.sa_sigaction, noop_handler as *const () as usize);
    }
}
