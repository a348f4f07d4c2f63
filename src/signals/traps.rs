/*!
 * Trap Taxonomy
 * The closed set of guest faults converted into structured errors
 */

use super::types::FaultSignal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of guest fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapKind {
    /// An `unreachable` instruction was executed
    Unreachable,
    /// Linear memory accessed outside its bounds
    MemoryOutOfBounds,
    /// Integer division by zero or overflowing division
    IntegerDivision,
    /// Call stack exhausted
    StackExhausted,
}

impl TrapKind {
    pub const ALL: [TrapKind; 4] = [
        TrapKind::Unreachable,
        TrapKind::MemoryOutOfBounds,
        TrapKind::IntegerDivision,
        TrapKind::StackExhausted,
    ];

    /// Signal the hardware uses to report this fault
    pub fn signal(&self) -> FaultSignal {
        match self {
            TrapKind::Unreachable => FaultSignal::SIGILL,
            TrapKind::MemoryOutOfBounds => FaultSignal::SIGSEGV,
            TrapKind::IntegerDivision => FaultSignal::SIGFPE,
            // guard page hit
            TrapKind::StackExhausted => FaultSignal::SIGSEGV,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TrapKind::Unreachable => "unreachable",
            TrapKind::MemoryOutOfBounds => "memory_out_of_bounds",
            TrapKind::IntegerDivision => "integer_division",
            TrapKind::StackExhausted => "stack_exhausted",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TrapKind::Unreachable => "unreachable instruction executed",
            TrapKind::MemoryOutOfBounds => "out of bounds memory access",
            TrapKind::IntegerDivision => "integer divide by zero or overflow",
            TrapKind::StackExhausted => "call stack exhausted",
        }
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Identifies one guarded execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionId(u64);

impl ExecutionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// A fault delivered while guest code was running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapEvent {
    pub kind: TrapKind,
    pub execution: ExecutionId,
    pub signal: FaultSignal,
}

impl fmt::Display for TrapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} in {})", self.kind, self.signal, self.execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_signals() {
        assert_eq!(TrapKind::Unreachable.signal(), FaultSignal::SIGILL);
        assert_eq!(TrapKind::IntegerDivision.signal(), FaultSignal::SIGFPE);
        assert_eq!(TrapKind::MemoryOutOfBounds.signal(), FaultSignal::SIGSEGV);
        assert_eq!(TrapKind::StackExhausted.signal(), FaultSignal::SIGSEGV);
    }

    #[test]
    fn test_trap_kind_serialization() {
        let json = serde_json::to_string(&TrapKind::MemoryOutOfBounds).unwrap();
        assert_eq!(json, "\"memory_out_of_bounds\"");
        let back: TrapKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TrapKind::MemoryOutOfBounds);
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionId::next();
        let b = ExecutionId::next();
        assert_ne!(a, b);
    }
}
