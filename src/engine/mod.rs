/*!
 * Execution Engine
 * Runs guest code; faults leave through the signal path
 */

pub mod machine;
pub mod programs;
pub mod traits;

pub use machine::{Function, Instr, Program, StackMachine};
pub use programs::GuestProgram;
pub use traits::{ExecutionEngine, GuestInput, GuestOutput};

#[cfg(test)]
pub use traits::MockExecutionEngine;
