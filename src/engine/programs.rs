/*!
 * Guest Programs
 * The built-in catalog selectable with TRAP_HOST_GUEST
 */

use super::machine::{Function, Instr, Program, DEFAULT_MEMORY_SIZE};
use crate::core::errors::{Result, StructuredError};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GuestProgram {
    /// Responds 200 with `echo:<body>`
    #[default]
    Echo,
    Unreachable,
    OutOfBounds,
    DivideByZero,
    /// Unbounded recursion
    StackOverflow,
}

impl GuestProgram {
    pub const ALL: [GuestProgram; 5] = [
        GuestProgram::Echo,
        GuestProgram::Unreachable,
        GuestProgram::OutOfBounds,
        GuestProgram::DivideByZero,
        GuestProgram::StackOverflow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            GuestProgram::Echo => "echo",
            GuestProgram::Unreachable => "unreachable",
            GuestProgram::OutOfBounds => "out-of-bounds",
            GuestProgram::DivideByZero => "divide-by-zero",
            GuestProgram::StackOverflow => "stack-overflow",
        }
    }

    pub fn program(&self) -> Result<Program> {
        let main = match self {
            GuestProgram::Echo => vec![
                Instr::Emit("echo:".to_string()),
                Instr::EmitInput,
                Instr::Const(200),
                Instr::SetStatus,
            ],
            GuestProgram::Unreachable => vec![Instr::Emit("partial".to_string()), Instr::Unreachable],
            GuestProgram::OutOfBounds => vec![
                Instr::Const(DEFAULT_MEMORY_SIZE as i32),
                Instr::Load,
                Instr::EmitTop,
            ],
            GuestProgram::DivideByZero => vec![
                Instr::Const(7),
                Instr::Const(0),
                Instr::DivS,
                Instr::EmitTop,
            ],
            GuestProgram::StackOverflow => vec![Instr::Call(1)],
        };

        let mut functions = vec![Function::new("main", main)];
        if *self == GuestProgram::StackOverflow {
            functions.push(Function::new("recurse", vec![Instr::Call(1)]));
        }
        Program::new(self.name(), functions, DEFAULT_MEMORY_SIZE)
    }
}

impl FromStr for GuestProgram {
    type Err = StructuredError;

    fn from_str(s: &str) -> Result<Self> {
        GuestProgram::ALL
            .into_iter()
            .find(|program| program.name() == s)
            .ok_or_else(|| {
                StructuredError::configuration(format!("unknown guest program '{s}'"))
            })
    }
}

impl fmt::Display for GuestProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use crate::engine::{ExecutionEngine, GuestInput, StackMachine};
    use crate::signals::{TrapInterceptor, TrapKind};
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_catalog_names_round_trip() {
        for program in GuestProgram::ALL {
            assert_eq!(program.name().parse::<GuestProgram>().unwrap(), program);
            assert!(program.program().is_ok(), "{program} failed validation");
        }
        assert_eq!(
            "segfault".parse::<GuestProgram>().unwrap_err().kind,
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_echo_output() {
        let mut machine = StackMachine::new(GuestProgram::Echo.program().unwrap());
        let input = GuestInput {
            body: b"test-body-from-mock".to_vec(),
            ..GuestInput::default()
        };
        let output = machine.execute(&input).unwrap();
        assert_eq!(output.status_code, Some(200));
        assert_eq!(output.body, b"echo:test-body-from-mock");
    }

    #[test]
    #[serial]
    fn test_faulting_programs_trap_with_their_kind() {
        let interceptor = TrapInterceptor::default();
        let cases = [
            (GuestProgram::Unreachable, TrapKind::Unreachable),
            (GuestProgram::OutOfBounds, TrapKind::MemoryOutOfBounds),
            (GuestProgram::DivideByZero, TrapKind::IntegerDivision),
            (GuestProgram::StackOverflow, TrapKind::StackExhausted),
        ];
        for (program, expected) in cases {
            let mut machine = StackMachine::new(program.program().unwrap());
            let error = interceptor
                .run_guarded(|_| machine.execute(&GuestInput::default()))
                .unwrap_err();
            assert_eq!(error.kind, ErrorKind::Trap(expected), "{program}");
        }
    }
}
