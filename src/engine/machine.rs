/*!
 * Stack Machine
 * Minimal guest VM whose faults are delivered as signals
 *
 * Each call frame has its own operand stack. Programs are validated when built, so
 * execution never underflows an operand stack.
 */

use super::traits::{ExecutionEngine, GuestInput, GuestOutput};
use crate::core::errors::{Result, StructuredError};
use crate::signals::{deliver_fault, TrapEvent, TrapKind};
use tracing::{debug, trace};

pub const DEFAULT_MEMORY_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
pub const DEFAULT_MAX_OPERANDS: usize = 1024;

/// One instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Const(i32),
    Add,
    Sub,
    Mul,
    /// Signed division; traps on zero divisor or overflow
    DivS,
    /// Pop address, push the i32 stored there
    Load,
    /// Pop value, pop address, store
    Store,
    Drop,
    Call(usize),
    Return,
    Unreachable,
    /// Append literal text to the output body
    Emit(String),
    /// Append the invocation body to the output body
    EmitInput,
    /// Pop a value and append it in decimal
    EmitTop,
    /// Pop a value and use it as the response status
    SetStatus,
}

impl Instr {
    /// (operands required, net stack effect)
    fn stack_effect(&self) -> (usize, isize) {
        match self {
            Instr::Const(_) => (0, 1),
            Instr::Add | Instr::Sub | Instr::Mul | Instr::DivS => (2, -1),
            Instr::Load => (1, 0),
            Instr::Store => (2, -2),
            Instr::Drop | Instr::EmitTop | Instr::SetStatus => (1, -1),
            Instr::Call(_)
            | Instr::Return
            | Instr::Unreachable
            | Instr::Emit(_)
            | Instr::EmitInput => (0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub body: Vec<Instr>,
}

impl Function {
    pub fn new(name: impl Into<String>, body: Vec<Instr>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// A validated guest program; function 0 is the entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    name: String,
    functions: Vec<Function>,
    memory_size: usize,
}

impl Program {
    pub fn new(name: impl Into<String>, functions: Vec<Function>, memory_size: usize) -> Result<Self> {
        let name = name.into();
        if functions.is_empty() {
            return Err(StructuredError::configuration(format!(
                "program '{name}' has no entry function"
            )));
        }
        for function in &functions {
            validate(function, functions.len())?;
        }
        Ok(Self {
            name,
            functions,
            memory_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }
}

fn validate(function: &Function, function_count: usize) -> Result<()> {
    let mut height: isize = 0;
    for (pc, instr) in function.body.iter().enumerate() {
        if let Instr::Call(target) = instr {
            if *target >= function_count {
                return Err(StructuredError::configuration(format!(
                    "{}@{pc}: call to undefined function {target}",
                    function.name
                )));
            }
        }
        let (needs, effect) = instr.stack_effect();
        if height < needs as isize {
            return Err(StructuredError::configuration(format!(
                "{}@{pc}: {instr:?} needs {needs} operands, stack has {height}",
                function.name
            )));
        }
        height += effect;
    }
    Ok(())
}

struct Frame {
    function: usize,
    pc: usize,
    operands: Vec<i32>,
}

impl Frame {
    fn new(function: usize) -> Self {
        Self {
            function,
            pc: 0,
            operands: Vec::new(),
        }
    }

    fn push(&mut self, value: i32, limit: usize) -> std::result::Result<(), TrapEvent> {
        if self.operands.len() >= limit {
            return Err(deliver_fault(TrapKind::StackExhausted));
        }
        self.operands.push(value);
        Ok(())
    }

    fn pop(&mut self) -> std::result::Result<i32, TrapEvent> {
        // validated programs never get here
        self.operands
            .pop()
            .ok_or_else(|| deliver_fault(TrapKind::Unreachable))
    }

    fn pop2(&mut self) -> std::result::Result<(i32, i32), TrapEvent> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }
}

fn effective_address(memory: &[u8], addr: i32) -> Option<usize> {
    let start = usize::try_from(addr).ok()?;
    let end = start.checked_add(4)?;
    (end <= memory.len()).then_some(start)
}

/// Interpreter for [`Program`]
#[derive(Debug, Clone)]
pub struct StackMachine {
    program: Program,
    max_call_depth: usize,
    max_operands: usize,
}

impl StackMachine {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_operands: DEFAULT_MAX_OPERANDS,
        }
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

impl ExecutionEngine for StackMachine {
    fn execute(&mut self, input: &GuestInput) -> std::result::Result<GuestOutput, TrapEvent> {
        debug!(program = self.program.name(), request_id = %input.request_id, "Executing guest");
        let mut memory = vec![0u8; self.program.memory_size];
        let mut output = GuestOutput::default();
        let mut frames = vec![Frame::new(0)];

        while let Some(frame) = frames.last_mut() {
            let function = &self.program.functions[frame.function];
            let Some(instr) = function.body.get(frame.pc) else {
                // falling off the end returns
                frames.pop();
                continue;
            };
            frame.pc += 1;
            trace!(function = %function.name, pc = frame.pc - 1, ?instr);

            match instr {
                Instr::Const(value) => frame.push(*value, self.max_operands)?,
                Instr::Add => {
                    let (a, b) = frame.pop2()?;
                    frame.push(a.wrapping_add(b), self.max_operands)?;
                }
                Instr::Sub => {
                    let (a, b) = frame.pop2()?;
                    frame.push(a.wrapping_sub(b), self.max_operands)?;
                }
                Instr::Mul => {
                    let (a, b) = frame.pop2()?;
                    frame.push(a.wrapping_mul(b), self.max_operands)?;
                }
                Instr::DivS => {
                    let (a, b) = frame.pop2()?;
                    let quotient = a
                        .checked_div(b)
                        .ok_or_else(|| deliver_fault(TrapKind::IntegerDivision))?;
                    frame.push(quotient, self.max_operands)?;
                }
                Instr::Load => {
                    let addr = frame.pop()?;
                    let start = effective_address(&memory, addr)
                        .ok_or_else(|| deliver_fault(TrapKind::MemoryOutOfBounds))?;
                    let mut word = [0u8; 4];
                    word.copy_from_slice(&memory[start..start + 4]);
                    frame.push(i32::from_le_bytes(word), self.max_operands)?;
                }
                Instr::Store => {
                    let value = frame.pop()?;
                    let addr = frame.pop()?;
                    let start = effective_address(&memory, addr)
                        .ok_or_else(|| deliver_fault(TrapKind::MemoryOutOfBounds))?;
                    memory[start..start + 4].copy_from_slice(&value.to_le_bytes());
                }
                Instr::Drop => {
                    frame.pop()?;
                }
                Instr::Call(target) => {
                    if frames.len() >= self.max_call_depth {
                        return Err(deliver_fault(TrapKind::StackExhausted));
                    }
                    frames.push(Frame::new(*target));
                }
                Instr::Return => {
                    frames.pop();
                }
                Instr::Unreachable => return Err(deliver_fault(TrapKind::Unreachable)),
                Instr::Emit(text) => output.body.extend_from_slice(text.as_bytes()),
                Instr::EmitInput => output.body.extend_from_slice(&input.body),
                Instr::EmitTop => {
                    let value = frame.pop()?;
                    output.body.extend_from_slice(value.to_string().as_bytes());
                }
                Instr::SetStatus => output.status_code = Some(frame.pop()?),
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn run(body: Vec<Instr>) -> GuestOutput {
        let program = Program::new("test", vec![Function::new("main", body)], 64).unwrap();
        StackMachine::new(program)
            .execute(&GuestInput::default())
            .unwrap()
    }

    #[test]
    fn test_validation_rejects_underflow() {
        let error = Program::new("bad", vec![Function::new("main", vec![Instr::Add])], 0).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_validation_rejects_undefined_call() {
        let error =
            Program::new("bad", vec![Function::new("main", vec![Instr::Call(3)])], 0).unwrap_err();
        assert!(error.message.contains("undefined function 3"));
    }

    #[test]
    fn test_memory_roundtrip_and_status() {
        let output = run(vec![
            Instr::Const(8),
            Instr::Const(-17),
            Instr::Store,
            Instr::Const(8),
            Instr::Load,
            Instr::EmitTop,
            Instr::Const(201),
            Instr::SetStatus,
        ]);
        assert_eq!(output.body, b"-17");
        assert_eq!(output.status_code, Some(201));
    }

    #[test]
    fn test_calls_return_to_caller() {
        let program = Program::new(
            "calls",
            vec![
                Function::new("main", vec![Instr::Call(1), Instr::Emit("b".into())]),
                Function::new("helper", vec![Instr::Emit("a".into()), Instr::Return, Instr::Emit("x".into())]),
            ],
            0,
        )
        .unwrap();
        let output = StackMachine::new(program).execute(&GuestInput::default()).unwrap();
        assert_eq!(output.body, b"ab");
    }

    #[test]
    fn test_effective_address_bounds() {
        let memory = [0u8; 8];
        assert_eq!(effective_address(&memory, 4), Some(4));
        assert_eq!(effective_address(&memory, 5), None);
        assert_eq!(effective_address(&memory, -1), None);
    }

    proptest! {
        #[test]
        fn prop_arithmetic_wraps_like_i32(a in any::<i32>(), b in any::<i32>()) {
            let output = run(vec![Instr::Const(a), Instr::Const(b), Instr::Mul, Instr::EmitTop]);
            prop_assert_eq!(output.body, a.wrapping_mul(b).to_string().into_bytes());
        }

        #[test]
        fn prop_division_by_nonzero_never_traps(a in any::<i32>(), b in 1..i32::MAX) {
            let output = run(vec![Instr::Const(a), Instr::Const(b), Instr::DivS, Instr::EmitTop]);
            prop_assert_eq!(output.body, (a / b).to_string().into_bytes());
        }
    }
}
