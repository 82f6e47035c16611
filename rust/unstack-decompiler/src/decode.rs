//! Instruction decoding.
//!
//! Turns a raw code buffer into typed instructions whose operands are already
//! looked up in the function's side tables. Jump operands come out as byte
//! offsets and are rewritten to instruction indices by [`crate::resolve`].

use std::fmt;

use tracing::debug;
use unstack_core::{CompiledFunction, Constant, OpCode, OperandKind};

use crate::error::{DecompileError, Result, Table};

/// Where a jump lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    /// Absolute byte offset, before resolution.
    Offset(usize),
    /// Logical index into the instruction list.
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Constant(Constant),
    Name(String),
    Local(String),
    Immediate(u16),
    Jump(JumpTarget),
}

impl Operand {
    pub fn immediate(&self) -> Option<u16> {
        match self {
            Operand::Immediate(n) => Some(*n),
            _ => None,
        }
    }

    pub fn jump(&self) -> Option<JumpTarget> {
        match self {
            Operand::Jump(target) => Some(*target),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Constant(c) => write!(f, "{c}"),
            Operand::Name(name) | Operand::Local(name) => f.write_str(name),
            Operand::Immediate(n) => write!(f, "{n}"),
            Operand::Jump(JumpTarget::Index(i)) => write!(f, "{i}"),
            Operand::Jump(JumpTarget::Offset(o)) => write!(f, "@{o}"),
        }
    }
}

/// A decoded instruction.
///
/// Equality compares `op` and `operand` only, so two decodings of the same
/// code compare equal regardless of offset bookkeeping.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Operand,
    /// Byte offset the instruction starts at.
    pub offset: usize,
    /// Position in the instruction list.
    pub index: usize,
}

impl Instruction {
    pub fn new(op: OpCode, operand: Operand) -> Self {
        Self::at(0, op, operand)
    }

    /// Hand-built instruction at `index`; its byte offset is taken to be the index.
    pub fn at(index: usize, op: OpCode, operand: Operand) -> Self {
        Self {
            op,
            operand,
            offset: index,
            index,
        }
    }

    /// Resolved jump target of this instruction.
    pub fn target(&self) -> Result<usize> {
        match self.operand {
            Operand::Jump(JumpTarget::Index(index)) => Ok(index),
            Operand::Jump(JumpTarget::Offset(target)) => Err(DecompileError::UnresolvedJumpTarget {
                index: self.index,
                target,
            }),
            _ => Err(self.unexpected_operand("jump target")),
        }
    }

    /// Count operand of `BUILD_LIST` and `CALL_FUNCTION`.
    pub fn count(&self) -> Result<usize> {
        self.operand
            .immediate()
            .map(usize::from)
            .ok_or_else(|| self.unexpected_operand("count"))
    }

    fn unexpected_operand(&self, expected: &'static str) -> DecompileError {
        DecompileError::UnexpectedOperand {
            opcode: self.op,
            index: self.index,
            expected,
        }
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.operand == other.operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}", self.op),
            ref operand => write!(f, "{}({operand})", self.op),
        }
    }
}

/// Decode `function.byte_code` into instructions.
pub fn decode(function: &CompiledFunction) -> Result<Vec<Instruction>> {
    let code = &function.byte_code;
    let mut instructions = Vec::new();
    let mut pc = 0;

    while pc < code.len() {
        let offset = pc;
        let byte = code[pc];
        pc += 1;

        let op = OpCode::from_byte(byte)
            .filter(|op| op.is_modeled())
            .ok_or(DecompileError::UnsupportedOpcode {
                opcode: byte,
                offset,
            })?;

        let operand = if op.has_argument() {
            let bytes = code
                .get(pc..pc + 2)
                .ok_or(DecompileError::TruncatedOperand { opcode: op, offset })?;
            let arg = u16::from_le_bytes([bytes[0], bytes[1]]);
            pc += 2;
            decode_operand(function, op, offset, pc, arg)?
        } else {
            Operand::None
        };

        instructions.push(Instruction {
            op,
            operand,
            offset,
            index: instructions.len(),
        });
    }

    debug!(
        bytes = code.len(),
        instructions = instructions.len(),
        "decoded bytecode"
    );
    Ok(instructions)
}

/// `next` is the byte offset just past this instruction.
fn decode_operand(
    function: &CompiledFunction,
    op: OpCode,
    offset: usize,
    next: usize,
    arg: u16,
) -> Result<Operand> {
    let index = arg as usize;
    let operand = match op.operand_kind() {
        OperandKind::None => Operand::None,
        OperandKind::Constant => Operand::Constant(
            lookup(&function.constants, Table::Constants, op, offset, index)?.clone(),
        ),
        OperandKind::Name => {
            Operand::Name(lookup(&function.names, Table::Names, op, offset, index)?.clone())
        }
        OperandKind::Local => {
            Operand::Local(lookup(&function.locals, Table::Locals, op, offset, index)?.clone())
        }
        OperandKind::Immediate => Operand::Immediate(arg),
        OperandKind::RelativeJump => Operand::Jump(JumpTarget::Offset(next + index)),
        OperandKind::AbsoluteJump => Operand::Jump(JumpTarget::Offset(index)),
    };
    Ok(operand)
}

fn lookup<'a, T>(
    table: &'a [T],
    which: Table,
    opcode: OpCode,
    offset: usize,
    index: usize,
) -> Result<&'a T> {
    table.get(index).ok_or(DecompileError::OperandOutOfRange {
        opcode,
        offset,
        table: which,
        index,
        len: table.len(),
    })
}
