//! Decompilation errors.
//!
//! Every variant aborts the whole decompilation; there is no partial output.

use thiserror::Error;
use unstack_core::OpCode;

/// Side table an operand indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Table {
    Constants,
    Names,
    Locals,
}

#[derive(Debug, Error)]
pub enum DecompileError {
    #[error("unsupported opcode {opcode} at byte offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },

    #[error("{opcode} at byte offset {offset} is missing its operand bytes")]
    TruncatedOperand { opcode: OpCode, offset: usize },

    #[error("{opcode} at byte offset {offset}: {table} index {index} out of range (table has {len})")]
    OperandOutOfRange {
        opcode: OpCode,
        offset: usize,
        table: Table,
        index: usize,
        len: usize,
    },

    #[error("jump at instruction {index} targets byte offset {target}, which starts no instruction")]
    UnresolvedJumpTarget { index: usize, target: usize },

    #[error("{opcode} at instruction {index} opens a block at {target}, past the last instruction")]
    DanglingBlock {
        opcode: OpCode,
        index: usize,
        target: usize,
    },

    #[error("loop header at instruction {index} is not followed by FOR_ITER and STORE_FAST")]
    MalformedLoop { index: usize },

    #[error("no block starts at instruction {id}")]
    MissingBlock { id: usize },

    #[error("block {block} has no {expected} successors")]
    MissingSuccessors { block: usize, expected: &'static str },

    #[error("no handler for {opcode} at instruction {index}")]
    MissingHandler { opcode: OpCode, index: usize },

    #[error("{opcode} at instruction {index} needs {expected} stack fragments, found {found}")]
    StackArityMismatch {
        opcode: OpCode,
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("{opcode} at instruction {index} needs a {expected} operand")]
    UnexpectedOperand {
        opcode: OpCode,
        index: usize,
        expected: &'static str,
    },

    #[error("control flow at instruction {index} nests deeper than {limit} levels")]
    NestingTooDeep { index: usize, limit: usize },

    #[error("output exceeds {limit} statements")]
    TooManyStatements { limit: usize },

    #[error("invalid options: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, DecompileError>;
