//! Byte-level encoder for hand-assembled code objects.

use crate::bytecode::OpCode;

/// Appends encoded instructions to a byte buffer.
///
/// Argument-free opcodes take one byte; every other opcode is followed by a
/// 2-byte little-endian operand.
#[derive(Debug, Default, Clone)]
pub struct BytecodeWriter {
    code: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset the next instruction will start at.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, op: OpCode) -> &mut Self {
        assert!(!op.has_argument(), "{op} requires an operand");
        self.code.push(op.byte());
        self
    }

    pub fn op_arg(&mut self, op: OpCode, arg: u16) -> &mut Self {
        assert!(op.has_argument(), "{op} takes no operand");
        self.code.push(op.byte());
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    /// Overwrite the operand of the argument instruction starting at `at`.
    /// Used to back-patch forward jumps once their target is known.
    pub fn patch(&mut self, at: usize, arg: u16) -> &mut Self {
        let [lo, hi] = arg.to_le_bytes();
        self.code[at + 1] = lo;
        self.code[at + 2] = hi;
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        self.code.clone()
    }
}
