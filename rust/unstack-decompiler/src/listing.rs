//! Disassembly listings.

use std::fmt::Write;

use crate::decode::Instruction;

/// One line per instruction: logical index, byte offset, `OPNAME(operand)`.
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for inst in instructions {
        let _ = writeln!(out, "{:>4} {:>6}  {inst}", inst.index, inst.offset);
    }
    out
}
