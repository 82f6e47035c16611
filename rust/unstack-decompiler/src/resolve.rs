//! Jump resolution: byte offsets to instruction indices.

use tracing::debug;

use crate::decode::{Instruction, JumpTarget, Operand};
use crate::error::{DecompileError, Result};

/// Rewrite every pending `JumpTarget::Offset` to the index of the instruction
/// starting at that offset. Never adds, removes or reorders instructions.
pub fn resolve_jumps(instructions: &mut [Instruction]) -> Result<()> {
    // Decoding is sequential, so offsets are sorted.
    let offsets: Vec<usize> = instructions.iter().map(|inst| inst.offset).collect();
    let mut resolved = 0usize;

    for (index, inst) in instructions.iter_mut().enumerate() {
        if let Operand::Jump(JumpTarget::Offset(target)) = inst.operand {
            let found = offsets
                .binary_search(&target)
                .map_err(|_| DecompileError::UnresolvedJumpTarget { index, target })?;
            inst.operand = Operand::Jump(JumpTarget::Index(found));
            resolved += 1;
        }
    }

    debug!(jumps = resolved, "resolved jump targets");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use unstack_core::{BytecodeWriter, CompiledFunction, Constant, OpCode};

    fn branch_function() -> CompiledFunction {
        // if z: return 1 else: return 2
        let mut w = BytecodeWriter::new();
        w.op_arg(OpCode::LoadGlobal, 0)
            .op_arg(OpCode::PopJumpIfFalse, 10)
            .op_arg(OpCode::LoadConst, 1)
            .op(OpCode::ReturnValue)
            .op_arg(OpCode::LoadConst, 2)
            .op(OpCode::ReturnValue)
            .op_arg(OpCode::LoadConst, 0)
            .op(OpCode::ReturnValue);
        CompiledFunction::new("f", w.finish())
            .with_constants(vec![Constant::None, Constant::Int(1), Constant::Int(2)])
            .with_names(["z"])
    }

    #[test]
    fn absolute_jump_resolves_to_index() {
        let mut instructions = decode(&branch_function()).unwrap();
        resolve_jumps(&mut instructions).unwrap();
        assert_eq!(instructions[1].operand, Operand::Jump(JumpTarget::Index(4)));
        assert_eq!(instructions.len(), 8);
    }

    #[test]
    fn relative_jump_resolves_to_index() {
        // if z: x else: y; return 2
        let mut w = BytecodeWriter::new();
        w.op_arg(OpCode::LoadGlobal, 0)
            .op_arg(OpCode::PopJumpIfFalse, 13)
            .op_arg(OpCode::LoadGlobal, 1)
            .op(OpCode::PopTop)
            .op_arg(OpCode::JumpForward, 4)
            .op_arg(OpCode::LoadGlobal, 2)
            .op(OpCode::PopTop)
            .op_arg(OpCode::LoadConst, 1)
            .op(OpCode::ReturnValue);
        let function = CompiledFunction::new("f", w.finish())
            .with_constants(vec![Constant::None, Constant::Int(2)])
            .with_names(["z", "x", "y"]);

        let mut instructions = decode(&function).unwrap();
        resolve_jumps(&mut instructions).unwrap();
        assert_eq!(instructions[1].target().unwrap(), 5);
        assert_eq!(instructions[4].target().unwrap(), 7);
    }

    #[test]
    fn every_decoded_jump_resolves() {
        let mut instructions = decode(&branch_function()).unwrap();
        resolve_jumps(&mut instructions).unwrap();
        for inst in instructions.iter().filter(|inst| inst.op.is_jump()) {
            assert!(inst.target().unwrap() < instructions.len());
        }
    }

    #[test]
    fn jump_into_operand_bytes_fails() {
        let mut w = BytecodeWriter::new();
        w.op_arg(OpCode::JumpAbsolute, 1).op(OpCode::Nop);
        let mut instructions = decode(&CompiledFunction::new("f", w.finish())).unwrap();
        assert!(matches!(
            resolve_jumps(&mut instructions),
            Err(DecompileError::UnresolvedJumpTarget {
                index: 0,
                target: 1
            })
        ));
    }

    #[test]
    fn jump_past_the_end_fails() {
        let mut w = BytecodeWriter::new();
        w.op_arg(OpCode::JumpForward, 10);
        let mut instructions = decode(&CompiledFunction::new("f", w.finish())).unwrap();
        assert!(matches!(
            resolve_jumps(&mut instructions),
            Err(DecompileError::UnresolvedJumpTarget {
                index: 0,
                target: 13
            })
        ));
    }
}
