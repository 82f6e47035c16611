//! Basic block construction.
//!
//! Two passes over the resolved instruction list:
//!
//! 1. **Collect**: walk the instructions once and record every index a
//!    control-flow rule opens a block at. Index 0 is always the entry.
//! 2. **Slice**: cut the list at those indices into an arena keyed by start
//!    index, then attach successors from each block's control instructions.
//!
//! Successors are block ids (start indices), never references, so loop
//! back-edges need no shared ownership. Back-edges open no block at all; the
//! emitter renders them as `continue`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, trace};
use unstack_core::OpCode;

use crate::decode::{Instruction, Operand};
use crate::error::{DecompileError, Result};

/// How an opcode shapes control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRule {
    /// No control-flow effect.
    Straight,
    /// Pop and jump if false: true path falls through, false path jumps.
    Branch,
    /// Unconditional forward jump to a join point.
    ForwardJump,
    /// Absolute jump: a back-edge when the target is not ahead of it.
    Jump,
    /// Iterator setup; the loop body starts at the next instruction.
    LoopHeader,
    /// Iterator step; the jump target is where the loop exits to.
    LoopStep,
}

/// Control rule for every modeled opcode; `None` for the rest.
pub(crate) fn control_rule(op: OpCode) -> Option<ControlRule> {
    use OpCode::*;
    let rule = match op {
        PopJumpIfFalse => ControlRule::Branch,
        JumpForward => ControlRule::ForwardJump,
        JumpAbsolute => ControlRule::Jump,
        GetIter => ControlRule::LoopHeader,
        ForIter => ControlRule::LoopStep,
        LoadConst | LoadFast | LoadName | LoadGlobal | LoadAttr | BuildList | StoreFast
        | StoreSubscr | CallFunction | ReturnValue | PopTop | SetupLoop | PopBlock | Nop => {
            ControlRule::Straight
        }
        RotTwo | DupTop | UnaryNot | BinaryAdd | BinarySubscr | BreakLoop | StoreName
        | StoreAttr | StoreGlobal | BuildTuple | BuildMap | CompareOp | JumpIfFalseOrPop
        | JumpIfTrueOrPop | PopJumpIfTrue => return None,
    };
    Some(rule)
}

/// The loop variable bound by a loop header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBinding {
    pub variable: String,
    /// Index of the store that binds `variable`; elided from emission.
    pub store: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successors {
    None,
    Single(usize),
    Branch { on_true: usize, on_false: usize },
    LoopHeader { body: usize, binding: LoopBinding },
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Index of the block's first instruction.
    pub id: usize,
    pub instructions: Vec<Instruction>,
    pub successors: Successors,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// One past the index of the block's last instruction.
    pub fn end(&self) -> usize {
        self.id + self.instructions.len()
    }
}

/// Immutable arena of basic blocks keyed by start index.
#[derive(Debug, Clone)]
pub struct BlockGraph {
    blocks: BTreeMap<usize, BasicBlock>,
    elided: BTreeSet<usize>,
}

impl BlockGraph {
    pub fn entry(&self) -> usize {
        0
    }

    pub fn block(&self, id: usize) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether the instruction at `index` is folded into another statement.
    pub fn is_elided(&self, index: usize) -> bool {
        self.elided.contains(&index)
    }
}

impl fmt::Display for BlockGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in self.blocks() {
            write!(f, "block {} [{}..{})", block.id, block.id, block.end())?;
            match &block.successors {
                Successors::None => writeln!(f)?,
                Successors::Single(next) => writeln!(f, " -> {next}")?,
                Successors::Branch { on_true, on_false } => {
                    writeln!(f, " -> true {on_true}, false {on_false}")?
                }
                Successors::LoopHeader { body, binding } => {
                    writeln!(f, " -> loop {body} binding {}", binding.variable)?
                }
            }
        }
        Ok(())
    }
}

/// Partition resolved instructions into basic blocks.
pub fn build_blocks(instructions: &[Instruction]) -> Result<BlockGraph> {
    let starts = collect_block_starts(instructions)?;

    let mut blocks = BTreeMap::new();
    let mut elided = BTreeSet::new();
    let bounds: Vec<usize> = starts.iter().copied().collect();

    for (i, &start) in bounds.iter().enumerate() {
        let end = bounds.get(i + 1).copied().unwrap_or(instructions.len());
        let mut successors = Successors::None;

        for (offset, inst) in instructions[start..end].iter().enumerate() {
            let pc = start + offset;
            match control_rule(inst.op).unwrap_or(ControlRule::Straight) {
                ControlRule::Straight => {}
                ControlRule::Branch => {
                    successors = Successors::Branch {
                        on_true: pc + 1,
                        on_false: inst.target()?,
                    };
                }
                ControlRule::ForwardJump | ControlRule::LoopStep => {
                    successors = Successors::Single(inst.target()?);
                }
                ControlRule::Jump => {
                    let target = inst.target()?;
                    if target > pc {
                        successors = Successors::Single(target);
                    }
                }
                ControlRule::LoopHeader => {
                    let binding = loop_binding(instructions, pc)?;
                    elided.insert(binding.store);
                    successors = Successors::LoopHeader {
                        body: pc + 1,
                        binding,
                    };
                }
            }
        }

        trace!(block = start, end, successors = ?successors, "sealed block");
        blocks.insert(
            start,
            BasicBlock {
                id: start,
                instructions: instructions[start..end].to_vec(),
                successors,
            },
        );
    }

    debug!(
        instructions = instructions.len(),
        blocks = blocks.len(),
        "built basic blocks"
    );
    Ok(BlockGraph { blocks, elided })
}

/// Every index some instruction opens a block at, plus the entry.
fn collect_block_starts(instructions: &[Instruction]) -> Result<BTreeSet<usize>> {
    let mut starts = BTreeSet::from([0]);
    let len = instructions.len();

    let mut open = |inst: &Instruction, target: usize| -> Result<()> {
        if target >= len {
            return Err(DecompileError::DanglingBlock {
                opcode: inst.op,
                index: inst.index,
                target,
            });
        }
        starts.insert(target);
        Ok(())
    };

    for (pc, inst) in instructions.iter().enumerate() {
        match control_rule(inst.op).unwrap_or(ControlRule::Straight) {
            ControlRule::Straight => {}
            ControlRule::Branch => {
                open(inst, pc + 1)?;
                open(inst, inst.target()?)?;
            }
            ControlRule::ForwardJump | ControlRule::LoopStep => open(inst, inst.target()?)?,
            ControlRule::Jump => {
                let target = inst.target()?;
                if target > pc {
                    open(inst, target)?;
                }
            }
            ControlRule::LoopHeader => open(inst, pc + 1)?,
        }
    }

    Ok(starts)
}

/// The header at `pc` must be followed by the step and the store that binds
/// the loop variable.
fn loop_binding(instructions: &[Instruction], pc: usize) -> Result<LoopBinding> {
    let malformed = || DecompileError::MalformedLoop { index: pc };
    let step = instructions.get(pc + 1).ok_or_else(malformed)?;
    let store = instructions.get(pc + 2).ok_or_else(malformed)?;

    match (step.op, store.op, &store.operand) {
        (OpCode::ForIter, OpCode::StoreFast, Operand::Local(variable)) => Ok(LoopBinding {
            variable: variable.clone(),
            store: pc + 2,
        }),
        _ => Err(malformed()),
    }
}
