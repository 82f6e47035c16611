//! Structured statement emission.
//!
//! Symbolically executes the block graph with a stack of source-text
//! fragments. Loads push fragments, stores/returns/discards turn them into
//! statements, and branch and loop headers open nested, indented bodies.
//!
//! Nesting is driven by an explicit frame stack rather than native recursion:
//! a handler that opens a body returns [`Step::Descend`] with the frames to
//! run, and the rest of the current block is resumed afterwards. Join points
//! (forward jumps, loop exits) go on a separate LIFO work-list that is only
//! drained once all nested frames are done, at the base indentation.
//!
//! Shared successors are re-emitted in every arm that reaches them, so output
//! can grow much faster than the input; `max_statements` caps it.

use std::collections::BTreeSet;

use tracing::{debug, trace};
use unstack_core::OpCode;

use crate::blocks::{BasicBlock, BlockGraph, Successors};
use crate::decode::Instruction;
use crate::error::{DecompileError, Result};
use crate::options::DecompileOptions;

/// Indentation level of the function body.
pub const BASE_INDENT: usize = 1;

/// One line of output, before indentation is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub indent: usize,
    pub text: String,
}

/// Reconstruction rule for an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    Ignore,
    /// Push the operand's literal or identifier text.
    Load,
    LoadAttr,
    BuildList,
    StoreLocal,
    StoreIndexed,
    Call,
    Return,
    Discard,
    Branch,
    /// Queue the jump target as a join point.
    Join,
    /// `continue` for back-edges, join point otherwise.
    Jump,
    LoopHeader,
}

/// Emission rule for every modeled opcode; `None` for the rest.
pub(crate) fn handler_for(op: OpCode) -> Option<Handler> {
    use OpCode::*;
    let handler = match op {
        LoadConst | LoadFast | LoadName | LoadGlobal => Handler::Load,
        LoadAttr => Handler::LoadAttr,
        BuildList => Handler::BuildList,
        StoreFast => Handler::StoreLocal,
        StoreSubscr => Handler::StoreIndexed,
        CallFunction => Handler::Call,
        ReturnValue => Handler::Return,
        PopTop => Handler::Discard,
        PopJumpIfFalse => Handler::Branch,
        JumpForward | ForIter => Handler::Join,
        JumpAbsolute => Handler::Jump,
        GetIter => Handler::LoopHeader,
        SetupLoop | PopBlock | Nop => Handler::Ignore,
        RotTwo | DupTop | UnaryNot | BinaryAdd | BinarySubscr | BreakLoop | StoreName
        | StoreAttr | StoreGlobal | BuildTuple | BuildMap | CompareOp | JumpIfFalseOrPop
        | JumpIfTrueOrPop | PopJumpIfTrue => return None,
    };
    Some(handler)
}

/// What to run after the current handler.
enum Step {
    Advance,
    /// Suspend the current block, run these frames in order, then resume
    /// with the next instruction.
    Descend(Vec<Frame>),
}

enum Frame {
    Block {
        id: usize,
        indent: usize,
        resume_at: usize,
    },
    Line {
        indent: usize,
        text: String,
    },
}

/// Expression fragments awaiting a consumer.
#[derive(Debug, Default)]
struct OperandStack {
    fragments: Vec<String>,
}

impl OperandStack {
    fn push(&mut self, fragment: String) {
        self.fragments.push(fragment);
    }

    /// Take exactly `count` fragments, bottom first. The stack must hold
    /// exactly that many.
    fn take(&mut self, count: usize, opcode: OpCode, index: usize) -> Result<Vec<String>> {
        if self.fragments.len() != count {
            return Err(DecompileError::StackArityMismatch {
                opcode,
                index,
                expected: count,
                found: self.fragments.len(),
            });
        }
        Ok(std::mem::take(&mut self.fragments))
    }

    fn take_array<const N: usize>(&mut self, opcode: OpCode, index: usize) -> Result<[String; N]> {
        let fragments = self.take(N, opcode, index)?;
        fragments
            .try_into()
            .map_err(|rest: Vec<String>| DecompileError::StackArityMismatch {
                opcode,
                index,
                expected: N,
                found: rest.len(),
            })
    }
}

struct Emitter<'g> {
    graph: &'g BlockGraph,
    max_depth: usize,
    max_statements: usize,
    stack: OperandStack,
    statements: Vec<Statement>,
    frames: Vec<Frame>,
    joins: Vec<usize>,
    joined: BTreeSet<usize>,
}

/// Emit the statements of the function body, starting at the entry block.
pub fn emit(graph: &BlockGraph, options: &DecompileOptions) -> Result<Vec<Statement>> {
    let mut emitter = Emitter {
        graph,
        max_depth: options.max_nesting_depth,
        max_statements: options.max_statements,
        stack: OperandStack::default(),
        statements: Vec::new(),
        frames: Vec::new(),
        joins: vec![graph.entry()],
        joined: BTreeSet::new(),
    };
    emitter.run()?;
    debug!(statements = emitter.statements.len(), "emitted statements");
    Ok(emitter.statements)
}

impl Emitter<'_> {
    fn run(&mut self) -> Result<()> {
        while let Some(id) = self.joins.pop() {
            if !self.joined.insert(id) {
                trace!(block = id, "join point already emitted");
                continue;
            }
            self.frames.push(Frame::Block {
                id,
                indent: BASE_INDENT,
                resume_at: 0,
            });
            while let Some(frame) = self.frames.pop() {
                match frame {
                    Frame::Line { indent, text } => self.line(indent, text)?,
                    Frame::Block {
                        id,
                        indent,
                        resume_at,
                    } => self.emit_block(id, indent, resume_at)?,
                }
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, id: usize, indent: usize, resume_at: usize) -> Result<()> {
        let graph = self.graph;
        let block = graph.block(id).ok_or(DecompileError::MissingBlock { id })?;
        trace!(block = id, indent, resume_at, "emitting block");

        for (pos, inst) in block.instructions.iter().enumerate().skip(resume_at) {
            let index = block.id + pos;
            if graph.is_elided(index) {
                continue;
            }
            match self.step(block, inst, index, indent)? {
                Step::Advance => {}
                Step::Descend(nested) => {
                    if pos + 1 < block.instructions.len() {
                        self.frames.push(Frame::Block {
                            id,
                            indent,
                            resume_at: pos + 1,
                        });
                    }
                    self.frames.extend(nested.into_iter().rev());
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn step(
        &mut self,
        block: &BasicBlock,
        inst: &Instruction,
        index: usize,
        indent: usize,
    ) -> Result<Step> {
        let op = inst.op;
        let handler = handler_for(op).ok_or(DecompileError::MissingHandler { opcode: op, index })?;

        match handler {
            Handler::Ignore => {}
            Handler::Load => self.stack.push(inst.operand.to_string()),
            Handler::LoadAttr => {
                let [object] = self.stack.take_array(op, index)?;
                self.stack.push(format!("{object}.{}", inst.operand));
            }
            Handler::BuildList => {
                let count = inst.count()?;
                if count == 0 {
                    self.stack.push("[]".to_string());
                } else {
                    let items = self.stack.take(count, op, index)?;
                    self.stack.push(format!("[{}]", items.join(", ")));
                }
            }
            Handler::StoreLocal => {
                let [value] = self.stack.take_array(op, index)?;
                self.line(indent, format!("{} = {value}", inst.operand))?;
            }
            Handler::StoreIndexed => {
                let [value, container, key] = self.stack.take_array(op, index)?;
                self.line(indent, format!("{container}[{key}] = {value}"))?;
            }
            Handler::Call => {
                let argc = inst.count()?;
                let mut fragments = self.stack.take(argc + 1, op, index)?.into_iter();
                let callee = fragments.next().unwrap_or_default();
                let args: Vec<String> = fragments.collect();
                self.stack.push(format!("{callee}({})", args.join(", ")));
            }
            Handler::Return => {
                // Emission carries on with the rest of the block; unreachable
                // code after a return is kept.
                let [value] = self.stack.take_array(op, index)?;
                self.line(indent, format!("return {value}"))?;
            }
            Handler::Discard => {
                let [value] = self.stack.take_array(op, index)?;
                self.line(indent, value)?;
            }
            Handler::Branch => {
                let [condition] = self.stack.take_array(op, index)?;
                let Successors::Branch { on_true, on_false } = block.successors else {
                    return Err(DecompileError::MissingSuccessors {
                        block: block.id,
                        expected: "branch",
                    });
                };
                let nested = self.nested(indent, index)?;
                self.line(indent, format!("if {condition}:"))?;
                return Ok(Step::Descend(vec![
                    Frame::Block {
                        id: on_true,
                        indent: nested,
                        resume_at: 0,
                    },
                    Frame::Line {
                        indent,
                        text: "else:".to_string(),
                    },
                    Frame::Block {
                        id: on_false,
                        indent: nested,
                        resume_at: 0,
                    },
                ]));
            }
            Handler::Join => self.join(inst.target()?),
            Handler::Jump => {
                let target = inst.target()?;
                if target > index {
                    self.join(target);
                } else {
                    self.line(indent, "continue".to_string())?;
                }
            }
            Handler::LoopHeader => {
                let [iterable] = self.stack.take_array(op, index)?;
                let Successors::LoopHeader { body, binding } = &block.successors else {
                    return Err(DecompileError::MissingSuccessors {
                        block: block.id,
                        expected: "loop header",
                    });
                };
                let nested = self.nested(indent, index)?;
                self.line(indent, format!("for {} in {iterable}:", binding.variable))?;
                return Ok(Step::Descend(vec![Frame::Block {
                    id: *body,
                    indent: nested,
                    resume_at: 0,
                }]));
            }
        }

        Ok(Step::Advance)
    }

    fn nested(&self, indent: usize, index: usize) -> Result<usize> {
        if indent >= self.max_depth {
            return Err(DecompileError::NestingTooDeep {
                index,
                limit: self.max_depth,
            });
        }
        Ok(indent + 1)
    }

    fn join(&mut self, target: usize) {
        trace!(block = target, "queued join point");
        self.joins.push(target);
    }

    fn line(&mut self, indent: usize, text: String) -> Result<()> {
        if self.statements.len() >= self.max_statements {
            return Err(DecompileError::TooManyStatements {
                limit: self.max_statements,
            });
        }
        self.statements.push(Statement { indent, text });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{build_blocks, control_rule};
    use crate::decode::{JumpTarget, Operand};
    use strum::IntoEnumIterator;
    use unstack_core::Constant;

    fn plain(index: usize, op: OpCode) -> Instruction {
        Instruction::at(index, op, Operand::None)
    }

    fn global(index: usize, name: &str) -> Instruction {
        Instruction::at(index, OpCode::LoadGlobal, Operand::Name(name.into()))
    }

    fn constant(index: usize, value: Constant) -> Instruction {
        Instruction::at(index, OpCode::LoadConst, Operand::Constant(value))
    }

    fn jump(index: usize, op: OpCode, target: usize) -> Instruction {
        Instruction::at(index, op, Operand::Jump(JumpTarget::Index(target)))
    }

    fn emit_default(program: &[Instruction]) -> Result<Vec<Statement>> {
        let graph = build_blocks(program)?;
        emit(&graph, &DecompileOptions::default())
    }

    fn lines(statements: &[Statement]) -> Vec<(usize, &str)> {
        statements
            .iter()
            .map(|s| (s.indent, s.text.as_str()))
            .collect()
    }

    #[test]
    fn every_modeled_opcode_has_builder_and_emitter_rules() {
        for op in OpCode::iter() {
            assert_eq!(handler_for(op).is_some(), op.is_modeled(), "{op} handler");
            assert_eq!(
                handler_for(op).is_some(),
                control_rule(op).is_some(),
                "{op} has a handler but no control rule, or the reverse"
            );
        }
    }

    #[test]
    fn call_renders_callee_then_arguments() {
        let program = vec![
            global(0, "print"),
            constant(1, Constant::Int(1)),
            constant(2, Constant::Str("a".into())),
            Instruction::at(3, OpCode::CallFunction, Operand::Immediate(2)),
            plain(4, OpCode::ReturnValue),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(lines(&statements), vec![(1, "return print(1, 'a')")]);
    }

    #[test]
    fn build_list_with_items() {
        let program = vec![
            constant(0, Constant::Int(1)),
            constant(1, Constant::Int(2)),
            Instruction::at(2, OpCode::BuildList, Operand::Immediate(2)),
            plain(3, OpCode::ReturnValue),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(lines(&statements), vec![(1, "return [1, 2]")]);
    }

    #[test]
    fn store_indexed_uses_stack_order() {
        let program = vec![
            constant(0, Constant::Int(3)),
            Instruction::at(1, OpCode::LoadFast, Operand::Local("x".into())),
            constant(2, Constant::Int(0)),
            plain(3, OpCode::StoreSubscr),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(lines(&statements), vec![(1, "x[0] = 3")]);
    }

    #[test]
    fn return_does_not_end_the_block() {
        let program = vec![
            constant(0, Constant::Int(1)),
            plain(1, OpCode::ReturnValue),
            constant(2, Constant::None),
            plain(3, OpCode::ReturnValue),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(
            lines(&statements),
            vec![(1, "return 1"), (1, "return None")]
        );
    }

    #[test]
    fn shared_join_point_is_emitted_once() {
        // if a: x elif b: y else: w; return 2
        let program = vec![
            global(0, "a"),
            jump(1, OpCode::PopJumpIfFalse, 5),
            global(2, "x"),
            plain(3, OpCode::PopTop),
            jump(4, OpCode::JumpForward, 13),
            global(5, "b"),
            jump(6, OpCode::PopJumpIfFalse, 11),
            global(7, "y"),
            plain(8, OpCode::PopTop),
            jump(9, OpCode::JumpForward, 13),
            plain(10, OpCode::Nop),
            global(11, "w"),
            plain(12, OpCode::PopTop),
            constant(13, Constant::Int(2)),
            plain(14, OpCode::ReturnValue),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                (1, "if a:"),
                (2, "x"),
                (1, "else:"),
                (2, "if b:"),
                (3, "y"),
                (2, "else:"),
                (3, "w"),
                (1, "return 2"),
            ]
        );
    }

    #[test]
    fn missing_handler_for_unmodeled_opcode() {
        let program = vec![
            global(0, "a"),
            global(1, "b"),
            plain(2, OpCode::BinaryAdd),
            plain(3, OpCode::ReturnValue),
        ];
        assert!(matches!(
            emit_default(&program),
            Err(DecompileError::MissingHandler {
                opcode: OpCode::BinaryAdd,
                index: 2
            })
        ));
    }

    #[test]
    fn arity_mismatch_on_empty_stack() {
        let program = vec![plain(0, OpCode::ReturnValue)];
        assert!(matches!(
            emit_default(&program),
            Err(DecompileError::StackArityMismatch {
                opcode: OpCode::ReturnValue,
                index: 0,
                expected: 1,
                found: 0
            })
        ));
    }

    #[test]
    fn arity_mismatch_on_leftover_fragments() {
        let program = vec![
            constant(0, Constant::Int(1)),
            constant(1, Constant::Int(2)),
            plain(2, OpCode::ReturnValue),
        ];
        assert!(matches!(
            emit_default(&program),
            Err(DecompileError::StackArityMismatch {
                expected: 1,
                found: 2,
                ..
            })
        ));
    }

    /// `if z: pass` repeated `count` times, then `return None`. Both arms of
    /// every branch land on the same block.
    fn trivial_branches(count: usize) -> Vec<Instruction> {
        let mut program = Vec::new();
        for k in 0..count {
            program.push(global(2 * k, "z"));
            program.push(jump(2 * k + 1, OpCode::PopJumpIfFalse, 2 * k + 2));
        }
        program.push(constant(2 * count, Constant::None));
        program.push(plain(2 * count + 1, OpCode::ReturnValue));
        program
    }

    #[test]
    fn shared_arms_are_emitted_in_both_branches() {
        let statements = emit_default(&trivial_branches(1)).unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                (1, "if z:"),
                (2, "return None"),
                (1, "else:"),
                (2, "return None"),
            ]
        );
    }

    #[test]
    fn statement_budget_bounds_chained_branches() {
        assert!(matches!(
            emit_default(&trivial_branches(20)),
            Err(DecompileError::TooManyStatements { limit: 100_000 })
        ));

        let program = trivial_branches(4);
        assert!(emit_default(&program).is_ok());
        let graph = build_blocks(&program).unwrap();
        let options = DecompileOptions {
            max_statements: 10,
            ..DecompileOptions::default()
        };
        assert!(matches!(
            emit(&graph, &options),
            Err(DecompileError::TooManyStatements { limit: 10 })
        ));
    }

    #[test]
    fn count_operand_must_be_immediate() {
        let program = vec![
            global(0, "f"),
            Instruction::at(1, OpCode::CallFunction, Operand::Name("f".into())),
            plain(2, OpCode::ReturnValue),
        ];
        assert!(matches!(
            emit_default(&program),
            Err(DecompileError::UnexpectedOperand {
                opcode: OpCode::CallFunction,
                index: 1,
                ..
            })
        ));

        let program = vec![
            Instruction::at(0, OpCode::BuildList, Operand::None),
            plain(1, OpCode::ReturnValue),
        ];
        assert!(matches!(
            emit_default(&program),
            Err(DecompileError::UnexpectedOperand {
                opcode: OpCode::BuildList,
                index: 0,
                ..
            })
        ));
    }

    #[test]
    fn nested_loop_exit_drains_at_base_indent() {
        // for a in xs:
        //     for b in ys: pass
        // The inner loop's exit is a join point, so the outer back-edge that
        // follows it comes out at the function's own indent.
        let program = vec![
            jump(0, OpCode::SetupLoop, 14),
            Instruction::at(1, OpCode::LoadFast, Operand::Local("xs".into())),
            plain(2, OpCode::GetIter),
            jump(3, OpCode::ForIter, 13),
            Instruction::at(4, OpCode::StoreFast, Operand::Local("a".into())),
            jump(5, OpCode::SetupLoop, 12),
            Instruction::at(6, OpCode::LoadFast, Operand::Local("ys".into())),
            plain(7, OpCode::GetIter),
            jump(8, OpCode::ForIter, 11),
            Instruction::at(9, OpCode::StoreFast, Operand::Local("b".into())),
            jump(10, OpCode::JumpAbsolute, 8),
            plain(11, OpCode::PopBlock),
            jump(12, OpCode::JumpAbsolute, 3),
            plain(13, OpCode::PopBlock),
            constant(14, Constant::None),
            plain(15, OpCode::ReturnValue),
        ];
        let statements = emit_default(&program).unwrap();
        assert_eq!(
            lines(&statements),
            vec![
                (1, "for a in xs:"),
                (2, "for b in ys:"),
                (3, "continue"),
                (1, "continue"),
                (1, "return None"),
            ]
        );
    }

    #[test]
    fn nesting_guard_stops_runaway_branches() {
        // The false arm branches back to the block it came from.
        let program = vec![
            global(0, "z"),
            jump(1, OpCode::PopJumpIfFalse, 3),
            plain(2, OpCode::Nop),
            global(3, "z"),
            jump(4, OpCode::PopJumpIfFalse, 3),
            plain(5, OpCode::Nop),
        ];
        let graph = build_blocks(&program).unwrap();
        let options = DecompileOptions {
            max_nesting_depth: 8,
            ..DecompileOptions::default()
        };
        assert!(matches!(
            emit(&graph, &options),
            Err(DecompileError::NestingTooDeep { limit: 8, .. })
        ));
    }
}
