//! Unstack Core
//!
//! Shared bytecode types used across the decoder, block builder and emitter.

pub mod bytecode;
pub mod writer;

pub use bytecode::{CompiledFunction, Constant, OpCode, OperandKind, HAVE_ARGUMENT};
pub use writer::BytecodeWriter;
