//! Unstack Decompiler
//!
//! Reconstructs structured source text from a compiled stack-machine
//! function. The pipeline runs in four stages:
//!
//! 1. [`decode`]: raw bytes to typed instructions with table operands resolved.
//! 2. [`resolve`]: jump byte offsets to instruction indices.
//! 3. [`blocks`]: instructions to an arena of basic blocks.
//! 4. [`emit`]: symbolic execution of the block graph into indented statements.

pub mod blocks;
pub mod decode;
pub mod emit;
pub mod error;
pub mod listing;
pub mod options;
pub mod resolve;

use tracing::trace;
use unstack_core::CompiledFunction;

pub use blocks::{build_blocks, BasicBlock, BlockGraph, LoopBinding, Successors};
pub use decode::{decode, Instruction, JumpTarget, Operand};
pub use emit::{emit, Statement};
pub use error::{DecompileError, Result, Table};
pub use options::DecompileOptions;
pub use resolve::resolve_jumps;

/// Decompile `function` with default options.
pub fn decompile(function: &CompiledFunction) -> Result<String> {
    decompile_with(function, &DecompileOptions::default())
}

#[tracing::instrument(level = "debug", skip_all, fields(function = %function.name))]
pub fn decompile_with(function: &CompiledFunction, options: &DecompileOptions) -> Result<String> {
    let mut instructions = decode(function)?;
    resolve_jumps(&mut instructions)?;
    trace!(listing = %listing::disassemble(&instructions), "resolved instructions");

    let graph = build_blocks(&instructions)?;
    trace!(graph = %graph, "block graph");

    let statements = emit(&graph, options)?;
    Ok(render(function, &statements, options))
}

/// Header line `name(params):` followed by the indented body.
pub fn render(
    function: &CompiledFunction,
    statements: &[Statement],
    options: &DecompileOptions,
) -> String {
    let mut out = format!("{}({}):\n", function.name, function.parameters().join(", "));
    let body: Vec<String> = statements
        .iter()
        .map(|s| format!("{}{}", " ".repeat(s.indent * options.indent_width), s.text))
        .collect();
    out.push_str(&body.join("\n"));
    out
}
