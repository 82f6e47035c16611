//! Bytecode data types.
//! Variable-width instructions: one opcode byte, optionally followed by a
//! 2-byte little-endian operand.

use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, FromRepr};

/// Opcodes at or above this value carry a 2-byte operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Opcodes of the stack machine, numbered as they appear in the byte stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, FromRepr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OpCode {
    // Stack manipulation
    PopTop = 1,
    RotTwo = 2,
    DupTop = 4,
    Nop = 9,

    // Operators
    UnaryNot = 12,
    BinaryAdd = 23,
    BinarySubscr = 25,
    StoreSubscr = 60,

    // Iteration and blocks
    GetIter = 68,
    BreakLoop = 80,
    ReturnValue = 83,
    PopBlock = 87,

    // Opcodes with an operand
    StoreName = 90,    // names[arg] = pop
    ForIter = 93,      // rel: next item or jump past the loop
    StoreAttr = 95,    // pop.names[arg] = pop
    StoreGlobal = 97,  // names[arg] = pop
    LoadConst = 100,   // push constants[arg]
    LoadName = 101,    // push names[arg]
    BuildTuple = 102,  // pop arg items, push tuple
    BuildList = 103,   // pop arg items, push list
    BuildMap = 105,    // push map presized to arg
    LoadAttr = 106,    // push pop.names[arg]
    CompareOp = 107,   // arg selects the comparison
    JumpForward = 110, // rel
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116, // push names[arg]
    SetupLoop = 120,  // rel: end of the loop block
    LoadFast = 124,   // push locals[arg]
    StoreFast = 125,  // locals[arg] = pop
    CallFunction = 131, // arg positional arguments
}

/// What an opcode's operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    None,
    Constant,
    Name,
    Local,
    Immediate,
    /// Byte offset relative to the end of the instruction.
    RelativeJump,
    /// Absolute byte offset.
    AbsoluteJump,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn has_argument(self) -> bool {
        self.byte() >= HAVE_ARGUMENT
    }

    pub fn operand_kind(self) -> OperandKind {
        use OpCode::*;
        match self {
            PopTop | RotTwo | DupTop | Nop | UnaryNot | BinaryAdd | BinarySubscr | StoreSubscr
            | GetIter | BreakLoop | ReturnValue | PopBlock => OperandKind::None,
            LoadConst => OperandKind::Constant,
            StoreName | StoreAttr | StoreGlobal | LoadName | LoadAttr | LoadGlobal => {
                OperandKind::Name
            }
            LoadFast | StoreFast => OperandKind::Local,
            BuildTuple | BuildList | BuildMap | CompareOp | CallFunction => OperandKind::Immediate,
            ForIter | JumpForward | SetupLoop => OperandKind::RelativeJump,
            JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue => {
                OperandKind::AbsoluteJump
            }
        }
    }

    /// Whether the decompiler reconstructs source for this opcode.
    pub fn is_modeled(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            PopTop
                | Nop
                | StoreSubscr
                | GetIter
                | ReturnValue
                | PopBlock
                | ForIter
                | LoadConst
                | LoadName
                | BuildList
                | LoadAttr
                | JumpForward
                | JumpAbsolute
                | PopJumpIfFalse
                | LoadGlobal
                | SetupLoop
                | LoadFast
                | StoreFast
                | CallFunction
        )
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::RelativeJump | OperandKind::AbsoluteJump
        )
    }
}

/// Constant value in the constant table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Bool(true) => f.write_str("True"),
            Constant::Bool(false) => f.write_str("False"),
            Constant::Int(n) => write!(f, "{n}"),
            Constant::BigInt(n) => write!(f, "{n}"),
            Constant::Float(x) => write!(f, "{x:?}"),
            Constant::Str(s) => {
                f.write_str("'")?;
                for ch in s.chars() {
                    match ch {
                        '\\' => f.write_str("\\\\")?,
                        '\'' => f.write_str("\\'")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\r' => f.write_str("\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("'")
            }
        }
    }
}

/// A compiled function: raw code plus the side tables its operands index into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    pub name: String,
    /// Number of leading `locals` entries that are parameters.
    #[serde(default)]
    pub arg_count: usize,
    pub byte_code: Vec<u8>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub locals: Vec<String>,
}

impl CompiledFunction {
    pub fn new(name: impl Into<String>, byte_code: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            arg_count: 0,
            byte_code,
            constants: Vec::new(),
            names: Vec::new(),
            locals: Vec::new(),
        }
    }

    pub fn with_constants(mut self, constants: Vec<Constant>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the local table; the first `arg_count` locals are the parameters.
    pub fn with_locals<S: Into<String>>(
        mut self,
        arg_count: usize,
        locals: impl IntoIterator<Item = S>,
    ) -> Self {
        self.arg_count = arg_count;
        self.locals = locals.into_iter().map(Into::into).collect();
        self
    }

    pub fn parameters(&self) -> &[String] {
        &self.locals[..self.arg_count.min(self.locals.len())]
    }
}
