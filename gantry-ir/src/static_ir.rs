//! The static IR: the flat, numerically indexed program produced by
//! lowering.
//!
//! Nothing here is mutable-graph-shaped. Variables, defs and uses are plain
//! `(variable-id, def-number)` pairs, blocks are dense vectors of
//! instructions, and branch targets are dense block ids. This is the form a
//! native code generator consumes, and the form the textual printer and the
//! mirror parser agree on.

use crate::constant::Constant;
use crate::entities::DefNum;
use crate::entity::packed_option::PackedOption;
use crate::entity::{entity_impl, PrimaryMap};
use crate::instructions::Opcode;
use crate::types::Type;
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// A dense, numeric reference to a lowered block. Prints as `BLOCKn`, which
/// is also how branch-target operands appear in the textual form.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BlockId(u32);
entity_impl!(BlockId, "BLOCK");

/// A dense, numeric reference to a lowered variable.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct VarId(u32);
entity_impl!(VarId, "v");

/// A lowered variable: name, final type, and how many defs it has.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticVariable {
    /// The variable's name.
    pub name: String,
    /// The reconciled type of all the variable's defs.
    pub ty: Type,
    /// Number of distinct def numbers observed.
    pub num_defs: u32,
}

/// A lowered def: one defining event of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticDef {
    /// The variable being defined.
    pub var: VarId,
    /// The def number within the variable.
    pub num: DefNum,
}

/// A lowered use. The def number is packed; the reserved value encodes
/// "undefined", which prints as `??`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticUse {
    /// The variable being read.
    pub var: VarId,
    /// The def number being read, or empty for "undefined".
    pub num: PackedOption<DefNum>,
}

impl StaticUse {
    /// A use of a known def.
    pub fn defined(var: VarId, num: DefNum) -> Self {
        Self {
            var,
            num: num.into(),
        }
    }

    /// A use of the undefined sentinel.
    pub fn undefined(var: VarId) -> Self {
        Self {
            var,
            num: None.into(),
        }
    }

    /// Whether this use reads the undefined sentinel.
    pub fn is_undefined(&self) -> bool {
        self.num.is_none()
    }
}

/// A lowered instruction operand.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum StaticOperand {
    /// An immediate constant.
    Constant(Constant),
    /// A use of a variable's def.
    Use(StaticUse),
    /// A branch target or phi predecessor marker.
    Block(BlockId),
}

impl StaticOperand {
    /// Get the use out of a use operand.
    pub fn as_use(&self) -> Option<StaticUse> {
        match self {
            Self::Use(u) => Some(*u),
            _ => None,
        }
    }

    /// Get the block out of a block operand.
    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Self::Block(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the constant out of a constant operand.
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Self::Constant(c) => Some(c),
            _ => None,
        }
    }
}

impl From<StaticUse> for StaticOperand {
    fn from(u: StaticUse) -> Self {
        Self::Use(u)
    }
}

impl From<BlockId> for StaticOperand {
    fn from(b: BlockId) -> Self {
        Self::Block(b)
    }
}

impl From<Constant> for StaticOperand {
    fn from(c: Constant) -> Self {
        Self::Constant(c)
    }
}

/// A lowered instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticInstruction {
    /// The opcode.
    pub opcode: Opcode,
    /// The def the instruction produces, if any.
    pub def: Option<StaticDef>,
    /// The ordered operands. Phis alternate `Block` and `Use` operands.
    pub operands: SmallVec<[StaticOperand; 2]>,
}

impl StaticInstruction {
    /// Create an instruction record.
    pub fn new(
        opcode: Opcode,
        def: Option<StaticDef>,
        operands: SmallVec<[StaticOperand; 2]>,
    ) -> Self {
        debug_assert!(!opcode.is_abstract(), "abstract opcode in static IR");
        Self {
            opcode,
            def,
            operands,
        }
    }
}

/// A lowered block: a generated name plus its instructions in order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticBlock {
    /// The generated name, `BLOCKn`.
    pub name: String,
    /// The instructions, phis first, terminator last.
    pub insts: Vec<StaticInstruction>,
}

impl StaticBlock {
    /// Create an empty named block.
    pub fn new(name: String) -> Self {
        Self {
            name,
            insts: Vec::new(),
        }
    }

    /// Append an instruction.
    pub fn push(&mut self, inst: StaticInstruction) {
        self.insts.push(inst);
    }
}

/// A fully lowered function.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct StaticFunction {
    /// The function's name.
    pub name: String,
    /// The blocks, dense in [`BlockId`] order.
    pub blocks: PrimaryMap<BlockId, StaticBlock>,
    /// The variables, dense in [`VarId`] order.
    pub variables: PrimaryMap<VarId, StaticVariable>,
    /// Ids of the declared return variables.
    pub rets: Vec<VarId>,
    /// Ids of the declared argument variables.
    pub args: Vec<VarId>,
}

impl StaticFunction {
    /// Create an empty function shell.
    pub fn new(name: String) -> Self {
        Self {
            name,
            blocks: PrimaryMap::new(),
            variables: PrimaryMap::new(),
            rets: Vec::new(),
            args: Vec::new(),
        }
    }

    /// The variable record behind `var`.
    pub fn variable(&self, var: VarId) -> &StaticVariable {
        &self.variables[var]
    }
}
