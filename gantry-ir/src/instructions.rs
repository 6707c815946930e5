//! Instruction opcodes and the in-memory representation of IR instructions.
//!
//! The opcode universe is closed: concrete opcodes can be instantiated,
//! abstract opcodes (`relation`, `arithmetic`, `logical`, `bitwise`,
//! `terminal`, `branch`) exist only as parents in the metadata table so that
//! category queries can walk the parent chain. The metadata table drives
//! arity validation at construction time and pretty-printing of the lowered
//! form.

use crate::constant::Constant;
use crate::entities::{Def, Use};
use crate::entity::packed_option::PackedOption;
use crate::result::{IrError, IrResult};
use core::fmt;
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An instruction opcode.
///
/// The discriminant doubles as the index into the metadata table, so the
/// variant order here must match `OPCODE_INFO` exactly.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
    /// Join-point value selection.
    Phi,
    /// Copy a constant or another value into a variable.
    Assign,
    /// Call an external function: the first operand names it.
    Call,
    /// Load an externally defined variable by name.
    Fetch,
    /// Change the type of a value.
    Convert,
    /// Abstract parent of the comparison opcodes.
    Relation,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Less-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Ge,
    /// Abstract parent of the arithmetic opcodes.
    Arithmetic,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Modulo (sign follows the divisor).
    Mod,
    /// Remainder (sign follows the dividend).
    Rem,
    /// Arithmetic negation.
    Neg,
    /// Abstract parent of the logical opcodes.
    Logical,
    /// Logical and.
    Land,
    /// Logical or.
    Lor,
    /// Logical not.
    Lnot,
    /// Abstract parent of the bitwise opcodes.
    Bitwise,
    /// Bitwise and.
    Band,
    /// Bitwise or.
    Bor,
    /// Bitwise exclusive or.
    Bxor,
    /// Shift left.
    Bshiftl,
    /// Arithmetic shift right.
    Bashiftr,
    /// Logical shift right.
    Blshiftr,
    /// Bitwise complement.
    Bnot,
    /// Abstract parent of every block terminator.
    Terminal,
    /// Abstract parent of the branch terminators.
    Branch,
    /// Conditional branch: condition, then-target, else-target.
    Cbranch,
    /// Unconditional branch.
    Ucbranch,
    /// Trap: control must never reach this point.
    Unreachable,
    /// End the program without returning a value.
    Terminate,
    /// Return from the function.
    Ret,
}

/// Number of opcodes, abstract ones included.
pub const NUM_OPCODES: usize = Opcode::Ret as usize + 1;

/// How many operands an opcode takes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Arity {
    /// No operands.
    Nullary,
    /// Exactly one operand.
    Unary,
    /// Exactly two operands.
    Binary,
    /// Exactly three operands.
    Ternary,
    /// Any number of operands.
    NAry,
}

impl Arity {
    /// Whether an operand count satisfies this arity.
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Nullary => count == 0,
            Self::Unary => count == 1,
            Self::Binary => count == 2,
            Self::Ternary => count == 3,
            Self::NAry => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Nullary => "0",
            Self::Unary => "1",
            Self::Binary => "2",
            Self::Ternary => "3",
            Self::NAry => "n",
        };
        write!(f, "{s}")
    }
}

/// Constant metadata record for one opcode.
pub struct OpcodeInfo {
    /// Display name used by the printed form.
    pub name: &'static str,
    /// Abstract parent in the opcode hierarchy.
    pub base: Option<Opcode>,
    /// Operand count rule.
    pub arity: Arity,
    /// Whether instructions of this opcode produce a def.
    pub has_def: bool,
    /// Abstract opcodes may not be instantiated.
    pub is_abstract: bool,
}

/// The metadata table, indexed by opcode discriminant.
const OPCODE_INFO: [OpcodeInfo; NUM_OPCODES] = {
    use Opcode::*;
    const fn info(
        name: &'static str,
        base: Option<Opcode>,
        arity: Arity,
        has_def: bool,
        is_abstract: bool,
    ) -> OpcodeInfo {
        OpcodeInfo {
            name,
            base,
            arity,
            has_def,
            is_abstract,
        }
    }
    [
        info("phi", None, Arity::NAry, true, false),
        info("assign", None, Arity::Unary, true, false),
        info("call", None, Arity::NAry, true, false),
        info("fetch", None, Arity::Unary, true, false),
        info("convert", None, Arity::Unary, true, false),
        info("relation", None, Arity::Binary, true, true),
        info("==", Some(Relation), Arity::Binary, true, false),
        info("!=", Some(Relation), Arity::Binary, true, false),
        info("<", Some(Relation), Arity::Binary, true, false),
        info("<=", Some(Relation), Arity::Binary, true, false),
        info(">", Some(Relation), Arity::Binary, true, false),
        info(">=", Some(Relation), Arity::Binary, true, false),
        info("arithmetic", None, Arity::Binary, true, true),
        info("+", Some(Arithmetic), Arity::Binary, true, false),
        info("-", Some(Arithmetic), Arity::Binary, true, false),
        info("*", Some(Arithmetic), Arity::Binary, true, false),
        info("/", Some(Arithmetic), Arity::Binary, true, false),
        info("%", Some(Arithmetic), Arity::Binary, true, false),
        info("rem", Some(Arithmetic), Arity::Binary, true, false),
        info("-", Some(Arithmetic), Arity::Unary, true, false),
        info("logical", None, Arity::Binary, true, true),
        info("&&", Some(Logical), Arity::Binary, true, false),
        info("||", Some(Logical), Arity::Binary, true, false),
        info("!", Some(Logical), Arity::Unary, true, false),
        info("bitwise", None, Arity::Binary, true, true),
        info("&", Some(Bitwise), Arity::Binary, true, false),
        info("|", Some(Bitwise), Arity::Binary, true, false),
        info("^", Some(Bitwise), Arity::Binary, true, false),
        info("<<", Some(Bitwise), Arity::Binary, true, false),
        info(">>", Some(Bitwise), Arity::Binary, true, false),
        info(">>", Some(Bitwise), Arity::Binary, true, false),
        info("~", Some(Bitwise), Arity::Unary, true, false),
        info("terminal", None, Arity::Nullary, false, true),
        info("branch", Some(Terminal), Arity::Nullary, false, true),
        info("br", Some(Branch), Arity::Ternary, false, false),
        info("ubr", Some(Branch), Arity::Unary, false, false),
        info("unreachable", Some(Terminal), Arity::Nullary, false, false),
        info("terminate", Some(Terminal), Arity::Nullary, false, false),
        info("return", Some(Terminal), Arity::NAry, false, false),
    ]
};

impl Opcode {
    /// Get the metadata record for this opcode.
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_INFO[self as usize]
    }

    /// The display name used in the printed form.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// The operand count rule.
    pub fn arity(self) -> Arity {
        self.info().arity
    }

    /// Whether instructions of this opcode produce a def.
    ///
    /// `call` is the one opcode where the def is optional: a void call
    /// carries none.
    pub fn has_def(self) -> bool {
        self.info().has_def
    }

    /// Whether this opcode is abstract and may not be instantiated.
    pub fn is_abstract(self) -> bool {
        self.info().is_abstract
    }

    /// The abstract parent of this opcode, if any.
    pub fn base(self) -> Option<Opcode> {
        self.info().base
    }

    /// Whether this opcode is `category` or a descendant of it in the
    /// metadata hierarchy.
    pub fn is_a(self, category: Opcode) -> bool {
        let mut cursor = self;
        loop {
            if cursor == category {
                return true;
            }
            match cursor.base() {
                Some(base) => cursor = base,
                None => return false,
            }
        }
    }

    /// Whether this opcode ends a block.
    pub fn is_terminator(self) -> bool {
        self.is_a(Opcode::Terminal)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An instruction operand: a constant or a use of a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// An immediate constant value.
    Constant(Constant),
    /// A use of a variable's reaching def.
    Use(Use),
}

impl Operand {
    /// Get the use out of a use operand.
    pub fn as_use(&self) -> Option<Use> {
        match self {
            Self::Use(u) => Some(*u),
            Self::Constant(_) => None,
        }
    }

    /// Get the constant out of a constant operand.
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Self::Constant(c) => Some(c),
            Self::Use(_) => None,
        }
    }
}

impl From<Constant> for Operand {
    fn from(constant: Constant) -> Self {
        Self::Constant(constant)
    }
}

impl From<Use> for Operand {
    fn from(u: Use) -> Self {
        Self::Use(u)
    }
}

/// Contents of an instruction.
///
/// Construction goes through [`InstructionData::new`], which validates the
/// opcode against its metadata: abstract opcodes are rejected, the operand
/// count must satisfy the arity, and the def presence must match `has_def`
/// (except for `call`, where the def is optional).
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionData {
    /// The opcode.
    pub opcode: Opcode,
    /// The def this instruction produces, if any.
    pub def: PackedOption<Def>,
    /// The ordered operand list. Phi instructions store predecessor pairs as
    /// alternating `Blockref` constants and uses.
    pub operands: SmallVec<[Operand; 2]>,
}

impl InstructionData {
    /// Create a validated instruction.
    pub fn new(
        opcode: Opcode,
        def: Option<Def>,
        operands: SmallVec<[Operand; 2]>,
    ) -> IrResult<Self> {
        if opcode.is_abstract() {
            return Err(IrError::InvalidOpcode(opcode));
        }
        if !opcode.arity().accepts(operands.len()) {
            return Err(IrError::InvalidArity {
                opcode,
                expected: opcode.arity(),
                got: operands.len(),
            });
        }
        if opcode != Opcode::Call && opcode.has_def() != def.is_some() {
            return Err(IrError::InvalidOpcode(opcode));
        }
        Ok(Self {
            opcode,
            def: def.into(),
            operands,
        })
    }

    /// Iterate over the uses among the operands.
    pub fn arg_uses(&self) -> impl Iterator<Item = Use> + '_ {
        self.operands.iter().filter_map(Operand::as_use)
    }

    /// For a phi, iterate over its `(predecessor, use)` pairs.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is not a phi or its operand list is not a
    /// well-formed pair list.
    pub fn phi_pairs(&self) -> impl Iterator<Item = (crate::entities::Block, Use)> + '_ {
        assert_eq!(self.opcode, Opcode::Phi, "not a phi instruction");
        self.operands.chunks(2).map(|pair| {
            let block = pair[0]
                .as_constant()
                .expect("phi operand list must alternate blocks and uses")
                .unwrap_block();
            let arg = pair[1].as_use().expect("phi pair must carry a use");
            (block, arg)
        })
    }
}
