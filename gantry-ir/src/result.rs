//! Result and error types for IR mutation and lowering.

use crate::instructions::{Arity, Opcode};
use core::fmt;
use std::error::Error;

/// An error produced while building, resolving or lowering the IR.
///
/// These are the recoverable, client-visible failures. Invariant violations
/// inside the IR (inserting a non-phi into the phi partition, erasing defs
/// with live foreign uses, registering a compound type whose members overflow
/// its size) are programming errors and panic instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    /// An instruction was created from an abstract opcode, or with a def
    /// where the opcode does not produce one (or vice versa).
    InvalidOpcode(Opcode),

    /// An instruction was created with an operand count that does not match
    /// its opcode's arity.
    InvalidArity {
        /// The opcode being instantiated.
        opcode: Opcode,
        /// The arity the opcode's metadata demands.
        expected: Arity,
        /// The number of operands actually supplied.
        got: usize,
    },

    /// An operation tried to read through a use whose def has been destroyed.
    UseInvalidated,

    /// A variable was referenced from a block outside its scope component.
    VariableNotInScope(String),

    /// Type normalization failed: the least common ancestor of the involved
    /// types is `void`, or an assignment's source type is unrelated to the
    /// variable's declared type.
    TypeMismatch {
        /// Name of the type the context required.
        expected: String,
        /// Name of the type that was found.
        found: String,
    },

    /// A phi operand was looked up for a block that is not a predecessor of
    /// the phi's block.
    PhiHasNoSuchPredecessor(String),
}

/// A convenient alias for a `Result` that uses `IrError` as the error type.
pub type IrResult<T> = Result<T, IrError>;

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidOpcode(opcode) => {
                write!(f, "opcode {} cannot be instantiated here", opcode.name())
            }
            Self::InvalidArity {
                opcode,
                expected,
                got,
            } => write!(
                f,
                "opcode {} requires {} operands, got {}",
                opcode.name(),
                expected,
                got
            ),
            Self::UseInvalidated => write!(f, "use refers to a destroyed def"),
            Self::VariableNotInScope(name) => {
                write!(f, "variable `{name}` is not in scope here")
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Self::PhiHasNoSuchPredecessor(block) => {
                write!(f, "phi has no operand for predecessor {block}")
            }
        }
    }
}

impl Error for IrError {}
