//! Gantry intermediate representation.
//!
//! This crate defines the two program representations at the heart of the
//! compiler:
//!
//! - The *dynamic IR*: a mutable graph of variables, defs, uses,
//!   use-timelines, def-timelines and hierarchical control-flow components.
//!   The front end builds programs in this form, and the `gantry-frontend`
//!   crate runs SSA construction over it.
//! - The *static IR*: the fully linearized, numerically indexed form that is
//!   handed to a native code generator after lowering.
//!
//! The dynamic IR never stores references between its objects. Everything is
//! allocated in typed arenas owned by [`Function`] and referred to by compact
//! entity references from `gantry-entity`, so the cyclic def/use/timeline
//! graph can be mutated without ownership gymnastics.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub mod block;
pub mod component;
pub mod constant;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod static_ir;
pub mod timeline;
pub mod types;
pub mod value;
pub mod verifier;
pub mod write;

mod fx;
mod result;

pub use gantry_entity as entity;

pub use crate::entity::packed_option;

pub use crate::block::BlockData;
pub use crate::component::{ComponentData, ComponentNode};
pub use crate::constant::Constant;
pub use crate::entities::{Block, Component, Def, DefNum, Inst, Use, UseTimeline, Variable};
pub use crate::function::Function;
pub use crate::instructions::{Arity, InstructionData, Opcode, Operand};
pub use crate::result::{IrError, IrResult};
pub use crate::static_ir::{
    BlockId, StaticBlock, StaticDef, StaticFunction, StaticInstruction, StaticOperand, StaticUse,
    StaticVariable, VarId,
};
pub use crate::types::{Type, TypeStore};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
