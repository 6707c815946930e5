//! Gantry IR entity references.
//!
//! Objects in the dynamic IR need to reference each other freely: a def knows
//! its variable and its instruction, a use knows its timeline, an incoming
//! node knows a remote timeline in another block. These references are not
//! implemented as Rust references both because the graph is cyclic and
//! because 64-bit pointers take up a lot of space. Instead, every object
//! lives in a typed arena in the [`Function`](crate::function::Function) and
//! is referred to by a struct wrapping a `u32` index. There is a separate
//! index type for each entity type, so we don't lose type safety.
//!
//! We prefer to use `Option<EntityRef>` whenever possible, but that type is
//! twice as large as the 32-bit index type on its own. Compact data
//! structures use the `PackedOption<EntityRef>` representation instead, while
//! function arguments and return values prefer the more Rust-like
//! `Option<EntityRef>` variant.

use crate::entity::entity_impl;
use core::fmt;

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// An opaque reference to a basic block in the dynamic IR.
///
/// Blocks own an instruction list split into a phi prefix and a body suffix,
/// and a def-timeline per variable that is defined or imported here.
///
/// While the order is stable, it is arbitrary and does not necessarily
/// resemble the layout order of the lowered program.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a node of the structured control-flow tree: a
/// block leaf, a sequence, a fork, a loop, or the function root.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Component(u32);
entity_impl!(Component, "comp");

/// An opaque reference to an instruction.
///
/// While the order is stable, it is arbitrary and does not necessarily
/// resemble the program order inside a block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An opaque reference to a program variable.
///
/// A variable outlives all of its defs and uses; two variables are identical
/// only by reference.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Variable(u32);
entity_impl!(Variable, "var");

/// An opaque reference to a def: one defining event of one variable.
///
/// Defs are owned 1:1 by the instructions that produce a value. Destroying
/// the instruction destroys the def and invalidates all its uses.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Def(u32);
entity_impl!(Def, "def");

/// An opaque reference to a use: one reading occurrence of a variable inside
/// an instruction operand.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Use(u32);
entity_impl!(Use, "use");

/// An opaque reference to a use-timeline: a single-origin run of uses within
/// one block. All uses on one timeline see the same reaching def.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct UseTimeline(u32);
entity_impl!(UseTimeline, "utl");

/// The per-variable def number handed out by the variable's monotonically
/// increasing counter. Together with the variable it names one def in the
/// printed form: `x0`, `x1`, ...
///
/// This is not an arena index; it is a counter value. It still implements the
/// entity traits so it can be packed into a `PackedOption` (the reserved
/// value encodes "undefined" in the static IR).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct DefNum(u32);
entity_impl!(DefNum);

impl fmt::Display for DefNum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DefNum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}
