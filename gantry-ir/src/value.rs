//! The value graph: variables, defs, uses, and use-timelines.
//!
//! A variable owns a name, a mutable type, a scope component, and the
//! monotonically increasing counter its def numbers come from. Defs and uses
//! are the events on that variable: one def per producing instruction, one
//! use per reading operand. Uses never own defs; they are linked to a def
//! indirectly through the use-timeline they were registered on.
//!
//! All of these are arena data records. The entity handles never dangle, but
//! a use whose def has been destroyed transitions to a *detached* state (its
//! timeline link is cleared) and operations that read its def fail with
//! [`UseInvalidated`](crate::IrError::UseInvalidated).

use crate::entities::{Block, Component, Def, DefNum, Inst, Use, UseTimeline, Variable};
use crate::entity::packed_option::PackedOption;
use crate::entity::EntityList;
use crate::types::Type;

/// Payload of a [`Variable`].
pub struct VariableData {
    /// User-visible name; determinator variables get a generated `.det.`
    /// prefixed name.
    pub name: String,
    /// The variable's type. Starts at the declared type and is widened by
    /// phi normalization.
    pub ty: Type,
    /// The component the variable is scoped to; uses outside this component
    /// are rejected.
    pub scope: PackedOption<Component>,
    /// The next def number to hand out.
    next_def: u32,
}

impl VariableData {
    /// Create a fresh variable record.
    pub fn new(name: String, ty: Type, scope: Option<Component>) -> Self {
        Self {
            name,
            ty,
            scope: scope.into(),
            next_def: 0,
        }
    }

    /// Hand out the next def number.
    pub fn next_def_num(&mut self) -> DefNum {
        let num = DefNum::from_u32(self.next_def);
        self.next_def += 1;
        num
    }

    /// Roll the counter back over `num`, if and only if it was the most
    /// recently handed out number. Used when a provisional phi def turns out
    /// to be trivial and is erased again.
    pub fn release_def_num(&mut self, num: DefNum) -> bool {
        if self.next_def == num.as_u32() + 1 {
            self.next_def -= 1;
            true
        } else {
            false
        }
    }

    /// How many def numbers have been handed out.
    pub fn num_defs(&self) -> u32 {
        self.next_def
    }
}

/// Payload of a [`Def`].
pub struct DefData {
    /// The variable this def defines.
    pub var: Variable,
    /// The instruction producing this def. Unset only transiently during
    /// construction.
    pub inst: PackedOption<Inst>,
    /// The def number obtained from the variable at construction.
    pub num: DefNum,
    /// The type of the value this def produces. The variable's overall type
    /// is the least common ancestor of its defs' types.
    pub ty: Type,
    /// The use-timeline carrying this def's uses, once it has one.
    pub timeline: PackedOption<UseTimeline>,
}

/// Payload of a [`Use`].
pub struct UseData {
    /// The variable being read.
    pub var: Variable,
    /// The instruction the use appears in.
    pub inst: PackedOption<Inst>,
    /// The timeline the use reports into. Cleared when the def is destroyed;
    /// a cleared link means the use is detached.
    pub timeline: PackedOption<UseTimeline>,
}

/// Which partition of the def-timeline a use-timeline belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TimelineKind {
    /// The def lives outside the block: in a phi, or externally undefined.
    Incoming,
    /// The def is a local instruction of the block.
    Local,
}

/// Payload of a [`UseTimeline`]: a single-origin run of uses within one
/// block, chained in instruction-sequence order.
pub struct UseTimelineData {
    /// The variable all these uses read.
    pub var: Variable,
    /// The block the run lives in.
    pub block: Block,
    /// Incoming or local.
    pub kind: TimelineKind,
    /// The origin def all uses on this timeline see. `None` on an incoming
    /// timeline means unresolved, or resolved-undefined once `resolved` is
    /// set.
    pub def: PackedOption<Def>,
    /// Whether an incoming timeline has been through def resolution. Local
    /// timelines are born resolved.
    pub resolved: bool,
    /// The defining instruction for a local timeline (the position iterator
    /// into the block body). Empty for incoming timelines.
    pub def_inst: PackedOption<Inst>,
    /// The uses on this timeline, in instruction-sequence order.
    pub uses: EntityList<Use>,
}

impl UseTimelineData {
    /// Create an unresolved incoming timeline.
    pub fn incoming(var: Variable, block: Block) -> Self {
        Self {
            var,
            block,
            kind: TimelineKind::Incoming,
            def: None.into(),
            resolved: false,
            def_inst: None.into(),
            uses: EntityList::new(),
        }
    }

    /// Create a local timeline for `def` produced by `def_inst`.
    pub fn local(var: Variable, block: Block, def: Def, def_inst: Inst) -> Self {
        Self {
            var,
            block,
            kind: TimelineKind::Local,
            def: def.into(),
            resolved: true,
            def_inst: def_inst.into(),
            uses: EntityList::new(),
        }
    }

    /// Whether this is the incoming timeline of its def-timeline.
    pub fn is_incoming(&self) -> bool {
        self.kind == TimelineKind::Incoming
    }
}
