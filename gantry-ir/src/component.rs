//! The structured control-flow component tree.
//!
//! The front end does not hand us an arbitrary CFG. Programs arrive as a
//! tree of structured regions: block leaves, sequences, two-way (or n-way)
//! forks, and loops with the `start -> condition -> body -> update` shape
//! where the update feeds back into the condition. Predecessor and successor
//! queries are derived from this tree rather than stored per block, so the
//! edge set can never fall out of sync with the structure.

use crate::entities::{Block, Component, Variable};
use crate::entity::packed_option::PackedOption;

/// The payload of one component-tree node.
pub enum ComponentData {
    /// A leaf wrapping a basic block.
    Block(Block),
    /// An ordered list of subcomponents; the first contains the entry.
    Sequence(Vec<Component>),
    /// A condition subcomponent followed by two or more cases.
    Fork {
        /// The subcomponent computing the branch condition. Its leaf blocks
        /// terminate in a conditional branch over the cases.
        condition: Component,
        /// The branch targets, in terminator operand order.
        cases: Vec<Component>,
    },
    /// A loop: `start -> condition -> body -> update`, with the update
    /// feeding back into the condition, and the condition also exiting the
    /// loop.
    Loop {
        /// Straight-line preheader; executed once.
        start: Component,
        /// The loop header. Phis for loop-carried values land on its entry
        /// block.
        condition: Component,
        /// The loop body.
        body: Component,
        /// The increment section, branching back to the condition.
        update: Component,
    },
    /// The root of the tree.
    Function {
        /// The function's contents.
        body: PackedOption<Component>,
        /// Declared argument variables.
        args: Vec<Variable>,
        /// Declared return variables.
        rets: Vec<Variable>,
    },
}

/// A component-tree node: payload plus parent back-reference. Every node has
/// a parent except the function root.
pub struct ComponentNode {
    /// The parent component; empty only for the function root.
    pub parent: PackedOption<Component>,
    /// The node payload.
    pub data: ComponentData,
}

impl ComponentNode {
    /// Create a parentless node; the parent is wired when the node is
    /// adopted into a structure.
    pub fn new(data: ComponentData) -> Self {
        Self {
            parent: None.into(),
            data,
        }
    }

    /// The children of this node, in structural order.
    pub fn children(&self) -> Vec<Component> {
        match &self.data {
            ComponentData::Block(_) => Vec::new(),
            ComponentData::Sequence(children) => children.clone(),
            ComponentData::Fork { condition, cases } => {
                let mut children = vec![*condition];
                children.extend_from_slice(cases);
                children
            }
            ComponentData::Loop {
                start,
                condition,
                body,
                update,
            } => vec![*start, *condition, *body, *update],
            ComponentData::Function { body, .. } => body.expand().into_iter().collect(),
        }
    }

    /// The first child, which contains the entry block.
    pub fn first_child(&self) -> Option<Component> {
        match &self.data {
            ComponentData::Block(_) => None,
            ComponentData::Sequence(children) => children.first().copied(),
            ComponentData::Fork { condition, .. } => Some(*condition),
            ComponentData::Loop { start, .. } => Some(*start),
            ComponentData::Function { body, .. } => body.expand(),
        }
    }

    /// The wrapped block, if this is a leaf.
    pub fn as_block(&self) -> Option<Block> {
        match self.data {
            ComponentData::Block(block) => Some(block),
            _ => None,
        }
    }
}
