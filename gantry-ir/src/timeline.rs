//! Def-timelines and incoming edges.
//!
//! A def-timeline is the per-(block, variable) record of defining events:
//! which defs the block produces locally, what reaches the block from each
//! predecessor edge, and which downstream blocks currently link back to it.
//!
//! The timeline owns a partitioned list of use-timelines: an incoming range
//! of size zero or one, followed by one local use-timeline per local def in
//! instruction order. The *outgoing def* — the value successors observe — is
//! the def of the last use-timeline in the list, incoming or local.

use crate::entities::{Block, UseTimeline, Variable};
use crate::entity::packed_option::PackedOption;
use smallvec::SmallVec;

/// The edge object linking one block's def-timeline to a predecessor's
/// def-timeline for one variable.
///
/// Incoming nodes are owned by the parent def-timeline. The remote side
/// registers this block among its successor trackers, so tearing down either
/// end unlinks the other.
#[derive(Debug, Clone)]
pub struct IncomingNode {
    /// The predecessor block this edge comes from.
    pub pred: Block,
    /// The remote use-timeline supplying the value, if the predecessor has
    /// one. Empty when the variable is undefined along this edge.
    pub remote: PackedOption<UseTimeline>,
}

/// Per-(block, variable) record of local defs and cross-edge linkage.
pub struct DefTimeline {
    /// The variable this timeline tracks.
    var: Variable,
    /// One incoming node per linked predecessor block.
    incoming: SmallVec<[IncomingNode; 2]>,
    /// The partitioned use-timeline list: `[incoming] ++ locals`, with the
    /// locals ordered by their defining instruction's position.
    timelines: SmallVec<[UseTimeline; 2]>,
    /// Whether slot 0 of `timelines` is the incoming timeline.
    has_incoming: bool,
    /// Blocks whose incoming maps reference this timeline.
    successors: SmallVec<[Block; 2]>,
}

impl DefTimeline {
    /// Create an empty timeline for `var`.
    pub fn new(var: Variable) -> Self {
        Self {
            var,
            incoming: SmallVec::new(),
            timelines: SmallVec::new(),
            has_incoming: false,
            successors: SmallVec::new(),
        }
    }

    /// The variable this timeline tracks.
    pub fn var(&self) -> Variable {
        self.var
    }

    /// The incoming use-timeline, if one exists.
    ///
    /// Invariant: it exists iff the incoming node list is non-empty or the
    /// timeline has been through resolution.
    pub fn incoming_timeline(&self) -> Option<UseTimeline> {
        if self.has_incoming {
            Some(self.timelines[0])
        } else {
            None
        }
    }

    /// The local use-timelines, in instruction order.
    pub fn local_timelines(&self) -> &[UseTimeline] {
        &self.timelines[self.local_start()..]
    }

    /// All use-timelines: the incoming one (if any) followed by the locals.
    pub fn timelines(&self) -> &[UseTimeline] {
        &self.timelines
    }

    /// Index of the first local timeline.
    fn local_start(&self) -> usize {
        usize::from(self.has_incoming)
    }

    /// The number of local defs recorded here.
    pub fn num_local_defs(&self) -> usize {
        self.timelines.len() - self.local_start()
    }

    /// The use-timeline whose def is visible to successors: the last one in
    /// the list, incoming or local.
    pub fn outgoing_timeline(&self) -> Option<UseTimeline> {
        self.timelines.last().copied()
    }

    /// Whether the block defines the variable locally.
    pub fn has_local_defs(&self) -> bool {
        self.num_local_defs() > 0
    }

    /// Install the incoming use-timeline. Panics if one is already present;
    /// that would orphan its uses.
    pub fn set_incoming_timeline(&mut self, timeline: UseTimeline) {
        assert!(!self.has_incoming, "incoming timeline already present");
        self.timelines.insert(0, timeline);
        self.has_incoming = true;
    }

    /// Insert a local use-timeline at position `index` within the local
    /// range.
    pub fn insert_local_timeline(&mut self, index: usize, timeline: UseTimeline) {
        let at = self.local_start() + index;
        debug_assert!(at <= self.timelines.len(), "local insertion out of range");
        self.timelines.insert(at, timeline);
    }

    /// Remove a local use-timeline, returning its index in the local range.
    pub fn remove_local_timeline(&mut self, timeline: UseTimeline) -> Option<usize> {
        let start = self.local_start();
        let pos = self.timelines[start..].iter().position(|&t| t == timeline)?;
        self.timelines.remove(start + pos);
        Some(pos)
    }

    /// Remove the incoming use-timeline, if present.
    pub fn take_incoming_timeline(&mut self) -> Option<UseTimeline> {
        if self.has_incoming {
            self.has_incoming = false;
            Some(self.timelines.remove(0))
        } else {
            None
        }
    }

    /// The incoming node for `pred`, if linked.
    pub fn incoming_node(&self, pred: Block) -> Option<&IncomingNode> {
        self.incoming.iter().find(|node| node.pred == pred)
    }

    /// All incoming nodes.
    pub fn incoming_nodes(&self) -> &[IncomingNode] {
        &self.incoming
    }

    /// Link `pred` as an incoming edge. Replaces an existing node for the
    /// same predecessor.
    pub fn link_incoming(&mut self, node: IncomingNode) {
        if let Some(existing) = self.incoming.iter_mut().find(|n| n.pred == node.pred) {
            *existing = node;
        } else {
            self.incoming.push(node);
        }
    }

    /// Unlink the incoming edge from `pred`. Returns the node, or `None` if
    /// the predecessor was not in the map (a well-formedness error for the
    /// caller to surface).
    pub fn unlink_incoming(&mut self, pred: Block) -> Option<IncomingNode> {
        let pos = self.incoming.iter().position(|node| node.pred == pred)?;
        Some(self.incoming.remove(pos))
    }

    /// Record that `succ`'s incoming map references this timeline.
    pub fn track_successor(&mut self, succ: Block) {
        if !self.successors.contains(&succ) {
            self.successors.push(succ);
        }
    }

    /// Drop the successor tracker for `succ`.
    pub fn untrack_successor(&mut self, succ: Block) {
        self.successors.retain(|block| *block != succ);
    }

    /// The blocks whose incoming maps currently reference this timeline.
    pub fn successors(&self) -> &[Block] {
        &self.successors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Block, UseTimeline, Variable};

    fn utl(n: u32) -> UseTimeline {
        UseTimeline::from_u32(n)
    }

    #[test]
    fn partition_bookkeeping() {
        let mut dt = DefTimeline::new(Variable::from_u32(0));
        assert_eq!(dt.outgoing_timeline(), None);

        dt.insert_local_timeline(0, utl(10));
        dt.insert_local_timeline(1, utl(11));
        assert_eq!(dt.local_timelines(), &[utl(10), utl(11)]);
        assert_eq!(dt.outgoing_timeline(), Some(utl(11)));
        assert_eq!(dt.incoming_timeline(), None);

        dt.set_incoming_timeline(utl(9));
        assert_eq!(dt.incoming_timeline(), Some(utl(9)));
        assert_eq!(dt.local_timelines(), &[utl(10), utl(11)]);
        assert_eq!(dt.num_local_defs(), 2);
        assert_eq!(dt.outgoing_timeline(), Some(utl(11)));

        assert_eq!(dt.remove_local_timeline(utl(10)), Some(0));
        assert_eq!(dt.local_timelines(), &[utl(11)]);
        assert_eq!(dt.take_incoming_timeline(), Some(utl(9)));
        assert_eq!(dt.incoming_timeline(), None);
    }

    #[test]
    fn incoming_links() {
        let mut dt = DefTimeline::new(Variable::from_u32(0));
        let b1 = Block::from_u32(1);
        let b2 = Block::from_u32(2);

        dt.link_incoming(IncomingNode {
            pred: b1,
            remote: Some(utl(3)).into(),
        });
        dt.link_incoming(IncomingNode {
            pred: b2,
            remote: None.into(),
        });
        assert_eq!(dt.incoming_node(b1).unwrap().remote.expand(), Some(utl(3)));
        assert!(dt.incoming_node(b2).unwrap().remote.is_none());

        assert!(dt.unlink_incoming(b1).is_some());
        assert!(dt.unlink_incoming(b1).is_none());
    }
}
