//! Basic block contents.

use crate::entities::{Component, Inst, Variable};
use crate::entity::packed_option::PackedOption;
use crate::fx::FxHashMap;
use crate::timeline::DefTimeline;

/// Payload of a [`Block`](crate::entities::Block).
///
/// A block owns an instruction list partitioned into a *phi* prefix and a
/// *body* suffix, a def-timeline per variable, and an optional condition
/// variable which is set iff the block's terminator will be a conditional
/// branch. Terminators themselves are not stored; they are synthesized from
/// the component tree at lowering.
pub struct BlockData {
    /// The phi prefix, one entry per resolved phi.
    phis: Vec<Inst>,
    /// The body suffix, in program order.
    body: Vec<Inst>,
    /// Def-timelines for every variable defined or imported here.
    timelines: FxHashMap<Variable, DefTimeline>,
    /// The variable driving the conditional terminator, if any.
    pub condition: PackedOption<Variable>,
    /// Back-reference to the leaf component wrapping this block.
    pub component: PackedOption<Component>,
}

impl BlockData {
    /// Create an empty block.
    pub fn new() -> Self {
        Self {
            phis: Vec::new(),
            body: Vec::new(),
            timelines: FxHashMap::default(),
            condition: None.into(),
            component: None.into(),
        }
    }

    /// The phi prefix.
    pub fn phis(&self) -> &[Inst] {
        &self.phis
    }

    /// The body suffix.
    pub fn body(&self) -> &[Inst] {
        &self.body
    }

    /// Position of `inst` in the body, if it is there.
    pub fn body_index_of(&self, inst: Inst) -> Option<usize> {
        self.body.iter().position(|&i| i == inst)
    }

    /// Append an instruction to the body.
    pub fn push_body(&mut self, inst: Inst) {
        self.body.push(inst);
    }

    /// Insert an instruction into the body at `index`.
    pub fn insert_body(&mut self, index: usize, inst: Inst) {
        debug_assert!(index <= self.body.len(), "body insertion out of bounds");
        self.body.insert(index, inst);
    }

    /// Remove an instruction from the body.
    pub fn remove_body(&mut self, inst: Inst) -> Option<usize> {
        let index = self.body_index_of(inst)?;
        self.body.remove(index);
        Some(index)
    }

    /// Append an instruction to the phi prefix.
    pub fn push_phi(&mut self, inst: Inst) {
        self.phis.push(inst);
    }

    /// Remove a phi from the prefix.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is not in the phi partition; erasing a non-phi
    /// through the phi interface is a programming error.
    pub fn remove_phi(&mut self, inst: Inst) {
        let index = self
            .phis
            .iter()
            .position(|&i| i == inst)
            .expect("instruction is not in the phi partition");
        self.phis.remove(index);
    }

    /// The def-timeline for `var`, if the block has one.
    pub fn timeline(&self, var: Variable) -> Option<&DefTimeline> {
        self.timelines.get(&var)
    }

    /// The def-timeline for `var`, mutable edition.
    pub fn timeline_mut(&mut self, var: Variable) -> Option<&mut DefTimeline> {
        self.timelines.get_mut(&var)
    }

    /// The def-timeline for `var`, created lazily on first touch.
    pub fn timeline_or_create(&mut self, var: Variable) -> &mut DefTimeline {
        self.timelines
            .entry(var)
            .or_insert_with(|| DefTimeline::new(var))
    }

    /// Iterate over all (variable, def-timeline) pairs. The order is
    /// arbitrary; id-allocation decisions must never be driven from here.
    pub fn timelines(&self) -> impl Iterator<Item = (Variable, &DefTimeline)> + '_ {
        self.timelines.iter().map(|(&var, dt)| (var, dt))
    }

    /// The variables that have a def-timeline here.
    pub fn timeline_vars(&self) -> Vec<Variable> {
        self.timelines.keys().copied().collect()
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}
