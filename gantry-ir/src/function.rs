//! The dynamic-IR function: owner of every arena.
//!
//! A [`Function`] holds the typed arenas for variables, defs, uses,
//! instructions, blocks, use-timelines and control-flow components, plus the
//! type store. All cross-references between IR objects are entity handles
//! into these arenas, so the cyclic graph of defs, uses, timelines and
//! incoming edges needs no interior mutability and no reference counting.
//!
//! The mutation API enforces the structural invariants: local use-timelines
//! stay ordered by their defining instruction's position, uses register and
//! unregister on the timeline they report into, and destroying a def
//! invalidates every use that reaches it.

use crate::block::BlockData;
use crate::component::{ComponentData, ComponentNode};
use crate::entities::{Block, Component, Def, Inst, Use, UseTimeline, Variable};
use crate::entity::packed_option::PackedOption;
use crate::entity::{ListPool, PrimaryMap, SecondaryMap};
use crate::instructions::InstructionData;
use crate::result::{IrError, IrResult};
use crate::timeline::IncomingNode;
use crate::types::{Type, TypeStore};
use crate::value::{DefData, UseData, UseTimelineData, VariableData};
use smallvec::SmallVec;

/// A set of blocks small enough to keep on the stack: predecessor lists,
/// leaf sets and the like.
pub type BlockSet = SmallVec<[Block; 4]>;

/// A function under construction in the dynamic IR.
pub struct Function {
    /// The function's name.
    pub name: String,
    /// The types known to this function.
    pub types: TypeStore,
    /// All variables.
    pub variables: PrimaryMap<Variable, VariableData>,
    /// All defs.
    pub defs: PrimaryMap<Def, DefData>,
    /// All uses.
    pub uses: PrimaryMap<Use, UseData>,
    /// All instructions. Program order is tracked by the blocks.
    pub insts: PrimaryMap<Inst, InstructionData>,
    /// All blocks.
    pub blocks: PrimaryMap<Block, BlockData>,
    /// The structured control-flow tree.
    pub components: PrimaryMap<Component, ComponentNode>,
    /// All use-timelines.
    pub timelines: PrimaryMap<UseTimeline, UseTimelineData>,
    /// Backing storage for the per-timeline use lists.
    pub use_pool: ListPool<Use>,
    /// Which block each instruction lives in.
    inst_blocks: SecondaryMap<Inst, PackedOption<Block>>,
    /// The function root component.
    root: Component,
}

impl Function {
    /// Create an empty function.
    pub fn new(name: &str) -> Self {
        let mut components = PrimaryMap::new();
        let root = components.push(ComponentNode::new(ComponentData::Function {
            body: None.into(),
            args: Vec::new(),
            rets: Vec::new(),
        }));
        Self {
            name: name.to_string(),
            types: TypeStore::new(),
            variables: PrimaryMap::new(),
            defs: PrimaryMap::new(),
            uses: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            components,
            timelines: PrimaryMap::new(),
            use_pool: ListPool::new(),
            inst_blocks: SecondaryMap::new(),
            root,
        }
    }

    /// The function root component.
    pub fn root(&self) -> Component {
        self.root
    }

    /// Set the function body. May only be done once.
    pub fn set_body(&mut self, component: Component) {
        match &mut self.components[self.root].data {
            ComponentData::Function { body, .. } => {
                assert!(body.is_none(), "function body already set");
                *body = component.into();
            }
            _ => unreachable!("root is always a function node"),
        }
        self.components[component].parent = self.root.into();
    }

    /// Declare `var` as a function argument.
    pub fn declare_arg(&mut self, var: Variable) {
        match &mut self.components[self.root].data {
            ComponentData::Function { args, .. } => args.push(var),
            _ => unreachable!("root is always a function node"),
        }
    }

    /// Declare `var` as a function return value.
    pub fn declare_ret(&mut self, var: Variable) {
        match &mut self.components[self.root].data {
            ComponentData::Function { rets, .. } => rets.push(var),
            _ => unreachable!("root is always a function node"),
        }
    }

    /// The declared argument variables.
    pub fn args(&self) -> &[Variable] {
        match &self.components[self.root].data {
            ComponentData::Function { args, .. } => args,
            _ => unreachable!("root is always a function node"),
        }
    }

    /// The declared return variables.
    pub fn rets(&self) -> &[Variable] {
        match &self.components[self.root].data {
            ComponentData::Function { rets, .. } => rets,
            _ => unreachable!("root is always a function node"),
        }
    }
}

/// Variable management.
impl Function {
    /// Create a variable scoped to the whole function.
    pub fn create_variable(&mut self, name: &str, ty: Type) -> Variable {
        let scope = self.root;
        self.create_variable_in(name, ty, scope)
    }

    /// Create a variable scoped to `scope`.
    pub fn create_variable_in(&mut self, name: &str, ty: Type, scope: Component) -> Variable {
        self.variables
            .push(VariableData::new(name.to_string(), ty, Some(scope)))
    }

    /// The name of `var`.
    pub fn variable_name(&self, var: Variable) -> &str {
        &self.variables[var].name
    }

    /// The current type of `var`.
    pub fn variable_type(&self, var: Variable) -> Type {
        self.variables[var].ty
    }

    /// Widen or change the type of `var`.
    pub fn set_variable_type(&mut self, var: Variable, ty: Type) {
        self.variables[var].ty = ty;
    }
}

/// Component-tree construction.
impl Function {
    /// Create a block together with its leaf component.
    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::new());
        let component = self
            .components
            .push(ComponentNode::new(ComponentData::Block(block)));
        self.blocks[block].component = component.into();
        block
    }

    /// The leaf component wrapping `block`.
    pub fn block_component(&self, block: Block) -> Component {
        self.blocks[block]
            .component
            .expect("block has no component; was it created with make_block?")
    }

    fn adopt(&mut self, parent: Component, children: &[Component]) {
        for &child in children {
            debug_assert!(
                self.components[child].parent.is_none(),
                "component is already part of a structure"
            );
            self.components[child].parent = parent.into();
        }
    }

    /// Create a sequence from an ordered, non-empty list of subcomponents.
    pub fn make_sequence(&mut self, children: Vec<Component>) -> Component {
        assert!(!children.is_empty(), "a sequence needs at least one child");
        let node = ComponentNode::new(ComponentData::Sequence(children.clone()));
        let component = self.components.push(node);
        self.adopt(component, &children);
        component
    }

    /// Create a fork from a condition subcomponent and two or more cases.
    pub fn make_fork(&mut self, condition: Component, cases: Vec<Component>) -> Component {
        assert!(cases.len() >= 2, "a fork needs at least two cases");
        let node = ComponentNode::new(ComponentData::Fork {
            condition,
            cases: cases.clone(),
        });
        let component = self.components.push(node);
        self.adopt(component, &[condition]);
        self.adopt(component, &cases);
        component
    }

    /// Create a loop from start, condition, body and update subcomponents.
    pub fn make_loop(
        &mut self,
        start: Component,
        condition: Component,
        body: Component,
        update: Component,
    ) -> Component {
        let node = ComponentNode::new(ComponentData::Loop {
            start,
            condition,
            body,
            update,
        });
        let component = self.components.push(node);
        self.adopt(component, &[start, condition, body, update]);
        component
    }
}

/// Component-tree queries.
impl Function {
    /// The parent of `component`, or `None` for the function root.
    pub fn component_parent(&self, component: Component) -> Option<Component> {
        self.components[component].parent.expand()
    }

    /// The entry block of `component`: recurse into first children until a
    /// leaf is found.
    pub fn component_entry(&self, component: Component) -> Option<Block> {
        let mut cursor = component;
        loop {
            let node = &self.components[cursor];
            if let Some(block) = node.as_block() {
                return Some(block);
            }
            cursor = node.first_child()?;
        }
    }

    /// The function's entry block.
    pub fn entry_block(&self) -> Option<Block> {
        self.component_entry(self.root)
    }

    /// The set of blocks whose terminators leave `component`.
    pub fn leaves(&self, component: Component) -> BlockSet {
        let mut leaves = BlockSet::new();
        self.collect_leaves(component, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, component: Component, out: &mut BlockSet) {
        match &self.components[component].data {
            ComponentData::Block(block) => out.push(*block),
            ComponentData::Sequence(children) => {
                let last = *children.last().expect("sequences are non-empty");
                self.collect_leaves(last, out);
            }
            ComponentData::Fork { cases, .. } => {
                for &case in cases {
                    self.collect_leaves(case, out);
                }
            }
            ComponentData::Loop { condition, .. } => self.collect_leaves(*condition, out),
            ComponentData::Function { body, .. } => {
                if let Some(body) = body.expand() {
                    self.collect_leaves(body, out);
                }
            }
        }
    }

    /// The leaf blocks flowing into `component` from outside it.
    pub fn component_predecessors(&self, component: Component) -> BlockSet {
        let parent = match self.component_parent(component) {
            Some(parent) => parent,
            None => return BlockSet::new(),
        };
        match &self.components[parent].data {
            ComponentData::Sequence(children) => {
                let index = children
                    .iter()
                    .position(|&c| c == component)
                    .expect("child/parent links out of sync");
                if index == 0 {
                    self.component_predecessors(parent)
                } else {
                    self.leaves(children[index - 1])
                }
            }
            ComponentData::Fork { condition, .. } => {
                if *condition == component {
                    self.component_predecessors(parent)
                } else {
                    self.leaves(*condition)
                }
            }
            ComponentData::Loop {
                start,
                condition,
                body,
                update,
            } => {
                if component == *start {
                    self.component_predecessors(parent)
                } else if component == *condition {
                    let mut preds = self.leaves(*start);
                    preds.extend(self.leaves(*update));
                    preds
                } else if component == *body {
                    self.leaves(*condition)
                } else {
                    debug_assert_eq!(component, *update, "child/parent links out of sync");
                    self.leaves(*body)
                }
            }
            ComponentData::Function { .. } => self.component_predecessors(parent),
            ComponentData::Block(_) => unreachable!("blocks have no children"),
        }
    }

    /// The entry blocks `component` flows into when control leaves it.
    ///
    /// The order is significant: for a block ending in a conditional branch,
    /// the first successor is the then-target.
    pub fn component_successors(&self, component: Component) -> BlockSet {
        let parent = match self.component_parent(component) {
            Some(parent) => parent,
            None => return BlockSet::new(),
        };
        let entry_of = |c: Component| -> BlockSet {
            self.component_entry(c).into_iter().collect()
        };
        match &self.components[parent].data {
            ComponentData::Sequence(children) => {
                let index = children
                    .iter()
                    .position(|&c| c == component)
                    .expect("child/parent links out of sync");
                if index + 1 == children.len() {
                    self.component_successors(parent)
                } else {
                    entry_of(children[index + 1])
                }
            }
            ComponentData::Fork { condition, cases } => {
                if *condition == component {
                    cases
                        .iter()
                        .filter_map(|&case| self.component_entry(case))
                        .collect()
                } else {
                    self.component_successors(parent)
                }
            }
            ComponentData::Loop {
                start,
                condition,
                body,
                update,
            } => {
                if component == *start {
                    entry_of(*condition)
                } else if component == *condition {
                    let mut succs = entry_of(*body);
                    succs.extend(self.component_successors(parent));
                    succs
                } else if component == *body {
                    entry_of(*update)
                } else {
                    debug_assert_eq!(component, *update, "child/parent links out of sync");
                    entry_of(*condition)
                }
            }
            ComponentData::Function { .. } => self.component_successors(parent),
            ComponentData::Block(_) => unreachable!("blocks have no children"),
        }
    }

    /// The blocks flowing into `block`.
    pub fn block_predecessors(&self, block: Block) -> BlockSet {
        self.component_predecessors(self.block_component(block))
    }

    /// The blocks `block` flows into, in terminator operand order.
    pub fn block_successors(&self, block: Block) -> BlockSet {
        self.component_successors(self.block_component(block))
    }

    /// Whether `sub` contains the entry block of its parent structure.
    pub fn is_entry(&self, sub: Component) -> bool {
        match self.component_parent(sub) {
            Some(parent) => self.component_entry(parent) == self.component_entry(sub),
            None => true,
        }
    }

    /// Whether `sub` is `parent` or nested anywhere below it.
    pub fn is_subcomponent_of(&self, parent: Component, sub: Component) -> bool {
        let mut cursor = Some(sub);
        while let Some(c) = cursor {
            if c == parent {
                return true;
            }
            cursor = self.component_parent(c);
        }
        false
    }

    /// Whether `block` lies within `component`.
    pub fn is_block_in(&self, component: Component, block: Block) -> bool {
        self.is_subcomponent_of(component, self.block_component(block))
    }

    /// All blocks in structural order: the order the component tree is
    /// written, which is also the lowering order.
    pub fn blocks_in_order(&self) -> Vec<Block> {
        let mut order = Vec::with_capacity(self.blocks.len());
        self.collect_blocks(self.root, &mut order);
        order
    }

    fn collect_blocks(&self, component: Component, out: &mut Vec<Block>) {
        if let Some(block) = self.components[component].as_block() {
            out.push(block);
            return;
        }
        for child in self.components[component].children() {
            self.collect_blocks(child, out);
        }
    }
}

/// Value-graph mutation.
impl Function {
    /// Allocate a def of `var` with result type `ty`. The def is not live
    /// until an instruction carrying it is inserted.
    pub fn create_def(&mut self, var: Variable, ty: Type) -> Def {
        let num = self.variables[var].next_def_num();
        self.defs.push(DefData {
            var,
            inst: None.into(),
            num,
            ty,
            timeline: None.into(),
        })
    }

    /// Roll back a def that never made it into an instruction, reclaiming
    /// its number if it was the variable's most recent.
    pub fn release_def(&mut self, def: Def) {
        debug_assert!(
            self.defs[def].timeline.is_none(),
            "cannot release a def that joined a timeline"
        );
        let var = self.defs[def].var;
        let num = self.defs[def].num;
        self.variables[var].release_def_num(num);
    }

    /// Create a use of `var` at the current end of `block`, attached to the
    /// block's outgoing use-timeline (creating an unresolved incoming
    /// timeline if the variable has no timeline here yet).
    pub fn make_use(&mut self, var: Variable, block: Block) -> IrResult<Use> {
        if let Some(scope) = self.variables[var].scope.expand() {
            if !self.is_block_in(scope, block) {
                return Err(IrError::VariableNotInScope(
                    self.variables[var].name.clone(),
                ));
            }
        }
        let tl = match self.blocks[block].timeline(var).and_then(|dt| dt.outgoing_timeline()) {
            Some(tl) => tl,
            None => self.create_incoming_timeline(block, var),
        };
        Ok(self.make_use_on(tl))
    }

    /// Create a use attached to a specific use-timeline. Used by the
    /// resolution engine to build phi operands against a predecessor's
    /// outgoing timeline.
    pub fn make_use_on(&mut self, tl: UseTimeline) -> Use {
        let var = self.timelines[tl].var;
        let u = self.uses.push(UseData {
            var,
            inst: None.into(),
            timeline: tl.into(),
        });
        self.timelines[tl].uses.push(u, &mut self.use_pool);
        u
    }

    /// Create the (empty, unresolved) incoming use-timeline for `var` in
    /// `block`.
    ///
    /// # Panics
    ///
    /// Panics if the block already has an incoming timeline for `var`.
    pub fn create_incoming_timeline(&mut self, block: Block, var: Variable) -> UseTimeline {
        let tl = self.timelines.push(UseTimelineData::incoming(var, block));
        self.blocks[block]
            .timeline_or_create(var)
            .set_incoming_timeline(tl);
        tl
    }

    /// Detach a use from its timeline. The use record remains, in the
    /// detached state.
    pub fn unregister_use(&mut self, u: Use) {
        if let Some(tl) = self.uses[u].timeline.take() {
            self.timelines[tl].uses.remove_item(u, &mut self.use_pool);
        }
    }

    /// The variable a use reads.
    pub fn use_var(&self, u: Use) -> Variable {
        self.uses[u].var
    }

    /// The def a use currently reaches: `Ok(None)` for an unresolved or
    /// undefined incoming timeline, `Err(UseInvalidated)` for a detached
    /// use.
    pub fn use_def(&self, u: Use) -> IrResult<Option<Def>> {
        match self.uses[u].timeline.expand() {
            Some(tl) => Ok(self.timelines[tl].def.expand()),
            None => Err(IrError::UseInvalidated),
        }
    }

    /// The block an instruction currently lives in.
    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.inst_blocks[inst].expand()
    }
}

/// Instruction insertion and removal.
impl Function {
    fn register_inst(&mut self, inst: Inst, block: Block) {
        self.inst_blocks[inst] = block.into();
        let data = &self.insts[inst];
        let def = data.def.expand();
        let arg_uses: SmallVec<[Use; 4]> = data.arg_uses().collect();
        for u in arg_uses {
            debug_assert!(
                self.uses[u].inst.is_none(),
                "operand use is already claimed by another instruction"
            );
            self.uses[u].inst = inst.into();
        }
        if let Some(def) = def {
            self.defs[def].inst = inst.into();
        }
    }

    /// Append an instruction to the end of `block`'s body.
    pub fn append_inst(&mut self, block: Block, data: InstructionData) -> Inst {
        let index = self.blocks[block].body().len();
        self.insert_inst(block, index, data)
    }

    /// Insert an instruction into `block`'s body at `index`, splitting the
    /// covering use-timeline when the instruction defines a variable.
    pub fn insert_inst(&mut self, block: Block, index: usize, data: InstructionData) -> Inst {
        let def = data.def.expand();
        let inst = self.insts.push(data);
        self.register_inst(inst, block);
        self.blocks[block].insert_body(index, inst);
        if let Some(def) = def {
            self.emplace_local_def(block, def, inst, index);
        }
        inst
    }

    /// Insert a resolved phi instruction into `block`'s phi prefix. The
    /// caller is responsible for pointing the block's incoming use-timeline
    /// at the phi's def.
    pub fn insert_phi_inst(&mut self, block: Block, data: InstructionData) -> Inst {
        debug_assert_eq!(
            data.opcode,
            crate::instructions::Opcode::Phi,
            "only phis may enter the phi partition"
        );
        let inst = self.insts.push(data);
        self.register_inst(inst, block);
        self.blocks[block].push_phi(inst);
        inst
    }

    /// Record a local def of `var` at `body_index`:
    ///
    /// 1. locate the use-timeline window covering the position,
    /// 2. reassociate the covering timeline's uses strictly after the
    ///    position onto a new timeline originating at the new def,
    /// 3. insert the new timeline into the partitioned list in order.
    fn emplace_local_def(&mut self, block: Block, def: Def, inst: Inst, body_index: usize) {
        let var = self.defs[def].var;
        let (locals, incoming) = match self.blocks[block].timeline(var) {
            Some(dt) => (dt.local_timelines().to_vec(), dt.incoming_timeline()),
            None => (Vec::new(), None),
        };

        // Find the partition slot: the first local whose defining
        // instruction sits after the new position.
        let mut slot = locals.len();
        for (i, &tl) in locals.iter().enumerate() {
            let def_inst = self.timelines[tl]
                .def_inst
                .expect("local timeline has a defining instruction");
            let def_index = self.blocks[block]
                .body_index_of(def_inst)
                .expect("defining instruction is in the body");
            if body_index < def_index {
                slot = i;
                break;
            }
        }
        let covering = if slot > 0 { Some(locals[slot - 1]) } else { incoming };

        let new_tl = self
            .timelines
            .push(UseTimelineData::local(var, block, def, inst));
        self.defs[def].timeline = new_tl.into();
        self.blocks[block]
            .timeline_or_create(var)
            .insert_local_timeline(slot, new_tl);

        // Split the covering window: uses strictly after the new def now see
        // the new def. Uses owned by instructions of other blocks (phi
        // operands downstream) sit past the end of this block and move too.
        if let Some(cover) = covering {
            let cover_uses: Vec<Use> =
                self.timelines[cover].uses.as_slice(&self.use_pool).to_vec();
            for u in cover_uses {
                let after = match self.uses[u].inst.expand() {
                    Some(user) => match self.blocks[block].body_index_of(user) {
                        Some(user_index) => user_index > body_index,
                        None => true,
                    },
                    None => true,
                };
                if after {
                    self.timelines[cover].uses.remove_item(u, &mut self.use_pool);
                    self.timelines[new_tl].uses.push(u, &mut self.use_pool);
                    self.uses[u].timeline = new_tl.into();
                }
            }
        }
    }

    /// Erase a body instruction. Its operand uses unregister themselves; if
    /// it carried a def, the def's use-timeline is erased and every use on
    /// it is invalidated.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the def still has live uses in other
    /// blocks; those must be rewritten first.
    pub fn erase_inst(&mut self, block: Block, inst: Inst) {
        let def = self.insts[inst].def.expand();
        let arg_uses: SmallVec<[Use; 4]> = self.insts[inst].arg_uses().collect();
        for u in arg_uses {
            self.unregister_use(u);
        }
        if let Some(def) = def {
            self.erase_def_timeline(block, def);
        }
        self.blocks[block].remove_body(inst);
        self.inst_blocks[inst] = None.into();
    }

    /// Tear down the use-timeline of a local def, invalidating its uses.
    fn erase_def_timeline(&mut self, block: Block, def: Def) {
        let var = self.defs[def].var;
        let tl = match self.defs[def].timeline.take() {
            Some(tl) => tl,
            None => return,
        };
        let users: Vec<Use> = self.timelines[tl].uses.as_slice(&self.use_pool).to_vec();
        for u in users {
            debug_assert!(
                self.uses[u]
                    .inst
                    .map(|user| self.inst_block(user) == Some(block))
                    .unwrap_or(true),
                "erasing a def with live uses outside its block"
            );
            self.uses[u].timeline = None.into();
        }
        if let Some(dt) = self.blocks[block].timeline_mut(var) {
            dt.remove_local_timeline(tl);
        }
    }
}

/// Incoming-edge linkage, used by the resolution engine.
impl Function {
    /// Link `pred` into `block`'s def-timeline for `var`, recording which
    /// remote use-timeline feeds the edge. The remote timeline's block gains
    /// a successor tracker so the two ends stay consistent.
    pub fn link_incoming(
        &mut self,
        block: Block,
        var: Variable,
        pred: Block,
        remote: Option<UseTimeline>,
    ) {
        debug_assert!(
            self.block_predecessors(block).contains(&pred),
            "incoming block is not a predecessor in the component tree"
        );
        self.blocks[block].timeline_or_create(var).link_incoming(IncomingNode {
            pred,
            remote: remote.into(),
        });
        if remote.is_some() {
            if let Some(remote_dt) = self.blocks[pred].timeline_mut(var) {
                remote_dt.track_successor(block);
            }
        }
    }

    /// Unlink the incoming edge from `pred` on `block`'s def-timeline for
    /// `var`. Removing a predecessor that is not in the map is a
    /// well-formedness error.
    pub fn unlink_incoming(&mut self, block: Block, var: Variable, pred: Block) -> IrResult<()> {
        let node = self
            .blocks[block]
            .timeline_mut(var)
            .and_then(|dt| dt.unlink_incoming(pred))
            .ok_or_else(|| IrError::PhiHasNoSuchPredecessor(pred.to_string()))?;
        if node.remote.is_some() {
            if let Some(remote_dt) = self.blocks[pred].timeline_mut(var) {
                remote_dt.untrack_successor(block);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::Constant;
    use crate::instructions::{InstructionData, Opcode};
    use crate::types;
    use smallvec::smallvec;

    fn assign(func: &mut Function, block: Block, var: Variable, value: i64) -> Def {
        let def = func.create_def(var, types::INT);
        let data = InstructionData::new(
            Opcode::Assign,
            Some(def),
            smallvec![Constant::Int(value).into()],
        )
        .unwrap();
        func.append_inst(block, data);
        def
    }

    #[test]
    fn straight_line_structure() {
        let mut func = Function::new("f");
        let b0 = func.make_block();
        let b1 = func.make_block();
        let seq = func.make_sequence(vec![
            func.block_component(b0),
            func.block_component(b1),
        ]);
        func.set_body(seq);

        assert_eq!(func.entry_block(), Some(b0));
        assert_eq!(func.block_successors(b0).as_slice(), &[b1]);
        assert_eq!(func.block_predecessors(b1).as_slice(), &[b0]);
        assert!(func.block_predecessors(b0).is_empty());
        assert!(func.block_successors(b1).is_empty());
        assert_eq!(func.blocks_in_order(), vec![b0, b1]);
        assert_eq!(func.leaves(func.root()).as_slice(), &[b1]);
    }

    #[test]
    fn loop_structure_edges() {
        let mut func = Function::new("f");
        let start = func.make_block();
        let cond = func.make_block();
        let body = func.make_block();
        let update = func.make_block();
        let exit = func.make_block();
        let lp = func.make_loop(
            func.block_component(start),
            func.block_component(cond),
            func.block_component(body),
            func.block_component(update),
        );
        let seq = func.make_sequence(vec![lp, func.block_component(exit)]);
        func.set_body(seq);

        assert_eq!(func.block_successors(start).as_slice(), &[cond]);
        assert_eq!(func.block_predecessors(cond).as_slice(), &[start, update]);
        assert_eq!(func.block_successors(cond).as_slice(), &[body, exit]);
        assert_eq!(func.block_predecessors(body).as_slice(), &[cond]);
        assert_eq!(func.block_successors(body).as_slice(), &[update]);
        assert_eq!(func.block_successors(update).as_slice(), &[cond]);
        assert_eq!(func.block_predecessors(exit).as_slice(), &[cond]);
        assert_eq!(func.blocks_in_order(), vec![start, cond, body, update, exit]);
    }

    #[test]
    fn local_timelines_stay_ordered() {
        let mut func = Function::new("f");
        let b0 = func.make_block();
        let seq = func.make_sequence(vec![func.block_component(b0)]);
        func.set_body(seq);
        let x = func.create_variable("x", types::INT);

        let d0 = assign(&mut func, b0, x, 1);
        let d1 = assign(&mut func, b0, x, 2);

        let dt = func.blocks[b0].timeline(x).unwrap();
        assert_eq!(dt.num_local_defs(), 2);
        let defs: Vec<Def> = dt
            .local_timelines()
            .iter()
            .map(|&tl| func.timelines[tl].def.unwrap())
            .collect();
        assert_eq!(defs, vec![d0, d1]);
        let out = dt.outgoing_timeline().unwrap();
        assert_eq!(func.timelines[out].def.expand(), Some(d1));
    }

    #[test]
    fn use_before_def_splits_timeline() {
        let mut func = Function::new("f");
        let b0 = func.make_block();
        let seq = func.make_sequence(vec![func.block_component(b0)]);
        func.set_body(seq);
        let x = func.create_variable("x", types::INT);
        let y = func.create_variable("y", types::INT);

        // y = x  (x is imported: unresolved incoming timeline)
        let u = func.make_use(x, b0).unwrap();
        let ydef = func.create_def(y, types::INT);
        let data = InstructionData::new(Opcode::Assign, Some(ydef), smallvec![u.into()]).unwrap();
        func.append_inst(b0, data);

        // x = 1 after the use: the use must stay on the incoming timeline.
        let d0 = assign(&mut func, b0, x, 1);

        let incoming = func.blocks[b0]
            .timeline(x)
            .unwrap()
            .incoming_timeline()
            .unwrap();
        assert_eq!(func.uses[u].timeline.expand(), Some(incoming));
        assert_eq!(func.use_def(u).unwrap(), None);

        // A later use sees the local def.
        let u2 = func.make_use(x, b0).unwrap();
        assert_eq!(func.use_def(u2).unwrap(), Some(d0));
    }

    #[test]
    fn erased_defs_invalidate_uses() {
        let mut func = Function::new("f");
        let b0 = func.make_block();
        let seq = func.make_sequence(vec![func.block_component(b0)]);
        func.set_body(seq);
        let x = func.create_variable("x", types::INT);
        let y = func.create_variable("y", types::INT);

        assign(&mut func, b0, x, 1);
        let def_inst = *func.blocks[b0].body().last().unwrap();

        let u = func.make_use(x, b0).unwrap();
        let ydef = func.create_def(y, types::INT);
        let data = InstructionData::new(Opcode::Assign, Some(ydef), smallvec![u.into()]).unwrap();
        func.append_inst(b0, data);

        func.erase_inst(b0, def_inst);
        assert_eq!(func.use_def(u), Err(IrError::UseInvalidated));
    }

    #[test]
    fn scope_is_enforced() {
        let mut func = Function::new("f");
        let b0 = func.make_block();
        let b1 = func.make_block();
        let c1 = func.block_component(b1);
        let seq = func.make_sequence(vec![func.block_component(b0), c1]);
        func.set_body(seq);

        let x = func.create_variable_in("x", types::INT, c1);
        assert!(func.make_use(x, b1).is_ok());
        assert_eq!(
            func.make_use(x, b0),
            Err(IrError::VariableNotInScope("x".to_string()))
        );
    }
}
