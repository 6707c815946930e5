//! The def-resolution engine.
//!
//! Given a use of a variable anywhere in the program, the engine finds the
//! set of reaching definitions and materializes phi instructions at join
//! blocks where multiple predecessors supply distinct defs. Resolution is
//! lazy: nothing happens until a block's incoming use-timeline is queried,
//! and every answer is cached on the def-timeline so repeated queries are
//! O(1) and idempotent.
//!
//! The search ascends the component tree from the query block and descends
//! into predecessor subtrees, folding the collected `(predecessor, def)`
//! pairs bottom-up. Loop conditions get a *provisional* phi def before their
//! predecessors are explored, so the loop-carried back edge resolves to the
//! phi instead of recursing forever; if the fold then proves the phi trivial
//! (every edge carries the same def), the phi is erased again and every
//! cached reference to it is rewritten.
//!
//! Type normalization happens at materialization: phi operand types are
//! reconciled to their least common ancestor, inserting `convert`
//! instructions in predecessor blocks where needed. An LCA of `void` is a
//! type error.

use gantry_ir::entity::SecondaryMap;
use gantry_ir::instructions::{InstructionData, Opcode};
use gantry_ir::types;
use gantry_ir::{Block, Constant, Def, Function, IrError, IrResult, Operand, Type, Variable};
use smallvec::SmallVec;

/// One resolved predecessor edge: which block it comes from and which def
/// (if any) it supplies.
type EdgeDef = (Block, Option<Def>);

/// The resolution engine. Holds only scratch state; all results live in the
/// function's def-timelines.
pub struct SsaBuilder {
    /// Structural position of every block, used to recognize back edges.
    order: SecondaryMap<Block, u32>,
}

impl SsaBuilder {
    /// Create an engine for `func`. The component tree must be complete.
    pub fn new(func: &Function) -> Self {
        let mut order = SecondaryMap::new();
        for (position, block) in func.blocks_in_order().into_iter().enumerate() {
            order[block] = position as u32;
        }
        Self { order }
    }

    /// Resolve every unresolved use in the function, materializing phis as
    /// needed. Blocks are visited in structural order and instructions in
    /// program order, so def numbering is deterministic.
    pub fn resolve_all(&mut self, func: &mut Function) -> IrResult<()> {
        for block in func.blocks_in_order() {
            let mut index = 0;
            while index < func.blocks[block].body().len() {
                let inst = func.blocks[block].body()[index];
                let arg_uses: SmallVec<[gantry_ir::Use; 4]> =
                    func.insts[inst].arg_uses().collect();
                for u in arg_uses {
                    let tl = func.uses[u]
                        .timeline
                        .expand()
                        .ok_or(IrError::UseInvalidated)?;
                    if !func.timelines[tl].resolved {
                        let var = func.timelines[tl].var;
                        self.resolve_incoming(func, block, var)?;
                    }
                }
                index += 1;
            }
        }
        Ok(())
    }

    /// Resolve the reaching defs of every declared return variable at every
    /// function leaf block, so lowering can synthesize `return` operands.
    pub fn resolve_returns(&mut self, func: &mut Function) -> IrResult<()> {
        let leaves = func.leaves(func.root());
        let rets: Vec<Variable> = func.rets().to_vec();
        for leaf in leaves {
            for &var in &rets {
                self.resolve_outgoing(func, leaf, var)?;
            }
        }
        Ok(())
    }

    /// The def of `var` visible at the end of `block`, resolving the block's
    /// incoming timeline if the block has no local def.
    pub fn resolve_outgoing(
        &mut self,
        func: &mut Function,
        block: Block,
        var: Variable,
    ) -> IrResult<Option<Def>> {
        if let Some(tl) = func.blocks[block]
            .timeline(var)
            .and_then(|dt| dt.outgoing_timeline())
        {
            if func.timelines[tl].resolved {
                return Ok(func.timelines[tl].def.expand());
            }
        }
        self.resolve_incoming(func, block, var)?;
        let tl = func.blocks[block]
            .timeline(var)
            .and_then(|dt| dt.outgoing_timeline())
            .expect("resolution leaves an outgoing timeline behind");
        Ok(func.timelines[tl].def.expand())
    }

    /// Resolve what reaches the top of `block` for `var`: the def of the
    /// block's incoming use-timeline. Creates and caches the timeline; a
    /// `None` result means the variable is undefined along at least this
    /// path (the determinator pass deals with partially undefined phis
    /// later).
    pub fn resolve_incoming(
        &mut self,
        func: &mut Function,
        block: Block,
        var: Variable,
    ) -> IrResult<Option<Def>> {
        let tl = match func.blocks[block]
            .timeline(var)
            .and_then(|dt| dt.incoming_timeline())
        {
            Some(tl) => tl,
            None => func.create_incoming_timeline(block, var),
        };
        if func.timelines[tl].resolved {
            return Ok(func.timelines[tl].def.expand());
        }

        let preds = func.block_predecessors(block);

        // Entry-ish block: nothing reaches it, the variable is undefined
        // here.
        if preds.is_empty() {
            func.timelines[tl].resolved = true;
            return Ok(None);
        }

        let my_position = self.order[block];
        let has_back_edge = preds.iter().any(|&p| self.order[p] > my_position);

        // A join that can see a back edge gets its phi def up front, so the
        // recursion below short-circuits on the self-edge instead of
        // cycling.
        let provisional = if has_back_edge && preds.len() > 1 {
            let def = func.create_def(var, func.variable_type(var));
            func.timelines[tl].def = def.into();
            func.timelines[tl].resolved = true;
            log::trace!(
                "provisional phi def for {} at {}",
                func.variable_name(var),
                block
            );
            Some(def)
        } else {
            None
        };

        // Descend into every predecessor, collecting edge defs and linking
        // the incoming nodes.
        let mut edges: SmallVec<[EdgeDef; 4]> = SmallVec::new();
        for &pred in &preds {
            let def = self.resolve_outgoing(func, pred, var)?;
            let remote = func.blocks[pred]
                .timeline(var)
                .and_then(|dt| dt.outgoing_timeline());
            func.link_incoming(block, var, pred, remote);
            edges.push((pred, def));
        }

        // Fold: how many distinct values arrive, the provisional phi's
        // self-edge excluded?
        let mut distinct: SmallVec<[Option<Def>; 4]> = SmallVec::new();
        for &(_, def) in &edges {
            if provisional.is_some() && def == provisional {
                continue;
            }
            if !distinct.contains(&def) {
                distinct.push(def);
            }
        }

        if distinct.len() == 1 {
            // All edges agree: no phi needed.
            let resolved = distinct[0];
            func.timelines[tl].def = resolved.into();
            func.timelines[tl].resolved = true;
            if let Some(phi_def) = provisional {
                self.replace_def(func, phi_def, resolved);
                func.release_def(phi_def);
            }
            return Ok(resolved);
        }

        // Distinct defs arrive: materialize the phi.
        let phi_def = self.materialize_phi(func, block, var, tl, provisional, &edges)?;
        Ok(Some(phi_def))
    }

    /// Build the phi instruction for `block`/`var` from the resolved edge
    /// list: normalize operand types to their least common ancestor
    /// (inserting converts in predecessor blocks), create the operand uses
    /// against the predecessors' outgoing timelines, and splice the
    /// instruction into the block's phi partition.
    ///
    /// The type fold runs before any mutation, so a `TypeMismatch` leaves
    /// the IR untouched apart from the already-cached edge links.
    fn materialize_phi(
        &mut self,
        func: &mut Function,
        block: Block,
        var: Variable,
        tl: gantry_ir::UseTimeline,
        provisional: Option<Def>,
        edges: &[EdgeDef],
    ) -> IrResult<Def> {
        // Reconcile the defined operand types.
        let mut lca_ty: Option<Type> = None;
        for &(_, def) in edges {
            let def = match def {
                Some(def) if Some(def) != provisional => def,
                _ => continue,
            };
            let ty = func.defs[def].ty;
            lca_ty = Some(match lca_ty {
                None => ty,
                Some(acc) => {
                    let meet = func.types.lca(acc, ty);
                    if meet == types::VOID {
                        return Err(IrError::TypeMismatch {
                            expected: func.types.name(acc).to_string(),
                            found: func.types.name(ty).to_string(),
                        });
                    }
                    meet
                }
            });
        }
        let phi_ty = lca_ty.unwrap_or_else(|| func.variable_type(var));

        // Raise mistyped operands in their predecessor blocks.
        let mut final_edges: SmallVec<[EdgeDef; 4]> = SmallVec::new();
        for &(pred, def) in edges {
            let def = match def {
                Some(def) if Some(def) != provisional && func.defs[def].ty != phi_ty => {
                    Some(self.insert_convert(func, pred, var, def, phi_ty)?)
                }
                other => other,
            };
            final_edges.push((pred, def));
        }

        let phi_def = match provisional {
            Some(def) => {
                func.defs[def].ty = phi_ty;
                def
            }
            None => func.create_def(var, phi_ty),
        };

        // Operand uses report into the predecessors' outgoing timelines;
        // undefined edges use the predecessor's (resolved-undefined)
        // incoming timeline, which resolution has materialized by now.
        let mut operands: SmallVec<[Operand; 2]> = SmallVec::new();
        for &(pred, _) in &final_edges {
            let remote = func.blocks[pred]
                .timeline(var)
                .and_then(|dt| dt.outgoing_timeline())
                .expect("resolved predecessors carry an outgoing timeline");
            let operand_use = func.make_use_on(remote);
            operands.push(Constant::Blockref(pred).into());
            operands.push(operand_use.into());
        }

        let data = InstructionData::new(Opcode::Phi, Some(phi_def), operands)?;
        let inst = func.insert_phi_inst(block, data);
        func.defs[phi_def].inst = inst.into();
        func.defs[phi_def].timeline = tl.into();
        func.timelines[tl].def = phi_def.into();
        func.timelines[tl].resolved = true;
        log::trace!(
            "phi {}{} materialized at {}",
            func.variable_name(var),
            func.defs[phi_def].num,
            block
        );
        Ok(phi_def)
    }

    /// Append a `convert` at the end of `pred` raising `def` to `ty`. The
    /// emplacement automatically reassociates downstream phi operand uses of
    /// the old outgoing def onto the convert's timeline.
    fn insert_convert(
        &mut self,
        func: &mut Function,
        pred: Block,
        var: Variable,
        def: Def,
        ty: Type,
    ) -> IrResult<Def> {
        let source_tl = func.blocks[pred]
            .timeline(var)
            .and_then(|dt| dt.outgoing_timeline())
            .expect("a resolved predecessor carries an outgoing timeline");
        debug_assert_eq!(func.timelines[source_tl].def.expand(), Some(def));
        let operand_use = func.make_use_on(source_tl);
        let convert_def = func.create_def(var, ty);
        let data = InstructionData::new(
            Opcode::Convert,
            Some(convert_def),
            smallvec::smallvec![operand_use.into()],
        )?;
        // Stay ahead of an explicit terminal instruction if the block has
        // one.
        let index = {
            let body = func.blocks[pred].body();
            match body.last() {
                Some(&last) if func.insts[last].opcode.is_terminator() => body.len() - 1,
                _ => body.len(),
            }
        };
        func.insert_inst(pred, index, data);
        log::trace!(
            "convert {}{} -> {} appended to {}",
            func.variable_name(var),
            func.defs[def].num,
            func.types.name(ty),
            pred
        );
        Ok(convert_def)
    }

    /// Rewrite every timeline whose def is `old` to carry `new` instead.
    /// Uses attached to those timelines follow automatically, as do the
    /// incoming nodes referencing them.
    fn replace_def(&mut self, func: &mut Function, old: Def, new: Option<Def>) {
        for data in func.timelines.values_mut() {
            if data.def.expand() == Some(old) {
                data.def = new.into();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_ir::types;
    use smallvec::smallvec;

    /// `x = assign <value>` appended to `block`.
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

    /// `sink = assign x` appended to `block`, returning the use of `x`.
    fn read(func: &mut Function, block: Block, var: Variable, sink: Variable) -> gantry_ir::Use {
        let u = func.make_use(var, block).unwrap();
        let def = func.create_def(sink, types::INT);
        let data = InstructionData::new(Opcode::Assign, Some(def), smallvec![u.into()]).unwrap();
        func.append_inst(block, data);
        u
    }

    fn diamond(func: &mut Function) -> (Block, Block, Block, Block) {
        let entry = func.make_block();
        let then_block = func.make_block();
        let else_block = func.make_block();
        let join = func.make_block();
        let fork = func.make_fork(
            func.block_component(entry),
            vec![
                func.block_component(then_block),
                func.block_component(else_block),
            ],
        );
        let seq = func.make_sequence(vec![fork, func.block_component(join)]);
        func.set_body(seq);
        (entry, then_block, else_block, join)
    }

    #[test]
    fn join_materializes_phi() {
        let mut func = Function::new("f");
        let (_, then_block, else_block, join) = diamond(&mut func);
        let x = func.create_variable("x", types::INT);
        let sink = func.create_variable("sink", types::INT);

        assign(&mut func, then_block, x, 1);
        assign(&mut func, else_block, x, 2);
        let u = read(&mut func, join, x, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        let reaching = func.use_def(u).unwrap().expect("x reaches the join");
        let phi_inst = func.defs[reaching].inst.unwrap();
        assert_eq!(func.insts[phi_inst].opcode, Opcode::Phi);
        assert_eq!(func.blocks[join].phis(), &[phi_inst]);
        assert_eq!(func.defs[reaching].num.as_u32(), 2);

        let pairs: Vec<_> = func.insts[phi_inst].phi_pairs().collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, then_block);
        assert_eq!(pairs[1].0, else_block);
    }

    #[test]
    fn same_def_on_both_edges_stays_phi_free() {
        let mut func = Function::new("f");
        let (entry, _, _, join) = diamond(&mut func);
        let x = func.create_variable("x", types::INT);
        let sink = func.create_variable("sink", types::INT);

        let d0 = assign(&mut func, entry, x, 1);
        let u = read(&mut func, join, x, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        assert_eq!(func.use_def(u).unwrap(), Some(d0));
        assert!(func.blocks[join].phis().is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut func = Function::new("f");
        let (_, then_block, else_block, join) = diamond(&mut func);
        let x = func.create_variable("x", types::INT);
        let sink = func.create_variable("sink", types::INT);

        assign(&mut func, then_block, x, 1);
        assign(&mut func, else_block, x, 2);
        let u = read(&mut func, join, x, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();
        let first = func.use_def(u).unwrap();
        let phi_count = func.blocks[join].phis().len();

        ssa.resolve_all(&mut func).unwrap();
        let again = ssa.resolve_incoming(&mut func, join, x).unwrap();
        assert_eq!(first, again);
        assert_eq!(func.blocks[join].phis().len(), phi_count);
    }

    #[test]
    fn loop_carried_def_cycles_through_condition_phi() {
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

        let i = func.create_variable("i", types::INT);
        let sink = func.create_variable("sink", types::INT);

        let d0 = assign(&mut func, start, i, 0);
        // body: i = i + 1 (a loop-carried redefinition)
        let u_body = func.make_use(i, body).unwrap();
        let d1 = func.create_def(i, types::INT);
        let data = InstructionData::new(
            Opcode::Add,
            Some(d1),
            smallvec![u_body.into(), Constant::Int(1).into()],
        )
        .unwrap();
        func.append_inst(body, data);
        let u_exit = read(&mut func, exit, i, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        // The body's use reads the condition phi.
        let phi_def = func.use_def(u_body).unwrap().expect("phi reaches the body");
        let phi_inst = func.defs[phi_def].inst.unwrap();
        assert_eq!(func.blocks[cond].phis(), &[phi_inst]);
        let pairs: Vec<_> = func.insts[phi_inst].phi_pairs().collect();
        assert_eq!(pairs[0].0, start);
        assert_eq!(pairs[1].0, update);
        assert_eq!(func.use_def(pairs[0].1).unwrap(), Some(d0));
        assert_eq!(func.use_def(pairs[1].1).unwrap(), Some(d1));

        // The exit read sees the same phi.
        assert_eq!(func.use_def(u_exit).unwrap(), Some(phi_def));
    }

    #[test]
    fn unmodified_loop_variable_needs_no_phi() {
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

        let n = func.create_variable("n", types::INT);
        let sink = func.create_variable("sink", types::INT);

        let d0 = assign(&mut func, start, n, 10);
        let u_body = read(&mut func, body, n, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        // The provisional phi collapses: the back edge carries the same def.
        assert_eq!(func.use_def(u_body).unwrap(), Some(d0));
        assert!(func.blocks[cond].phis().is_empty());
        // The def counter rolled back, so the next def of n is n1.
        let next = func.create_def(n, types::INT);
        assert_eq!(func.defs[next].num.as_u32(), 1);
        assert!(func.blocks[exit].phis().is_empty());
    }

    #[test]
    fn mixed_types_convert_in_predecessor() {
        let mut func = Function::new("f");
        let (_, then_block, else_block, join) = diamond(&mut func);
        let x = func.create_variable("x", types::ANY);
        let sink = func.create_variable("sink", types::ANY);

        // then: x = 1 (int), else: x = 2.0 (float)
        let d_int = func.create_def(x, types::INT);
        let data = InstructionData::new(
            Opcode::Assign,
            Some(d_int),
            smallvec![Constant::Int(1).into()],
        )
        .unwrap();
        func.append_inst(then_block, data);

        let d_float = func.create_def(x, types::FLOAT);
        let data = InstructionData::new(
            Opcode::Assign,
            Some(d_float),
            smallvec![Constant::Float(2.0).into()],
        )
        .unwrap();
        func.append_inst(else_block, data);

        let u = read(&mut func, join, x, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        // A convert was appended to the then block, raising x0 to float.
        let convert_inst = *func.blocks[then_block].body().last().unwrap();
        assert_eq!(func.insts[convert_inst].opcode, Opcode::Convert);
        let convert_def = func.insts[convert_inst].def.unwrap();
        assert_eq!(func.defs[convert_def].ty, types::FLOAT);

        // The phi reads the convert on the then edge and has float type.
        let phi_def = func.use_def(u).unwrap().unwrap();
        assert_eq!(func.defs[phi_def].ty, types::FLOAT);
        let phi_inst = func.defs[phi_def].inst.unwrap();
        let pairs: Vec<_> = func.insts[phi_inst].phi_pairs().collect();
        assert_eq!(func.use_def(pairs[0].1).unwrap(), Some(convert_def));
        assert_eq!(func.use_def(pairs[1].1).unwrap(), Some(d_float));
    }

    #[test]
    fn partially_undefined_phi_carries_the_undefined_edge() {
        let mut func = Function::new("f");
        let (_, then_block, else_block, join) = diamond(&mut func);
        let x = func.create_variable("x", types::INT);
        let sink = func.create_variable("sink", types::INT);

        assign(&mut func, then_block, x, 1);
        let u = read(&mut func, join, x, sink);

        let mut ssa = SsaBuilder::new(&func);
        ssa.resolve_all(&mut func).unwrap();

        let phi_def = func.use_def(u).unwrap().expect("mixed join still yields a phi");
        let phi_inst = func.defs[phi_def].inst.unwrap();
        let pairs: Vec<_> = func.insts[phi_inst].phi_pairs().collect();
        assert_eq!(pairs.len(), 2);
        assert!(func.use_def(pairs[0].1).unwrap().is_some());
        assert_eq!(pairs[1].0, else_block);
        assert_eq!(func.use_def(pairs[1].1).unwrap(), None);
    }
}
