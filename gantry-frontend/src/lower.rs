//! Static lowering: from the dynamic IR to the flat, block-indexed form.
//!
//! A single pass over the component tree in structural order:
//!
//! 1. *Id allocation.* Every block gets a dense [`BlockId`]; a block with
//!    `k` determinator guards occupies `k + 1` consecutive ids (the guard
//!    splits it), and the determinator trap blocks take the ids after the
//!    last ordinary block.
//! 2. *Variable reification.* Every dynamic variable becomes a
//!    [`StaticVariable`] carrying its reconciled type and def count;
//!    determinator variables are appended after them.
//! 3. *Instruction emission.* Per block: resolved phis, determinator phis,
//!    then the body interleaved with determinator injections at their
//!    anchors, then a terminator synthesized from the component tree (or
//!    the block's own explicit terminal instruction).
//! 4. *Operand translation.* Uses become `(variable-id, def-number)` pairs;
//!    an unresolved origin becomes the undefined sentinel; block references
//!    become dense block ids.

use crate::determinator::{self, Anchor, Determinators};
use crate::ssa::SsaBuilder;
use gantry_ir::entity::SecondaryMap;
use gantry_ir::packed_option::PackedOption;
use gantry_ir::static_ir::{
    BlockId, StaticBlock, StaticDef, StaticFunction, StaticInstruction, StaticOperand, StaticUse,
    StaticVariable, VarId,
};
use gantry_ir::types;
use gantry_ir::{
    Block, Constant, Def, Function, Inst, IrError, IrResult, Opcode, Operand, Type, Use, Variable,
};
use smallvec::SmallVec;

/// Lower `func` to its static form. Runs def resolution and the
/// determinator pass first; the dynamic IR is only mutated by resolution
/// (phis, converts), never by the lowering itself.
pub fn lower_function(func: &mut Function) -> IrResult<StaticFunction> {
    let mut ssa = SsaBuilder::new(func);
    ssa.resolve_all(func)?;
    ssa.resolve_returns(func)?;
    let dets = determinator::run(func, &mut ssa)?;
    Lowering::new(func, &dets).run()
}

struct Lowering<'a> {
    func: &'a Function,
    dets: &'a Determinators,
    blocks: Vec<Block>,
    /// First static id of each dynamic block.
    base: SecondaryMap<Block, PackedOption<BlockId>>,
    /// First static id of the trap blocks.
    trap_base: u32,
    /// Static id base of the determinator variables.
    det_base: u32,
}

impl<'a> Lowering<'a> {
    fn new(func: &'a Function, dets: &'a Determinators) -> Self {
        let blocks = func.blocks_in_order();
        Self {
            func,
            dets,
            blocks,
            base: SecondaryMap::new(),
            trap_base: 0,
            det_base: func.variables.len() as u32,
        }
    }

    fn run(mut self) -> IrResult<StaticFunction> {
        self.allocate_block_ids();
        let mut statics = StaticFunction::new(self.func.name.clone());
        self.reify_variables(&mut statics)?;
        for index in 0..self.blocks.len() {
            let block = self.blocks[index];
            self.emit_block(&mut statics, block)?;
        }
        self.emit_traps(&mut statics);
        statics.args = self.func.args().iter().map(|&v| self.var_id(v)).collect();
        statics.rets = self.func.rets().iter().map(|&v| self.var_id(v)).collect();
        log::trace!(
            "lowered {}: {} blocks, {} variables",
            statics.name,
            statics.blocks.len(),
            statics.variables.len()
        );
        Ok(statics)
    }

    /// How many static blocks a dynamic block expands to.
    fn segments(&self, block: Block) -> u32 {
        1 + self.dets.num_guards(block) as u32
    }

    fn allocate_block_ids(&mut self) {
        let mut next = 0u32;
        for index in 0..self.blocks.len() {
            let block = self.blocks[index];
            self.base[block] = BlockId::from_u32(next).into();
            next += self.segments(block);
        }
        self.trap_base = next;
        log::trace!(
            "{} static blocks allocated ({} traps follow)",
            next,
            self.dets.traps.len()
        );
    }

    /// The id control enters a block through.
    fn entry_id(&self, block: Block) -> BlockId {
        self.base[block].expect("every block has an allocated id")
    }

    /// The id control leaves a block from: its last segment.
    fn exit_id(&self, block: Block) -> BlockId {
        let base = self.entry_id(block).as_u32();
        BlockId::from_u32(base + self.segments(block) - 1)
    }

    fn var_id(&self, var: Variable) -> VarId {
        VarId::from_u32(var.as_u32())
    }

    fn det_id(&self, det: usize) -> VarId {
        VarId::from_u32(self.det_base + det as u32)
    }

    /// Create the static variables: the reconciled type of every dynamic
    /// variable, then the determinator booleans.
    ///
    /// A variable declared with a concrete type keeps it; every def's type
    /// must then be the declared type or a descendant of it (the descendant
    /// case is what the assign-coercion rewrite converts). A variable
    /// declared as `any` takes the least common ancestor of its defs'
    /// types.
    fn reify_variables(&mut self, statics: &mut StaticFunction) -> IrResult<()> {
        for (var, data) in self.func.variables.iter() {
            let declared = data.ty;
            let mut folded: Option<Type> = None;
            for def_data in self.func.defs.values() {
                // Only defs that made it onto a timeline count; released
                // provisional phi defs never did.
                if def_data.var != var || def_data.timeline.is_none() {
                    continue;
                }
                let ty = def_data.ty;
                if declared != types::ANY {
                    let meet = self.func.types.lca(ty, declared);
                    if meet != declared {
                        return Err(IrError::TypeMismatch {
                            expected: self.func.types.name(declared).to_string(),
                            found: self.func.types.name(ty).to_string(),
                        });
                    }
                }
                folded = Some(match folded {
                    None => ty,
                    Some(acc) => {
                        let meet = self.func.types.lca(acc, ty);
                        if meet == types::VOID {
                            return Err(IrError::TypeMismatch {
                                expected: self.func.types.name(acc).to_string(),
                                found: self.func.types.name(ty).to_string(),
                            });
                        }
                        meet
                    }
                });
            }
            let ty = if declared != types::ANY {
                declared
            } else {
                folded.unwrap_or(declared)
            };
            statics.variables.push(StaticVariable {
                name: data.name.clone(),
                ty,
                num_defs: data.num_defs(),
            });
        }
        for det in &self.dets.dets {
            statics.variables.push(StaticVariable {
                name: det.name.clone(),
                ty: types::BOOL,
                num_defs: det.num_defs,
            });
        }
        Ok(())
    }

    fn static_def(&self, def: Def) -> StaticDef {
        let data = &self.func.defs[def];
        StaticDef {
            var: self.var_id(data.var),
            num: data.num,
        }
    }

    fn translate_use(&self, u: Use) -> IrResult<StaticUse> {
        let var = self.var_id(self.func.use_var(u));
        Ok(match self.func.use_def(u)? {
            Some(def) => StaticUse::defined(var, self.func.defs[def].num),
            None => StaticUse::undefined(var),
        })
    }

    fn translate_operand(&self, operand: &Operand) -> IrResult<StaticOperand> {
        Ok(match operand {
            Operand::Use(u) => self.translate_use(*u)?.into(),
            Operand::Constant(Constant::Blockref(block)) => self.entry_id(*block).into(),
            Operand::Constant(constant) => constant.clone().into(),
        })
    }

    /// Translate one dynamic instruction. An `assign` whose def type is a
    /// strict descendant of the variable's reconciled type is rewritten to
    /// a `convert`, per the assign-coercion rule.
    fn translate_inst(&self, inst: Inst, rets: usize) -> IrResult<StaticInstruction> {
        let data = &self.func.insts[inst];
        let mut opcode = data.opcode;
        if opcode == Opcode::Ret && data.operands.len() != rets {
            return Err(IrError::TypeMismatch {
                expected: format!("{rets} return values"),
                found: format!("{} return values", data.operands.len()),
            });
        }
        let def = data.def.map(|d| self.static_def(d));
        if opcode == Opcode::Assign {
            let d = data.def.expect("assign defines");
            let declared = self.func.variables[self.func.defs[d].var].ty;
            if declared != types::ANY && self.func.defs[d].ty != declared {
                opcode = Opcode::Convert;
            }
        }
        let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
        if opcode == Opcode::Phi {
            // Phi predecessor markers name the edge the value arrives on,
            // which is the predecessor's *exit* segment.
            for (pred, arg) in data.phi_pairs() {
                operands.push(self.exit_id(pred).into());
                operands.push(self.translate_use(arg)?.into());
            }
        } else {
            for operand in &data.operands {
                operands.push(self.translate_operand(operand)?);
            }
        }
        Ok(StaticInstruction::new(opcode, def, operands))
    }

    /// Emit one dynamic block: phis, determinator phis, the injected
    /// `false`/`true` assigns, the body interleaved with guard splits, and
    /// the terminator.
    fn emit_block(&self, statics: &mut StaticFunction, block: Block) -> IrResult<()> {
        let inj = &self.dets.injections[block];
        let rets = self.func.rets().len();
        let mut current = self.entry_id(block);
        let mut segment = StaticBlock::new(current.to_string());

        for &phi in self.func.blocks[block].phis() {
            segment.push(self.translate_inst(phi, rets)?);
        }
        for det_phi in &inj.phis {
            let var = self.det_id(det_phi.det);
            let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
            for &(pred, num) in &det_phi.args {
                operands.push(self.exit_id(pred).into());
                operands.push(StaticUse::defined(var, num).into());
            }
            segment.push(StaticInstruction::new(
                Opcode::Phi,
                Some(StaticDef {
                    var,
                    num: det_phi.num,
                }),
                operands,
            ));
        }
        for assign in &inj.assigns {
            if assign.anchor == Anchor::Top {
                segment.push(self.det_assign(assign.det, assign.num, assign.value));
            }
        }

        for &inst in self.func.blocks[block].body() {
            for guard in &inj.guards {
                if guard.before == Some(inst) {
                    let next = BlockId::from_u32(current.as_u32() + 1);
                    segment.push(self.guard_branch(guard, next));
                    statics.blocks.push(segment);
                    current = next;
                    segment = StaticBlock::new(current.to_string());
                }
            }
            segment.push(self.translate_inst(inst, rets)?);
            for assign in &inj.assigns {
                if assign.anchor == Anchor::After(inst) {
                    segment.push(self.det_assign(assign.det, assign.num, assign.value));
                }
            }
        }

        for guard in &inj.guards {
            if guard.before.is_none() {
                let next = BlockId::from_u32(current.as_u32() + 1);
                segment.push(self.guard_branch(guard, next));
                statics.blocks.push(segment);
                current = next;
                segment = StaticBlock::new(current.to_string());
            }
        }

        let explicit_terminal = self.func.blocks[block]
            .body()
            .last()
            .map(|&inst| self.func.insts[inst].opcode.is_terminator())
            .unwrap_or(false);
        if !explicit_terminal {
            segment.push(self.terminator(block)?);
        }
        statics.blocks.push(segment);
        Ok(())
    }

    fn det_assign(&self, det: usize, num: gantry_ir::DefNum, value: bool) -> StaticInstruction {
        StaticInstruction::new(
            Opcode::Assign,
            Some(StaticDef {
                var: self.det_id(det),
                num,
            }),
            smallvec::smallvec![Constant::Bool(value).into()],
        )
    }

    fn guard_branch(
        &self,
        guard: &crate::determinator::DetGuard,
        next: BlockId,
    ) -> StaticInstruction {
        let trap = BlockId::from_u32(self.trap_base + guard.trap as u32);
        StaticInstruction::new(
            Opcode::Cbranch,
            None,
            smallvec::smallvec![
                StaticUse::defined(self.det_id(guard.det), guard.num).into(),
                next.into(),
                trap.into(),
            ],
        )
    }

    /// Synthesize the terminator from the block's successor set.
    fn terminator(&self, block: Block) -> IrResult<StaticInstruction> {
        let succs = self.func.block_successors(block);
        match succs.len() {
            0 => {
                let leaves = self.func.leaves(self.func.root());
                if leaves.contains(&block) {
                    let mut operands: SmallVec<[StaticOperand; 2]> = SmallVec::new();
                    for &var in self.func.rets() {
                        operands.push(self.outgoing_use(block, var).into());
                    }
                    Ok(StaticInstruction::new(Opcode::Ret, None, operands))
                } else {
                    Ok(StaticInstruction::new(
                        Opcode::Terminate,
                        None,
                        SmallVec::new(),
                    ))
                }
            }
            1 => Ok(StaticInstruction::new(
                Opcode::Ucbranch,
                None,
                smallvec::smallvec![self.entry_id(succs[0]).into()],
            )),
            n => {
                debug_assert_eq!(n, 2, "conditional branches are two-way");
                let cond = self.func.blocks[block]
                    .condition
                    .expect("a forking block names its condition variable");
                Ok(StaticInstruction::new(
                    Opcode::Cbranch,
                    None,
                    smallvec::smallvec![
                        self.outgoing_use(block, cond).into(),
                        self.entry_id(succs[0]).into(),
                        self.entry_id(succs[1]).into(),
                    ],
                ))
            }
        }
    }

    /// A static use of the def of `var` visible at the end of `block`.
    fn outgoing_use(&self, block: Block, var: Variable) -> StaticUse {
        let def = self.func.blocks[block]
            .timeline(var)
            .and_then(|dt| dt.outgoing_timeline())
            .and_then(|tl| self.func.timelines[tl].def.expand());
        match def {
            Some(def) => StaticUse::defined(self.var_id(var), self.func.defs[def].num),
            None => StaticUse::undefined(self.var_id(var)),
        }
    }

    fn emit_traps(&self, statics: &mut StaticFunction) {
        for (index, trap) in self.dets.traps.iter().enumerate() {
            let id = BlockId::from_u32(self.trap_base + index as u32);
            let mut block = StaticBlock::new(id.to_string());
            block.push(StaticInstruction::new(
                Opcode::Call,
                None,
                smallvec::smallvec![
                    Constant::from("print_error").into(),
                    Constant::Str(trap.message.clone()).into(),
                ],
            ));
            block.push(StaticInstruction::new(
                Opcode::Unreachable,
                None,
                SmallVec::new(),
            ));
            statics.blocks.push(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::FunctionBuilder;

    fn single_block(func: &mut Function) -> Block {
        let mut builder = FunctionBuilder::new(func);
        let entry = builder.create_block();
        let entry_c = builder.component(entry);
        let seq = builder.make_sequence(&[entry_c]);
        builder.set_body(seq);
        entry
    }

    /// Assigning an int to a float-declared variable interposes a convert.
    #[test]
    fn assign_coercion_rewrites_to_convert() {
        let mut func = Function::new("coerce");
        let entry = single_block(&mut func);
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let x = builder.declare_var("x", types::FLOAT);
            builder.declare_ret(x);
            builder.switch_to_block(entry);
            builder.ins().assign(x, 1).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(
            lowered.to_string(),
            "BLOCK0:\n  x0 = convert 1\n  return x0\n"
        );
    }

    /// Assigning an unrelated type is a type error at lowering.
    #[test]
    fn assign_of_unrelated_type_is_rejected() {
        let mut func = Function::new("mismatch");
        let entry = single_block(&mut func);
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let x = builder.declare_var("x", types::BOOL);
            builder.declare_ret(x);
            builder.switch_to_block(entry);
            builder.ins().assign(x, 1).unwrap();
        }
        let err = lower_function(&mut func).unwrap_err();
        assert_eq!(
            err,
            IrError::TypeMismatch {
                expected: "bool".to_string(),
                found: "int".to_string(),
            }
        );
    }

    /// A function with no declared returns still terminates its leaf with a
    /// bare `return`.
    #[test]
    fn bare_return() {
        let mut func = Function::new("bare");
        let entry = single_block(&mut func);
        {
            let mut builder = FunctionBuilder::new(&mut func);
            let x = builder.declare_var("x", types::INT);
            builder.switch_to_block(entry);
            builder.ins().assign(x, 1).unwrap();
        }
        let lowered = lower_function(&mut func).unwrap();
        assert_eq!(lowered.to_string(), "BLOCK0:\n  x0 = 1\n  return\n");
    }
}
