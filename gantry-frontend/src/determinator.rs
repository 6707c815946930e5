//! The determinator pass.
//!
//! After SSA construction, a phi may carry an *undefined* operand: the
//! variable is assigned on some paths into the join and not on others. The
//! dynamic IR tolerates this; the lowered program must not read such a value
//! unchecked. For every variable in that situation the pass synthesizes a
//! boolean companion — the *determinator* — that is `false` at function
//! entry, set to `true` after every local def of the variable, joined by
//! phis mirroring the variable's own phi shape, and finally consulted by a
//! guard branch in front of the first endangered use: the `false` edge jumps
//! to a terminal block that reports the uninitialized variable and traps.
//!
//! The pass never mutates the dynamic IR. It produces per-block *injection*
//! records, anchored to instructions of the original stream, which static
//! lowering replays while emitting.

use crate::ssa::SsaBuilder;
use gantry_ir::entity::SecondaryMap;
use gantry_ir::{Block, Def, DefNum, Function, Inst, IrResult, Variable};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Where an injected instruction sits relative to the original stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Directly after the block's phi section, before the first body
    /// instruction.
    Top,
    /// Directly after the given body instruction.
    After(Inst),
}

/// An injected `assign det, <bool>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetAssign {
    /// Index into [`Determinators::dets`].
    pub det: usize,
    /// The determinator def number this assign produces.
    pub num: DefNum,
    /// The assigned truth value.
    pub value: bool,
    /// Where to splice the assign.
    pub anchor: Anchor,
}

/// An injected phi on a determinator, mirroring the variable's phi shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetPhi {
    /// Index into [`Determinators::dets`].
    pub det: usize,
    /// The determinator def number this phi produces.
    pub num: DefNum,
    /// `(predecessor, determinator def)` pairs; edges whose side never
    /// defines the variable carry the `false` initializer's def.
    pub args: Vec<(Block, DefNum)>,
}

/// An injected guard: `br det ? <rest of block> : <trap>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetGuard {
    /// Index into [`Determinators::dets`].
    pub det: usize,
    /// The determinator def to branch on.
    pub num: DefNum,
    /// Guard in front of this body instruction, or in front of the
    /// terminator when `None` (a guarded `return` operand).
    pub before: Option<Inst>,
    /// Index into [`Determinators::traps`].
    pub trap: usize,
}

/// A terminal trap block to be materialized at lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapSpec {
    /// The uninitialized-variable message for `print_error`.
    pub message: String,
}

/// One synthesized determinator variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetVar {
    /// The variable this determinator covers.
    pub source: Variable,
    /// The generated name, `.det.<source>`.
    pub name: String,
    /// How many def numbers the pass allocated.
    pub num_defs: u32,
}

/// The injections for one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInjections {
    /// Injected determinator assigns.
    pub assigns: Vec<DetAssign>,
    /// Injected determinator phis (appended after the block's own phis).
    pub phis: Vec<DetPhi>,
    /// Injected guard branches.
    pub guards: Vec<DetGuard>,
}

impl BlockInjections {
    /// Whether nothing was injected here.
    pub fn is_empty(&self) -> bool {
        self.assigns.is_empty() && self.phis.is_empty() && self.guards.is_empty()
    }
}

/// The complete result of the pass, consumed by static lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Determinators {
    /// The synthesized determinator variables, in discovery order.
    pub dets: Vec<DetVar>,
    /// Per-block injection lists.
    pub injections: SecondaryMap<Block, BlockInjections>,
    /// The trap blocks to materialize, indexed by [`DetGuard::trap`].
    pub traps: Vec<TrapSpec>,
}

impl Determinators {
    /// Whether the pass found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.dets.is_empty()
    }

    /// Number of guard splits in `block`.
    pub fn num_guards(&self, block: Block) -> usize {
        self.injections[block].guards.len()
    }
}

/// Run the pass. Requires def resolution (including return resolution) to
/// have run; does not mutate the function.
pub fn run(func: &mut Function, ssa: &mut SsaBuilder) -> IrResult<Determinators> {
    let blocks = func.blocks_in_order();
    let entry = match func.entry_block() {
        Some(entry) => entry,
        None => return Ok(Determinators::default()),
    };

    let undetermined = collect_undetermined(func, &blocks)?;
    let det_vars = collect_det_vars(func, ssa, &blocks, &undetermined)?;
    if det_vars.is_empty() {
        return Ok(Determinators::default());
    }
    log::trace!("determinators needed for {} variables", det_vars.len());

    let mut result = Determinators::default();
    for &var in &det_vars {
        let det = result.dets.len();
        result.dets.push(DetVar {
            source: var,
            name: format!(".det.{}", func.variable_name(var)),
            num_defs: 0,
        });
        let det_out = propagate(func, &blocks, entry, var, det, &mut result);
        inject_guards(
            func,
            ssa,
            &blocks,
            &undetermined,
            &det_out,
            var,
            det,
            &mut result,
        )?;
    }
    Ok(result)
}

/// Classify defs as potentially undefined: a phi with an undefined operand,
/// or a phi reading another potentially-undefined def. Iterates to a fixed
/// point so chains and loop cycles of phis are covered.
fn collect_undetermined(func: &Function, blocks: &[Block]) -> IrResult<FxHashSet<Def>> {
    let mut undetermined = FxHashSet::default();
    loop {
        let mut changed = false;
        for &block in blocks {
            for &phi in func.blocks[block].phis() {
                let def = func.insts[phi].def.expect("phis define");
                if undetermined.contains(&def) {
                    continue;
                }
                let mut tainted = false;
                for (_, arg) in func.insts[phi].phi_pairs() {
                    match func.use_def(arg)? {
                        None => tainted = true,
                        Some(origin) if undetermined.contains(&origin) => tainted = true,
                        Some(_) => {}
                    }
                }
                if tainted {
                    undetermined.insert(def);
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(undetermined);
        }
    }
}

/// Whether a reaching def is dangerous to read unchecked.
fn is_undetermined(reaching: Option<Def>, undetermined: &FxHashSet<Def>) -> bool {
    match reaching {
        None => true,
        Some(def) => undetermined.contains(&def),
    }
}

/// The variables that need a determinator, in discovery order: variables
/// with an endangered body use, then declared returns endangered at a leaf.
fn collect_det_vars(
    func: &mut Function,
    ssa: &mut SsaBuilder,
    blocks: &[Block],
    undetermined: &FxHashSet<Def>,
) -> IrResult<Vec<Variable>> {
    let mut vars = Vec::new();
    for &block in blocks {
        for inst_index in 0..func.blocks[block].body().len() {
            let inst = func.blocks[block].body()[inst_index];
            for u in func.insts[inst].arg_uses().collect::<SmallVec<[_; 4]>>() {
                if is_undetermined(func.use_def(u)?, undetermined) {
                    let var = func.use_var(u);
                    if !vars.contains(&var) {
                        vars.push(var);
                    }
                }
            }
        }
    }
    let rets: Vec<Variable> = func.rets().to_vec();
    for leaf in func.leaves(func.root()) {
        for &var in &rets {
            let reaching = ssa.resolve_outgoing(func, leaf, var)?;
            if is_undetermined(reaching, undetermined) && !vars.contains(&var) {
                vars.push(var);
            }
        }
    }
    Ok(vars)
}

/// Build the determinator's own SSA form: `false` at entry, `true` after
/// every local def of the covered variable, and a phi wherever the incoming
/// determinator defs disagree. Blocks are processed in structural order;
/// only back edges can be unknown at visit time, and those joins always get
/// a phi whose arguments are filled in afterwards.
fn propagate(
    func: &Function,
    blocks: &[Block],
    entry: Block,
    var: Variable,
    det: usize,
    result: &mut Determinators,
) -> SecondaryMap<Block, Option<DefNum>> {
    let mut next_num = 0u32;
    let mut fresh = |result: &mut Determinators| {
        let num = DefNum::from_u32(next_num);
        next_num += 1;
        result.dets[det].num_defs = next_num;
        num
    };

    let mut det_out: SecondaryMap<Block, Option<DefNum>> = SecondaryMap::new();
    let mut pending: Vec<(Block, usize)> = Vec::new();

    let init = fresh(result);
    result.injections[entry].assigns.push(DetAssign {
        det,
        num: init,
        value: false,
        anchor: Anchor::Top,
    });

    for &block in blocks {
        let det_in = if block == entry {
            init
        } else {
            let preds = func.block_predecessors(block);
            let incoming: SmallVec<[Option<DefNum>; 4]> =
                preds.iter().map(|&p| det_out[p]).collect();
            let first = incoming.first().copied().flatten();
            let agreed = first.is_some() && incoming.iter().all(|&v| v == Some(first.unwrap()));
            if agreed {
                first.unwrap()
            } else {
                // A join where the determinator differs (or a back edge is
                // still unknown): mirror the variable's phi shape.
                let num = fresh(result);
                let phi_index = result.injections[block].phis.len();
                result.injections[block].phis.push(DetPhi {
                    det,
                    num,
                    args: Vec::new(),
                });
                pending.push((block, phi_index));
                num
            }
        };

        let mut current = det_in;
        for &inst in func.blocks[block].body() {
            let defines_var = func.insts[inst]
                .def
                .map(|d| func.defs[d].var == var)
                .unwrap_or(false);
            if defines_var {
                let num = fresh(result);
                result.injections[block].assigns.push(DetAssign {
                    det,
                    num,
                    value: true,
                    anchor: Anchor::After(inst),
                });
                current = num;
            }
        }
        det_out[block] = Some(current);
    }

    // Fill the deferred phi arguments now that every block has an outgoing
    // determinator def.
    for (block, phi_index) in pending {
        let args: Vec<(Block, DefNum)> = func
            .block_predecessors(block)
            .iter()
            .map(|&p| {
                let num = det_out[p].expect("all blocks were visited");
                (p, num)
            })
            .collect();
        result.injections[block].phis[phi_index].args = args;
    }
    det_out
}

/// The determinator def visible at the top of `block`, reading the records
/// `propagate` produced: a phi in the block wins, the entry inherits the
/// false initializer, and any other block without a phi has predecessors
/// that all agree, so the first one speaks for all of them.
fn det_at_block_top(
    func: &Function,
    result: &Determinators,
    det_out: &SecondaryMap<Block, Option<DefNum>>,
    det: usize,
    block: Block,
    entry: Block,
) -> DefNum {
    if let Some(phi) = result.injections[block].phis.iter().find(|p| p.det == det) {
        return phi.num;
    }
    if block == entry {
        return result.injections[entry]
            .assigns
            .iter()
            .find(|a| a.det == det && a.anchor == Anchor::Top)
            .expect("the entry holds the false initializer")
            .num;
    }
    let preds = func.block_predecessors(block);
    det_out[preds[0]].expect("propagation visited every block")
}

/// Inject the guard branches for `var`'s endangered uses.
#[allow(clippy::too_many_arguments)]
fn inject_guards(
    func: &mut Function,
    ssa: &mut SsaBuilder,
    blocks: &[Block],
    undetermined: &FxHashSet<Def>,
    det_out: &SecondaryMap<Block, Option<DefNum>>,
    var: Variable,
    det: usize,
    result: &mut Determinators,
) -> IrResult<()> {
    let entry = func.entry_block().expect("guards imply a non-empty function");
    let mut guarded: FxHashSet<Block> = FxHashSet::default();

    for &block in blocks {
        if chain_guarded(func, &guarded, block) {
            continue;
        }
        let det_top = det_at_block_top(func, result, det_out, det, block, entry);
        let mut current = det_top;
        let body: Vec<Inst> = func.blocks[block].body().to_vec();
        for inst in body {
            let mut endangered = false;
            for u in func.insts[inst].arg_uses().collect::<SmallVec<[_; 4]>>() {
                if func.use_var(u) == var && is_undetermined(func.use_def(u)?, undetermined) {
                    endangered = true;
                }
            }
            if endangered {
                let trap = result.traps.len();
                result.traps.push(trap_spec(func, var));
                result.injections[block].guards.push(DetGuard {
                    det,
                    num: current,
                    before: Some(inst),
                    trap,
                });
                guarded.insert(block);
                break;
            }
            // A local def of the variable flips the determinator; later
            // uses in the block are safe anyway.
            if let Some(assign) = result.injections[block]
                .assigns
                .iter()
                .find(|a| a.det == det && a.anchor == Anchor::After(inst))
            {
                current = assign.num;
            }
        }
    }

    // Declared returns read the variable at every function leaf.
    if func.rets().contains(&var) {
        for leaf in func.leaves(func.root()) {
            if chain_guarded(func, &guarded, leaf) {
                continue;
            }
            let reaching = ssa.resolve_outgoing(func, leaf, var)?;
            if is_undetermined(reaching, undetermined) {
                let num = det_out[leaf].expect("propagation visited every block");
                let trap = result.traps.len();
                result.traps.push(trap_spec(func, var));
                result.injections[leaf].guards.push(DetGuard {
                    det,
                    num,
                    before: None,
                    trap,
                });
                guarded.insert(leaf);
            }
        }
    }
    Ok(())
}

/// Whether a guard for the variable already dominates `block` along a
/// unique-predecessor chain.
fn chain_guarded(func: &Function, guarded: &FxHashSet<Block>, block: Block) -> bool {
    let mut cursor = block;
    loop {
        if guarded.contains(&cursor) {
            return true;
        }
        let preds = func.block_predecessors(cursor);
        if preds.len() == 1 {
            cursor = preds[0];
        } else {
            return false;
        }
    }
}

fn trap_spec(func: &Function, var: Variable) -> TrapSpec {
    TrapSpec {
        message: format!(
            "The variable `{}` was uninitialized at this time.",
            func.variable_name(var)
        ),
    }
}
