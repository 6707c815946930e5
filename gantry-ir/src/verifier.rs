//! A verifier for the dynamic IR.
//!
//! Checks the structural invariants the rest of the system leans on:
//!
//! - Local use-timelines are ordered by their defining instruction's
//!   position, one per local def.
//! - Every use sits on a timeline of its own variable, and every resolved
//!   timeline's def belongs to that variable.
//! - Every incoming node names an actual predecessor in the component tree.
//! - Every resolved phi has one operand pair per predecessor, in
//!   predecessor order, and each operand's origin def is the predecessor's
//!   outgoing def for that variable.
//! - Def and use back-references agree with the instructions that carry
//!   them.
//!
//! The verifier is read-only and cheap enough to run after every pass in
//! tests and debug builds.

use crate::entities::Block;
use crate::function::Function;
use crate::instructions::Opcode;
use core::fmt;
use std::error::Error;

/// A verifier error, carrying the offending block and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    /// The block the fault was found in.
    pub block: Block,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.block, self.message)
    }
}

impl Error for VerifierError {}

/// Result of a verifier run.
pub type VerifierResult = Result<(), VerifierError>;

macro_rules! verify {
    ($cond:expr, $block:expr, $($fmt:tt)*) => {
        if !$cond {
            return Err(VerifierError {
                block: $block,
                message: format!($($fmt)*),
            });
        }
    };
}

/// Verify the whole function.
pub fn verify_function(func: &Function) -> VerifierResult {
    let blocks = func.blocks_in_order();
    for &block in &blocks {
        verify_block(func, block)?;
    }
    log::trace!("verified {} blocks of {}", blocks.len(), func.name);
    Ok(())
}

fn verify_block(func: &Function, block: Block) -> VerifierResult {
    let preds = func.block_predecessors(block);
    let data = &func.blocks[block];

    for var in data.timeline_vars() {
        let dt = data.timeline(var).expect("var listed without a timeline");

        // Local timelines: ordered by defining position, defs of this
        // variable, bidirectional def links intact.
        let mut last_index = None;
        for &tl in dt.local_timelines() {
            let tl_data = &func.timelines[tl];
            verify!(
                tl_data.var == var,
                block,
                "local timeline {tl} tracks the wrong variable"
            );
            let def_inst = tl_data
                .def_inst
                .expect("local timelines have a defining instruction");
            let index = data.body_index_of(def_inst);
            verify!(
                index.is_some(),
                block,
                "defining instruction {def_inst} is not in the body"
            );
            verify!(
                last_index < index,
                block,
                "local timelines out of order at {def_inst}"
            );
            last_index = index;

            let def = tl_data.def.expect("local timelines carry their def");
            verify!(
                func.defs[def].var == var,
                block,
                "timeline {tl} carries a def of another variable"
            );
            verify!(
                func.defs[def].timeline.expand() == Some(tl),
                block,
                "def {def} does not link back to its timeline"
            );
        }

        let body_defs = data
            .body()
            .iter()
            .filter(|&&inst| {
                func.insts[inst]
                    .def
                    .map(|d| func.defs[d].var == var)
                    .unwrap_or(false)
            })
            .count();
        verify!(
            dt.num_local_defs() == body_defs,
            block,
            "{} local timelines for {} local defs of {}",
            dt.num_local_defs(),
            body_defs,
            func.variable_name(var)
        );

        // Uses report into timelines of their own variable.
        for &tl in dt.timelines() {
            for &u in func.timelines[tl].uses.as_slice(&func.use_pool) {
                verify!(
                    func.uses[u].var == var,
                    block,
                    "use {u} reports into a timeline of another variable"
                );
                verify!(
                    func.uses[u].timeline.expand() == Some(tl),
                    block,
                    "use {u} does not link back to its timeline"
                );
            }
        }

        // Incoming nodes name real predecessors.
        for node in dt.incoming_nodes() {
            verify!(
                preds.contains(&node.pred),
                block,
                "incoming node references non-predecessor {}",
                node.pred
            );
        }
    }

    // Phis: operand pairs match the predecessor list, operands originate
    // from the predecessors' outgoing timelines.
    for &phi in data.phis() {
        verify!(
            func.insts[phi].opcode == Opcode::Phi,
            block,
            "non-phi {phi} in the phi partition"
        );
        let pairs: Vec<_> = func.insts[phi].phi_pairs().collect();
        verify!(
            pairs.len() == preds.len(),
            block,
            "phi {phi} has {} operands for {} predecessors",
            pairs.len(),
            preds.len()
        );
        let def = func.insts[phi].def.expect("phis define");
        let var = func.defs[def].var;
        for (index, &(pred, arg)) in pairs.iter().enumerate() {
            verify!(
                preds.get(index) == Some(&pred),
                block,
                "phi {phi} operand {index} is out of predecessor order"
            );
            let outgoing = func.blocks[pred]
                .timeline(var)
                .and_then(|dt| dt.outgoing_timeline());
            verify!(
                func.uses[arg].timeline.expand() == outgoing,
                block,
                "phi {phi} operand {index} does not read {pred}'s outgoing timeline"
            );
        }
    }

    // Back-references: instruction operands and defs know their carrier.
    for &inst in data.phis().iter().chain(data.body()) {
        if let Some(def) = func.insts[inst].def.expand() {
            verify!(
                func.defs[def].inst.expand() == Some(inst),
                block,
                "def of {inst} does not point back at it"
            );
        }
        for u in func.insts[inst].arg_uses() {
            verify!(
                func.uses[u].inst.expand() == Some(inst),
                block,
                "operand use {u} does not point back at {inst}"
            );
        }
        verify!(
            func.inst_block(inst) == Some(block),
            block,
            "{inst} is not recorded as living here"
        );
    }

    Ok(())
}
