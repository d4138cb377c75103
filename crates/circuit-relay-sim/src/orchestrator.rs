//! Simulated orchestrator ("circuit") chain with instant finality.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use circuit_relay_primitives::{
    call::{
        ConfirmSideEffect, FailSideEffect, SetOperational, SubmitFinalityProof, CIRCUIT_PALLET,
        CONFIRM_SIDE_EFFECT, FAIL_SIDE_EFFECT, FINALITY_PALLET, SET_OPERATIONAL,
        SUBMIT_FINALITY_PROOF,
    },
    BlockHash, BlockNumber, BlockRef, GatewayId, InclusionProof, SideEffectFailure,
    SideEffectId, SignedTx, TransactionOutcome, TransactionStatus,
};

use crate::gateway::justification_for;

/// Finality proof accepted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRange {
    pub gateway_id: GatewayId,
    pub first: BlockNumber,
    pub anchor: BlockRef,
}

/// Terminal result of a side effect as recorded on the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectResolution {
    Confirmed {
        outcome: TransactionOutcome,
        proof: InclusionProof,
    },
    Failed(SideEffectFailure),
}

#[derive(Debug, Default)]
pub struct Orchestrator {
    height: BlockNumber,
    operational: HashMap<GatewayId, bool>,
    best_anchor: HashMap<GatewayId, BlockRef>,
    accepted_ranges: Vec<AcceptedRange>,
    finality_submissions: usize,
    resolutions: BTreeMap<SideEffectId, SideEffectResolution>,
    report_submissions: usize,
    /// Number of upcoming finality proofs to refuse
    finality_rejections: u32,
    reject_activations: bool,
}

impl Orchestrator {
    pub fn is_operational(&self, gateway_id: &GatewayId) -> bool {
        self.operational.get(gateway_id).copied().unwrap_or(false)
    }

    /// Anchor of the last accepted finality proof of a gateway
    pub fn last_relayed(&self, gateway_id: &GatewayId) -> Option<BlockRef> {
        self.best_anchor.get(gateway_id).copied()
    }

    pub fn accepted_ranges(&self) -> &[AcceptedRange] {
        &self.accepted_ranges
    }

    /// Every finality proof received, including refused and duplicate ones
    pub fn finality_submissions(&self) -> usize {
        self.finality_submissions
    }

    pub fn resolution(&self, id: &SideEffectId) -> Option<&SideEffectResolution> {
        self.resolutions.get(id)
    }

    /// Every side effect report received, including duplicates
    pub fn report_submissions(&self) -> usize {
        self.report_submissions
    }

    pub fn reject_finality_proofs(&mut self, count: u32) {
        self.finality_rejections = count;
    }

    pub fn reject_activations(&mut self, reject: bool) {
        self.reject_activations = reject;
    }

    /// Apply a transaction in a new block, returning its status notifications
    pub fn execute(&mut self, tx: &SignedTx) -> Vec<TransactionStatus> {
        if let Err(reason) = self.apply(tx) {
            debug!("Circuit refused {}: {}", tx.call, reason);
            return vec![TransactionStatus::Error(reason)];
        }
        self.height += 1;
        let block = BlockRef::new(self.height, BlockHash::digest(&self.height.to_le_bytes()));
        vec![
            TransactionStatus::Included {
                block,
                extrinsic_index: 0,
            },
            TransactionStatus::Finalized {
                block,
                extrinsic_index: 0,
            },
        ]
    }

    fn apply(&mut self, tx: &SignedTx) -> Result<(), String> {
        let call = &tx.call;
        let decode_err = |err: circuit_relay_primitives::CallError| err.to_string();
        if call.is(FINALITY_PALLET, SET_OPERATIONAL) {
            let args: SetOperational = call.decode_args().map_err(decode_err)?;
            if self.reject_activations {
                return Err(format!("gateway {} cannot be activated", args.gateway_id));
            }
            self.operational.insert(args.gateway_id, args.operational);
            Ok(())
        } else if call.is(FINALITY_PALLET, SUBMIT_FINALITY_PROOF) {
            self.finality_submissions += 1;
            let args: SubmitFinalityProof = call.decode_args().map_err(decode_err)?;
            self.submit_finality_proof(args)
        } else if call.is(CIRCUIT_PALLET, CONFIRM_SIDE_EFFECT) {
            self.report_submissions += 1;
            let args: ConfirmSideEffect = call.decode_args().map_err(decode_err)?;
            self.resolutions
                .entry(args.id)
                .or_insert(SideEffectResolution::Confirmed {
                    outcome: args.outcome,
                    proof: args.proof,
                });
            Ok(())
        } else if call.is(CIRCUIT_PALLET, FAIL_SIDE_EFFECT) {
            self.report_submissions += 1;
            let args: FailSideEffect = call.decode_args().map_err(decode_err)?;
            self.resolutions
                .entry(args.id)
                .or_insert(SideEffectResolution::Failed(args.failure));
            Ok(())
        } else {
            Err(format!("unknown call {call}"))
        }
    }

    fn submit_finality_proof(&mut self, args: SubmitFinalityProof) -> Result<(), String> {
        let range = args.range;
        let gateway_id = range.gateway_id().clone();
        if self.finality_rejections > 0 {
            self.finality_rejections -= 1;
            return Err(format!("justification for {range} failed verification"));
        }
        if !self.is_operational(&gateway_id) {
            return Err(format!("gateway {gateway_id} is not operational"));
        }

        let anchor = range.anchor().block_ref();
        if let Some(best) = self.last_relayed(&gateway_id) {
            // Replays are accepted without effect
            if anchor.number <= best.number {
                return Ok(());
            }
            let first = range.first();
            if best.number.checked_add(1) != Some(first.number) || first.parent_hash != best.hash {
                return Err(format!("range {range} does not extend {best}"));
            }
        }
        if range.justification() != &justification_for(anchor) {
            return Err(format!("invalid justification for {anchor}"));
        }

        info!("Circuit imported finality of {}", range);
        self.best_anchor.insert(gateway_id.clone(), anchor);
        self.accepted_ranges.push(AcceptedRange {
            gateway_id,
            first: range.first().number,
            anchor,
        });
        Ok(())
    }
}
