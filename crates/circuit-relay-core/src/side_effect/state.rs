//! State manager of a single side effect.

use serde::Serialize;
use tracing::debug;

use circuit_relay_primitives::{
    BlockRef, InclusionProof, SideEffect, SideEffectFailure, SideEffectId, SideEffectStatus,
    TransactionOutcome,
};

use crate::error::RelayError;

/// Terminal report owed to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReport {
    Confirmed {
        id: SideEffectId,
        outcome: TransactionOutcome,
        proof: InclusionProof,
    },
    Failed {
        id: SideEffectId,
        failure: SideEffectFailure,
    },
}

/// Queryable snapshot of a side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectRecord {
    pub side_effect: SideEffect,
    pub status: SideEffectStatus,
    /// Including block and extrinsic index once known
    pub extrinsic: Option<(BlockRef, u32)>,
    pub outcome: Option<TransactionOutcome>,
    pub failure: Option<SideEffectFailure>,
    /// The expected business event was not found in the block
    pub expected_event_missing: bool,
}

/// Drives a side effect through
/// `Pending -> Submitted -> AwaitingFinality -> Finalized -> Confirmed`, with `Failed`
/// reachable from any non-terminal status.
///
/// Out-of-order or repeated notifications are ignored, and at most one terminal report is
/// ever produced.
#[derive(Debug)]
pub struct SideEffectStateManager {
    side_effect: SideEffect,
    status: SideEffectStatus,
    extrinsic: Option<(BlockRef, u32)>,
    outcome: Option<TransactionOutcome>,
    failure: Option<SideEffectFailure>,
    expected_event_missing: bool,
    report_taken: bool,
}

fn successor(status: SideEffectStatus) -> Option<SideEffectStatus> {
    match status {
        SideEffectStatus::Pending => Some(SideEffectStatus::Submitted),
        SideEffectStatus::Submitted => Some(SideEffectStatus::AwaitingFinality),
        SideEffectStatus::AwaitingFinality => Some(SideEffectStatus::Finalized),
        SideEffectStatus::Finalized => Some(SideEffectStatus::Confirmed),
        SideEffectStatus::Confirmed | SideEffectStatus::Failed => None,
    }
}

impl SideEffectStateManager {
    pub fn new(side_effect: SideEffect) -> Self {
        Self {
            side_effect,
            status: SideEffectStatus::Pending,
            extrinsic: None,
            outcome: None,
            failure: None,
            expected_event_missing: false,
            report_taken: false,
        }
    }

    pub fn id(&self) -> SideEffectId {
        self.side_effect.id
    }

    pub fn side_effect(&self) -> &SideEffect {
        &self.side_effect
    }

    pub fn status(&self) -> SideEffectStatus {
        self.status
    }

    /// Move to `to` if it directly follows the current status
    fn advance(&mut self, to: SideEffectStatus) -> bool {
        if successor(self.status) == Some(to) && to != SideEffectStatus::Confirmed {
            debug!("Side effect {}: {} -> {}", self.side_effect.id, self.status, to);
            self.status = to;
            true
        } else {
            debug!(
                "Side effect {}: ignoring transition {} -> {}",
                self.side_effect.id, self.status, to
            );
            false
        }
    }

    pub fn mark_submitted(&mut self) -> bool {
        self.advance(SideEffectStatus::Submitted)
    }

    pub fn mark_included(&mut self, block: BlockRef, extrinsic_index: u32) -> bool {
        let advanced = self.advance(SideEffectStatus::AwaitingFinality);
        if advanced {
            self.extrinsic = Some((block, extrinsic_index));
        }
        advanced
    }

    /// A finality notification may arrive without a preceding inclusion notification
    pub fn mark_finalized(&mut self, block: BlockRef, extrinsic_index: u32) -> bool {
        if self.status == SideEffectStatus::Submitted {
            self.mark_included(block, extrinsic_index);
        }
        let advanced = self.advance(SideEffectStatus::Finalized);
        if advanced {
            self.extrinsic = Some((block, extrinsic_index));
        }
        advanced
    }

    pub fn mark_expected_event_missing(&mut self) {
        self.expected_event_missing = true;
    }

    /// Record the verified outcome; yields the confirmation report exactly once
    pub fn confirm(
        &mut self,
        outcome: TransactionOutcome,
        proof: InclusionProof,
    ) -> Option<TerminalReport> {
        if self.status != SideEffectStatus::Finalized || self.report_taken {
            return None;
        }
        self.report_taken = true;
        self.outcome = Some(outcome.clone());
        Some(TerminalReport::Confirmed {
            id: self.side_effect.id,
            outcome,
            proof,
        })
    }

    /// The confirmation report reached the orchestrator
    pub fn mark_reported(&mut self) -> bool {
        if self.status == SideEffectStatus::Finalized && self.outcome.is_some() {
            self.status = SideEffectStatus::Confirmed;
            true
        } else {
            false
        }
    }

    /// Transition to `Failed`; yields the failure report unless a report was already taken
    pub fn fail(&mut self, err: &RelayError) -> Option<TerminalReport> {
        if self.status.is_terminal() {
            return None;
        }
        let failure = SideEffectFailure {
            kind: err.kind(),
            reason: err.to_string(),
            failed_in: self.status,
        };
        debug!("Side effect {}: {} -> failed", self.side_effect.id, self.status);
        self.status = SideEffectStatus::Failed;
        self.failure = Some(failure.clone());
        if self.report_taken {
            return None;
        }
        self.report_taken = true;
        Some(TerminalReport::Failed {
            id: self.side_effect.id,
            failure,
        })
    }

    pub fn record(&self) -> SideEffectRecord {
        SideEffectRecord {
            side_effect: self.side_effect.clone(),
            status: self.status,
            extrinsic: self.extrinsic,
            outcome: self.outcome.clone(),
            failure: self.failure.clone(),
            expected_event_missing: self.expected_event_missing,
        }
    }
}
