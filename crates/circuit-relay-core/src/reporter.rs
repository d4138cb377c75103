//! Outcome reporting through orchestrator transactions.

use std::sync::Arc;

use async_trait::async_trait;

use circuit_relay_client::{ClientError, OutcomeReporter};
use circuit_relay_primitives::{
    call::{ConfirmSideEffect, FailSideEffect},
    Call, ChainTarget, InclusionProof, SideEffectFailure, SideEffectId, TransactionOutcome,
};

use crate::submitter::TransactionSubmitter;

/// Reports terminal side effect results as `circuit` pallet calls
pub struct CircuitReporter {
    submitter: Arc<TransactionSubmitter>,
}

impl CircuitReporter {
    pub fn new(submitter: Arc<TransactionSubmitter>) -> Self {
        Self { submitter }
    }

    async fn submit(&self, call: Call) -> Result<(), ClientError> {
        self.submitter
            .submit_and_wait_finalized(&ChainTarget::Orchestrator, &call)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

#[async_trait]
impl OutcomeReporter for CircuitReporter {
    async fn report_side_effect_outcome(
        &self,
        id: &SideEffectId,
        outcome: &TransactionOutcome,
        proof: &InclusionProof,
    ) -> Result<(), ClientError> {
        let call = ConfirmSideEffect {
            id: *id,
            outcome: outcome.clone(),
            proof: proof.clone(),
        }
        .to_call()?;
        self.submit(call).await
    }

    async fn report_side_effect_failure(
        &self,
        id: &SideEffectId,
        failure: &SideEffectFailure,
    ) -> Result<(), ClientError> {
        let call = FailSideEffect {
            id: *id,
            failure: failure.clone(),
        }
        .to_call()?;
        self.submit(call).await
    }
}
