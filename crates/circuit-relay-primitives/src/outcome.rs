//! Evidence and results reported back to the orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{bytes::Address, header::BlockRef, side_effect::SideEffectStatus};

/// Verifiable evidence bound to exactly one finalized block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub block: BlockRef,
    #[serde(with = "hex::serde")]
    pub proof_bytes: Vec<u8>,
}

/// Result of executing a side effect's transaction on a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Extrinsic-level success flag
    pub success: bool,
    /// Payload of the expected business event, `None` if the event was missing
    pub event_payload: Option<Vec<u8>>,
    /// Finalized block containing the transaction
    pub block: BlockRef,
    /// Address that signed and submitted the transaction
    pub executor: Address,
    /// Unix timestamp (seconds) at which finality was observed
    pub finalized_at: u64,
}

/// Structured reason code attached to failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    SubmissionRejected,
    ProofUnavailable,
    UnsupportedSideEffectType,
    ExpectedEventMissing,
    SigningUnavailable,
    UnknownGateway,
    GatewaySuspended,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::SubmissionRejected => "submission_rejected",
            ErrorKind::ProofUnavailable => "proof_unavailable",
            ErrorKind::UnsupportedSideEffectType => "unsupported_side_effect_type",
            ErrorKind::ExpectedEventMissing => "expected_event_missing",
            ErrorKind::SigningUnavailable => "signing_unavailable",
            ErrorKind::UnknownGateway => "unknown_gateway",
            ErrorKind::GatewaySuspended => "gateway_suspended",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectFailure {
    pub kind: ErrorKind,
    pub reason: String,
    /// Last non-terminal status reached before the failure
    pub failed_in: SideEffectStatus,
}
