use circuit_relay_client::ClientError;
use circuit_relay_primitives::{
    BlockNumber, BlockRef, CallError, ErrorKind, GatewayId, GatewayState, RangeError,
    SideEffectId, SideEffectKind,
};
use thiserror::Error;

/// Error taxonomy of the relay core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Subscription drop or RPC timeout that outlived local retries
    #[error("Connectivity error: {0}")]
    Connectivity(String),
    /// The orchestrator or a gateway refused a transaction
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Proof unavailable for block {0}")]
    ProofUnavailable(BlockRef),
    #[error("Side effect type {kind} is not supported on gateway {gateway_id}")]
    UnsupportedSideEffectType {
        kind: SideEffectKind,
        gateway_id: GatewayId,
    },
    #[error("Expected event {event} missing in block {block}")]
    ExpectedEventMissing { event: String, block: BlockRef },
    /// Fatal for the whole relay instance
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),
    #[error("Gateway {0} is already registered")]
    DuplicateGateway(GatewayId),
    #[error("Gateway {0} is not registered")]
    UnknownGateway(GatewayId),
    #[error("Activation of gateway {gateway_id} rejected: {reason}")]
    ActivationRejected {
        gateway_id: GatewayId,
        reason: String,
    },
    #[error("Gateway {gateway_id} is {state}")]
    GatewayNotOperational {
        gateway_id: GatewayId,
        state: GatewayState,
    },
    #[error("Block #{number} does not advance gateway {gateway_id} past #{last}")]
    NonMonotonicRelay {
        gateway_id: GatewayId,
        number: BlockNumber,
        last: BlockNumber,
    },
    #[error("Side effect {0} was already submitted")]
    DuplicateSideEffect(SideEffectId),
    #[error("Side effect {0} is unknown")]
    UnknownSideEffect(SideEffectId),
    #[error("Gateway {gateway_id} chain diverged from relayed block {tip}")]
    ChainDiverged { gateway_id: GatewayId, tip: BlockRef },
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Relay is shutting down")]
    Shutdown,
}

impl RelayError {
    /// Reason code attached to failure reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Connectivity(_) => ErrorKind::Connectivity,
            RelayError::SubmissionRejected(_) | RelayError::ActivationRejected { .. } => {
                ErrorKind::SubmissionRejected
            }
            RelayError::ProofUnavailable(_) => ErrorKind::ProofUnavailable,
            RelayError::UnsupportedSideEffectType { .. } => ErrorKind::UnsupportedSideEffectType,
            RelayError::ExpectedEventMissing { .. } => ErrorKind::ExpectedEventMissing,
            RelayError::SigningUnavailable(_) => ErrorKind::SigningUnavailable,
            RelayError::UnknownGateway(_) => ErrorKind::UnknownGateway,
            RelayError::GatewayNotOperational { .. } => ErrorKind::GatewaySuspended,
            _ => ErrorKind::Internal,
        }
    }

    /// Transient errors are absorbed by retries
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Connectivity(_))
    }

    /// Errors after which the relay instance cannot make useful progress
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::SigningUnavailable(_))
    }
}

impl From<ClientError> for RelayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connectivity(reason) => RelayError::Connectivity(reason),
            ClientError::Rejected(reason) => RelayError::SubmissionRejected(reason),
            ClientError::SigningUnavailable(reason) => RelayError::SigningUnavailable(reason),
            ClientError::ProofUnavailable(block) => RelayError::ProofUnavailable(block),
            ClientError::NotFound(what) => RelayError::NotFound(what),
            ClientError::Codec(reason) => RelayError::Codec(reason),
        }
    }
}

impl From<RelayError> for ClientError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Connectivity(reason) => ClientError::Connectivity(reason),
            RelayError::SubmissionRejected(reason) => ClientError::Rejected(reason),
            RelayError::SigningUnavailable(reason) => ClientError::SigningUnavailable(reason),
            RelayError::ProofUnavailable(block) => ClientError::ProofUnavailable(block),
            RelayError::NotFound(what) => ClientError::NotFound(what),
            other => ClientError::Codec(other.to_string()),
        }
    }
}

impl From<CallError> for RelayError {
    fn from(err: CallError) -> Self {
        RelayError::Codec(err.to_string())
    }
}
