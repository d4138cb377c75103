use circuit_relay_primitives::{BlockRef, CallError};
use thiserror::Error;

/// Error types reported by chain, signing and proof collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Subscription dropped, request timed out or node unreachable
    #[error("Connection error: {0}")]
    Connectivity(String),
    /// The chain refused the request or transaction
    #[error("Rejected: {0}")]
    Rejected(String),
    /// The signing backend cannot produce signatures
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),
    /// State required for the proof has been pruned
    #[error("Proof unavailable for block {0}")]
    ProofUnavailable(BlockRef),
    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Failed to encode or decode a payload
    #[error("Codec error: {0}")]
    Codec(String),
}

impl ClientError {
    /// Connectivity-class errors are worth retrying, everything else is permanent
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Connectivity(_))
    }
}

impl From<CallError> for ClientError {
    fn from(err: CallError) -> Self {
        ClientError::Codec(err.to_string())
    }
}
