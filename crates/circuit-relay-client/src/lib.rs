//! Capabilities the relay core consumes from the outside world: chain access, signing,
//! inclusion proofs and outcome reporting.
//!
//! Concrete node connections and key backends implement these traits; the relay core only
//! ever talks to them through `Arc<dyn ...>` handles.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use circuit_relay_primitives::{
    Address, BlockHash, BlockRef, Call, ChainEvent, ChainTarget, Endpoint, GatewayId, Header,
    InclusionProof, Justification, SideEffectFailure, SideEffectId, SignedTx, TransactionOutcome,
    TransactionStatus,
};

pub mod error;
pub mod retry;
pub mod subscription;

pub use error::ClientError;
pub use subscription::{Subscription, SubscriptionSender};

/// Finalized header notification, carrying a justification when the node has one
pub type FinalizedHeader = (Header, Option<Justification>);

/// Reference to a key held by the signing backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningIdentity(pub String);

impl fmt::Display for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SigningIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Access to the orchestrator and gateway chains
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Stream of finalized headers of a gateway, served by the given endpoint
    async fn subscribe_finalized_headers(
        &self,
        gateway_id: &GatewayId,
        endpoint: &Endpoint,
    ) -> Result<Subscription<FinalizedHeader>, ClientError>;

    /// Stream of finality justifications of a gateway
    async fn subscribe_justifications(
        &self,
        gateway_id: &GatewayId,
        endpoint: &Endpoint,
    ) -> Result<Subscription<Justification>, ClientError>;

    /// Fetch a header by hash
    async fn get_header(&self, target: &ChainTarget, hash: &BlockHash)
        -> Result<Header, ClientError>;

    /// Anchor of the latest finality proof the orchestrator imported for a gateway
    async fn best_relayed_block(&self, gateway_id: &GatewayId)
        -> Result<Option<BlockRef>, ClientError>;

    /// Submit a signed transaction and watch its lifecycle
    async fn submit_and_watch(
        &self,
        target: &ChainTarget,
        tx: SignedTx,
    ) -> Result<Subscription<TransactionStatus>, ClientError>;

    /// All events emitted by a block, in emission order
    async fn block_events(
        &self,
        target: &ChainTarget,
        block: &BlockRef,
    ) -> Result<Vec<ChainEvent>, ClientError>;
}

/// Key holder signing transactions on behalf of an explicit identity
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(
        &self,
        target: &ChainTarget,
        call: &Call,
        identity: &SigningIdentity,
    ) -> Result<SignedTx, ClientError>;

    fn address(&self, identity: &SigningIdentity) -> Result<Address, ClientError>;
}

/// Source of inclusion proofs for finalized gateway blocks
#[async_trait]
pub trait ProofProvider: Send + Sync {
    /// Fails with [`ClientError::ProofUnavailable`] once the block state is pruned
    async fn get_inclusion_proof(
        &self,
        gateway_id: &GatewayId,
        block: &BlockRef,
    ) -> Result<InclusionProof, ClientError>;
}

/// Receiver of terminal side effect reports. Delivery is at-least-once, receivers must
/// treat duplicates as no-ops.
#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    async fn report_side_effect_outcome(
        &self,
        id: &SideEffectId,
        outcome: &TransactionOutcome,
        proof: &InclusionProof,
    ) -> Result<(), ClientError>;

    async fn report_side_effect_failure(
        &self,
        id: &SideEffectId,
        failure: &SideEffectFailure,
    ) -> Result<(), ClientError>;
}
