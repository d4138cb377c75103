//! Signing and submission of transactions with per-account serialization.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

use circuit_relay_client::{ChainClient, Signer, SigningIdentity, Subscription};
use circuit_relay_primitives::{Address, BlockRef, Call, ChainTarget, TransactionStatus};

use crate::error::RelayError;

/// Submits calls signed by a single identity.
///
/// At most one transaction per target chain is between signing and inclusion at any
/// time, so account nonces are consumed strictly in order.
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    identity: SigningIdentity,
    nonce_locks: Mutex<HashMap<ChainTarget, Arc<tokio::sync::Mutex<()>>>>,
}

/// Status stream of a submitted transaction
pub struct WatchedTransaction {
    target: ChainTarget,
    call: String,
    statuses: Subscription<TransactionStatus>,
    nonce_guard: Option<OwnedMutexGuard<()>>,
}

impl TransactionSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        identity: SigningIdentity,
    ) -> Self {
        Self {
            chain,
            signer,
            identity,
            nonce_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// On-chain address of the submitting identity
    pub fn address(&self) -> Result<Address, RelayError> {
        Ok(self.signer.address(&self.identity)?)
    }

    fn nonce_lock(&self, target: &ChainTarget) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .nonce_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(target.clone()).or_default().clone()
    }

    /// Sign and submit a call, returning its status stream
    pub async fn submit(
        &self,
        target: &ChainTarget,
        call: &Call,
    ) -> Result<WatchedTransaction, RelayError> {
        let nonce_guard = self.nonce_lock(target).lock_owned().await;
        let tx = self.signer.sign(target, call, &self.identity).await?;
        debug!("Submitting {} to {} ({})", call, target, tx.hash());
        let statuses = self.chain.submit_and_watch(target, tx).await?;
        Ok(WatchedTransaction {
            target: target.clone(),
            call: call.to_string(),
            statuses,
            nonce_guard: Some(nonce_guard),
        })
    }

    /// Submit a call and wait until the including block is finalized
    pub async fn submit_and_wait_finalized(
        &self,
        target: &ChainTarget,
        call: &Call,
    ) -> Result<(BlockRef, u32), RelayError> {
        self.submit(target, call).await?.wait_finalized().await
    }
}

impl WatchedTransaction {
    /// Next lifecycle notification, `None` once the watch dropped
    pub async fn next_status(&mut self) -> Option<TransactionStatus> {
        let status = self.statuses.next().await;
        trace!("{} on {}: {:?}", self.call, self.target, status);
        // The nonce is spent (or released) once the chain has decided on the transaction
        self.nonce_guard.take();
        status
    }

    /// Wait for finality, treating a refused transaction as a rejection
    pub async fn wait_finalized(mut self) -> Result<(BlockRef, u32), RelayError> {
        loop {
            match self.next_status().await {
                Some(TransactionStatus::Included { block, .. }) => {
                    debug!("{} included in {} block {}", self.call, self.target, block);
                }
                Some(TransactionStatus::Finalized {
                    block,
                    extrinsic_index,
                }) => {
                    self.unsubscribe();
                    return Ok((block, extrinsic_index));
                }
                Some(TransactionStatus::Error(reason)) => {
                    self.unsubscribe();
                    return Err(RelayError::SubmissionRejected(reason));
                }
                None => {
                    return Err(RelayError::Connectivity(format!(
                        "watch of {} on {} dropped before finality",
                        self.call, self.target
                    )))
                }
            }
        }
    }

    pub fn unsubscribe(self) {
        self.statuses.unsubscribe();
    }
}
