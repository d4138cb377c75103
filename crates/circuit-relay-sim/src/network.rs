//! Shared handle over the simulated orchestrator and gateway chains.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use circuit_relay_client::{
    subscription::{channel as subscription_channel, DEFAULT_CAPACITY},
    ChainClient, ClientError, FinalizedHeader, ProofProvider, Subscription,
};
use circuit_relay_primitives::{
    Address, BlockHash, BlockNumber, BlockRef, ChainEvent, ChainTarget, Endpoint, GatewayId,
    Header, InclusionProof, Justification, SignedTx, TransactionStatus,
};

use crate::{
    gateway::{GatewayChain, GatewayFaults},
    orchestrator::Orchestrator,
};

#[derive(Default)]
struct NetworkState {
    orchestrator: Orchestrator,
    gateways: BTreeMap<GatewayId, GatewayChain>,
    unreachable: HashSet<Endpoint>,
}

/// In-process devnet: one orchestrator and any number of gateways.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_gateway<R>(
        &self,
        gateway_id: &GatewayId,
        f: impl FnOnce(&mut GatewayChain) -> R,
    ) -> Result<R, ClientError> {
        let mut state = self.state();
        let gateway = state
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| ClientError::NotFound(format!("gateway {gateway_id}")))?;
        Ok(f(gateway))
    }

    /// Start a gateway chain at genesis
    pub fn add_gateway(&self, gateway_id: GatewayId, justification_period: u64) {
        self.state().gateways.insert(
            gateway_id.clone(),
            GatewayChain::new(gateway_id, justification_period),
        );
    }

    pub fn gateway_ids(&self) -> Vec<GatewayId> {
        self.state().gateways.keys().cloned().collect()
    }

    /// Produce and immediately finalize `count` blocks, returning the new best block
    pub fn produce_blocks(&self, gateway_id: &GatewayId, count: u64) -> Result<BlockRef, ClientError> {
        self.with_gateway(gateway_id, |gateway| {
            for _ in 0..count {
                let block = gateway.produce_block();
                gateway.finalize(block.number, true);
            }
            gateway.best()
        })
    }

    /// Produce a block that stays unfinalized until [`SimNetwork::finalize`]
    pub fn produce_unfinalized_block(&self, gateway_id: &GatewayId) -> Result<BlockRef, ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.produce_block())
    }

    pub fn finalize(&self, gateway_id: &GatewayId, number: BlockNumber) -> Result<(), ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.finalize(number, true))
    }

    /// Drop all subscriptions, then finalize `count` blocks nobody is told about
    pub fn skip_blocks(&self, gateway_id: &GatewayId, count: u64) -> Result<BlockRef, ClientError> {
        self.with_gateway(gateway_id, |gateway| {
            gateway.disconnect();
            for _ in 0..count {
                let block = gateway.produce_block();
                gateway.finalize(block.number, false);
            }
            gateway.best()
        })
    }

    pub fn disconnect(&self, gateway_id: &GatewayId) -> Result<(), ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.disconnect())
    }

    pub fn set_faults(&self, gateway_id: &GatewayId, faults: GatewayFaults) -> Result<(), ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.faults = faults)
    }

    pub fn prune_below(&self, gateway_id: &GatewayId, number: BlockNumber) -> Result<(), ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.prune_below(number))
    }

    pub fn set_endpoint_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.unreachable.remove(endpoint);
        } else {
            state.unreachable.insert(endpoint.clone());
        }
    }

    pub fn pending_transactions(&self, gateway_id: &GatewayId) -> usize {
        self.with_gateway(gateway_id, |gateway| gateway.pending_transactions())
            .unwrap_or_default()
    }

    pub fn header_subscribers(&self, gateway_id: &GatewayId) -> usize {
        self.with_gateway(gateway_id, |gateway| gateway.header_subscribers())
            .unwrap_or_default()
    }

    pub fn best_block(&self, gateway_id: &GatewayId) -> Result<BlockRef, ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.best())
    }

    pub fn header_at(&self, gateway_id: &GatewayId, number: BlockNumber) -> Option<Header> {
        self.with_gateway(gateway_id, |gateway| gateway.header_at(number).cloned())
            .ok()
            .flatten()
    }

    /// Native (`None`) or asset balance of an account on a gateway
    pub fn balance_of(&self, gateway_id: &GatewayId, asset_id: Option<u32>, address: &Address) -> u128 {
        self.with_gateway(gateway_id, |gateway| gateway.balance_of(asset_id, address))
            .unwrap_or_default()
    }

    /// Inspect the orchestrator state
    pub fn orchestrator<R>(&self, f: impl FnOnce(&Orchestrator) -> R) -> R {
        f(&self.state().orchestrator)
    }

    /// Mutate the orchestrator state, e.g. to inject rejections
    pub fn orchestrator_mut<R>(&self, f: impl FnOnce(&mut Orchestrator) -> R) -> R {
        f(&mut self.state().orchestrator)
    }

    fn check_reachable(&self, endpoint: &Endpoint) -> Result<(), ClientError> {
        if self.state().unreachable.contains(endpoint) {
            return Err(ClientError::Connectivity(format!("{endpoint} is unreachable")));
        }
        Ok(())
    }
}

fn gateway_target(target: &ChainTarget) -> Result<&GatewayId, ClientError> {
    match target {
        ChainTarget::Gateway(gateway_id) => Ok(gateway_id),
        ChainTarget::Orchestrator => Err(ClientError::NotFound(
            "circuit block data is not served".into(),
        )),
    }
}

#[async_trait]
impl ChainClient for SimNetwork {
    async fn subscribe_finalized_headers(
        &self,
        gateway_id: &GatewayId,
        endpoint: &Endpoint,
    ) -> Result<Subscription<FinalizedHeader>, ClientError> {
        self.check_reachable(endpoint)?;
        self.with_gateway(gateway_id, |gateway| gateway.subscribe_headers())
    }

    async fn subscribe_justifications(
        &self,
        gateway_id: &GatewayId,
        endpoint: &Endpoint,
    ) -> Result<Subscription<Justification>, ClientError> {
        self.check_reachable(endpoint)?;
        self.with_gateway(gateway_id, |gateway| gateway.subscribe_justifications())
    }

    async fn get_header(&self, target: &ChainTarget, hash: &BlockHash) -> Result<Header, ClientError> {
        self.with_gateway(gateway_target(target)?, |gateway| gateway.header_by_hash(hash))?
    }

    async fn best_relayed_block(
        &self,
        gateway_id: &GatewayId,
    ) -> Result<Option<BlockRef>, ClientError> {
        Ok(self.state().orchestrator.last_relayed(gateway_id))
    }

    async fn submit_and_watch(
        &self,
        target: &ChainTarget,
        tx: SignedTx,
    ) -> Result<Subscription<TransactionStatus>, ClientError> {
        match target {
            ChainTarget::Orchestrator => {
                let statuses = self.state().orchestrator.execute(&tx);
                Ok(Subscription::from_items(statuses))
            }
            ChainTarget::Gateway(gateway_id) => {
                let (watcher, statuses) = subscription_channel(DEFAULT_CAPACITY);
                self.with_gateway(gateway_id, |gateway| gateway.submit(tx, watcher))?;
                Ok(statuses)
            }
        }
    }

    async fn block_events(
        &self,
        target: &ChainTarget,
        block: &BlockRef,
    ) -> Result<Vec<ChainEvent>, ClientError> {
        self.with_gateway(gateway_target(target)?, |gateway| gateway.events_of(block))?
    }
}

#[async_trait]
impl ProofProvider for SimNetwork {
    async fn get_inclusion_proof(
        &self,
        gateway_id: &GatewayId,
        block: &BlockRef,
    ) -> Result<InclusionProof, ClientError> {
        self.with_gateway(gateway_id, |gateway| gateway.inclusion_proof(block))?
    }
}
