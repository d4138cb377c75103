//! Simulated gateway chain with instant execution and configurable faults.

use std::collections::HashMap;

use tracing::{debug, trace};

use circuit_relay_client::{
    subscription::{channel as subscription_channel, DEFAULT_CAPACITY},
    ClientError, FinalizedHeader, Subscription, SubscriptionSender,
};
use circuit_relay_primitives::{
    bytes::blake2_256,
    event::{EXTRINSIC_FAILED, EXTRINSIC_SUCCESS, SYSTEM_PALLET},
    Address, BlockHash, BlockNumber, BlockRef, ChainEvent, EventPhase,
    GatewayId, Header, InclusionProof, Justification, SideEffectAction, SignedTx,
    TransactionStatus,
};

/// Faults injected into a simulated gateway
#[derive(Debug, Clone, Default)]
pub struct GatewayFaults {
    /// Execute calls without emitting their business event
    pub omit_business_events: bool,
    /// Follow every extrinsic with an unrelated failing one in the same block
    pub trailing_failed_extrinsic: bool,
    /// Close the transaction watch right after the inclusion notification
    pub drop_watch_after_inclusion: bool,
    /// Deliver every transaction status twice
    pub duplicate_statuses: bool,
    /// Refuse every submitted transaction with this reason
    pub reject_transactions: Option<String>,
}

/// Justification the simulated finality gadget produces for a block
pub fn justification_for(block: BlockRef) -> Justification {
    let mut preimage = b"sim-grandpa".to_vec();
    preimage.extend_from_slice(block.hash.as_bytes());
    Justification {
        block,
        encoded: blake2_256(&preimage).to_vec(),
    }
}

struct PendingTx {
    tx: SignedTx,
    watcher: SubscriptionSender<TransactionStatus>,
}

struct IncludedTx {
    block: BlockRef,
    extrinsic_index: u32,
    watcher: SubscriptionSender<TransactionStatus>,
}

pub struct GatewayChain {
    id: GatewayId,
    /// Every `justification_period`-th block carries a justification
    justification_period: u64,
    headers: Vec<Header>,
    events: Vec<Vec<ChainEvent>>,
    by_hash: HashMap<BlockHash, BlockNumber>,
    finalized: BlockNumber,
    pruned_below: BlockNumber,
    balances: HashMap<(Option<u32>, Address), u128>,
    pool: Vec<PendingTx>,
    awaiting_finality: Vec<IncludedTx>,
    header_subs: Vec<SubscriptionSender<FinalizedHeader>>,
    justification_subs: Vec<SubscriptionSender<Justification>>,
    pub faults: GatewayFaults,
}

impl GatewayChain {
    pub fn new(id: GatewayId, justification_period: u64) -> Self {
        let genesis = Header {
            number: 0,
            hash: BlockHash::digest(id.as_bytes()),
            parent_hash: BlockHash::default(),
            state_root: BlockHash::default(),
        };
        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash, 0);
        Self {
            id,
            justification_period: justification_period.max(1),
            headers: vec![genesis],
            events: vec![Vec::new()],
            by_hash,
            finalized: 0,
            pruned_below: 0,
            balances: HashMap::new(),
            pool: Vec::new(),
            awaiting_finality: Vec::new(),
            header_subs: Vec::new(),
            justification_subs: Vec::new(),
            faults: GatewayFaults::default(),
        }
    }

    pub fn best(&self) -> BlockRef {
        self.headers[self.headers.len() - 1].block_ref()
    }

    pub fn finalized(&self) -> BlockRef {
        self.headers[self.finalized as usize].block_ref()
    }

    pub fn header_at(&self, number: BlockNumber) -> Option<&Header> {
        self.headers.get(number as usize)
    }

    pub fn balance_of(&self, asset_id: Option<u32>, address: &Address) -> u128 {
        self.balances
            .get(&(asset_id, *address))
            .copied()
            .unwrap_or_default()
    }

    /// Transactions waiting for the next block
    pub fn pending_transactions(&self) -> usize {
        self.pool.len()
    }

    /// Open finalized header subscriptions
    pub fn header_subscribers(&self) -> usize {
        self.header_subs.iter().filter(|sub| !sub.is_closed()).count()
    }

    pub fn is_justified(&self, number: BlockNumber) -> bool {
        number > 0 && (number + 1) % self.justification_period == 0
    }

    pub fn subscribe_headers(&mut self) -> Subscription<FinalizedHeader> {
        let (tx, rx) = subscription_channel(DEFAULT_CAPACITY);
        self.header_subs.push(tx);
        rx
    }

    pub fn subscribe_justifications(&mut self) -> Subscription<Justification> {
        let (tx, rx) = subscription_channel(DEFAULT_CAPACITY);
        self.justification_subs.push(tx);
        rx
    }

    /// Close every open subscription, as a node restart would
    pub fn disconnect(&mut self) {
        debug!("Gateway {} dropped {} subscription(s)", self.id, self.header_subs.len());
        self.header_subs.clear();
        self.justification_subs.clear();
    }

    pub fn submit(&mut self, tx: SignedTx, watcher: SubscriptionSender<TransactionStatus>) {
        if let Some(reason) = &self.faults.reject_transactions {
            watcher.send(TransactionStatus::Error(reason.clone()));
            return;
        }
        self.pool.push(PendingTx { tx, watcher });
    }

    fn notify(&self, watcher: &SubscriptionSender<TransactionStatus>, status: TransactionStatus) {
        if self.faults.duplicate_statuses {
            watcher.send(status.clone());
        }
        watcher.send(status);
    }

    /// Build a block from the transaction pool
    pub fn produce_block(&mut self) -> BlockRef {
        let parent = self.best();
        let number = parent.number + 1;
        let mut events = vec![ChainEvent::new(
            EventPhase::Initialization,
            "Timestamp",
            "Set",
            number.to_le_bytes().to_vec(),
        )];

        let mut included = Vec::new();
        let mut index = 0u32;
        for pending in std::mem::take(&mut self.pool) {
            events.extend(self.apply(index, &pending.tx));
            included.push((index, pending.watcher));
            index += 1;
            if self.faults.trailing_failed_extrinsic {
                events.push(ChainEvent::new(
                    EventPhase::ApplyExtrinsic(index),
                    SYSTEM_PALLET,
                    EXTRINSIC_FAILED,
                    vec![],
                ));
                index += 1;
            }
        }

        let state_root = BlockHash::digest(&bincode::serialize(&events).unwrap_or_default());
        let mut preimage = self.id.as_bytes().to_vec();
        preimage.extend_from_slice(&number.to_le_bytes());
        preimage.extend_from_slice(parent.hash.as_bytes());
        preimage.extend_from_slice(state_root.as_bytes());
        let header = Header {
            number,
            hash: BlockHash::digest(&preimage),
            parent_hash: parent.hash,
            state_root,
        };
        let block = header.block_ref();
        trace!("Gateway {} produced block {}", self.id, block);
        self.by_hash.insert(header.hash, number);
        self.headers.push(header);
        self.events.push(events);

        for (extrinsic_index, watcher) in included {
            self.notify(
                &watcher,
                TransactionStatus::Included {
                    block,
                    extrinsic_index,
                },
            );
            if !self.faults.drop_watch_after_inclusion {
                self.awaiting_finality.push(IncludedTx {
                    block,
                    extrinsic_index,
                    watcher,
                });
            }
        }
        block
    }

    fn apply(&mut self, index: u32, tx: &SignedTx) -> Vec<ChainEvent> {
        let phase = EventPhase::ApplyExtrinsic(index);
        let business = match tx.call.decode_args::<SideEffectAction>() {
            Ok(SideEffectAction::Transfer { to, amount }) if tx.call.is("balances", "transfer") => {
                *self.balances.entry((None, to)).or_default() += amount;
                let payload = bincode::serialize(&(tx.signer, to, amount)).unwrap_or_default();
                Some(ChainEvent::new(phase, "Balances", "Transfer", payload))
            }
            Ok(SideEffectAction::AssetTransfer {
                asset_id,
                to,
                amount,
            }) if tx.call.is("assets", "transfer") => {
                *self.balances.entry((Some(asset_id), to)).or_default() += amount;
                let payload =
                    bincode::serialize(&(asset_id, tx.signer, to, amount)).unwrap_or_default();
                Some(ChainEvent::new(phase, "Assets", "Transferred", payload))
            }
            _ => None,
        };

        match business {
            Some(event) => {
                let mut events = Vec::new();
                if !self.faults.omit_business_events {
                    events.push(event);
                }
                events.push(ChainEvent::new(phase, SYSTEM_PALLET, EXTRINSIC_SUCCESS, vec![]));
                events
            }
            None => vec![ChainEvent::new(phase, SYSTEM_PALLET, EXTRINSIC_FAILED, vec![])],
        }
    }

    /// Finalize up to `number`, optionally hiding the new headers from subscribers
    pub fn finalize(&mut self, number: BlockNumber, notify_subscribers: bool) {
        let upto = number.min(self.best().number);
        while self.finalized < upto {
            self.finalized += 1;
            let header = self.headers[self.finalized as usize].clone();
            let justification = self
                .is_justified(header.number)
                .then(|| justification_for(header.block_ref()));
            if notify_subscribers {
                self.header_subs
                    .retain(|sub| sub.send((header.clone(), justification.clone())));
                if let Some(justification) = &justification {
                    self.justification_subs
                        .retain(|sub| sub.send(justification.clone()));
                }
            }
        }

        let finalized = self.finalized;
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.awaiting_finality)
            .into_iter()
            .partition(|included| included.block.number <= finalized);
        self.awaiting_finality = waiting;
        for included in done {
            self.notify(
                &included.watcher,
                TransactionStatus::Finalized {
                    block: included.block,
                    extrinsic_index: included.extrinsic_index,
                },
            );
        }
    }

    pub fn header_by_hash(&self, hash: &BlockHash) -> Result<Header, ClientError> {
        self.by_hash
            .get(hash)
            .map(|number| self.headers[*number as usize].clone())
            .ok_or_else(|| ClientError::NotFound(format!("header {hash} on {}", self.id)))
    }

    fn check_block(&self, block: &BlockRef) -> Result<(), ClientError> {
        match self.header_at(block.number) {
            Some(header) if header.hash == block.hash => Ok(()),
            _ => Err(ClientError::NotFound(format!("block {block} on {}", self.id))),
        }
    }

    pub fn events_of(&self, block: &BlockRef) -> Result<Vec<ChainEvent>, ClientError> {
        self.check_block(block)?;
        Ok(self.events[block.number as usize].clone())
    }

    pub fn prune_below(&mut self, number: BlockNumber) {
        self.pruned_below = number;
    }

    pub fn inclusion_proof(&self, block: &BlockRef) -> Result<InclusionProof, ClientError> {
        if block.number < self.pruned_below {
            return Err(ClientError::ProofUnavailable(*block));
        }
        self.check_block(block)?;
        let header = &self.headers[block.number as usize];
        let proof_bytes = bincode::serialize(&(header, &self.events[block.number as usize]))
            .map_err(|err| ClientError::Codec(err.to_string()))?;
        Ok(InclusionProof {
            block: *block,
            proof_bytes,
        })
    }
}
