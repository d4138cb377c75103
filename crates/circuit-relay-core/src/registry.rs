//! Gateway registry: lifecycle of configured gateways and their persistence.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use circuit_relay_primitives::{
    call::SetOperational, BlockRef, ChainTarget, Gateway, GatewayId, GatewayState,
};

use crate::{error::RelayError, submitter::TransactionSubmitter};

/// Durable storage of gateway records
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Gateway>, RelayError>;
    async fn save(&self, gateway: &Gateway) -> Result<(), RelayError>;
}

/// Store that keeps gateway records for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryGatewayStore {
    gateways: Mutex<BTreeMap<GatewayId, Gateway>>,
}

#[async_trait]
impl GatewayStore for InMemoryGatewayStore {
    async fn load(&self) -> Result<Vec<Gateway>, RelayError> {
        let gateways = self
            .gateways
            .lock()
            .map_err(|err| RelayError::Store(err.to_string()))?;
        Ok(gateways.values().cloned().collect())
    }

    async fn save(&self, gateway: &Gateway) -> Result<(), RelayError> {
        self.gateways
            .lock()
            .map_err(|err| RelayError::Store(err.to_string()))?
            .insert(gateway.id.clone(), gateway.clone());
        Ok(())
    }
}

/// Lifecycle notifications broadcast by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Registered(GatewayId),
    Activated(GatewayId),
    Suspended { gateway_id: GatewayId, reason: String },
    Relayed { gateway_id: GatewayId, block: BlockRef },
}

struct Entry {
    gateway: Gateway,
    tx_state: watch::Sender<GatewayState>,
}

/// Tracks gateways through `Registered -> Operational -> Suspended -> Operational`.
///
/// Every mutation is persisted before it becomes observable, and relays watch the state
/// of their gateway to stop work as soon as it leaves `Operational`.
pub struct GatewayRegistry {
    entries: RwLock<HashMap<GatewayId, Entry>>,
    /// Serializes mutate-then-persist sequences
    write_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn GatewayStore>,
    submitter: Arc<TransactionSubmitter>,
    tx_events: broadcast::Sender<GatewayEvent>,
}

const EVENTS_CAPACITY: usize = 256;

impl GatewayRegistry {
    pub fn new(store: Arc<dyn GatewayStore>, submitter: Arc<TransactionSubmitter>) -> Self {
        let (tx_events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            store,
            submitter,
            tx_events,
        }
    }

    /// Create a registry populated with the gateways already in the store
    pub async fn restore(
        store: Arc<dyn GatewayStore>,
        submitter: Arc<TransactionSubmitter>,
    ) -> Result<Self, RelayError> {
        let registry = Self::new(store.clone(), submitter);
        let gateways = store.load().await?;
        info!("Restored {} gateway(s) from store", gateways.len());
        {
            let mut entries = registry.entries_mut();
            for gateway in gateways {
                let (tx_state, _) = watch::channel(gateway.state);
                entries.insert(gateway.id.clone(), Entry { gateway, tx_state });
            }
        }
        Ok(registry)
    }

    fn entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GatewayId, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entries_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<GatewayId, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a gateway in the `Registered` state
    pub async fn register(&self, mut gateway: Gateway) -> Result<Gateway, RelayError> {
        let _write = self.write_lock.lock().await;
        if self.entries().contains_key(&gateway.id) {
            return Err(RelayError::DuplicateGateway(gateway.id));
        }
        gateway.state = GatewayState::Registered;
        self.store.save(&gateway).await?;

        let (tx_state, _) = watch::channel(gateway.state);
        self.entries_mut().insert(
            gateway.id.clone(),
            Entry {
                gateway: gateway.clone(),
                tx_state,
            },
        );
        info!(
            "Gateway {} registered with {} endpoint(s)",
            gateway.id,
            gateway.endpoints.len()
        );
        let _ = self.tx_events.send(GatewayEvent::Registered(gateway.id.clone()));
        Ok(gateway)
    }

    pub fn get(&self, id: &GatewayId) -> Result<Gateway, RelayError> {
        self.entries()
            .get(id)
            .map(|entry| entry.gateway.clone())
            .ok_or_else(|| RelayError::UnknownGateway(id.clone()))
    }

    /// All gateways ordered by id
    pub fn list(&self) -> Vec<Gateway> {
        let mut gateways: Vec<Gateway> = self
            .entries()
            .values()
            .map(|entry| entry.gateway.clone())
            .collect();
        gateways.sort_by(|a, b| a.id.cmp(&b.id));
        gateways
    }

    /// Receiver observing every state change of a gateway
    pub fn watch_state(&self, id: &GatewayId) -> Result<watch::Receiver<GatewayState>, RelayError> {
        self.entries()
            .get(id)
            .map(|entry| entry.tx_state.subscribe())
            .ok_or_else(|| RelayError::UnknownGateway(id.clone()))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx_events.subscribe()
    }

    /// Ask the orchestrator to mark the gateway operational.
    ///
    /// The state changes only after the orchestrator acknowledged the request in a
    /// finalized block; a refused request leaves the gateway untouched.
    pub async fn activate(&self, id: &GatewayId) -> Result<Gateway, RelayError> {
        let gateway = self.get(id)?;
        if gateway.is_operational() {
            return Ok(gateway);
        }

        let call = SetOperational {
            gateway_id: id.clone(),
            operational: true,
        }
        .to_call()?;
        let block = match self
            .submitter
            .submit_and_wait_finalized(&ChainTarget::Orchestrator, &call)
            .await
        {
            Ok((block, _)) => block,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("Activation of gateway {} failed: {}", id, err);
                return Err(RelayError::ActivationRejected {
                    gateway_id: id.clone(),
                    reason: err.to_string(),
                });
            }
        };

        let gateway = self
            .update(id, |gateway| {
                gateway.state = GatewayState::Operational;
                Ok(())
            })
            .await?;
        info!(
            "Gateway {} is operational (acknowledged in circuit block {})",
            id, block
        );
        let _ = self.tx_events.send(GatewayEvent::Activated(id.clone()));
        Ok(gateway)
    }

    /// Halt relaying for a gateway until it is activated again
    pub async fn suspend(&self, id: &GatewayId, reason: &str) -> Result<Gateway, RelayError> {
        let gateway = self
            .update(id, |gateway| {
                gateway.state = GatewayState::Suspended;
                Ok(())
            })
            .await?;
        warn!("Gateway {} suspended: {}", id, reason);
        let _ = self.tx_events.send(GatewayEvent::Suspended {
            gateway_id: id.clone(),
            reason: reason.to_string(),
        });
        Ok(gateway)
    }

    /// Advance the last relayed anchor of an operational gateway
    pub async fn record_relayed(
        &self,
        id: &GatewayId,
        block: BlockRef,
    ) -> Result<Gateway, RelayError> {
        let gateway = self
            .update(id, |gateway| {
                if gateway.state == GatewayState::Suspended {
                    return Err(RelayError::GatewayNotOperational {
                        gateway_id: gateway.id.clone(),
                        state: gateway.state,
                    });
                }
                if let Some(last) = gateway.last_relayed_number() {
                    if block.number <= last {
                        return Err(RelayError::NonMonotonicRelay {
                            gateway_id: gateway.id.clone(),
                            number: block.number,
                            last,
                        });
                    }
                }
                gateway.last_relayed_block = Some(block);
                Ok(())
            })
            .await?;
        let _ = self.tx_events.send(GatewayEvent::Relayed {
            gateway_id: id.clone(),
            block,
        });
        Ok(gateway)
    }

    async fn update<F>(&self, id: &GatewayId, mutate: F) -> Result<Gateway, RelayError>
    where
        F: FnOnce(&mut Gateway) -> Result<(), RelayError>,
    {
        let _write = self.write_lock.lock().await;
        let mut gateway = self.get(id)?;
        mutate(&mut gateway)?;
        self.store.save(&gateway).await?;

        let mut entries = self.entries_mut();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownGateway(id.clone()))?;
        entry.gateway = gateway.clone();
        entry.tx_state.send_if_modified(|state| {
            let changed = *state != gateway.state;
            *state = gateway.state;
            changed
        });
        Ok(gateway)
    }
}
