#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::broadcast, task::JoinHandle};

use circuit_relay_client::{OutcomeReporter, SigningIdentity};
use circuit_relay_core::{
    create_execution_relay, CircuitReporter, ExecutionClient, ExecutionServices, FinalityRelay,
    GatewayRegistry, InMemoryGatewayStore, RelayConfig, TransactionSubmitter,
};
use circuit_relay_primitives::{Endpoint, Gateway, GatewayId, SideEffectKind};
use circuit_relay_sim::{SimNetwork, SimSigner};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast timings so retries and deadlines elapse within a test
pub fn test_config() -> RelayConfig {
    RelayConfig {
        batch_max_size: 10,
        range_interval: Duration::from_secs(60),
        batching: true,
        retry_initial_interval: Duration::from_millis(20),
        retry_backoff_ceiling: Duration::from_millis(80),
        reconnect_timeout: Duration::from_secs(2),
        signing_identity: SigningIdentity::from("//Relayer"),
    }
}

pub struct Harness {
    pub config: RelayConfig,
    pub network: SimNetwork,
    pub signer: Arc<SimSigner>,
    pub submitter: Arc<TransactionSubmitter>,
    pub registry: Arc<GatewayRegistry>,
    pub tx_shutdown: broadcast::Sender<()>,
}

impl Harness {
    pub fn new(config: RelayConfig) -> Self {
        let network = SimNetwork::new();
        let signer = Arc::new(SimSigner::new());
        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::new(network.clone()),
            signer.clone(),
            config.signing_identity.clone(),
        ));
        let registry = Arc::new(GatewayRegistry::new(
            Arc::new(InMemoryGatewayStore::default()),
            submitter.clone(),
        ));
        let (tx_shutdown, _) = broadcast::channel(1);
        Self {
            config,
            network,
            signer,
            submitter,
            registry,
            tx_shutdown,
        }
    }

    /// Start a gateway chain and register it with the relay
    pub async fn add_gateway(&self, name: &str, justification_period: u64) -> GatewayId {
        let endpoints = vec![Endpoint::from(format!("ws://{name}-primary").as_str())];
        self.add_gateway_with_endpoints(name, justification_period, endpoints)
            .await
    }

    pub async fn add_gateway_with_endpoints(
        &self,
        name: &str,
        justification_period: u64,
        endpoints: Vec<Endpoint>,
    ) -> GatewayId {
        let id = GatewayId::from(name);
        self.network.add_gateway(id.clone(), justification_period);
        self.registry
            .register(Gateway::new(
                id.clone(),
                endpoints,
                vec![
                    SideEffectKind::Transfer,
                    SideEffectKind::AssetTransfer,
                    SideEffectKind::Swap,
                ],
            ))
            .await
            .unwrap();
        id
    }

    pub async fn add_operational_gateway(&self, name: &str, justification_period: u64) -> GatewayId {
        let id = self.add_gateway(name, justification_period).await;
        self.registry.activate(&id).await.unwrap();
        id
    }

    pub fn spawn_finality_relay(&self, id: &GatewayId) -> JoinHandle<Result<(), ()>> {
        let mut relay = FinalityRelay::new(
            id.clone(),
            self.config.clone(),
            Arc::new(self.network.clone()),
            self.registry.clone(),
            self.submitter.clone(),
            self.tx_shutdown.subscribe(),
        );
        tokio::spawn(async move { relay.run().await })
    }

    pub fn spawn_execution_relay(&self) -> (ExecutionClient, JoinHandle<Result<(), ()>>) {
        self.spawn_execution_relay_with_reporter(Arc::new(CircuitReporter::new(
            self.submitter.clone(),
        )))
    }

    pub fn spawn_execution_relay_with_reporter(
        &self,
        reporter: Arc<dyn OutcomeReporter>,
    ) -> (ExecutionClient, JoinHandle<Result<(), ()>>) {
        let services = ExecutionServices {
            chain: Arc::new(self.network.clone()),
            registry: self.registry.clone(),
            submitter: self.submitter.clone(),
            proofs: Arc::new(self.network.clone()),
            reporter,
        };
        let (mut relay, client) =
            create_execution_relay(self.config.clone(), services, 16, self.tx_shutdown.subscribe());
        (client, tokio::spawn(async move { relay.run().await }))
    }

    /// Wait until a relay listens to the gateway's finalized headers
    pub async fn wait_subscribed(&self, id: &GatewayId) {
        wait_until("header subscription", || self.network.header_subscribers(id) > 0).await;
    }

    pub fn shutdown(&self) {
        let _ = self.tx_shutdown.send(());
    }
}

/// Poll `condition` until it holds, failing the test after [`WAIT_TIMEOUT`]
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(WAIT_TIMEOUT, poll).await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

/// Poll an async lookup until it yields a value
pub async fn wait_for<T, F, Fut>(what: &str, lookup: F) -> T
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let poll = async {
        loop {
            if let Some(value) = lookup().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    match tokio::time::timeout(WAIT_TIMEOUT, poll).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}
