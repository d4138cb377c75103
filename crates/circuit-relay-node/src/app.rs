//! Wiring of the relay components against the in-process devnet.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use circuit_relay_client::ChainClient;
use circuit_relay_core::{
    create_execution_relay, CircuitReporter, ExecutionClient, ExecutionRelay, ExecutionServices,
    FinalityRelay, GatewayRegistry, InMemoryGatewayStore, TransactionSubmitter,
};
use circuit_relay_primitives::Gateway;
use circuit_relay_sim::{SimNetwork, SimSigner};

use crate::{config::NodeConfig, shutdown::Shutdown};

/// Capacity of the execution relay request channel
const EXECUTION_REQUESTS_CAPACITY: usize = 1000;

/// Components of a running node
pub struct App {
    pub network: SimNetwork,
    pub registry: Arc<GatewayRegistry>,
    pub execution_relay: ExecutionRelay,
    pub execution_client: ExecutionClient,
    pub finality_relays: FinalityRelays,
}

/// One finality relay per configured gateway
pub struct FinalityRelays {
    relays: Vec<FinalityRelay>,
}

impl FinalityRelays {
    /// Runs every relay; fails as soon as one of them fails
    pub async fn run(self) -> Result<(), ()> {
        let mut tasks = JoinSet::new();
        for mut relay in self.relays {
            let span = info_span!("finality", gateway = %relay.gateway_id());
            tasks.spawn(async move { relay.run().await }.instrument(span));
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(())) => return Err(()),
                Err(err) => {
                    error!("Finality relay task failed: {}", err);
                    return Err(());
                }
            }
        }
        Ok(())
    }
}

/// Build the devnet, register the configured gateways and create the relays
pub async fn create_app(config: &NodeConfig, shutdown: &Shutdown) -> Result<App, anyhow::Error> {
    let relay_config = config.relay_config();
    relay_config.validate()?;

    let network = SimNetwork::new();
    let chain: Arc<dyn ChainClient> = Arc::new(network.clone());
    let submitter = Arc::new(TransactionSubmitter::new(
        chain.clone(),
        Arc::new(SimSigner::new()),
        relay_config.signing_identity.clone(),
    ));
    info!(
        "Relaying as {} ({})",
        submitter.identity(),
        submitter.address()?
    );

    let registry = Arc::new(
        GatewayRegistry::restore(Arc::new(InMemoryGatewayStore::default()), submitter.clone())
            .await?,
    );
    for (gateway_id, gateway) in &config.gateways {
        network.add_gateway(gateway_id.clone(), config.devnet.justification_period);
        registry
            .register(Gateway::new(
                gateway_id.clone(),
                gateway.endpoints.clone(),
                gateway.allowed_side_effects.clone(),
            ))
            .await?;
    }

    for (gateway_id, _) in config
        .gateways
        .iter()
        .filter(|(_, gateway)| gateway.auto_activate)
    {
        match registry.activate(gateway_id).await {
            Ok(_) => {}
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => warn!("Gateway {} stays registered: {}", gateway_id, err),
        }
    }

    let relays = config
        .gateways
        .keys()
        .map(|gateway_id| {
            FinalityRelay::new(
                gateway_id.clone(),
                relay_config.clone(),
                chain.clone(),
                registry.clone(),
                submitter.clone(),
                shutdown.subscribe(),
            )
        })
        .collect();

    let services = ExecutionServices {
        chain,
        registry: registry.clone(),
        submitter: submitter.clone(),
        proofs: Arc::new(network.clone()),
        reporter: Arc::new(CircuitReporter::new(submitter)),
    };
    let (execution_relay, execution_client) = create_execution_relay(
        relay_config,
        services,
        EXECUTION_REQUESTS_CAPACITY,
        shutdown.subscribe(),
    );

    Ok(App {
        network,
        registry,
        execution_relay,
        execution_client,
        finality_relays: FinalityRelays { relays },
    })
}
