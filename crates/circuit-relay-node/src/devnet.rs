//! Block production of the in-process devnet.

use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{error, info, trace};

use circuit_relay_sim::SimNetwork;

use crate::config::DevnetConfig;

/// Produces and finalizes one block on every gateway per block time
pub struct BlockProducer {
    network: SimNetwork,
    config: DevnetConfig,
    rx_shutdown: broadcast::Receiver<()>,
}

impl BlockProducer {
    pub fn new(
        network: SimNetwork,
        config: DevnetConfig,
        rx_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            network,
            config,
            rx_shutdown,
        }
    }

    async fn run_inner(&mut self) -> Result<(), anyhow::Error> {
        info!(
            "Block producer started, block time {}ms",
            self.config.block_time_ms
        );
        let mut interval = tokio::time::interval(self.config.block_time());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for gateway_id in self.network.gateway_ids() {
                        let best = self.network.produce_blocks(&gateway_id, 1)?;
                        trace!("Gateway {} finalized {}", gateway_id, best);
                    }
                },
                _ = self.rx_shutdown.recv() => {
                    return Ok(())
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("Block producer exited: {}", err);
                Err(())
            }
            Ok(()) => {
                info!("Block producer terminated");
                Ok(())
            }
        }
    }
}
