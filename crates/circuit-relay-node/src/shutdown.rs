//! Graceful shutdown on SIGTERM / SIGINT.

use tokio::{
    signal::unix::{signal, SignalKind},
    sync::broadcast,
};
use tracing::{error, info};

/// Broadcasts a single shutdown notification to every component
pub struct Shutdown {
    tx_shutdown: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        let (tx_shutdown, _) = broadcast::channel(1);
        Self { tx_shutdown }
    }
}

impl Shutdown {
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx_shutdown.subscribe()
    }

    async fn wait_signal() -> Result<&'static str, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        Ok(name)
    }

    pub async fn run(&self) -> Result<(), ()> {
        match Self::wait_signal().await {
            Ok(name) => info!("Received {}, stopping relays...", name),
            Err(err) => {
                error!("Cannot install signal handlers: {}", err);
                return Err(());
            }
        }
        // Components that already exited have dropped their receivers
        let _ = self.tx_shutdown.send(());
        Ok(())
    }
}
