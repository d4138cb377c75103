#![doc = include_str!("../README.md")]

use std::path::PathBuf;

use clap::{command, Parser};
use tokio::task::JoinHandle;
use tracing::{error, info, subscriber::set_global_default};
use tracing_subscriber::filter::EnvFilter;

use circuit_relay_client::SigningIdentity;

use crate::{
    app::{create_app, App},
    config::NodeConfig,
    devnet::BlockProducer,
    rpc::{AppState, RpcConfig, RpcServer},
    shutdown::Shutdown,
};

mod app;
mod config;
mod devnet;
mod rpc;
mod shutdown;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the JSON node configuration
    #[arg(long, env = "RELAY_CONFIG", default_value = "./config/devnet.json")]
    config: PathBuf,
    /// RPC server host
    #[arg(long, env = "RELAY_RPC_HOST", default_value = "127.0.0.1:5000")]
    rpc_host: String,
    /// Signing identity overriding the one of the config file
    #[arg(long, env = "RELAY_SIGNING_IDENTITY")]
    signing_identity: Option<String>,
    /// Logging level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) -> Result<(), anyhow::Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli.log_level) {
        eprintln!("Failed to set up logging: {err}");
        std::process::exit(1);
    }

    info!("Circuit relay node is launching...");

    let mut config = match NodeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {:#}", err);
            std::process::exit(1);
        }
    };
    if let Some(identity) = cli.signing_identity {
        config.signing_identity = SigningIdentity(identity);
    }

    // Instantiating components and wiring them together
    let shutdown = Shutdown::default();

    let App {
        network,
        registry,
        mut execution_relay,
        execution_client,
        finality_relays,
    } = match create_app(&config, &shutdown).await {
        Ok(app) => app,
        Err(err) => {
            error!("Failed to start relays: {:#}", err);
            std::process::exit(1);
        }
    };

    let mut block_producer = BlockProducer::new(network, config.devnet.clone(), shutdown.subscribe());

    let rpc_config = RpcConfig {
        rpc_host: cli.rpc_host,
    };
    let rpc_server = RpcServer::new(
        rpc_config,
        AppState::new(registry, execution_client),
        shutdown.subscribe(),
    );

    // Launching tasks for each component
    let producer_handle = tokio::spawn(async move { block_producer.run().await });
    let finality_handle = tokio::spawn(finality_relays.run());
    let execution_handle = tokio::spawn(async move { execution_relay.run().await });
    let rpc_handle = tokio::spawn(async move { rpc_server.run().await });
    let shutdown_handle = tokio::spawn(async move { shutdown.run().await });

    // If at least one component exits with an error, the node will exit with an error
    match tokio::try_join!(
        flatten(producer_handle),
        flatten(finality_handle),
        flatten(execution_handle),
        flatten(rpc_handle),
        flatten(shutdown_handle)
    ) {
        Ok(_) => {
            info!("Circuit relay node has shut down");
            std::process::exit(0);
        }
        Err(_) => {
            error!("Circuit relay node has exited with error");
            std::process::exit(1);
        }
    }
}

async fn flatten<T>(handle: JoinHandle<Result<T, ()>>) -> Result<T, ()> {
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(()),
    }
}
