//! Relay core: keeps an orchestrator chain informed about the finality of gateway chains
//! and executes side effects on those gateways with verifiable outcomes.
//!
//! Two protocols share the gateway registry and the transaction submitter:
//! - the finality range relay ([`finality::FinalityRelay`]), one loop per gateway;
//! - the execution relay ([`side_effect::ExecutionRelay`]), one task per side effect.

pub mod config;
pub mod endpoints;
pub mod error;
pub mod finality;
pub mod registry;
pub mod reporter;
pub mod retry;
pub mod side_effect;
pub mod submitter;

pub use config::RelayConfig;
pub use error::RelayError;
pub use finality::FinalityRelay;
pub use registry::{GatewayEvent, GatewayRegistry, GatewayStore, InMemoryGatewayStore};
pub use reporter::CircuitReporter;
pub use side_effect::{
    create_execution_relay, ExecutionClient, ExecutionRelay, ExecutionServices, SideEffectRecord,
};
pub use submitter::{TransactionSubmitter, WatchedTransaction};
