//! Node configuration file.

use std::{collections::BTreeMap, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use circuit_relay_client::SigningIdentity;
use circuit_relay_core::RelayConfig;
use circuit_relay_primitives::{Endpoint, GatewayId, SideEffectKind};

/// Gateway entry of the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Primary endpoint first, fallbacks after
    pub endpoints: Vec<Endpoint>,
    pub allowed_side_effects: Vec<SideEffectKind>,
    /// Activate on the orchestrator at start-up
    #[serde(default)]
    pub auto_activate: bool,
}

/// Parameters of the in-process devnet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DevnetConfig {
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    /// Every n-th block carries a finality justification
    #[serde(default = "default_justification_period")]
    pub justification_period: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            block_time_ms: default_block_time_ms(),
            justification_period: default_justification_period(),
        }
    }
}

impl DevnetConfig {
    pub fn block_time(&self) -> Duration {
        Duration::from_millis(self.block_time_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NodeConfig {
    pub signing_identity: SigningIdentity,
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    #[serde(default = "default_range_interval_seconds")]
    pub range_interval_seconds: u64,
    #[serde(default = "default_batching")]
    pub batching: bool,
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,
    #[serde(default = "default_retry_backoff_ceiling_ms")]
    pub retry_backoff_ceiling_ms: u64,
    #[serde(default = "default_reconnect_timeout_seconds")]
    pub reconnect_timeout_seconds: u64,
    pub gateways: BTreeMap<GatewayId, GatewayConfig>,
    #[serde(default)]
    pub devnet: DevnetConfig,
}

fn default_batch_max_size() -> usize {
    10
}

fn default_range_interval_seconds() -> u64 {
    10
}

fn default_batching() -> bool {
    true
}

fn default_retry_initial_interval_ms() -> u64 {
    1_000
}

fn default_retry_backoff_ceiling_ms() -> u64 {
    60_000
}

fn default_reconnect_timeout_seconds() -> u64 {
    120
}

fn default_block_time_ms() -> u64 {
    6_000
}

fn default_justification_period() -> u64 {
    8
}

impl NodeConfig {
    /// Read and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&contents)
            .with_context(|| format!("malformed config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.relay_config().validate()?;
        if self.gateways.is_empty() {
            anyhow::bail!("no gateways configured");
        }
        if let Some((id, _)) = self
            .gateways
            .iter()
            .find(|(_, gateway)| gateway.endpoints.is_empty())
        {
            anyhow::bail!("gateway {} has no endpoints", id);
        }
        if self.devnet.block_time_ms == 0 {
            anyhow::bail!("devnet block time must be positive");
        }
        if self.devnet.justification_period == 0 {
            anyhow::bail!("devnet justification period must be at least 1");
        }
        Ok(())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            batch_max_size: self.batch_max_size,
            range_interval: Duration::from_secs(self.range_interval_seconds),
            batching: self.batching,
            retry_initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            retry_backoff_ceiling: Duration::from_millis(self.retry_backoff_ceiling_ms),
            reconnect_timeout: Duration::from_secs(self.reconnect_timeout_seconds),
            signing_identity: self.signing_identity.clone(),
        }
    }
}
