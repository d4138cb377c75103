use std::time::Duration;

use backoff::ExponentialBackoff;

use circuit_relay_client::{retry::connectivity_backoff, SigningIdentity};

use crate::{error::RelayError, retry::CappedExponential};

/// Tuning of both relay protocols
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum number of headers packed into one finality proof range
    pub batch_max_size: usize,
    /// Emit a range once its oldest header has waited this long
    pub range_interval: Duration,
    /// When disabled every justified header is relayed on its own
    pub batching: bool,
    /// First delay before resubmitting a rejected transaction
    pub retry_initial_interval: Duration,
    /// Submission retries stop once the next delay would reach this value
    pub retry_backoff_ceiling: Duration,
    /// Total time spent reconnecting to an endpoint before giving up
    pub reconnect_timeout: Duration,
    /// Identity used for every orchestrator and gateway transaction
    pub signing_identity: SigningIdentity,
}

impl RelayConfig {
    pub fn new(signing_identity: SigningIdentity) -> Self {
        Self {
            batch_max_size: 10,
            range_interval: Duration::from_secs(10),
            batching: true,
            retry_initial_interval: Duration::from_secs(1),
            retry_backoff_ceiling: Duration::from_secs(60),
            reconnect_timeout: Duration::from_secs(120),
            signing_identity,
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.batch_max_size == 0 {
            return Err(RelayError::InvalidConfig(
                "batch max size must be at least 1".into(),
            ));
        }
        if self.range_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "range interval must be positive".into(),
            ));
        }
        if self.retry_initial_interval.is_zero() {
            return Err(RelayError::InvalidConfig(
                "retry initial interval must be positive".into(),
            ));
        }
        if self.retry_backoff_ceiling < self.retry_initial_interval {
            return Err(RelayError::InvalidConfig(format!(
                "retry backoff ceiling {:?} is below the initial interval {:?}",
                self.retry_backoff_ceiling, self.retry_initial_interval
            )));
        }
        if self.signing_identity.0.is_empty() {
            return Err(RelayError::InvalidConfig("signing identity is empty".into()));
        }
        Ok(())
    }

    /// Range size limit taking the batching toggle into account
    pub fn effective_batch_size(&self) -> usize {
        if self.batching {
            self.batch_max_size
        } else {
            1
        }
    }

    pub fn submission_backoff(&self) -> CappedExponential {
        CappedExponential::new(self.retry_initial_interval, self.retry_backoff_ceiling)
    }

    pub fn connectivity_backoff(&self) -> ExponentialBackoff {
        connectivity_backoff(self.reconnect_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::new(SigningIdentity::from("//Alice"));
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_batch_size(), 10);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = RelayConfig {
            batch_max_size: 0,
            ..RelayConfig::new(SigningIdentity::from("//Alice"))
        };
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ceiling_below_initial_interval_is_rejected() {
        let config = RelayConfig {
            retry_initial_interval: Duration::from_secs(5),
            retry_backoff_ceiling: Duration::from_secs(1),
            ..RelayConfig::new(SigningIdentity::from("//Alice"))
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_batching_relays_single_headers() {
        let config = RelayConfig {
            batching: false,
            ..RelayConfig::new(SigningIdentity::from("//Alice"))
        };
        assert_eq!(config.effective_batch_size(), 1);
    }
}
