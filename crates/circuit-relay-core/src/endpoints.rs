//! Endpoint failover for gateway subscriptions.

use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
};

use backoff::ExponentialBackoff;
use tracing::warn;

use circuit_relay_client::{retry::retry_transient, ClientError};
use circuit_relay_primitives::{Endpoint, GatewayId};

use crate::error::RelayError;

/// Round-robin over a gateway's endpoints, primary first
#[derive(Debug)]
pub struct EndpointRing {
    endpoints: Vec<Endpoint>,
    index: AtomicUsize,
}

impl EndpointRing {
    pub fn new(gateway_id: &GatewayId, endpoints: Vec<Endpoint>) -> Result<Self, RelayError> {
        if endpoints.is_empty() {
            return Err(RelayError::InvalidConfig(format!(
                "gateway {gateway_id} has no endpoints"
            )));
        }
        Ok(Self {
            endpoints,
            index: AtomicUsize::new(0),
        })
    }

    pub fn current(&self) -> Endpoint {
        let index = self.index.load(Ordering::Relaxed) % self.endpoints.len();
        self.endpoints[index].clone()
    }

    /// Switch to the next endpoint, wrapping around to the primary
    pub fn rotate(&self) -> Endpoint {
        self.index.fetch_add(1, Ordering::Relaxed);
        self.current()
    }
}

/// Open a subscription, moving to the next endpoint after every connectivity failure
pub async fn subscribe_with_failover<T, F, Fut>(
    ring: &EndpointRing,
    backoff: ExponentialBackoff,
    what: &str,
    subscribe: F,
) -> Result<T, RelayError>
where
    F: Fn(Endpoint) -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let subscribe = &subscribe;
    retry_transient(backoff, what, || async move {
        let endpoint = ring.current();
        let res = subscribe(endpoint.clone()).await;
        if let Err(err) = &res {
            if err.is_transient() {
                let next = ring.rotate();
                warn!("{} via {} failed, switching to {}: {}", what, endpoint, next, err);
            }
        }
        res
    })
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use circuit_relay_client::retry::connectivity_backoff;

    use super::*;

    #[test]
    fn test_ring_wraps_around() {
        let ring = EndpointRing::new(
            &GatewayId::from("pdot"),
            vec![Endpoint::from("ws://a"), Endpoint::from("ws://b")],
        )
        .unwrap();
        assert_eq!(ring.current(), Endpoint::from("ws://a"));
        assert_eq!(ring.rotate(), Endpoint::from("ws://b"));
        assert_eq!(ring.rotate(), Endpoint::from("ws://a"));
    }

    #[test]
    fn test_gateway_without_endpoints_is_rejected() {
        assert!(matches!(
            EndpointRing::new(&GatewayId::from("pdot"), vec![]),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_failover_to_fallback_endpoint() {
        let ring = EndpointRing::new(
            &GatewayId::from("pdot"),
            vec![Endpoint::from("ws://down"), Endpoint::from("ws://up")],
        )
        .unwrap();
        let attempts = Mutex::new(Vec::new());
        let res = subscribe_with_failover(
            &ring,
            connectivity_backoff(Duration::from_secs(5)),
            "header subscription",
            |endpoint| {
                attempts.lock().unwrap().push(endpoint.clone());
                async move {
                    if endpoint == Endpoint::from("ws://down") {
                        Err(ClientError::Connectivity("refused".into()))
                    } else {
                        Ok(endpoint)
                    }
                }
            },
        )
        .await;
        assert_eq!(res, Ok(Endpoint::from("ws://up")));
        assert_eq!(
            *attempts.lock().unwrap(),
            vec![Endpoint::from("ws://down"), Endpoint::from("ws://up")]
        );
    }
}
