//! In-process devnet used to run the relays without external nodes: a simulated
//! orchestrator, simulated gateway chains and a deterministic signer.

pub mod gateway;
pub mod network;
pub mod orchestrator;
pub mod signer;

pub use gateway::{justification_for, GatewayFaults};
pub use network::SimNetwork;
pub use orchestrator::{AcceptedRange, Orchestrator, SideEffectResolution};
pub use signer::SimSigner;

#[cfg(test)]
mod tests {
    use circuit_relay_client::{ChainClient, Signer, SigningIdentity};
    use circuit_relay_primitives::{
        call::SetOperational, ChainTarget, Endpoint, GatewayId, TransactionStatus,
    };

    use super::*;

    #[tokio::test]
    async fn test_finalized_headers_carry_periodic_justifications() {
        let network = SimNetwork::new();
        let id = GatewayId::from("pdot");
        network.add_gateway(id.clone(), 5);
        let mut headers = network
            .subscribe_finalized_headers(&id, &Endpoint::from("ws://pdot"))
            .await
            .unwrap();

        network.produce_blocks(&id, 5).unwrap();
        let mut justified = Vec::new();
        for expected in 1..=5 {
            let (header, justification) = headers.next().await.unwrap();
            assert_eq!(header.number, expected);
            if justification.is_some() {
                justified.push(header.number);
            }
        }
        assert_eq!(justified, vec![4]);
    }

    #[tokio::test]
    async fn test_refused_activation_reports_error_status() {
        let network = SimNetwork::new();
        let signer = SimSigner::new();
        let identity = SigningIdentity::from("//Relayer");
        let call = SetOperational {
            gateway_id: GatewayId::from("pdot"),
            operational: true,
        }
        .to_call()
        .unwrap();
        network.orchestrator_mut(|orchestrator| orchestrator.reject_activations(true));

        let tx = signer
            .sign(&ChainTarget::Orchestrator, &call, &identity)
            .await
            .unwrap();
        let mut statuses = network
            .submit_and_watch(&ChainTarget::Orchestrator, tx)
            .await
            .unwrap();
        assert!(matches!(
            statuses.next().await,
            Some(TransactionStatus::Error(_))
        ));
        let operational =
            network.orchestrator(|orchestrator| orchestrator.is_operational(&GatewayId::from("pdot")));
        assert!(!operational);
    }

    #[tokio::test]
    async fn test_lagging_header_subscriber_is_dropped() {
        let network = SimNetwork::new();
        let id = GatewayId::from("pdot");
        network.add_gateway(id.clone(), 5);
        let mut headers = network
            .subscribe_finalized_headers(&id, &Endpoint::from("ws://pdot"))
            .await
            .unwrap();

        let backlog = circuit_relay_client::subscription::DEFAULT_CAPACITY as u64;
        network.produce_blocks(&id, backlog + 1).unwrap();
        assert_eq!(network.header_subscribers(&id), 0);

        let mut received = 0;
        while headers.next().await.is_some() {
            received += 1;
        }
        assert_eq!(received, backlog);
    }
}
