mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use circuit_relay_client::{ClientError, OutcomeReporter};
use circuit_relay_core::{ExecutionClient, RelayError, SideEffectRecord};
use circuit_relay_primitives::{
    Address, ErrorKind, GatewayId, InclusionProof, SideEffect, SideEffectAction,
    SideEffectFailure, SideEffectId, SideEffectStatus, TransactionOutcome,
};
use circuit_relay_sim::{GatewayFaults, SideEffectResolution, SimSigner};

use common::{test_config, wait_for, wait_until, Harness};

fn transfer(id: &[u8], gateway_id: &GatewayId, amount: u128) -> SideEffect {
    SideEffect {
        id: SideEffectId::digest(id),
        gateway_id: gateway_id.clone(),
        action: SideEffectAction::Transfer {
            to: Address([9u8; 32]),
            amount,
        },
    }
}

/// Reporter that does not sign anything, so it keeps working without the relay key
#[derive(Default)]
struct RecordingReporter {
    failures: Mutex<Vec<(SideEffectId, SideEffectFailure)>>,
}

impl RecordingReporter {
    fn failures(&self) -> Vec<(SideEffectId, SideEffectFailure)> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeReporter for RecordingReporter {
    async fn report_side_effect_outcome(
        &self,
        _id: &SideEffectId,
        _outcome: &TransactionOutcome,
        _proof: &InclusionProof,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn report_side_effect_failure(
        &self,
        id: &SideEffectId,
        failure: &SideEffectFailure,
    ) -> Result<(), ClientError> {
        self.failures.lock().unwrap().push((*id, failure.clone()));
        Ok(())
    }
}

async fn terminal_record(client: &ExecutionClient, id: SideEffectId) -> SideEffectRecord {
    wait_for("terminal side effect status", || async move {
        client
            .get_side_effect(id)
            .await
            .ok()
            .filter(|record| record.status.is_terminal())
    })
    .await
}

/// Submit and include the side effect in the next block, finalizing it right away
async fn execute_in_next_block(
    harness: &Harness,
    client: &ExecutionClient,
    side_effect: SideEffect,
) -> SideEffectRecord {
    let id = side_effect.id;
    let gateway_id = side_effect.gateway_id.clone();
    client.submit_side_effect(side_effect).await.unwrap();
    wait_until("transaction in pool", || {
        harness.network.pending_transactions(&gateway_id) == 1
    })
    .await;
    harness.network.produce_blocks(&gateway_id, 1).unwrap();
    terminal_record(client, id).await
}

#[tokio::test]
async fn test_transfer_is_confirmed_with_inclusion_proof() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness.network.produce_blocks(&gateway_id, 499).unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let side_effect = transfer(b"se-500", &gateway_id, 1_000);
    let record = execute_in_next_block(&harness, &client, side_effect.clone()).await;

    assert_eq!(record.status, SideEffectStatus::Confirmed);
    let outcome = record.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.block.number, 500);
    assert!(outcome.event_payload.is_some());
    assert_eq!(
        outcome.executor,
        SimSigner::address_of(&harness.config.signing_identity)
    );
    assert!(!record.expected_event_missing);

    match harness
        .network
        .orchestrator(|o| o.resolution(&side_effect.id).cloned())
    {
        Some(SideEffectResolution::Confirmed { outcome, proof }) => {
            assert_eq!(outcome.block.number, 500);
            assert_eq!(proof.block, outcome.block);
            assert!(!proof.proof_bytes.is_empty());
        }
        other => panic!("unexpected resolution {:?}", other),
    }
    assert_eq!(
        harness
            .network
            .balance_of(&gateway_id, None, &Address([9u8; 32])),
        1_000
    );
}

#[tokio::test]
async fn test_missing_business_event_is_recorded_but_success_kept() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .set_faults(
            &gateway_id,
            GatewayFaults {
                omit_business_events: true,
                ..GatewayFaults::default()
            },
        )
        .unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let record =
        execute_in_next_block(&harness, &client, transfer(b"se-c", &gateway_id, 5)).await;
    assert_eq!(record.status, SideEffectStatus::Confirmed);
    assert!(record.expected_event_missing);
    let outcome = record.outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.event_payload, None);
}

#[tokio::test]
async fn test_success_ignores_other_extrinsics_in_block() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .set_faults(
            &gateway_id,
            GatewayFaults {
                trailing_failed_extrinsic: true,
                ..GatewayFaults::default()
            },
        )
        .unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let record =
        execute_in_next_block(&harness, &client, transfer(b"se-idx", &gateway_id, 5)).await;
    assert!(record.outcome.unwrap().success);
}

#[tokio::test]
async fn test_unsupported_side_effect_fails_without_submission() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    let (client, _relay) = harness.spawn_execution_relay();

    let swap = SideEffect {
        id: SideEffectId::digest(b"se-swap"),
        gateway_id: gateway_id.clone(),
        action: SideEffectAction::Swap {
            asset_in: 1,
            asset_out: 2,
            amount_in: 100,
            min_amount_out: 90,
        },
    };
    client.submit_side_effect(swap.clone()).await.unwrap();
    let record = terminal_record(&client, swap.id).await;

    assert_eq!(record.status, SideEffectStatus::Failed);
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::UnsupportedSideEffectType);
    assert_eq!(failure.failed_in, SideEffectStatus::Pending);
    assert_eq!(harness.network.pending_transactions(&gateway_id), 0);
    assert!(matches!(
        harness.network.orchestrator(|o| o.resolution(&swap.id).cloned()),
        Some(SideEffectResolution::Failed(_))
    ));
}

#[tokio::test]
async fn test_duplicate_side_effect_id_is_rejected() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    let (client, _relay) = harness.spawn_execution_relay();

    let side_effect = transfer(b"se-dup", &gateway_id, 1);
    client.submit_side_effect(side_effect.clone()).await.unwrap();
    assert_eq!(
        client.submit_side_effect(side_effect.clone()).await,
        Err(RelayError::DuplicateSideEffect(side_effect.id))
    );
}

#[tokio::test]
async fn test_duplicate_notifications_report_exactly_once() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .set_faults(
            &gateway_id,
            GatewayFaults {
                duplicate_statuses: true,
                ..GatewayFaults::default()
            },
        )
        .unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let record =
        execute_in_next_block(&harness, &client, transfer(b"se-twice", &gateway_id, 7)).await;
    assert_eq!(record.status, SideEffectStatus::Confirmed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.network.orchestrator(|o| o.report_submissions()), 1);
}

#[tokio::test]
async fn test_dropped_watch_falls_back_to_gateway_finality() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .set_faults(
            &gateway_id,
            GatewayFaults {
                drop_watch_after_inclusion: true,
                ..GatewayFaults::default()
            },
        )
        .unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let side_effect = transfer(b"se-fallback", &gateway_id, 3);
    client.submit_side_effect(side_effect.clone()).await.unwrap();
    wait_until("transaction in pool", || {
        harness.network.pending_transactions(&gateway_id) == 1
    })
    .await;
    let block = harness.network.produce_unfinalized_block(&gateway_id).unwrap();
    harness.wait_subscribed(&gateway_id).await;
    let record = client.get_side_effect(side_effect.id).await.unwrap();
    assert_eq!(record.status, SideEffectStatus::AwaitingFinality);

    harness.network.finalize(&gateway_id, block.number).unwrap();
    let record = terminal_record(&client, side_effect.id).await;
    assert_eq!(record.status, SideEffectStatus::Confirmed);
    assert_eq!(record.outcome.unwrap().block, block);
}

#[tokio::test]
async fn test_pruned_state_fails_with_proof_unavailable() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness.network.prune_below(&gateway_id, 100).unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let record =
        execute_in_next_block(&harness, &client, transfer(b"se-pruned", &gateway_id, 3)).await;
    assert_eq!(record.status, SideEffectStatus::Failed);
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::ProofUnavailable);
    assert_eq!(failure.failed_in, SideEffectStatus::Finalized);
}

#[tokio::test]
async fn test_refused_transaction_fails_side_effect() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .set_faults(
            &gateway_id,
            GatewayFaults {
                reject_transactions: Some("insufficient balance".into()),
                ..GatewayFaults::default()
            },
        )
        .unwrap();
    let (client, _relay) = harness.spawn_execution_relay();

    let side_effect = transfer(b"se-refused", &gateway_id, 3);
    client.submit_side_effect(side_effect.clone()).await.unwrap();
    let record = terminal_record(&client, side_effect.id).await;
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::SubmissionRejected);
    assert_eq!(failure.failed_in, SideEffectStatus::Submitted);
}

#[tokio::test]
async fn test_suspension_abandons_in_flight_side_effect() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    let (client, _relay) = harness.spawn_execution_relay();

    let side_effect = transfer(b"se-suspended", &gateway_id, 3);
    client.submit_side_effect(side_effect.clone()).await.unwrap();
    wait_until("transaction in pool", || {
        harness.network.pending_transactions(&gateway_id) == 1
    })
    .await;
    harness.network.produce_unfinalized_block(&gateway_id).unwrap();
    let (client_ref, id) = (&client, side_effect.id);
    wait_for("inclusion observed", || async move {
        client_ref
            .get_side_effect(id)
            .await
            .ok()
            .filter(|record| record.status == SideEffectStatus::AwaitingFinality)
    })
    .await;

    harness
        .registry
        .suspend(&gateway_id, "operator request")
        .await
        .unwrap();
    let record = terminal_record(&client, side_effect.id).await;
    let failure = record.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::GatewaySuspended);
    assert_eq!(failure.failed_in, SideEffectStatus::AwaitingFinality);
}

#[tokio::test]
async fn test_unavailable_signer_stops_relay() {
    let harness = Harness::new(test_config());
    let gateway_id = harness.add_operational_gateway("pdot", 10).await;
    harness.signer.set_available(false);
    let (client, relay) = harness.spawn_execution_relay();

    client
        .submit_side_effect(transfer(b"se-nokey", &gateway_id, 3))
        .await
        .unwrap();
    let res = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res, Err(()));
}

#[tokio::test]
async fn test_unavailable_signer_reports_every_in_flight_side_effect() {
    let harness = Harness::new(test_config());
    let pdot = harness.add_operational_gateway("pdot", 10).await;
    let ksma = harness.add_operational_gateway("ksma", 10).await;
    let reporter = Arc::new(RecordingReporter::default());
    let (client, relay) = harness.spawn_execution_relay_with_reporter(reporter.clone());

    let in_flight = transfer(b"se-in-flight", &pdot, 5);
    client.submit_side_effect(in_flight.clone()).await.unwrap();
    wait_until("transaction in pool", || {
        harness.network.pending_transactions(&pdot) == 1
    })
    .await;

    harness.signer.set_available(false);
    let unsigned = transfer(b"se-unsigned", &ksma, 6);
    client.submit_side_effect(unsigned.clone()).await.unwrap();

    let res = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res, Err(()));

    let mut failures = reporter.failures();
    failures.sort_by_key(|(id, _)| *id != unsigned.id);
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, unsigned.id);
    assert_eq!(failures[0].1.kind, ErrorKind::SigningUnavailable);
    assert_eq!(failures[0].1.failed_in, SideEffectStatus::Pending);
    assert_eq!(failures[1].0, in_flight.id);
    assert_eq!(failures[1].1.kind, ErrorKind::SigningUnavailable);
    assert_eq!(failures[1].1.failed_in, SideEffectStatus::Submitted);
}
