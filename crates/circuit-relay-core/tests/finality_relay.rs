mod common;

use std::time::Duration;

use circuit_relay_core::RelayConfig;
use circuit_relay_primitives::{
    call::SubmitFinalityProof, ChainTarget, Endpoint, GatewayState, HeaderRange,
};
use circuit_relay_sim::{justification_for, AcceptedRange};

use common::{test_config, wait_until, Harness};

#[tokio::test]
async fn test_full_batch_is_relayed_as_one_range() {
    let harness = Harness::new(test_config());
    let id = harness.add_operational_gateway("pdot", 10).await;
    // History before the relay starts is not replayed
    harness.network.produce_blocks(&id, 99).unwrap();

    let relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;
    harness.network.produce_blocks(&id, 10).unwrap();

    wait_until("anchor #109 recorded", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(109)
    })
    .await;
    let ranges = harness.network.orchestrator(|o| o.accepted_ranges().to_vec());
    assert_eq!(
        ranges,
        vec![AcceptedRange {
            gateway_id: id.clone(),
            first: 100,
            anchor: harness.network.header_at(&id, 109).unwrap().block_ref(),
        }]
    );
    assert_eq!(harness.network.orchestrator(|o| o.finality_submissions()), 1);

    harness.shutdown();
    assert_eq!(relay.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_ranges_follow_each_other_in_order() {
    let config = RelayConfig {
        batch_max_size: 5,
        ..test_config()
    };
    let harness = Harness::new(config);
    let id = harness.add_operational_gateway("pdot", 5).await;
    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;

    harness.network.produce_blocks(&id, 20).unwrap();
    wait_until("four ranges", || {
        harness.network.orchestrator(|o| o.accepted_ranges().len()) == 4
    })
    .await;

    let anchors: Vec<u64> = harness.network.orchestrator(|o| {
        o.accepted_ranges()
            .iter()
            .map(|range| range.anchor.number)
            .collect()
    });
    assert_eq!(anchors, vec![4, 9, 14, 19]);
    let firsts: Vec<u64> =
        harness.network.orchestrator(|o| o.accepted_ranges().iter().map(|r| r.first).collect());
    assert_eq!(firsts, vec![1, 5, 10, 15]);
}

#[tokio::test]
async fn test_disabled_batching_relays_each_justified_header() {
    let config = RelayConfig {
        batching: false,
        ..test_config()
    };
    let harness = Harness::new(config);
    let id = harness.add_operational_gateway("pdot", 1).await;
    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;

    harness.network.produce_blocks(&id, 3).unwrap();
    wait_until("three single-header ranges", || {
        harness.network.orchestrator(|o| o.accepted_ranges().len()) == 3
    })
    .await;
    harness.network.orchestrator(|o| {
        for range in o.accepted_ranges() {
            assert_eq!(range.first, range.anchor.number);
        }
    });
}

#[tokio::test]
async fn test_overdue_range_is_relayed_before_batch_fills() {
    let config = RelayConfig {
        range_interval: Duration::from_millis(100),
        ..test_config()
    };
    let harness = Harness::new(config);
    let id = harness.add_operational_gateway("pdot", 3).await;
    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;

    harness.network.produce_blocks(&id, 3).unwrap();
    wait_until("anchor #2 recorded", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(2)
    })
    .await;
}

#[tokio::test]
async fn test_repeated_rejections_suspend_gateway_until_reactivated() {
    let harness = Harness::new(test_config());
    let id = harness.add_operational_gateway("pdot", 10).await;
    harness
        .network
        .orchestrator_mut(|o| o.reject_finality_proofs(3));
    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;

    harness.network.produce_blocks(&id, 10).unwrap();
    wait_until("gateway suspended", || {
        harness.registry.get(&id).unwrap().state == GatewayState::Suspended
    })
    .await;
    assert_eq!(harness.network.orchestrator(|o| o.finality_submissions()), 3);
    assert!(harness.network.orchestrator(|o| o.accepted_ranges().is_empty()));

    // Nothing is relayed while suspended
    wait_until("relay unsubscribed", || harness.network.header_subscribers(&id) == 0).await;
    harness.network.produce_blocks(&id, 10).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.network.orchestrator(|o| o.finality_submissions()), 3);
    assert_eq!(harness.registry.get(&id).unwrap().last_relayed_number(), None);

    harness.registry.activate(&id).await.unwrap();
    harness.wait_subscribed(&id).await;
    harness.network.produce_blocks(&id, 10).unwrap();
    wait_until("relaying resumed", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(29)
    })
    .await;
}

#[tokio::test]
async fn test_missed_headers_are_fetched_after_resubscription() {
    let config = RelayConfig {
        range_interval: Duration::from_millis(100),
        ..test_config()
    };
    let harness = Harness::new(config);
    let id = harness.add_operational_gateway("pdot", 10).await;
    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;

    harness.network.produce_blocks(&id, 3).unwrap();
    // Subscriptions drop and #4..#6 are finalized while nobody listens
    harness.network.skip_blocks(&id, 3).unwrap();
    harness.wait_subscribed(&id).await;
    harness.network.produce_blocks(&id, 4).unwrap();

    wait_until("anchor #9 recorded", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(9)
    })
    .await;
    let ranges = harness.network.orchestrator(|o| o.accepted_ranges().to_vec());
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].first, 1);
    assert_eq!(ranges[0].anchor.number, 9);
}

#[tokio::test]
async fn test_unreachable_primary_endpoint_fails_over() {
    let config = RelayConfig {
        range_interval: Duration::from_millis(50),
        ..test_config()
    };
    let harness = Harness::new(config);
    let primary = Endpoint::from("ws://ksma-primary");
    let fallback = Endpoint::from("ws://ksma-fallback");
    harness.network.set_endpoint_reachable(&primary, false);
    let id = harness
        .add_gateway_with_endpoints("ksma", 2, vec![primary, fallback])
        .await;
    harness.registry.activate(&id).await.unwrap();

    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;
    harness.network.produce_blocks(&id, 2).unwrap();
    wait_until("anchor #1 recorded", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(1)
    })
    .await;
}

#[tokio::test]
async fn test_relay_idles_until_gateway_is_activated() {
    let harness = Harness::new(test_config());
    let id = harness.add_gateway("pdot", 1).await;
    let relay = harness.spawn_finality_relay(&id);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.network.header_subscribers(&id), 0);

    harness.registry.activate(&id).await.unwrap();
    harness.wait_subscribed(&id).await;
    harness.shutdown();
    assert_eq!(relay.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_relay_resumes_from_anchor_imported_by_orchestrator() {
    let config = RelayConfig {
        range_interval: Duration::from_millis(100),
        ..test_config()
    };
    let harness = Harness::new(config);
    let id = harness.add_operational_gateway("pdot", 5).await;
    harness.network.produce_blocks(&id, 9).unwrap();

    // #1..#4 reach the orchestrator without the local record moving
    let headers: Vec<_> = (1..=4)
        .map(|number| harness.network.header_at(&id, number).unwrap())
        .collect();
    let justification = justification_for(headers[3].block_ref());
    let range = HeaderRange::new(id.clone(), headers, justification).unwrap();
    let call = SubmitFinalityProof { range }.to_call().unwrap();
    harness
        .submitter
        .submit_and_wait_finalized(&ChainTarget::Orchestrator, &call)
        .await
        .unwrap();
    assert_eq!(harness.registry.get(&id).unwrap().last_relayed_number(), None);

    let _relay = harness.spawn_finality_relay(&id);
    harness.wait_subscribed(&id).await;
    harness.network.produce_blocks(&id, 10).unwrap();

    wait_until("anchor #19 recorded", || {
        harness.registry.get(&id).unwrap().last_relayed_number() == Some(19)
    })
    .await;
    assert_eq!(harness.registry.get(&id).unwrap().state, GatewayState::Operational);
    let firsts: Vec<u64> =
        harness.network.orchestrator(|o| o.accepted_ranges().iter().map(|r| r.first).collect());
    assert_eq!(firsts, vec![1, 5, 15]);
}
