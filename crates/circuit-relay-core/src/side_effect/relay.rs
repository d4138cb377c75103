//! Side effect execution relay: submits side effects to gateways, follows them to
//! finality and reports verified outcomes back to the orchestrator.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinSet,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use circuit_relay_client::{
    retry::retry_transient, ChainClient, OutcomeReporter, ProofProvider,
};
use circuit_relay_primitives::{
    BlockHash, BlockNumber, BlockRef, ChainTarget, Gateway, GatewayState, Header,
    InclusionProof, SideEffect, SideEffectId, TransactionOutcome, TransactionStatus,
};

use crate::{
    config::RelayConfig,
    endpoints::{subscribe_with_failover, EndpointRing},
    error::RelayError,
    registry::GatewayRegistry,
    side_effect::{
        actions::{dispatch_for, inspect_events},
        state::{SideEffectRecord, SideEffectStateManager, TerminalReport},
    },
    submitter::TransactionSubmitter,
};

/// Resubscriptions attempted while following gateway finality after a dropped watch
const MAX_FINALITY_RESUBSCRIPTIONS: usize = 5;

/// Terminal records kept queryable; older ones only remain known by id
const RETAINED_TERMINAL_RECORDS: usize = 10_000;

/// Request sent to the execution relay
pub struct ExecutionRequest {
    pub body: ExecutionRequestBody,
    pub tx_response: oneshot::Sender<ExecutionResponse>,
}

pub type ExecutionResponse = Result<ExecutionResponseBody, RelayError>;

pub enum ExecutionRequestBody {
    /// Start executing a new side effect
    Submit(SideEffect),
    /// Current record of a side effect
    Get(SideEffectId),
    /// Records of all side effects seen by this relay
    List,
}

pub enum ExecutionResponseBody {
    Submitted(SideEffectRecord),
    Record(SideEffectRecord),
    Records(Vec<SideEffectRecord>),
}

/// Collaborators of the execution relay
#[derive(Clone)]
pub struct ExecutionServices {
    pub chain: Arc<dyn ChainClient>,
    pub registry: Arc<GatewayRegistry>,
    pub submitter: Arc<TransactionSubmitter>,
    pub proofs: Arc<dyn ProofProvider>,
    pub reporter: Arc<dyn OutcomeReporter>,
}

/// Owns the side effect tasks and serves requests from [`ExecutionClient`]s
pub struct ExecutionRelay {
    executor: Arc<Executor>,
    rx_requests: mpsc::Receiver<ExecutionRequest>,
    rx_shutdown: broadcast::Receiver<()>,
}

#[derive(Clone)]
pub struct ExecutionClient {
    tx_requests: mpsc::Sender<ExecutionRequest>,
}

struct Executor {
    config: RelayConfig,
    services: ExecutionServices,
    records: RwLock<Records>,
    /// Set once a fatal error stops the relay; in-flight side effects fail with it
    tx_halt: watch::Sender<Option<RelayError>>,
}

/// Side effect records by id. Only the most recent terminal records are kept, ids of
/// evicted ones are remembered so they are still refused as duplicates.
struct Records {
    live: HashMap<SideEffectId, SideEffectRecord>,
    /// Terminal ids, oldest first
    terminal: VecDeque<SideEffectId>,
    evicted: HashSet<SideEffectId>,
    retained: usize,
}

impl Records {
    fn new(retained: usize) -> Self {
        Self {
            live: HashMap::new(),
            terminal: VecDeque::new(),
            evicted: HashSet::new(),
            retained,
        }
    }

    fn insert_new(&mut self, record: SideEffectRecord) -> Result<(), RelayError> {
        let id = record.side_effect.id;
        if self.live.contains_key(&id) || self.evicted.contains(&id) {
            return Err(RelayError::DuplicateSideEffect(id));
        }
        self.live.insert(id, record);
        Ok(())
    }

    fn update(&mut self, record: SideEffectRecord) {
        let id = record.side_effect.id;
        let Some(previous) = self.live.get_mut(&id) else {
            return;
        };
        let became_terminal = record.status.is_terminal() && !previous.status.is_terminal();
        *previous = record;
        if became_terminal {
            self.terminal.push_back(id);
        }
        while self.terminal.len() > self.retained {
            if let Some(oldest) = self.terminal.pop_front() {
                self.live.remove(&oldest);
                self.evicted.insert(oldest);
            }
        }
    }
}

impl ExecutionRelay {
    pub fn new(
        config: RelayConfig,
        services: ExecutionServices,
        rx_requests: mpsc::Receiver<ExecutionRequest>,
        rx_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            executor: Arc::new(Executor {
                config,
                services,
                records: RwLock::new(Records::new(RETAINED_TERMINAL_RECORDS)),
                tx_halt: watch::channel(None).0,
            }),
            rx_requests,
            rx_shutdown,
        }
    }

    async fn run_inner(&mut self) -> Result<(), anyhow::Error> {
        info!("Execution relay started");
        let mut tasks: JoinSet<Result<(), RelayError>> = JoinSet::new();

        loop {
            tokio::select! {
                Some(req) = self.rx_requests.recv() => {
                    let res = match req.body {
                        ExecutionRequestBody::Submit(side_effect) => self
                            .accept(side_effect, &mut tasks)
                            .map(ExecutionResponseBody::Submitted),
                        ExecutionRequestBody::Get(id) => self
                            .executor
                            .record(&id)
                            .map(ExecutionResponseBody::Record),
                        ExecutionRequestBody::List => {
                            Ok(ExecutionResponseBody::Records(self.executor.list()))
                        }
                    };
                    if req.tx_response.send(res).is_err() {
                        debug!("Execution request was cancelled by the caller");
                    }
                },
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        // Every in-flight side effect fails with the same reason and reports it
                        self.executor.halt(&err);
                        tokio::select! {
                            _ = drain(&mut tasks) => {}
                            _ = self.rx_shutdown.recv() => {}
                        }
                        tasks.abort_all();
                        return Err(err.into());
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => return Err(anyhow::anyhow!("Side effect task failed: {}", err)),
                },
                _ = self.rx_shutdown.recv() => {
                    tasks.abort_all();
                    return Ok(());
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("Execution relay exited: {}", err);
                Err(())
            }
            Ok(()) => {
                info!("Execution relay terminated");
                Ok(())
            }
        }
    }

    fn accept(
        &self,
        side_effect: SideEffect,
        tasks: &mut JoinSet<Result<(), RelayError>>,
    ) -> Result<SideEffectRecord, RelayError> {
        let manager = SideEffectStateManager::new(side_effect);
        let record = manager.record();
        self.executor.records_mut().insert_new(record.clone())?;
        let executor = self.executor.clone();
        let span = info_span!("side_effect", id = %manager.id());
        tasks.spawn(async move { executor.execute(manager).await }.instrument(span));
        Ok(record)
    }
}

impl ExecutionClient {
    pub fn new(tx_requests: mpsc::Sender<ExecutionRequest>) -> Self {
        Self { tx_requests }
    }

    async fn send_request<T>(
        &self,
        body: ExecutionRequestBody,
        extract_response: impl FnOnce(ExecutionResponseBody) -> Option<T>,
    ) -> Result<T, RelayError> {
        let (tx_response, rx_response) = oneshot::channel();
        self.tx_requests
            .send(ExecutionRequest { body, tx_response })
            .await
            .map_err(|_| RelayError::Shutdown)?;
        let response_body = rx_response.await.map_err(|_| RelayError::Shutdown)??;
        extract_response(response_body)
            .ok_or_else(|| RelayError::Codec("unexpected response type".into()))
    }

    /// Hand a side effect over for execution; fails if its id was seen before
    pub async fn submit_side_effect(
        &self,
        side_effect: SideEffect,
    ) -> Result<SideEffectRecord, RelayError> {
        self.send_request(
            ExecutionRequestBody::Submit(side_effect),
            |response| match response {
                ExecutionResponseBody::Submitted(record) => Some(record),
                _ => None,
            },
        )
        .await
    }

    pub async fn get_side_effect(&self, id: SideEffectId) -> Result<SideEffectRecord, RelayError> {
        self.send_request(ExecutionRequestBody::Get(id), |response| match response {
            ExecutionResponseBody::Record(record) => Some(record),
            _ => None,
        })
        .await
    }

    pub async fn list_side_effects(&self) -> Result<Vec<SideEffectRecord>, RelayError> {
        self.send_request(ExecutionRequestBody::List, |response| match response {
            ExecutionResponseBody::Records(records) => Some(records),
            _ => None,
        })
        .await
    }
}

/// Create the execution relay and a client for it
pub fn create_execution_relay(
    config: RelayConfig,
    services: ExecutionServices,
    requests_capacity: usize,
    rx_shutdown: broadcast::Receiver<()>,
) -> (ExecutionRelay, ExecutionClient) {
    let (tx_requests, rx_requests) = mpsc::channel(requests_capacity);
    let relay = ExecutionRelay::new(config, services, rx_requests, rx_shutdown);
    let client = ExecutionClient::new(tx_requests);
    (relay, client)
}

impl Executor {
    fn records_mut(&self) -> std::sync::RwLockWriteGuard<'_, Records> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, id: &SideEffectId) -> Result<SideEffectRecord, RelayError> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .live
            .get(id)
            .cloned()
            .ok_or(RelayError::UnknownSideEffect(*id))
    }

    fn list(&self) -> Vec<SideEffectRecord> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .live
            .values()
            .cloned()
            .collect()
    }

    fn store(&self, manager: &SideEffectStateManager) {
        self.records_mut().update(manager.record());
    }

    /// Run a side effect to a terminal status; only fatal errors are returned
    async fn execute(&self, mut manager: SideEffectStateManager) -> Result<(), RelayError> {
        let id = manager.id();
        info!(
            "Executing side effect {} ({}) on gateway {}",
            id,
            manager.side_effect().kind(),
            manager.side_effect().gateway_id
        );

        let res = tokio::select! {
            res = self.drive_while_operational(&mut manager) => res,
            reason = self.halted() => Err(reason),
        };
        let (report, fatal) = match res {
            Ok((outcome, proof)) => (manager.confirm(outcome, proof), None),
            Err(err) if err.is_fatal() => {
                error!("Side effect {} cannot be executed: {}", id, err);
                self.halt(&err);
                (manager.fail(&err), Some(err))
            }
            Err(err) => {
                warn!("Side effect {} failed: {}", id, err);
                (manager.fail(&err), None)
            }
        };
        self.store(&manager);

        if let Some(report) = report {
            match self.deliver(&report).await {
                Ok(()) => match report {
                    TerminalReport::Confirmed { .. } => {
                        manager.mark_reported();
                        info!("Side effect {} confirmed", id);
                    }
                    TerminalReport::Failed { .. } => info!("Failure of side effect {} reported", id),
                },
                Err(err) => {
                    error!("Failed to report side effect {}: {}", id, err);
                    manager.fail(&err);
                }
            }
            self.store(&manager);
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn halt(&self, reason: &RelayError) {
        self.tx_halt.send_if_modified(|halted| match halted {
            Some(_) => false,
            None => {
                *halted = Some(reason.clone());
                true
            }
        });
    }

    /// Resolves with the fatal error once the relay halts
    async fn halted(&self) -> RelayError {
        let mut rx_halt = self.tx_halt.subscribe();
        let reason = match rx_halt.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }

    async fn deliver(&self, report: &TerminalReport) -> Result<(), RelayError> {
        let reporter = &self.services.reporter;
        retry_transient(
            self.config.connectivity_backoff(),
            "Side effect report",
            || async move {
                match report {
                    TerminalReport::Confirmed { id, outcome, proof } => {
                        reporter.report_side_effect_outcome(id, outcome, proof).await
                    }
                    TerminalReport::Failed { id, failure } => {
                        reporter.report_side_effect_failure(id, failure).await
                    }
                }
            },
        )
        .await
        .map_err(Into::into)
    }

    /// Drive the side effect, abandoning it as soon as its gateway leaves `Operational`
    async fn drive_while_operational(
        &self,
        manager: &mut SideEffectStateManager,
    ) -> Result<(TransactionOutcome, InclusionProof), RelayError> {
        let gateway_id = manager.side_effect().gateway_id.clone();
        let mut rx_state = self.services.registry.watch_state(&gateway_id)?;
        tokio::select! {
            res = self.drive(manager) => res,
            state = wait_not_operational(&mut rx_state) => {
                Err(RelayError::GatewayNotOperational { gateway_id, state })
            }
        }
    }

    async fn drive(
        &self,
        manager: &mut SideEffectStateManager,
    ) -> Result<(TransactionOutcome, InclusionProof), RelayError> {
        let side_effect = manager.side_effect().clone();
        let gateway = self.services.registry.get(&side_effect.gateway_id)?;
        if !gateway.is_operational() {
            return Err(RelayError::GatewayNotOperational {
                gateway_id: gateway.id,
                state: gateway.state,
            });
        }
        let dispatch = dispatch_for(&gateway, side_effect.kind())?;
        let call = dispatch.call(&side_effect.action)?;
        let target = ChainTarget::Gateway(gateway.id.clone());

        let mut watched = self.services.submitter.submit(&target, &call).await?;
        manager.mark_submitted();
        self.store(manager);

        let mut included = None;
        let (block, extrinsic_index) = loop {
            match watched.next_status().await {
                Some(TransactionStatus::Included {
                    block,
                    extrinsic_index,
                }) => {
                    if manager.mark_included(block, extrinsic_index) {
                        debug!("Side effect {} included in {}", side_effect.id, block);
                        self.store(manager);
                    }
                    included = Some((block, extrinsic_index));
                }
                Some(TransactionStatus::Finalized {
                    block,
                    extrinsic_index,
                }) => {
                    manager.mark_finalized(block, extrinsic_index);
                    break (block, extrinsic_index);
                }
                Some(TransactionStatus::Error(reason)) => {
                    return Err(RelayError::SubmissionRejected(reason));
                }
                None => match included {
                    Some((block, extrinsic_index)) => {
                        warn!(
                            "Watch of side effect {} dropped after inclusion in {}, following gateway finality",
                            side_effect.id, block
                        );
                        self.await_finality(&gateway, block).await?;
                        manager.mark_finalized(block, extrinsic_index);
                        break (block, extrinsic_index);
                    }
                    None => {
                        return Err(RelayError::Connectivity(format!(
                            "watch of side effect {} dropped before inclusion",
                            side_effect.id
                        )))
                    }
                },
            }
        };
        watched.unsubscribe();
        self.store(manager);
        info!(
            "Side effect {} finalized in block {} at index {}",
            side_effect.id, block, extrinsic_index
        );

        let chain = &self.services.chain;
        let target = &target;
        let events = retry_transient(
            self.config.connectivity_backoff(),
            "Event fetch",
            || async move { chain.block_events(target, &block).await },
        )
        .await?;
        let inspected = inspect_events(&events, extrinsic_index, &dispatch);
        if !inspected.success {
            warn!("Extrinsic of side effect {} did not succeed", side_effect.id);
        }
        if inspected.event_payload.is_none() {
            let missing = RelayError::ExpectedEventMissing {
                event: dispatch.expected_event_name(),
                block,
            };
            warn!("Side effect {}: {}", side_effect.id, missing);
            manager.mark_expected_event_missing();
        }

        let proofs = &self.services.proofs;
        let gateway_id = &gateway.id;
        let proof = retry_transient(
            self.config.connectivity_backoff(),
            "Inclusion proof",
            || async move { proofs.get_inclusion_proof(gateway_id, &block).await },
        )
        .await?;

        let outcome = TransactionOutcome {
            success: inspected.success,
            event_payload: inspected.event_payload,
            block,
            executor: self.services.submitter.address()?,
            finalized_at: unix_now(),
        };
        Ok((outcome, proof))
    }

    /// Wait until `block` is finalized on the gateway, fails if another block at the same
    /// height was finalized instead
    async fn await_finality(&self, gateway: &Gateway, block: BlockRef) -> Result<(), RelayError> {
        let ring = EndpointRing::new(&gateway.id, gateway.endpoints.clone())?;
        let chain = &self.services.chain;
        let gateway_id = &gateway.id;
        let target = ChainTarget::Gateway(gateway.id.clone());

        for _ in 0..MAX_FINALITY_RESUBSCRIPTIONS {
            let mut headers = subscribe_with_failover(
                &ring,
                self.config.connectivity_backoff(),
                "Finalized header subscription",
                |endpoint| async move {
                    chain.subscribe_finalized_headers(gateway_id, &endpoint).await
                },
            )
            .await?;
            while let Some((header, _)) = headers.next().await {
                if header.number < block.number {
                    continue;
                }
                let finalized = self.ancestor_hash(&target, header, block.number).await?;
                return if finalized == block.hash {
                    Ok(())
                } else {
                    Err(RelayError::SubmissionRejected(format!(
                        "block {block} was not finalized"
                    )))
                };
            }
            let next = ring.rotate();
            warn!(
                "Finalized header subscription of gateway {} dropped while awaiting {}, retrying via {}",
                gateway.id, block, next
            );
        }
        Err(RelayError::Connectivity(format!(
            "cannot observe finality of block {block} on gateway {}",
            gateway.id
        )))
    }

    /// Hash of the ancestor of `header` at height `number`
    async fn ancestor_hash(
        &self,
        target: &ChainTarget,
        mut header: Header,
        number: BlockNumber,
    ) -> Result<BlockHash, RelayError> {
        let chain = &self.services.chain;
        while header.number > number {
            let hash = header.parent_hash;
            let parent = retry_transient(
                self.config.connectivity_backoff(),
                "Header fetch",
                || async move { chain.get_header(target, &hash).await },
            )
            .await?;
            if parent.number.checked_add(1) != Some(header.number) {
                return Err(RelayError::NotFound(format!(
                    "parent of #{} on {}",
                    header.number, target
                )));
            }
            header = parent;
        }
        Ok(header.hash)
    }
}

async fn drain(tasks: &mut JoinSet<Result<(), RelayError>>) {
    while tasks.join_next().await.is_some() {}
}

async fn wait_not_operational(rx_state: &mut watch::Receiver<GatewayState>) -> GatewayState {
    loop {
        let state = *rx_state.borrow_and_update();
        if state != GatewayState::Operational {
            return state;
        }
        if rx_state.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use circuit_relay_primitives::{
        Address, GatewayId, SideEffectAction, SideEffectStatus,
    };

    use super::*;

    fn record(seed: &[u8], status: SideEffectStatus) -> SideEffectRecord {
        let mut record = SideEffectStateManager::new(SideEffect {
            id: SideEffectId::digest(seed),
            gateway_id: GatewayId::from("pdot"),
            action: SideEffectAction::Transfer {
                to: Address([9u8; 32]),
                amount: 1,
            },
        })
        .record();
        record.status = status;
        record
    }

    #[test]
    fn test_oldest_terminal_records_are_evicted() {
        let mut records = Records::new(2);
        for seed in [b"a", b"b", b"c"] {
            records.insert_new(record(seed, SideEffectStatus::Pending)).unwrap();
        }
        records.update(record(b"a", SideEffectStatus::Failed));
        records.update(record(b"b", SideEffectStatus::Confirmed));
        // Repeated terminal updates do not count twice
        records.update(record(b"a", SideEffectStatus::Failed));
        assert_eq!(records.live.len(), 3);

        records.update(record(b"c", SideEffectStatus::Failed));
        assert_eq!(records.live.len(), 2);
        assert!(!records.live.contains_key(&SideEffectId::digest(b"a")));

        // A late update of an evicted record does not bring it back
        records.update(record(b"a", SideEffectStatus::Failed));
        assert_eq!(records.live.len(), 2);
    }

    #[test]
    fn test_evicted_id_is_still_a_duplicate() {
        let mut records = Records::new(0);
        records.insert_new(record(b"a", SideEffectStatus::Pending)).unwrap();
        records.update(record(b"a", SideEffectStatus::Failed));
        assert!(records.live.is_empty());

        assert_eq!(
            records.insert_new(record(b"a", SideEffectStatus::Pending)),
            Err(RelayError::DuplicateSideEffect(SideEffectId::digest(b"a")))
        );
        records.insert_new(record(b"b", SideEffectStatus::Pending)).unwrap();
        assert_eq!(records.live.len(), 1);
    }
}
