//! Per-gateway finality relay loop.

use std::{collections::VecDeque, sync::Arc};

use backoff::backoff::Backoff;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

use circuit_relay_client::{
    retry::retry_transient, ChainClient, ClientError, FinalizedHeader, Subscription,
};
use circuit_relay_primitives::{
    call::SubmitFinalityProof, BlockNumber, BlockRef, ChainTarget, GatewayId, GatewayState,
    Header, HeaderRange, Justification,
};

use crate::{
    config::RelayConfig,
    endpoints::{subscribe_with_failover, EndpointRing},
    error::RelayError,
    finality::range::{PushOutcome, RangeAccumulator},
    registry::GatewayRegistry,
    retry::CappedExponential,
    submitter::TransactionSubmitter,
};

/// Relays finality proofs of a single gateway while it is operational
pub struct FinalityRelay {
    gateway_id: GatewayId,
    config: RelayConfig,
    chain: Arc<dyn ChainClient>,
    registry: Arc<GatewayRegistry>,
    submitter: Arc<TransactionSubmitter>,
    rx_shutdown: broadcast::Receiver<()>,
}

/// Why the relay stopped forwarding ranges
enum Halt {
    Shutdown,
    NotOperational,
}

struct Streams {
    headers: Subscription<FinalizedHeader>,
    justifications: Subscription<Justification>,
}

impl Streams {
    fn unsubscribe(self) {
        self.headers.unsubscribe();
        self.justifications.unsubscribe();
    }
}

/// Submission task that is cancelled together with its owner
struct InFlight(JoinHandle<Result<BlockRef, RelayError>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl FinalityRelay {
    pub fn new(
        gateway_id: GatewayId,
        config: RelayConfig,
        chain: Arc<dyn ChainClient>,
        registry: Arc<GatewayRegistry>,
        submitter: Arc<TransactionSubmitter>,
        rx_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            gateway_id,
            config,
            chain,
            registry,
            submitter,
            rx_shutdown,
        }
    }

    pub fn gateway_id(&self) -> &GatewayId {
        &self.gateway_id
    }

    async fn run_inner(&mut self) -> Result<(), anyhow::Error> {
        info!("Finality relay for gateway {} started", self.gateway_id);
        let mut rx_state = self.registry.watch_state(&self.gateway_id)?;

        loop {
            if !self.wait_operational(&mut rx_state).await {
                return Ok(());
            }
            match self.relay(&mut rx_state).await? {
                Halt::Shutdown => return Ok(()),
                Halt::NotOperational => {
                    info!(
                        "Finality relay for gateway {} paused until re-activation",
                        self.gateway_id
                    );
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("Finality relay for gateway {} exited: {}", self.gateway_id, err);
                Err(())
            }
            Ok(()) => {
                info!("Finality relay for gateway {} terminated", self.gateway_id);
                Ok(())
            }
        }
    }

    /// Returns `false` if the relay should exit instead
    async fn wait_operational(&mut self, rx_state: &mut watch::Receiver<GatewayState>) -> bool {
        loop {
            if *rx_state.borrow_and_update() == GatewayState::Operational {
                return true;
            }
            tokio::select! {
                res = rx_state.changed() => {
                    if res.is_err() {
                        return false;
                    }
                },
                _ = self.rx_shutdown.recv() => return false,
            }
        }
    }

    /// Forward ranges until the gateway leaves `Operational` or shutdown is requested
    async fn relay(
        &mut self,
        rx_state: &mut watch::Receiver<GatewayState>,
    ) -> Result<Halt, RelayError> {
        let gateway = self.registry.get(&self.gateway_id)?;
        let ring = EndpointRing::new(&gateway.id, gateway.endpoints.clone())?;
        let tip = match self.reconcile_tip(gateway.last_relayed_block).await {
            Ok(tip) => tip,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => return self.suspend(&format!("cannot reconcile relayed block: {err}")).await,
        };
        let mut acc = RangeAccumulator::new(
            gateway.id.clone(),
            self.config.effective_batch_size(),
            self.config.range_interval,
            tip,
        );
        let mut last_scheduled = tip.map(|tip| tip.number);
        let mut queue: VecDeque<HeaderRange> = VecDeque::new();
        let mut in_flight: Option<InFlight> = None;

        let mut streams = match self.subscribe(&ring).await {
            Ok(streams) => streams,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => return self.suspend(&format!("cannot subscribe: {err}")).await,
        };
        info!(
            "Relaying finality of gateway {} via {} from {}",
            self.gateway_id,
            ring.current(),
            last_scheduled.map_or("genesis".to_string(), |number| format!("#{number}"))
        );

        let halt = loop {
            if in_flight.is_none() {
                if let Some(range) = queue.pop_front() {
                    info!("Submitting finality proof for {}", range);
                    in_flight = Some(InFlight(tokio::spawn(submit_range(
                        self.submitter.clone(),
                        range,
                        self.config.submission_backoff(),
                    ))));
                }
            }
            let deadline = acc.deadline();

            tokio::select! {
                item = streams.headers.next() => match item {
                    Some((header, justification)) => {
                        if let Err(err) = self.on_header(&mut acc, header, justification).await {
                            break self.suspend(&format!("cannot follow finalized chain: {err}")).await?;
                        }
                    }
                    None => {
                        warn!("Finalized header subscription of gateway {} dropped", self.gateway_id);
                        match self.resubscribe(&ring, streams).await {
                            Ok(renewed) => streams = renewed,
                            Err(err) => return self.suspend(&format!("cannot resubscribe: {err}")).await,
                        }
                    }
                },
                item = streams.justifications.next() => match item {
                    Some(justification) => {
                        if !acc.add_justification(justification.clone()) {
                            trace!("Ignoring justification for relayed block {}", justification.block);
                        }
                    }
                    None => {
                        warn!("Justification subscription of gateway {} dropped", self.gateway_id);
                        match self.resubscribe(&ring, streams).await {
                            Ok(renewed) => streams = renewed,
                            Err(err) => return self.suspend(&format!("cannot resubscribe: {err}")).await,
                        }
                    }
                },
                res = wait_submission(&mut in_flight) => {
                    in_flight = None;
                    match res {
                        Ok(anchor) => match self.registry.record_relayed(&self.gateway_id, anchor).await {
                            Ok(_) => info!("Gateway {} relayed up to {}", self.gateway_id, anchor),
                            Err(err) => warn!("Failed to record relayed anchor {}: {}", anchor, err),
                        },
                        Err(err) if err.is_fatal() => return Err(err),
                        Err(err) => {
                            break self.suspend(&format!("finality proof retries exhausted: {err}")).await?;
                        }
                    }
                },
                _ = sleep_until_deadline(deadline) => {},
                res = rx_state.changed() => {
                    if res.is_err() || *rx_state.borrow() != GatewayState::Operational {
                        break Halt::NotOperational;
                    }
                },
                _ = self.rx_shutdown.recv() => break Halt::Shutdown,
            }

            let now = Instant::now();
            while let Some(range) = acc.take_ready(now)? {
                let anchor = range.anchor().number;
                if last_scheduled.map_or(false, |last| anchor <= last) {
                    debug!("Dropping range {} at or below the last scheduled anchor", range);
                    continue;
                }
                last_scheduled = Some(anchor);
                queue.push_back(range);
            }
        };

        if !queue.is_empty() || in_flight.is_some() {
            warn!(
                "Abandoning {} pending range(s) of gateway {}",
                queue.len() + usize::from(in_flight.is_some()),
                self.gateway_id
            );
        }
        streams.unsubscribe();
        Ok(halt)
    }

    async fn suspend(&self, reason: &str) -> Result<Halt, RelayError> {
        error!(
            "ALERT: suspending gateway {}, operator action required: {}",
            self.gateway_id, reason
        );
        self.registry.suspend(&self.gateway_id, reason).await?;
        Ok(Halt::NotOperational)
    }

    /// Starting point of the relay: the local record, moved forward to the orchestrator's
    /// best anchor when a proof was imported without being recorded locally
    async fn reconcile_tip(&self, local: Option<BlockRef>) -> Result<Option<BlockRef>, RelayError> {
        let chain = &self.chain;
        let gateway_id = &self.gateway_id;
        let best = retry_transient(
            self.config.connectivity_backoff(),
            "Best relayed block",
            || async move { chain.best_relayed_block(gateway_id).await },
        )
        .await?;
        match (local, best) {
            (Some(local), Some(best)) if best.number <= local.number => Ok(Some(local)),
            (local, Some(best)) => {
                warn!(
                    "Gateway {} is relayed up to {} on the orchestrator, local record was {}",
                    self.gateway_id,
                    best,
                    local.map_or("empty".to_string(), |local| local.to_string())
                );
                self.registry.record_relayed(gateway_id, best).await?;
                Ok(Some(best))
            }
            (local, None) => Ok(local),
        }
    }

    async fn subscribe(&self, ring: &EndpointRing) -> Result<Streams, RelayError> {
        let chain = &self.chain;
        let gateway_id = &self.gateway_id;
        subscribe_with_failover(
            ring,
            self.config.connectivity_backoff(),
            "Gateway subscription",
            |endpoint| async move {
                let headers = chain
                    .subscribe_finalized_headers(gateway_id, &endpoint)
                    .await?;
                let justifications = chain.subscribe_justifications(gateway_id, &endpoint).await?;
                Ok::<_, ClientError>(Streams {
                    headers,
                    justifications,
                })
            },
        )
        .await
    }

    async fn resubscribe(&self, ring: &EndpointRing, stale: Streams) -> Result<Streams, RelayError> {
        stale.unsubscribe();
        let endpoint = ring.rotate();
        info!("Resubscribing to gateway {} via {}", self.gateway_id, endpoint);
        self.subscribe(ring).await
    }

    async fn on_header(
        &self,
        acc: &mut RangeAccumulator,
        header: Header,
        justification: Option<Justification>,
    ) -> Result<(), RelayError> {
        let now = Instant::now();
        match acc.push(header.clone(), now) {
            PushOutcome::Appended => trace!("Gateway {} header #{}", self.gateway_id, header.number),
            PushOutcome::Stale => {
                debug!("Ignoring stale header #{} of gateway {}", header.number, self.gateway_id)
            }
            PushOutcome::Gap { tip } => {
                warn!(
                    "Header #{} of gateway {} does not extend {}, fetching missing headers",
                    header.number, self.gateway_id, tip
                );
                match self.fetch_missing(tip, &header).await {
                    Ok(missing) => {
                        info!("Recovered {} missing header(s) of gateway {}", missing.len(), self.gateway_id);
                        acc.fill_gap(missing, now)?;
                    }
                    Err(err) => return Err(err),
                }
                acc.push(header, now);
            }
        }
        if let Some(justification) = justification {
            acc.add_justification(justification);
        }
        Ok(())
    }

    /// Headers strictly between `tip` and `header`, oldest first
    async fn fetch_missing(&self, tip: BlockRef, header: &Header) -> Result<Vec<Header>, RelayError> {
        let target = ChainTarget::Gateway(self.gateway_id.clone());
        let chain = &self.chain;
        let target = &target;
        let diverged = || RelayError::ChainDiverged {
            gateway_id: self.gateway_id.clone(),
            tip,
        };

        let mut missing = Vec::new();
        let mut cursor = header.parent_hash;
        let mut number: BlockNumber = header.number.saturating_sub(1);
        while number > tip.number {
            let hash = cursor;
            let parent = retry_transient(
                self.config.connectivity_backoff(),
                "Header fetch",
                || async move { chain.get_header(target, &hash).await },
            )
            .await?;
            if parent.number != number || parent.hash != hash {
                return Err(diverged());
            }
            cursor = parent.parent_hash;
            missing.push(parent);
            number -= 1;
        }
        if cursor != tip.hash {
            return Err(diverged());
        }
        missing.reverse();
        Ok(missing)
    }
}

/// Submit a range, retrying rejections with capped exponential backoff
async fn submit_range(
    submitter: Arc<TransactionSubmitter>,
    range: HeaderRange,
    mut backoff: CappedExponential,
) -> Result<BlockRef, RelayError> {
    let call = SubmitFinalityProof {
        range: range.clone(),
    }
    .to_call()?;

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match submitter
            .submit_and_wait_finalized(&ChainTarget::Orchestrator, &call)
            .await
        {
            Ok((block, _)) => {
                info!("Finality proof for {} finalized in circuit block {}", range, block);
                return Ok(range.anchor().block_ref());
            }
            Err(err @ (RelayError::SubmissionRejected(_) | RelayError::Connectivity(_))) => err,
            Err(err) => return Err(err),
        };

        match backoff.next_backoff() {
            Some(delay) => {
                warn!(
                    "Finality proof for {} failed (attempt {}), retrying in {:?}: {}",
                    range, attempts, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                error!(
                    "Finality proof for {} failed {} times, giving up: {}",
                    range, attempts, err
                );
                return Err(err);
            }
        }
    }
}

async fn wait_submission(in_flight: &mut Option<InFlight>) -> Result<BlockRef, RelayError> {
    match in_flight {
        Some(InFlight(handle)) => match handle.await {
            Ok(res) => res,
            Err(err) => Err(RelayError::Connectivity(format!("submission task failed: {err}"))),
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
