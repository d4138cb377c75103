//! HTTP control and status API: gateway lifecycle and side effect submission.

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use circuit_relay_core::{ExecutionClient, GatewayRegistry, RelayError, SideEffectRecord};
use circuit_relay_primitives::{Gateway, GatewayId, SideEffect, SideEffectId};

#[derive(Clone)]
pub struct RpcConfig {
    /// Host and port binding for the RPC server (e.g., "127.0.0.1:5000")
    pub rpc_host: String,
}

#[derive(Clone)]
pub struct AppState {
    registry: Arc<GatewayRegistry>,
    execution: ExecutionClient,
}

impl AppState {
    pub fn new(registry: Arc<GatewayRegistry>, execution: ExecutionClient) -> Self {
        Self {
            registry,
            execution,
        }
    }
}

pub struct RpcServer {
    config: RpcConfig,
    state: AppState,
    rx_shutdown: broadcast::Receiver<()>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gateways", get(list_gateways))
        .route("/gateways/:gateway_id", get(get_gateway))
        .route("/gateways/:gateway_id/activate", post(activate_gateway))
        .route("/side-effects", get(list_side_effects).post(submit_side_effect))
        .route("/side-effects/:id", get(get_side_effect))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

impl RpcServer {
    pub fn new(config: RpcConfig, state: AppState, rx_shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            config,
            state,
            rx_shutdown,
        }
    }

    async fn run_inner(&self) -> Result<(), std::io::Error> {
        info!("Starting RPC server on {}", self.config.rpc_host);

        let app = router(self.state.clone());
        let listener = TcpListener::bind(&self.config.rpc_host).await?;
        let mut rx_shutdown = self.rx_shutdown.resubscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { rx_shutdown.recv().await.unwrap_or_default() })
            .await
    }

    pub async fn run(&self) -> Result<(), ()> {
        match self.run_inner().await {
            Err(err) => {
                error!("RPC server exited: {}", err);
                Err(())
            }
            Ok(()) => {
                info!("RPC server terminated");
                Ok(())
            }
        }
    }
}

fn status_of(err: &RelayError) -> StatusCode {
    match err {
        RelayError::UnknownGateway(_)
        | RelayError::UnknownSideEffect(_)
        | RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::DuplicateGateway(_) | RelayError::DuplicateSideEffect(_) => {
            StatusCode::CONFLICT
        }
        RelayError::ActivationRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(what: &str, err: RelayError) -> StatusCode {
    let status = status_of(&err);
    if status.is_server_error() {
        error!("{} failed: {}", what, err);
    } else {
        warn!("{} refused: {}", what, err);
    }
    status
}

/// All registered gateways, ordered by id
pub async fn list_gateways(State(state): State<AppState>) -> Json<Vec<Gateway>> {
    Json(state.registry.list())
}

pub async fn get_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<GatewayId>,
) -> Result<Json<Gateway>, StatusCode> {
    state
        .registry
        .get(&gateway_id)
        .map(Json)
        .map_err(|err| reject("Gateway lookup", err))
}

/// Ask the orchestrator to mark the gateway operational
///
/// # Returns
/// * `Json<Gateway>` - The gateway in the `operational` state
/// * `StatusCode::UNPROCESSABLE_ENTITY` - If the orchestrator refused the activation
pub async fn activate_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<GatewayId>,
) -> Result<Json<Gateway>, StatusCode> {
    state
        .registry
        .activate(&gateway_id)
        .await
        .map(Json)
        .map_err(|err| reject("Gateway activation", err))
}

/// Hand a side effect over to the execution relay
///
/// # Returns
/// * `(StatusCode::ACCEPTED, Json<SideEffectRecord>)` - The record in the `pending` state
/// * `StatusCode::CONFLICT` - If a side effect with the same id was already submitted
pub async fn submit_side_effect(
    State(state): State<AppState>,
    Json(side_effect): Json<SideEffect>,
) -> Result<(StatusCode, Json<SideEffectRecord>), StatusCode> {
    let record = state
        .execution
        .submit_side_effect(side_effect)
        .await
        .map_err(|err| reject("Side effect submission", err))?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn get_side_effect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SideEffectRecord>, StatusCode> {
    let id = SideEffectId::from_str(&id).map_err(|_| StatusCode::BAD_REQUEST)?;
    state
        .execution
        .get_side_effect(id)
        .await
        .map(Json)
        .map_err(|err| reject("Side effect lookup", err))
}

pub async fn list_side_effects(
    State(state): State<AppState>,
) -> Result<Json<Vec<SideEffectRecord>>, StatusCode> {
    state
        .execution
        .list_side_effects()
        .await
        .map(Json)
        .map_err(|err| reject("Side effect listing", err))
}
