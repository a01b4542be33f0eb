//! HTTP API for health checks, status, and transfer lookups

use crate::chain::ChainClient;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{event_id_hex, TransferEvent};
use crate::metrics;
use crate::state::{ProgressStore, StoreStats};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::{H256, U256};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// In-memory index of completed transfers, keyed by canonical event id hex.
///
/// Serves the tx-pair lookup endpoint. Rebuildable from chain data, so it is
/// deliberately not persisted.
pub struct TransferIndex {
    records: DashMap<String, TransferRecord>,
}

impl TransferIndex {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn record(&self, event: &TransferEvent, dest_tx_hash: Option<H256>) {
        self.records.insert(
            event.id_hex(),
            TransferRecord {
                direction: event.direction.label().to_string(),
                source_tx_hash: format!("{:?}", event.source_tx_hash),
                dest_tx_hash: dest_tx_hash.map(|h| format!("{:?}", h)),
                recipient: format!("{:?}", event.destination),
                amount: event.amount.to_string(),
                completed_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, event_id: &str) -> Option<TransferRecord> {
        self.records.get(event_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl Default for TransferIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// A completed transfer's tx-hash pair plus context.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub direction: String,
    pub source_tx_hash: String,
    /// Absent when the destination contract had already processed the id
    /// before this relayer submitted anything.
    pub dest_tx_hash: Option<String>,
    pub recipient: String,
    pub amount: String,
    pub completed_at: DateTime<Utc>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
    pub transfers: Arc<TransferIndex>,
    pub chains: Vec<(String, Arc<dyn ChainClient>)>,
    pub process_started: DateTime<Utc>,
}

/// Run the HTTP API server
pub async fn run_server(host: &str, port: u16, state: AppState) -> RelayerResult<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/transfers/:event_id", get(get_transfer))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await.map_err(RelayerError::State)?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - both chains must be reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut details = Vec::new();
    for (name, client) in &state.chains {
        let healthy = client.current_height().await.is_ok();
        metrics::record_chain_health(name, healthy);
        details.push(ChainHealth {
            chain: name.clone(),
            healthy,
        });
    }

    let ready = details.iter().all(|c| c.healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, details }))
}

/// Relayer status: watermarks, processed counts, uptime
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.store.stats().await;
    let uptime_seconds = (Utc::now() - state.process_started).num_seconds().max(0) as u64;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        transfers_indexed: state.transfers.len(),
        state: stats,
    })
}

/// Look up the tx-hash pair for a known event id
async fn get_transfer(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> impl IntoResponse {
    let canonical = match parse_event_id(&event_id) {
        Some(id) => event_id_hex(id),
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "invalid event id" })),
            )
                .into_response();
        }
    };

    match state.transfers.get(&canonical) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown event id" })),
        )
            .into_response(),
    }
}

/// Accepts both 0x-hex and decimal renderings of an event id.
fn parse_event_id(raw: &str) -> Option<U256> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).ok()
    } else {
        U256::from_dec_str(raw).ok()
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: String,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    transfers_indexed: usize,
    state: StoreStats,
}
