//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Relay pipeline progress (observed / verified / dropped / submitted)
//! - Per-direction watermarks and held ranges
//! - Chain connectivity

use crate::error::RelayerResult;
use crate::events::Direction;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Pipeline metrics
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "trestle_events_observed_total",
        "Candidate transfer events observed in scanned ranges",
        &["direction"]
    )
    .unwrap();

    pub static ref EVENTS_VERIFIED: CounterVec = register_counter_vec!(
        "trestle_events_verified_total",
        "Events that passed receipt re-verification",
        &["direction"]
    )
    .unwrap();

    pub static ref EVENTS_DROPPED: CounterVec = register_counter_vec!(
        "trestle_events_dropped_total",
        "Events dropped during verification, by reason",
        &["direction", "reason"]
    )
    .unwrap();

    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "trestle_submissions_total",
        "Submission outcomes, by classification",
        &["direction", "outcome"]
    )
    .unwrap();

    // Watcher metrics
    pub static ref SCANS: CounterVec = register_counter_vec!(
        "trestle_scans_total",
        "Block-range scans started",
        &["direction"]
    )
    .unwrap();

    pub static ref WATERMARK: GaugeVec = register_gauge_vec!(
        "trestle_watermark_block",
        "Highest fully-resolved source block per direction",
        &["direction"]
    )
    .unwrap();

    pub static ref RANGES_HELD: CounterVec = register_counter_vec!(
        "trestle_ranges_held_total",
        "Block ranges held back by unresolved submissions",
        &["direction"]
    )
    .unwrap();

    pub static ref WATCHER_BACKOFFS: CounterVec = register_counter_vec!(
        "trestle_watcher_backoffs_total",
        "Rate-limit / timeout backoffs taken by the watchers",
        &["direction"]
    )
    .unwrap();

    // Health metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "trestle_chain_healthy",
        "Chain reachability (1=reachable, 0=unreachable)",
        &["chain"]
    )
    .unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(crate::error::RelayerError::State)?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_event_observed(direction: Direction) {
    EVENTS_OBSERVED.with_label_values(&[direction.label()]).inc();
}

pub fn record_event_verified(direction: Direction) {
    EVENTS_VERIFIED.with_label_values(&[direction.label()]).inc();
}

pub fn record_event_dropped(direction: Direction, reason: &str) {
    EVENTS_DROPPED
        .with_label_values(&[direction.label(), reason])
        .inc();
}

pub fn record_submission(direction: Direction, outcome: &str) {
    SUBMISSIONS
        .with_label_values(&[direction.label(), outcome])
        .inc();
}

pub fn record_scan(direction: Direction) {
    SCANS.with_label_values(&[direction.label()]).inc();
}

pub fn record_watermark(direction: Direction, block: u64) {
    WATERMARK
        .with_label_values(&[direction.label()])
        .set(block as f64);
}

pub fn record_range_held(direction: Direction) {
    RANGES_HELD.with_label_values(&[direction.label()]).inc();
}

pub fn record_watcher_backoff(direction: Direction) {
    WATCHER_BACKOFFS
        .with_label_values(&[direction.label()])
        .inc();
}

pub fn record_chain_health(chain: &str, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[chain])
        .set(if healthy { 1.0 } else { 0.0 });
}
