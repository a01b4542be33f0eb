//! Durable relay progress: watermarks and processed-event sets
//!
//! Both watchers depend on one [`ProgressStore`]; every mutation is a single
//! atomic read-modify-persist so a crash between a submission outcome and a
//! watermark advance can never leave the two halves inconsistent.

pub mod store;

pub use store::FileProgressStore;

use crate::error::RelayerResult;
use crate::events::Direction;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Crash-safe record of relay progress, shared by both directions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Highest source block fully scanned and resolved for a direction, or
    /// `None` before the first scan.
    async fn watermark(&self, direction: Direction) -> Option<u64>;

    /// Move a direction's watermark forward. Regressions are ignored: the
    /// watermark is monotonically non-decreasing.
    async fn advance_watermark(&self, direction: Direction, block: u64) -> RelayerResult<()>;

    /// Fast-path membership test for the processed set.
    async fn is_processed(&self, direction: Direction, event_id: U256) -> bool;

    /// Add an event id to the processed set and persist. Idempotent.
    async fn record_processed(&self, direction: Direction, event_id: U256) -> RelayerResult<()>;

    /// Snapshot for the status API.
    async fn stats(&self) -> StoreStats;
}

/// Persisted state layout.
///
/// One JSON document holding both watermarks and both processed sets; it is
/// always rewritten whole, via a temp file and rename, so a crash mid-write
/// leaves the previous document intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Watermark for the deposit direction (origin chain blocks).
    pub last_origin_block: Option<u64>,
    /// Watermark for the burn direction (remote chain blocks).
    pub last_remote_block: Option<u64>,
    pub processed_deposit_ids: Vec<String>,
    pub processed_burn_ids: Vec<String>,
    pub saved_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of the store for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub last_origin_block: Option<u64>,
    pub last_remote_block: Option<u64>,
    pub processed_deposits: usize,
    pub processed_burns: usize,
    pub saved_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}
