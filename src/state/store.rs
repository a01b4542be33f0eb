//! File-backed progress store with atomic rewrites

use crate::error::RelayerResult;
use crate::events::{event_id_hex, Direction};

use super::{ProgressStore, RunState, StoreStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-direction slice of the run state.
struct DirectionState {
    watermark: Option<u64>,
    /// Insertion-ordered ids, oldest first, for retention eviction.
    order: VecDeque<String>,
    index: HashSet<String>,
}

impl DirectionState {
    fn from_ids(watermark: Option<u64>, ids: Vec<String>) -> Self {
        let index = ids.iter().cloned().collect();
        Self {
            watermark,
            order: ids.into(),
            index,
        }
    }
}

struct Inner {
    deposit: DirectionState,
    burn: DirectionState,
    saved_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

impl Inner {
    fn direction(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Deposit => &mut self.deposit,
            Direction::Burn => &mut self.burn,
        }
    }

    fn to_run_state(&self) -> RunState {
        RunState {
            last_origin_block: self.deposit.watermark,
            last_remote_block: self.burn.watermark,
            processed_deposit_ids: self.deposit.order.iter().cloned().collect(),
            processed_burn_ids: self.burn.order.iter().cloned().collect(),
            saved_at: self.saved_at,
            started_at: self.started_at,
        }
    }
}

/// [`ProgressStore`] persisted to a single JSON file.
///
/// The whole document is rewritten on every mutation via
/// write-temp-then-rename, so readers (and the next process) only ever see a
/// complete document. The processed sets are a bounded fast path; the
/// destination contracts remain the ultimate duplicate guard once old ids
/// are evicted.
pub struct FileProgressStore {
    path: PathBuf,
    retention: usize,
    inner: Mutex<Inner>,
}

impl FileProgressStore {
    /// Open the store at `path`, loading prior state if the file exists.
    ///
    /// An unreadable or undecodable file is a startup error, not a fresh
    /// start: silently reinitializing would reset the watermarks and rescan
    /// from the configured start blocks.
    pub fn load(path: impl AsRef<Path>, retention: usize) -> RelayerResult<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let state: RunState = serde_json::from_str(&raw)?;
            info!(
                path = %path.display(),
                deposits = state.processed_deposit_ids.len(),
                burns = state.processed_burn_ids.len(),
                last_origin_block = ?state.last_origin_block,
                last_remote_block = ?state.last_remote_block,
                "Loaded relay state"
            );
            Inner {
                deposit: DirectionState::from_ids(
                    state.last_origin_block,
                    state.processed_deposit_ids,
                ),
                burn: DirectionState::from_ids(state.last_remote_block, state.processed_burn_ids),
                saved_at: state.saved_at,
                started_at: state.started_at,
            }
        } else {
            info!(path = %path.display(), "No prior relay state, starting fresh");
            Inner {
                deposit: DirectionState::from_ids(None, Vec::new()),
                burn: DirectionState::from_ids(None, Vec::new()),
                saved_at: None,
                started_at: Utc::now(),
            }
        };

        Ok(Self {
            path,
            retention,
            inner: Mutex::new(inner),
        })
    }

    /// Serialize the full document and swap it into place atomically.
    async fn persist(&self, inner: &mut Inner) -> RelayerResult<()> {
        inner.saved_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&inner.to_run_state())?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn watermark(&self, direction: Direction) -> Option<u64> {
        let mut inner = self.inner.lock().await;
        inner.direction(direction).watermark
    }

    async fn advance_watermark(&self, direction: Direction, block: u64) -> RelayerResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.direction(direction);

        if let Some(current) = state.watermark {
            if block <= current {
                if block < current {
                    warn!(
                        %direction,
                        current,
                        requested = block,
                        "Ignoring watermark regression"
                    );
                }
                return Ok(());
            }
        }

        state.watermark = Some(block);
        self.persist(&mut inner).await?;
        debug!(%direction, block, "Watermark advanced");
        Ok(())
    }

    async fn is_processed(&self, direction: Direction, event_id: U256) -> bool {
        let mut inner = self.inner.lock().await;
        inner
            .direction(direction)
            .index
            .contains(&event_id_hex(event_id))
    }

    async fn record_processed(&self, direction: Direction, event_id: U256) -> RelayerResult<()> {
        let id = event_id_hex(event_id);
        let mut inner = self.inner.lock().await;
        let state = inner.direction(direction);

        if !state.index.insert(id.clone()) {
            return Ok(());
        }
        state.order.push_back(id);

        while state.order.len() > self.retention {
            if let Some(evicted) = state.order.pop_front() {
                state.index.remove(&evicted);
            }
        }

        self.persist(&mut inner).await?;
        debug!(%direction, event_id = %event_id_hex(event_id), "Recorded processed event");
        Ok(())
    }

    async fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().await;
        StoreStats {
            last_origin_block: inner.deposit.watermark,
            last_remote_block: inner.burn.watermark,
            processed_deposits: inner.deposit.order.len(),
            processed_burns: inner.burn.order.len(),
            saved_at: inner.saved_at,
            started_at: inner.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_at(dir: &tempfile::TempDir, retention: usize) -> FileProgressStore {
        FileProgressStore::load(dir.path().join("relayer-state.json"), retention).unwrap()
    }

    #[tokio::test]
    async fn fresh_store_is_empty() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir, 100);

        assert_eq!(store.watermark(Direction::Deposit).await, None);
        assert_eq!(store.watermark(Direction::Burn).await, None);
        assert!(!store.is_processed(Direction::Deposit, U256::one()).await);
    }

    #[tokio::test]
    async fn survives_restart() {
        let dir = tempdir().unwrap();
        {
            let store = store_at(&dir, 100);
            store
                .advance_watermark(Direction::Deposit, 42)
                .await
                .unwrap();
            store
                .record_processed(Direction::Deposit, U256::from(7u64))
                .await
                .unwrap();
            store
                .record_processed(Direction::Burn, U256::from(9u64))
                .await
                .unwrap();
        }

        let reopened = store_at(&dir, 100);
        assert_eq!(reopened.watermark(Direction::Deposit).await, Some(42));
        assert!(reopened.is_processed(Direction::Deposit, U256::from(7u64)).await);
        assert!(reopened.is_processed(Direction::Burn, U256::from(9u64)).await);
        // Sets are per direction.
        assert!(!reopened.is_processed(Direction::Burn, U256::from(7u64)).await);
    }

    #[tokio::test]
    async fn watermark_never_regresses() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir, 100);

        store
            .advance_watermark(Direction::Burn, 10)
            .await
            .unwrap();
        store.advance_watermark(Direction::Burn, 5).await.unwrap();

        assert_eq!(store.watermark(Direction::Burn).await, Some(10));
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir, 100);

        store
            .record_processed(Direction::Deposit, U256::one())
            .await
            .unwrap();
        store
            .record_processed(Direction::Deposit, U256::one())
            .await
            .unwrap();

        assert_eq!(store.stats().await.processed_deposits, 1);
    }

    #[tokio::test]
    async fn retention_evicts_oldest() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir, 3);

        for i in 1..=4u64 {
            store
                .record_processed(Direction::Deposit, U256::from(i))
                .await
                .unwrap();
        }

        assert!(!store.is_processed(Direction::Deposit, U256::from(1u64)).await);
        assert!(store.is_processed(Direction::Deposit, U256::from(4u64)).await);
        assert_eq!(store.stats().await.processed_deposits, 3);
    }

    #[tokio::test]
    async fn persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir, 100);
        store
            .record_processed(Direction::Deposit, U256::one())
            .await
            .unwrap();

        assert!(dir.path().join("relayer-state.json").exists());
        assert!(!dir.path().join("relayer-state.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_state_file_fails_startup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relayer-state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(FileProgressStore::load(&path, 100).is_err());
    }
}
