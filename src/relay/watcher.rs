//! Per-direction chain watcher
//!
//! Drives one direction's discovery-to-completion pipeline forever: poll the
//! source head, scan a small bounded block range, push every candidate
//! through verification and submission, and advance the watermark only when
//! the whole range has resolved.

use crate::chain::ChainClient;
use crate::error::RelayerResult;
use crate::events::Direction;
use crate::metrics;
use crate::state::ProgressStore;

use super::executor::{SubmissionExecutor, SubmissionOutcome};
use super::verifier::{EventVerifier, Verdict};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Upper bound on blocks per scan, shrinking as the lag grows. Scanning
/// *small* ranges even when far behind trades catch-up latency for staying
/// under RPC result-size and rate limits.
pub(crate) fn scan_span(lag: u64) -> u64 {
    if lag > 1_000 {
        3
    } else if lag > 100 {
        8
    } else {
        20
    }
}

/// Sleep schedule between watcher iterations.
#[derive(Debug, Clone)]
pub struct WatcherTiming {
    /// While caught up with the head.
    pub poll_interval: Duration,
    /// After every scan, regardless of outcome.
    pub scan_delay: Duration,
    /// After a rate limit or timeout, before retrying the same range.
    pub rate_limit_backoff: Duration,
}

/// Result of a single scan iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// Watermark equals the chain head; nothing to do.
    CaughtUp,
    /// Range fully resolved; watermark advanced to `to_block`.
    Advanced {
        from_block: u64,
        to_block: u64,
        candidates: usize,
    },
    /// An event in the range finished underfunded or unresolved; the
    /// watermark stays put and the same range is rescanned later.
    Held { from_block: u64, to_block: u64 },
}

pub struct ChainWatcher {
    direction: Direction,
    source: Arc<dyn ChainClient>,
    verifier: EventVerifier,
    executor: SubmissionExecutor,
    store: Arc<dyn ProgressStore>,
    /// First block to scan when no watermark has been persisted yet;
    /// absent means "start from the current head".
    start_block: Option<u64>,
    timing: WatcherTiming,
    shutdown: Arc<RwLock<bool>>,
}

impl ChainWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        direction: Direction,
        source: Arc<dyn ChainClient>,
        verifier: EventVerifier,
        executor: SubmissionExecutor,
        store: Arc<dyn ProgressStore>,
        start_block: Option<u64>,
        timing: WatcherTiming,
        shutdown: Arc<RwLock<bool>>,
    ) -> Self {
        Self {
            direction,
            source,
            verifier,
            executor,
            store,
            start_block,
            timing,
            shutdown,
        }
    }

    /// Main watcher loop. Never exits on its own; only the shared stop flag,
    /// observed at the top of each iteration, ends it.
    pub async fn run(&self) {
        info!(direction = %self.direction, "Chain watcher started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            let delay = match self.scan_once().await {
                Ok(Scan::CaughtUp) => self.timing.poll_interval,
                Ok(Scan::Advanced {
                    from_block,
                    to_block,
                    candidates,
                }) => {
                    debug!(
                        direction = %self.direction,
                        from_block,
                        to_block,
                        candidates,
                        "Range resolved"
                    );
                    self.timing.scan_delay
                }
                Ok(Scan::Held {
                    from_block,
                    to_block,
                }) => {
                    warn!(
                        direction = %self.direction,
                        from_block,
                        to_block,
                        "Holding block range with unresolved events; will rescan"
                    );
                    self.timing.scan_delay
                }
                Err(e) if e.is_throttle() => {
                    warn!(
                        direction = %self.direction,
                        "RPC throttled ({}); backing off before retrying the same range",
                        e
                    );
                    metrics::record_watcher_backoff(self.direction);
                    self.timing.rate_limit_backoff
                }
                Err(e) => {
                    error!(
                        direction = %self.direction,
                        "Scan failed ({}); retrying at poll interval",
                        e
                    );
                    self.timing.poll_interval
                }
            };

            tokio::time::sleep(delay).await;
        }

        info!(direction = %self.direction, "Chain watcher stopped");
    }

    /// One scan iteration: at most one block range, every candidate in it
    /// taken to a terminal outcome or the range held.
    pub async fn scan_once(&self) -> RelayerResult<Scan> {
        let head = self.source.current_height().await?;

        let watermark = match self.store.watermark(self.direction).await {
            Some(watermark) => watermark,
            None => {
                // The watermark is the last *scanned* block, so a configured
                // start block means the watermark sits just below it.
                let initial = match self.start_block {
                    Some(start) => start.saturating_sub(1),
                    None => head,
                };
                info!(
                    direction = %self.direction,
                    initial,
                    "No watermark on record; initializing"
                );
                self.store
                    .advance_watermark(self.direction, initial)
                    .await?;
                initial
            }
        };

        if head <= watermark {
            return Ok(Scan::CaughtUp);
        }

        let lag = head - watermark;
        let from_block = watermark + 1;
        let to_block = head.min(watermark + scan_span(lag));

        debug!(
            direction = %self.direction,
            from_block,
            to_block,
            lag,
            "Scanning block range"
        );
        metrics::record_scan(self.direction);

        let candidates = self
            .source
            .fetch_events(self.direction, from_block, to_block)
            .await?;

        let mut unresolved = 0usize;
        for event in &candidates {
            if self.store.is_processed(self.direction, event.event_id).await {
                debug!(event_id = %event.id_hex(), "Already relayed; skipping");
                continue;
            }

            metrics::record_event_observed(self.direction);

            match self.verifier.verify(event).await? {
                Verdict::Dropped(reason) => {
                    warn!(
                        direction = %self.direction,
                        event_id = %event.id_hex(),
                        source_tx = ?event.source_tx_hash,
                        %reason,
                        "Dropping unverifiable event"
                    );
                    metrics::record_event_dropped(self.direction, reason.label());
                    continue;
                }
                Verdict::Verified => metrics::record_event_verified(self.direction),
            }

            let outcome = self.executor.execute(event).await?;
            metrics::record_submission(self.direction, outcome.label());

            match outcome {
                SubmissionOutcome::Success { dest_tx_hash } => {
                    info!(
                        direction = %self.direction,
                        event_id = %event.id_hex(),
                        source_tx = ?event.source_tx_hash,
                        dest_tx = ?dest_tx_hash,
                        amount = %event.amount,
                        recipient = ?event.destination,
                        "Transfer relayed"
                    );
                }
                SubmissionOutcome::AlreadyProcessed => {
                    info!(
                        direction = %self.direction,
                        event_id = %event.id_hex(),
                        "Transfer already completed"
                    );
                }
                SubmissionOutcome::Underfunded => {
                    error!(
                        direction = %self.direction,
                        event_id = %event.id_hex(),
                        source_tx = ?event.source_tx_hash,
                        amount = %event.amount,
                        recipient = ?event.destination,
                        "Relayer account underfunded on destination chain; \
                         operator funding required"
                    );
                    unresolved += 1;
                }
                SubmissionOutcome::Unresolved { reason } => {
                    error!(
                        direction = %self.direction,
                        event_id = %event.id_hex(),
                        source_tx = ?event.source_tx_hash,
                        amount = %event.amount,
                        recipient = ?event.destination,
                        %reason,
                        "Submission unresolved"
                    );
                    unresolved += 1;
                }
            }
        }

        if unresolved > 0 {
            metrics::record_range_held(self.direction);
            return Ok(Scan::Held {
                from_block,
                to_block,
            });
        }

        self.store
            .advance_watermark(self.direction, to_block)
            .await?;
        metrics::record_watermark(self.direction, to_block);

        Ok(Scan::Advanced {
            from_block,
            to_block,
            candidates: candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TransferIndex;
    use crate::chain::MockChainClient;
    use crate::error::RelayerError;
    use crate::events::{parse_log, sample_log, TransferEvent};
    use crate::state::FileProgressStore;
    use ethers::types::{TransactionReceipt, H256, U256};
    use tempfile::tempdir;

    const EVENT_ID: u64 = 0xABC;
    const AMOUNT: u64 = 1_000_000;

    fn deposit_event() -> TransferEvent {
        parse_log(
            Direction::Deposit,
            &sample_log(Direction::Deposit, U256::from(EVENT_ID), U256::from(AMOUNT)),
        )
        .unwrap()
    }

    fn good_receipt() -> TransactionReceipt {
        TransactionReceipt {
            status: Some(1.into()),
            logs: vec![sample_log(
                Direction::Deposit,
                U256::from(EVENT_ID),
                U256::from(AMOUNT),
            )],
            ..Default::default()
        }
    }

    fn timing() -> WatcherTiming {
        WatcherTiming {
            poll_interval: Duration::from_millis(1),
            scan_delay: Duration::from_millis(1),
            rate_limit_backoff: Duration::from_millis(1),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<FileProgressStore>,
        transfers: Arc<TransferIndex>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let store =
                Arc::new(FileProgressStore::load(dir.path().join("state.json"), 100).unwrap());
            Self {
                _dir: dir,
                store,
                transfers: Arc::new(TransferIndex::new()),
            }
        }

        /// Watcher for the deposit direction with six confirmations and a
        /// configured start block of 100.
        fn watcher(
            &self,
            source: MockChainClient,
            destination: MockChainClient,
        ) -> ChainWatcher {
            let source: Arc<dyn ChainClient> = Arc::new(source);
            let verifier = EventVerifier::new(source.clone(), 6, Duration::from_millis(1));
            let executor = SubmissionExecutor::new(
                Arc::new(destination),
                self.store.clone(),
                self.transfers.clone(),
            );
            ChainWatcher::new(
                Direction::Deposit,
                source,
                verifier,
                executor,
                self.store.clone(),
                Some(100),
                timing(),
                Arc::new(RwLock::new(false)),
            )
        }
    }

    /// A source whose head sits at 106 with one deposit at block 100 and a
    /// matching receipt: the canonical happy-path scenario.
    fn healthy_source() -> MockChainClient {
        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(106));
        source
            .expect_fetch_events()
            .withf(|direction, from, to| {
                *direction == Direction::Deposit && *from == 100 && *to == 106
            })
            .returning(|_, _, _| Ok(vec![deposit_event()]));
        source
            .expect_get_receipt()
            .returning(|_| Ok(Some(good_receipt())));
        source
    }

    #[tokio::test]
    async fn relays_deposit_exactly_once() {
        let fixture = Fixture::new();
        let dest_tx = H256::from_low_u64_be(0xBEEF);

        let mut destination = MockChainClient::new();
        destination.expect_is_processed().returning(|_| Ok(false));
        destination
            .expect_submit()
            .times(1)
            .withf(|call| {
                call.amount == U256::from(AMOUNT) && call.event_id == U256::from(EVENT_ID)
            })
            .returning(move |_| Ok(dest_tx));
        destination
            .expect_wait_receipt()
            .returning(|_| {
                Ok(TransactionReceipt {
                    status: Some(1.into()),
                    ..Default::default()
                })
            });

        let watcher = fixture.watcher(healthy_source(), destination);
        let scan = watcher.scan_once().await.unwrap();

        assert_eq!(
            scan,
            Scan::Advanced {
                from_block: 100,
                to_block: 106,
                candidates: 1
            }
        );
        assert!(fixture
            .store
            .is_processed(Direction::Deposit, U256::from(EVENT_ID))
            .await);
        assert_eq!(fixture.store.watermark(Direction::Deposit).await, Some(106));

        let record = fixture
            .transfers
            .get(&deposit_event().id_hex())
            .unwrap();
        assert_eq!(record.dest_tx_hash, Some(format!("{:?}", dest_tx)));
    }

    #[tokio::test]
    async fn replayed_event_is_not_resubmitted() {
        let fixture = Fixture::new();
        fixture
            .store
            .record_processed(Direction::Deposit, U256::from(EVENT_ID))
            .await
            .unwrap();

        // Any destination call would panic: no expectations are set.
        let destination = MockChainClient::new();

        let watcher = fixture.watcher(healthy_source(), destination);
        let scan = watcher.scan_once().await.unwrap();

        assert!(matches!(scan, Scan::Advanced { to_block: 106, .. }));
        assert_eq!(fixture.store.stats().await.processed_deposits, 1);
    }

    #[tokio::test]
    async fn duplicate_rejection_completes_the_range() {
        let fixture = Fixture::new();

        let mut destination = MockChainClient::new();
        destination.expect_is_processed().returning(|_| Ok(false));
        destination.expect_submit().returning(|_| {
            Err(RelayerError::Rpc {
                chain: "remote".to_string(),
                message: "execution reverted: transfer already processed".to_string(),
            })
        });

        let watcher = fixture.watcher(healthy_source(), destination);
        let scan = watcher.scan_once().await.unwrap();

        assert!(matches!(scan, Scan::Advanced { .. }));
        assert!(fixture
            .store
            .is_processed(Direction::Deposit, U256::from(EVENT_ID))
            .await);
    }

    #[tokio::test]
    async fn rate_limited_logs_query_keeps_watermark() {
        let fixture = Fixture::new();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(106));
        source.expect_fetch_events().returning(|_, _, _| {
            Err(RelayerError::RateLimited {
                chain: "origin".to_string(),
            })
        });

        let watcher = fixture.watcher(source, MockChainClient::new());
        let err = watcher.scan_once().await.unwrap_err();

        assert!(err.is_throttle());
        // Watermark was initialized to start_block - 1 and must not move.
        assert_eq!(fixture.store.watermark(Direction::Deposit).await, Some(99));
    }

    #[tokio::test]
    async fn retries_identical_range_after_backoff() {
        let fixture = Fixture::new();
        fixture
            .store
            .advance_watermark(Direction::Deposit, 99)
            .await
            .unwrap();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(106));
        // Both scans must ask for exactly [100, 106].
        source
            .expect_fetch_events()
            .times(2)
            .withf(|_, from, to| *from == 100 && *to == 106)
            .returning({
                let mut first = true;
                move |_, _, _| {
                    if first {
                        first = false;
                        Err(RelayerError::RateLimited {
                            chain: "origin".to_string(),
                        })
                    } else {
                        Ok(vec![])
                    }
                }
            });

        let watcher = fixture.watcher(source, MockChainClient::new());
        assert!(watcher.scan_once().await.is_err());
        let scan = watcher.scan_once().await.unwrap();
        assert!(matches!(scan, Scan::Advanced { to_block: 106, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_reorg_drops_event_without_submission() {
        let fixture = Fixture::new();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(106));
        source
            .expect_fetch_events()
            .returning(|_, _, _| Ok(vec![deposit_event()]));
        // The receipt has vanished: the event must be dropped, not minted.
        source.expect_get_receipt().returning(|_| Ok(None));

        let watcher = fixture.watcher(source, MockChainClient::new());
        let scan = watcher.scan_once().await.unwrap();

        assert!(matches!(scan, Scan::Advanced { .. }));
        assert!(!fixture
            .store
            .is_processed(Direction::Deposit, U256::from(EVENT_ID))
            .await);
    }

    #[tokio::test]
    async fn unresolved_submission_holds_the_range() {
        let fixture = Fixture::new();

        let mut destination = MockChainClient::new();
        destination.expect_is_processed().returning(|_| Ok(false));
        destination.expect_submit().returning(|_| {
            Err(RelayerError::Rpc {
                chain: "remote".to_string(),
                message: "execution reverted: minting paused".to_string(),
            })
        });

        let watcher = fixture.watcher(healthy_source(), destination);
        let scan = watcher.scan_once().await.unwrap();

        assert_eq!(
            scan,
            Scan::Held {
                from_block: 100,
                to_block: 106
            }
        );
        assert_eq!(fixture.store.watermark(Direction::Deposit).await, Some(99));
        assert!(!fixture
            .store
            .is_processed(Direction::Deposit, U256::from(EVENT_ID))
            .await);
    }

    #[tokio::test]
    async fn underfunded_relayer_holds_the_range() {
        let fixture = Fixture::new();

        let mut destination = MockChainClient::new();
        destination.expect_is_processed().returning(|_| Ok(false));
        destination.expect_submit().returning(|_| {
            Err(RelayerError::Rpc {
                chain: "remote".to_string(),
                message: "insufficient funds for gas * price + value".to_string(),
            })
        });

        let watcher = fixture.watcher(healthy_source(), destination);
        let scan = watcher.scan_once().await.unwrap();

        assert!(matches!(scan, Scan::Held { .. }));
        assert_eq!(fixture.store.watermark(Direction::Deposit).await, Some(99));
    }

    #[tokio::test]
    async fn resumes_from_watermark_plus_one() {
        let fixture = Fixture::new();
        fixture
            .store
            .advance_watermark(Direction::Deposit, 42)
            .await
            .unwrap();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(50));
        source
            .expect_fetch_events()
            .times(1)
            .withf(|_, from, to| *from == 43 && *to == 50)
            .returning(|_, _, _| Ok(vec![]));

        let watcher = fixture.watcher(source, MockChainClient::new());
        let scan = watcher.scan_once().await.unwrap();
        assert!(matches!(scan, Scan::Advanced { to_block: 50, .. }));
    }

    #[tokio::test]
    async fn caught_up_when_watermark_equals_head() {
        let fixture = Fixture::new();
        fixture
            .store
            .advance_watermark(Direction::Deposit, 106)
            .await
            .unwrap();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(106));

        let watcher = fixture.watcher(source, MockChainClient::new());
        assert_eq!(watcher.scan_once().await.unwrap(), Scan::CaughtUp);
    }

    #[tokio::test]
    async fn far_behind_watcher_scans_narrow_ranges() {
        let fixture = Fixture::new();
        fixture
            .store
            .advance_watermark(Direction::Deposit, 1_000)
            .await
            .unwrap();

        let mut source = MockChainClient::new();
        source.expect_current_height().returning(|| Ok(10_000));
        source
            .expect_fetch_events()
            .withf(|_, from, to| *from == 1_001 && *to == 1_003)
            .returning(|_, _, _| Ok(vec![]));

        let watcher = fixture.watcher(source, MockChainClient::new());
        let scan = watcher.scan_once().await.unwrap();
        assert!(matches!(scan, Scan::Advanced { to_block: 1_003, .. }));
    }

    #[test]
    fn scan_span_shrinks_with_lag() {
        assert_eq!(scan_span(1), 20);
        assert_eq!(scan_span(100), 20);
        assert_eq!(scan_span(101), 8);
        assert_eq!(scan_span(1_000), 8);
        assert_eq!(scan_span(1_001), 3);
        assert_eq!(scan_span(1_000_000), 3);
    }
}
