//! Counter-call submission and outcome classification
//!
//! Exactly-once behavior rests on three layers: the processed set (fast
//! path), the destination contract's own duplicate guard (authoritative),
//! and the watcher's hold-the-range rule for anything unresolved.

use crate::api::TransferIndex;
use crate::chain::ChainClient;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BridgeCall, TransferEvent};
use crate::state::ProgressStore;

use ethers::types::H256;
use std::sync::Arc;
use tracing::{debug, info};

/// Terminal classification of one submission attempt.
///
/// Transient infrastructure trouble is deliberately *not* representable
/// here; it propagates as an error so the watcher retries the whole range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The counter-call landed with a successful receipt.
    Success { dest_tx_hash: H256 },
    /// The destination already knows this id; an idempotent no-op.
    AlreadyProcessed,
    /// The relayer's destination account cannot pay for gas.
    Underfunded,
    /// Anything else; the event stays unresolved and its range is held.
    Unresolved { reason: String },
}

impl SubmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Success { .. } => "success",
            SubmissionOutcome::AlreadyProcessed => "already_processed",
            SubmissionOutcome::Underfunded => "underfunded",
            SubmissionOutcome::Unresolved { .. } => "unresolved",
        }
    }
}

/// How a submission-path error should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Duplicate,
    Underfunded,
    Transient,
    Other,
}

/// Map a submission error onto the outcome taxonomy. Node revert reasons
/// only reach us as message text, so this is the one place that inspects it.
fn classify_failure(err: &RelayerError) -> FailureKind {
    let message = match err {
        RelayerError::Rpc { message, .. } => message.to_lowercase(),
        _ if err.is_retryable() => return FailureKind::Transient,
        _ => return FailureKind::Other,
    };

    if message.contains("already processed")
        || message.contains("already executed")
        || message.contains("duplicate")
    {
        FailureKind::Duplicate
    } else if message.contains("insufficient funds") || message.contains("insufficient balance") {
        FailureKind::Underfunded
    } else if message.contains("revert") {
        FailureKind::Other
    } else {
        FailureKind::Transient
    }
}

pub struct SubmissionExecutor {
    destination: Arc<dyn ChainClient>,
    store: Arc<dyn ProgressStore>,
    transfers: Arc<TransferIndex>,
}

impl SubmissionExecutor {
    pub fn new(
        destination: Arc<dyn ChainClient>,
        store: Arc<dyn ProgressStore>,
        transfers: Arc<TransferIndex>,
    ) -> Self {
        Self {
            destination,
            store,
            transfers,
        }
    }

    /// Perform the counter-action for a verified event, at most once.
    pub async fn execute(&self, event: &TransferEvent) -> RelayerResult<SubmissionOutcome> {
        if self.store.is_processed(event.direction, event.event_id).await {
            debug!(event_id = %event.id_hex(), "Already in processed set");
            return Ok(SubmissionOutcome::AlreadyProcessed);
        }

        // Optional on-chain pre-check; saves the gas of a doomed submission
        // but is never required for correctness.
        match self.destination.is_processed(event.event_id).await {
            Ok(true) => {
                info!(
                    event_id = %event.id_hex(),
                    "Destination contract already processed this id"
                );
                self.finish(event, None).await?;
                return Ok(SubmissionOutcome::AlreadyProcessed);
            }
            Ok(false) => {}
            Err(e) => debug!(event_id = %event.id_hex(), "Duplicate pre-check unavailable: {}", e),
        }

        let call = BridgeCall::for_event(event);
        let tx_hash = match self.destination.submit(call).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return self.classify_submit_error(event, e).await,
        };

        // A receipt-wait timeout propagates as retryable: on the rescan the
        // contract's duplicate guard turns a landed-but-unseen transaction
        // into AlreadyProcessed.
        let receipt = self.destination.wait_receipt(tx_hash).await?;

        if receipt.status == Some(1.into()) {
            self.finish(event, Some(tx_hash)).await?;
            return Ok(SubmissionOutcome::Success {
                dest_tx_hash: tx_hash,
            });
        }

        // Reverted on-chain. If the contract now reports the id as
        // processed, a competing submission won; that is still success.
        if let Ok(true) = self.destination.is_processed(event.event_id).await {
            self.finish(event, Some(tx_hash)).await?;
            return Ok(SubmissionOutcome::AlreadyProcessed);
        }

        Ok(SubmissionOutcome::Unresolved {
            reason: format!("destination transaction {:?} reverted", tx_hash),
        })
    }

    async fn classify_submit_error(
        &self,
        event: &TransferEvent,
        err: RelayerError,
    ) -> RelayerResult<SubmissionOutcome> {
        match classify_failure(&err) {
            FailureKind::Duplicate => {
                info!(
                    event_id = %event.id_hex(),
                    "Destination rejected duplicate id: {}",
                    err
                );
                self.finish(event, None).await?;
                Ok(SubmissionOutcome::AlreadyProcessed)
            }
            FailureKind::Underfunded => Ok(SubmissionOutcome::Underfunded),
            FailureKind::Transient => Err(err),
            FailureKind::Other => Ok(SubmissionOutcome::Unresolved {
                reason: err.to_string(),
            }),
        }
    }

    /// Terminal success: persist the id, then index the tx-hash pair.
    async fn finish(&self, event: &TransferEvent, dest_tx_hash: Option<H256>) -> RelayerResult<()> {
        self.store
            .record_processed(event.direction, event.event_id)
            .await?;
        self.transfers.record(event, dest_tx_hash);
        Ok(())
    }
}
