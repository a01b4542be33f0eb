//! Receipt-based event verification
//!
//! A log returned by a block-range query can originate from an uncled block
//! or a stale RPC node. Nothing is submitted on the strength of such a log
//! alone: after the confirmation gate, the event is re-derived from the
//! transaction's receipt and every field must agree with the observation.

use crate::chain::ChainClient;
use crate::error::RelayerResult;
use crate::events::{self, TransferEvent};

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Attempts to find a receipt after the confirmation gate; a just-confirmed
/// transaction can briefly lag on a stale node.
const RECEIPT_ATTEMPTS: u32 = 3;
const RECEIPT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Outcome of verifying one candidate event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No receipt for the source transaction after the confirmation gate.
    ReceiptMissing,
    /// The source transaction is included but reverted.
    ReceiptFailed,
    /// The receipt's logs contain no event with the observed id.
    EventNotInReceipt,
    /// A re-extracted field disagrees with the observed log.
    FieldMismatch(&'static str),
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::ReceiptMissing => "receipt_missing",
            DropReason::ReceiptFailed => "receipt_failed",
            DropReason::EventNotInReceipt => "event_not_in_receipt",
            DropReason::FieldMismatch(_) => "field_mismatch",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::FieldMismatch(field) => write!(f, "field mismatch: {}", field),
            other => f.write_str(other.label()),
        }
    }
}

pub struct EventVerifier {
    source: Arc<dyn ChainClient>,
    required_confirmations: u64,
    poll_interval: Duration,
}

impl EventVerifier {
    pub fn new(
        source: Arc<dyn ChainClient>,
        required_confirmations: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            required_confirmations,
            poll_interval,
        }
    }

    /// Run the five-step verification contract for one observed event.
    pub async fn verify(&self, observed: &TransferEvent) -> RelayerResult<Verdict> {
        self.wait_for_confirmations(observed).await?;

        let receipt = match self.fetch_receipt(observed.source_tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(Verdict::Dropped(DropReason::ReceiptMissing)),
        };

        if receipt.status != Some(1.into()) {
            return Ok(Verdict::Dropped(DropReason::ReceiptFailed));
        }

        let confirmed = receipt
            .logs
            .iter()
            .filter_map(|log| events::parse_log(observed.direction, log).ok())
            .find(|event| event.event_id == observed.event_id);

        let confirmed = match confirmed {
            Some(confirmed) => confirmed,
            None => return Ok(Verdict::Dropped(DropReason::EventNotInReceipt)),
        };

        if let Some(field) = mismatched_field(observed, &confirmed) {
            return Ok(Verdict::Dropped(DropReason::FieldMismatch(field)));
        }

        Ok(Verdict::Verified)
    }

    async fn wait_for_confirmations(&self, observed: &TransferEvent) -> RelayerResult<()> {
        loop {
            let height = self.source.current_height().await?;
            let depth = height.saturating_sub(observed.source_block);
            if depth >= self.required_confirmations {
                return Ok(());
            }

            debug!(
                event_id = %observed.id_hex(),
                depth,
                required = self.required_confirmations,
                "Waiting for confirmation depth"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
        for attempt in 1..=RECEIPT_ATTEMPTS {
            if let Some(receipt) = self.source.get_receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
            if attempt < RECEIPT_ATTEMPTS {
                tokio::time::sleep(RECEIPT_RETRY_DELAY).await;
            }
        }
        Ok(None)
    }
}

/// Name of the first field where the receipt-derived event disagrees with
/// the observation, if any. The id already matched during lookup.
fn mismatched_field(observed: &TransferEvent, confirmed: &TransferEvent) -> Option<&'static str> {
    if confirmed.user != observed.user {
        Some("user")
    } else if confirmed.destination != observed.destination {
        Some("destination")
    } else if confirmed.amount != observed.amount {
        Some("amount")
    } else if confirmed.source_block != observed.source_block {
        Some("source_block")
    } else if confirmed.source_tx_hash != observed.source_tx_hash {
        Some("source_tx_hash")
    } else {
        None
    }
}
