//! Chain module - capability wrapper over one chain's RPC surface
//!
//! This module provides:
//! - The [`ChainClient`] capability trait the relay pipeline is written
//!   against (and mocked against in tests)
//! - Multi-RPC provider management with automatic failover
//! - The EVM implementation: log queries, receipt lookups, signed submission

pub mod client;
pub mod provider;

pub use client::EvmChainClient;
pub use provider::RpcProvider;

use crate::error::RelayerResult;
use crate::events::{BridgeCall, Direction, TransferEvent};

use async_trait::async_trait;
use ethers::types::{TransactionReceipt, H256, U256};

/// Thin capability wrapper over one chain.
///
/// Both watchers hold two of these: the source side for discovery and
/// verification, the destination side for submission. Everything the relay
/// pipeline needs from a chain goes through this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn current_height(&self) -> RelayerResult<u64>;

    /// Candidate transfer events in `[from_block, to_block]`, ascending by
    /// block. Candidates are untrusted until re-verified against a receipt.
    async fn fetch_events(
        &self,
        direction: Direction,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<TransferEvent>>;

    /// Receipt lookup by transaction hash. `None` means the chain does not
    /// (or no longer does) include the transaction.
    async fn get_receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>>;

    /// The bridge contract's own duplicate guard, usable as a gas-saving
    /// pre-check before submission.
    async fn is_processed(&self, event_id: U256) -> RelayerResult<bool>;

    /// Sign and broadcast a counter-call; returns the transaction hash.
    async fn submit(&self, call: BridgeCall) -> RelayerResult<H256>;

    /// Poll for a submitted transaction's receipt until it lands or the
    /// configured deadline passes.
    async fn wait_receipt(&self, tx_hash: H256) -> RelayerResult<TransactionReceipt>;
}
