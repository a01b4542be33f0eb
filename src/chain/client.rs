//! EVM implementation of the [`ChainClient`] capability

use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{self, BridgeCall, Direction, TransferEvent};

use super::{ChainClient, RpcProvider};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One chain's client: a failover RPC provider plus the relayer's signing
/// wallet for that chain.
pub struct EvmChainClient {
    name: String,
    chain_id: u64,
    provider: RpcProvider,
    wallet: LocalWallet,
    bridge_address: Address,
    receipt_timeout: Duration,
}

impl EvmChainClient {
    pub fn new(config: &ChainConfig, wallet: LocalWallet) -> RelayerResult<Self> {
        let provider = RpcProvider::new(config)?;

        let bridge_address: Address = config.bridge_address.parse().map_err(|e| {
            RelayerError::Config(format!(
                "Invalid bridge address for chain {}: {}",
                config.name, e
            ))
        })?;

        Ok(Self {
            name: config.name.clone(),
            chain_id: config.chain_id,
            provider,
            wallet: wallet.with_chain_id(config.chain_id),
            bridge_address,
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
        })
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    fn call_request(&self, data: Bytes) -> TypedTransaction {
        TransactionRequest::new()
            .to(self.bridge_address)
            .data(data)
            .into()
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn current_height(&self) -> RelayerResult<u64> {
        self.provider.get_block_number().await
    }

    async fn fetch_events(
        &self,
        direction: Direction,
        from_block: u64,
        to_block: u64,
    ) -> RelayerResult<Vec<TransferEvent>> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .topic0(direction.event_topic())
            .from_block(from_block)
            .to_block(to_block);

        let mut logs = self.provider.get_logs(&filter).await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut candidates = Vec::with_capacity(logs.len());
        for log in &logs {
            match events::parse_log(direction, log) {
                Ok(event) => candidates.push(event),
                Err(e) => {
                    // Topic 0 matched but the payload did not decode; a
                    // contract will not emit such a log, so this is RPC junk.
                    warn!(
                        chain = %self.name,
                        tx_hash = ?log.transaction_hash,
                        "Skipping undecodable {} log: {}",
                        direction,
                        e
                    );
                }
            }
        }

        Ok(candidates)
    }

    async fn get_receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
        self.provider.get_transaction_receipt(tx_hash).await
    }

    async fn is_processed(&self, event_id: U256) -> RelayerResult<bool> {
        let request = self.call_request(events::is_processed_calldata(event_id));
        let output = self.provider.call(&request).await?;
        events::decode_is_processed(&output)
    }

    async fn submit(&self, call: BridgeCall) -> RelayerResult<H256> {
        let nonce = self
            .provider
            .get_transaction_count(self.wallet.address())
            .await?;
        let gas_price = self.provider.get_gas_price().await?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(self.bridge_address)
            .data(call.calldata())
            .chain_id(self.chain_id)
            .nonce(nonce)
            .gas_price(gas_price)
            .into();

        // Estimation doubles as a dry run: a duplicate id or an underfunded
        // account surfaces here with the revert reason intact, before any
        // gas is spent.
        let gas = self.provider.estimate_gas(&tx).await?;
        tx.set_gas(gas * 120 / 100);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let tx_hash = self.provider.send_raw_transaction(raw).await?;
        debug!(
            chain = %self.name,
            %tx_hash,
            action = call.direction.action_name(),
            "Counter-call broadcast"
        );
        Ok(tx_hash)
    }

    async fn wait_receipt(&self, tx_hash: H256) -> RelayerResult<TransactionReceipt> {
        let deadline = Instant::now() + self.receipt_timeout;

        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(RelayerError::Timeout {
                    operation: format!("receipt for {:?} on chain {}", tx_hash, self.name),
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
