//! Multi-RPC HTTP provider with automatic failover
//!
//! Every read goes through the currently-selected endpoint; any failure
//! rotates to the next endpoint and retries until the list is exhausted.
//! Rate-limit responses and deadline misses are surfaced as their own error
//! variants so the watcher can back off instead of failing the event.

use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct RpcProvider {
    chain_name: String,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    request_timeout: Duration,
}

impl RpcProvider {
    pub fn new(config: &ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::Config(format!(
                "Chain {} has no valid RPC providers",
                config.name
            )));
        }

        Ok(Self {
            chain_name: config.name.clone(),
            http_providers,
            current_provider: AtomicUsize::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to the next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_name, next);
    }

    /// Run an RPC call against the active endpoint, rotating through the
    /// endpoint list on failure. Rate-limit errors abort the rotation
    /// immediately: hammering the fallback endpoints would only spread the
    /// throttling.
    async fn with_failover<T, F, Fut>(&self, operation: &str, f: F) -> RelayerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            let provider = self.http().clone();
            match timeout(self.request_timeout, f(provider)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    let err = self.classify(&e.to_string());
                    if err.is_throttle() {
                        return Err(err);
                    }
                    warn!(
                        "RPC {} failed on chain {}: {}",
                        operation, self.chain_name, e
                    );
                    last_error = Some(err);
                    self.failover();
                }
                Err(_) => {
                    return Err(RelayerError::Timeout {
                        operation: format!("{} on chain {}", operation, self.chain_name),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RelayerError::Rpc {
            chain: self.chain_name.clone(),
            message: format!("all providers failed for {}", operation),
        }))
    }

    /// Map an RPC error message to the relayer's error taxonomy.
    fn classify(&self, message: &str) -> RelayerError {
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
        {
            RelayerError::RateLimited {
                chain: self.chain_name.clone(),
            }
        } else {
            RelayerError::Rpc {
                chain: self.chain_name.clone(),
                message: message.to_string(),
            }
        }
    }

    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        let block = self
            .with_failover("get_block_number", |p| async move {
                p.get_block_number().await
            })
            .await?;
        Ok(block.as_u64())
    }

    pub async fn get_logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        let filter = filter.clone();
        self.with_failover("get_logs", move |p| {
            let filter = filter.clone();
            async move { p.get_logs(&filter).await }
        })
        .await
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> RelayerResult<Option<TransactionReceipt>> {
        self.with_failover("get_transaction_receipt", move |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    pub async fn call(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        let tx = tx.clone();
        self.with_failover("eth_call", move |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    pub async fn get_transaction_count(&self, address: Address) -> RelayerResult<U256> {
        self.with_failover("get_transaction_count", move |p| async move {
            p.get_transaction_count(address, None).await
        })
        .await
    }

    pub async fn get_gas_price(&self) -> RelayerResult<U256> {
        self.with_failover("get_gas_price", |p| async move { p.get_gas_price().await })
            .await
    }

    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> RelayerResult<U256> {
        let tx = tx.clone();
        self.with_failover("estimate_gas", move |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    /// Broadcast a signed transaction. No endpoint rotation here: a second
    /// broadcast of the same payload is harmless, but rotating on an
    /// ambiguous failure makes the error harder to attribute.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> RelayerResult<H256> {
        let result = timeout(
            self.request_timeout,
            self.http().send_raw_transaction(raw),
        )
        .await;

        match result {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => Err(self.classify(&e.to_string())),
            Err(_) => Err(RelayerError::Timeout {
                operation: format!("send_raw_transaction on chain {}", self.chain_name),
            }),
        }
    }
}
