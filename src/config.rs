//! Configuration management for the Trestle relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub state: StateConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    /// Chain where tokens are locked; emits `Deposit`, accepts `unlock`.
    pub origin: ChainConfig,
    /// Chain where wrapped tokens live; emits `Burn`, accepts `mint`.
    pub remote: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Sleep between head polls while caught up.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Fixed delay inserted after every scan, regardless of outcome.
    #[serde(default = "default_scan_delay_secs")]
    pub scan_delay_secs: u64,
    /// Pause after a rate-limit or timeout before retrying the same range.
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
    /// Oldest processed ids are evicted past this count, per direction.
    #[serde(default = "default_processed_retention")]
    pub processed_retention: usize,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the relayer private key.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub bridge_address: String,
    pub confirmation_blocks: u64,
    /// First block to scan when no watermark has been persisted yet.
    /// Absent means "start from the current head".
    pub start_block: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_scan_delay_secs() -> u64 {
    3
}

fn default_rate_limit_backoff_secs() -> u64 {
    30
}

fn default_processed_retention() -> usize {
    10_000
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_receipt_timeout_secs() -> u64 {
    180
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_secs(self.scan_delay_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TRESTLE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        for chain in [&self.origin, &self.remote] {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", chain.name);
            }
            if chain.bridge_address.is_empty() {
                anyhow::bail!("Chain {} has no bridge address configured", chain.name);
            }
            if chain.confirmation_blocks == 0 {
                anyhow::bail!(
                    "Chain {} must require at least one confirmation block",
                    chain.name
                );
            }
        }

        if self.origin.chain_id == self.remote.chain_id {
            anyhow::bail!("Origin and remote chains must have distinct chain ids");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
