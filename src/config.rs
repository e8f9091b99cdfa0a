//! Configuration management for the airdrop executor
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{AirdropError, AirdropResult};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Number of list arguments taken by the airdrop contract call
pub const SUB_LIST_COUNT: usize = 3;

/// Per-argument list ceilings of the deployed airdrop contract
pub const DEFAULT_SUB_LIST_CAPACITIES: [usize; SUB_LIST_COUNT] = [5000, 5000, 4995];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub network: NetworkConfig,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    pub signer: SignerConfig,
    pub queue: QueueConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// DEVNET, TESTNET or MAINNET
    pub name: String,
    /// Overrides the default indexer URL of the selected network
    pub api_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Target chain selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
}

impl Network {
    /// Default indexer API for this network
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Network::Devnet => "http://localhost:3999",
            Network::Testnet => "https://api.testnet.hiro.so",
            Network::Mainnet => "https://api.hiro.so",
        }
    }
}

impl FromStr for Network {
    type Err = AirdropError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEVNET" => Ok(Network::Devnet),
            "TESTNET" => Ok(Network::Testnet),
            "MAINNET" => Ok(Network::Mainnet),
            other => Err(AirdropError::UnknownNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Devnet => "DEVNET",
            Network::Testnet => "TESTNET",
            Network::Mainnet => "MAINNET",
        };
        f.write_str(name)
    }
}

impl NetworkConfig {
    pub fn network(&self) -> AirdropResult<Network> {
        self.name.parse()
    }

    /// Indexer URL, honoring the explicit override
    pub fn api_url(&self) -> AirdropResult<String> {
        let network = self.network()?;
        let url = self
            .api_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| network.default_api_url().to_string());
        Ok(url.trim_end_matches('/').to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Wallet account used as the sender
    #[serde(default)]
    pub account_index: u32,
    /// Fee per contract call in micro-STX
    pub fee: u64,
    pub max_pending_tx: u64,
    pub batch_size: usize,
    #[serde(default = "default_sub_list_capacities")]
    pub sub_list_capacities: [usize; SUB_LIST_COUNT],
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_rejection_cooldown_secs")]
    pub rejection_cooldown_secs: u64,
    /// 0 disables the limit
    #[serde(default = "default_max_consecutive_rejections")]
    pub max_consecutive_rejections: u32,
    /// Forces the nonce of the first round after startup
    #[serde(default)]
    pub nonce_override: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub delay_increment_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 5000,
            delay_increment_ms: 500,
        }
    }
}

impl ExecutorConfig {
    /// Total number of recipients one contract call can carry
    pub fn total_capacity(&self) -> usize {
        self.sub_list_capacities.iter().sum()
    }

    /// Validate executor limits. Any violation is fatal.
    pub fn validate(&self) -> AirdropResult<()> {
        if self.sub_list_capacities.iter().any(|c| *c == 0) {
            return Err(AirdropError::Config(
                "sub-list capacities must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AirdropError::Config(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        let capacity = self.total_capacity();
        if self.batch_size > capacity {
            return Err(AirdropError::Config(format!(
                "batch_size can't be greater than {} (got {})",
                capacity, self.batch_size
            )));
        }
        if self.max_pending_tx == 0 {
            return Err(AirdropError::Config(
                "max_pending_tx must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AirdropError::Config(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    /// Deployer of the NFT contract, defaults to the sender address
    pub address: Option<String>,
    pub name: String,
    pub function: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: None,
            name: "nft".to_string(),
            function: "airdrop".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub pending_path: PathBuf,
    pub completed_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    pub poll_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_sub_list_capacities() -> [usize; SUB_LIST_COUNT] {
    DEFAULT_SUB_LIST_CAPACITIES
}

fn default_settle_delay_ms() -> u64 {
    3000
}

fn default_rejection_cooldown_secs() -> u64 {
    60
}

fn default_max_consecutive_rejections() -> u32 {
    10
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("AIRDROP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let settings = Self::from_toml(&config_str)?;
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> AirdropResult<()> {
        self.network.network()?;

        if self.signer.api_key.trim().is_empty() {
            return Err(AirdropError::MissingCredential(
                "signer.api_key is empty".to_string(),
            ));
        }
        if self.signer.url.trim().is_empty() {
            return Err(AirdropError::Config("signer.url is empty".to_string()));
        }

        self.executor.validate()?;

        if self.contract.name.is_empty() || self.contract.function.is_empty() {
            return Err(AirdropError::Config(
                "contract name and function must be set".to_string(),
            ));
        }

        if self.listener.poll_interval_ms == 0 {
            tracing::warn!("listener.poll_interval_ms is 0, block polling will spin");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
