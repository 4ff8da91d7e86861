//! Node configuration.
//!
//! Read once at startup from `agora.toml` (or the file named by
//! `AGORA_CONFIG`), then overridden by environment variables. A `.env` file
//! is loaded first if present. Every field has a default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agora_core::{Address, Fare};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::handler::OutcomePolicy;
use crate::retry::RetryPolicy;

/// Default config file name.
pub const CONFIG_FILE: &str = "agora.toml";

/// Supported networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    #[default]
    BaseSepolia,
    Base,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::BaseSepolia => 84532,
            Network::Base => 8453,
        }
    }

    /// Address of the job contract.
    pub fn contract_address(&self) -> Address {
        Address::new("0x2422c1c43451Eb69Ff49dfD39c4Dc8C5230fA1e6")
    }

    pub fn registry_url(&self) -> &'static str {
        match self {
            Network::BaseSepolia => "https://acpx-staging.virtuals.io/api",
            Network::Base => "https://acpx.virtuals.io/api",
        }
    }

    /// USDC, the token job prices are quoted in.
    pub fn base_fare(&self) -> Fare {
        match self {
            Network::BaseSepolia => Fare::new("0x036CbD53842c5426634e7929541eC2318f3dCF7e", 6),
            Network::Base => Fare::new("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
        }
    }
}

/// Retry settings for ledger and registry calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: Network,

    /// Wallet the node acts for.
    #[serde(default)]
    pub wallet_address: Option<Address>,

    /// Registry base URL; the network preset when unset.
    #[serde(default)]
    pub registry_url: Option<String>,

    /// Ledger gateway relay. Without one the node runs against an
    /// in-process sandbox ledger.
    #[serde(default)]
    pub ledger_url: Option<String>,

    /// Websocket endpoint for push job events.
    #[serde(default)]
    pub push_url: Option<String>,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_job_expiry_secs")]
    pub default_job_expiry_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Page size for active-job polling.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Jobs processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default)]
    pub outcome_policy: OutcomePolicy,

    /// Accept incoming job requests without a custom handler.
    #[serde(default = "default_auto_accept")]
    pub auto_accept: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_job_expiry_secs() -> u64 {
    86_400
}

fn default_poll_interval_secs() -> u64 {
    20
}

fn default_page_size() -> u32 {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_auto_accept() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            wallet_address: None,
            registry_url: None,
            ledger_url: None,
            push_url: None,
            listen_addr: default_listen_addr(),
            default_job_expiry_secs: default_job_expiry_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            page_size: default_page_size(),
            retry: RetrySettings::default(),
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            similarity_threshold: default_similarity_threshold(),
            outcome_policy: OutcomePolicy::default(),
            auto_accept: default_auto_accept(),
        }
    }
}

impl NodeConfig {
    /// Load `.env`, the config file and environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let path = std::env::var("AGORA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `AGORA_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(wallet) = lookup("AGORA_WALLET_ADDRESS") {
            self.wallet_address = Some(Address::new(wallet));
        }
        if let Some(url) = lookup("AGORA_REGISTRY_URL") {
            self.registry_url = Some(url);
        }
        if let Some(url) = lookup("AGORA_LEDGER_URL") {
            self.ledger_url = Some(url);
        }
        if let Some(url) = lookup("AGORA_PUSH_URL") {
            self.push_url = Some(url);
        }
    }

    pub fn registry_url(&self) -> &str {
        self.registry_url
            .as_deref()
            .unwrap_or_else(|| self.network.registry_url())
    }

    /// True when no ledger relay is configured.
    pub fn is_local(&self) -> bool {
        self.ledger_url.is_none()
    }

    pub fn wallet(&self) -> anyhow::Result<Address> {
        self.wallet_address
            .clone()
            .context("wallet_address is not configured (set AGORA_WALLET_ADDRESS)")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn default_job_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.default_job_expiry_secs).unwrap_or(i64::MAX))
    }
}
