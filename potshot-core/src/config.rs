use crate::error::{CoreError, Result};
use crate::retry::RetryPolicy;
use crate::types::Address;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Sepolia,
    Local,
}

/// A named wager denomination, backed by its own ledger contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerContext {
    pub name: String,
    pub contract_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub network: Network,
    pub rpc_url: String,
    pub store_url: String,
    pub store_api_key: Option<String>,
    pub contexts: Vec<WagerContext>,
    pub active_context: String,
    pub cache_ttl: Duration,
    pub read_retry: RetryPolicy,
    pub inter_call_delay: Duration,
    pub refresh_interval: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub discount_percent: u8,
    pub pot_milestones: Vec<U256>,
    pub recent_winner_limit: usize,
    pub leaderboard_limit: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        let ether = U256::exp10(18);
        Self {
            network: Network::Local,
            rpc_url: "http://localhost:8545".to_string(),
            store_url: "http://localhost:54321".to_string(),
            store_api_key: None,
            contexts: Vec::new(),
            active_context: "eth".to_string(),
            cache_ttl: Duration::from_secs(30),
            read_retry: RetryPolicy::default(),
            inter_call_delay: Duration::from_millis(200),
            refresh_interval: Duration::from_secs(30),
            receipt_poll_interval: Duration::from_secs(2),
            receipt_timeout: Duration::from_secs(120),
            discount_percent: 20,
            pot_milestones: vec![ether, ether * 5, ether * 10, ether * 50, ether * 100],
            recent_winner_limit: 10,
            leaderboard_limit: 10,
        }
    }
}

impl GameConfig {
    pub fn new(network: Network) -> Self {
        let mut config = Self::default();
        config.network = network;

        match network {
            Network::Mainnet => {
                config.rpc_url = "https://eth.llamarpc.com".to_string();
            }
            Network::Sepolia => {
                config.rpc_url = "https://rpc.sepolia.org".to_string();
            }
            Network::Local => {
                // keep defaults for a local node
            }
        }

        config
    }

    pub fn with_context(mut self, name: &str, contract_address: Address) -> Self {
        self.contexts.retain(|c| c.name != name);
        self.contexts.push(WagerContext {
            name: name.to_string(),
            contract_address,
        });
        if self.contexts.len() == 1 {
            self.active_context = name.to_string();
        }
        self
    }

    pub fn context(&self, name: &str) -> Option<&WagerContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(CoreError::config("RPC URL cannot be empty"));
        }

        if self.store_url.is_empty() {
            return Err(CoreError::config("Store URL cannot be empty"));
        }

        if self.contexts.is_empty() {
            return Err(CoreError::config("At least one wager context is required"));
        }

        if self.context(&self.active_context).is_none() {
            return Err(CoreError::config(format!(
                "Active context '{}' is not configured",
                self.active_context
            )));
        }

        if self.cache_ttl.is_zero() {
            return Err(CoreError::config("Cache TTL must be greater than 0"));
        }

        if self.read_retry.max_attempts == 0 {
            return Err(CoreError::config("Read retry attempts must be at least 1"));
        }

        if self.discount_percent >= 100 {
            return Err(CoreError::config("Discount percent must be below 100"));
        }

        if self.refresh_interval.is_zero() {
            return Err(CoreError::config("Refresh interval must be greater than 0"));
        }

        Ok(())
    }
}
