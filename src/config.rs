use std::time::Duration;

use crate::batch::models::PayeeSplit;

type ConfigError = config::ConfigError;

/// Settings the webhook handlers need at request time.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub secret: String,
    pub dev_mode: bool,
    pub fees_bps: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub bind_address: String,
    pub rpc_url: String,
    pub executor_private_key: Option<String>,
    pub token_address: Option<String>,
    pub contract_address: Option<String>,
    pub token_decimals: u32,
    /// Fee deducted from each incoming payment before splitting.
    pub fees_bps: u32,
    pub split_payees: Vec<String>,
    pub split_shares_bps: Vec<u32>,
    pub executor_interval: Duration,
    pub confirmation_timeout: Duration,
    pub dev_mode: bool,
    pub webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let split_payees = env_csv("SPLIT_PAYEES");
        let split_shares_bps = env_csv("SPLIT_SHARES_BPS")
            .iter()
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| ConfigError::Message(format!("bad share value: {}", s)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if split_payees.len() != split_shares_bps.len() {
            return Err(ConfigError::Message(format!(
                "SPLIT_PAYEES length ({}) must equal SPLIT_SHARES_BPS length ({})",
                split_payees.len(),
                split_shares_bps.len()
            )));
        }

        let fees_bps: u32 = env_parse("FEES_BPS", 0)?;
        if fees_bps > 10_000 {
            return Err(ConfigError::Message(format!(
                "FEES_BPS must be at most 10000, got {}",
                fees_bps
            )));
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            executor_private_key: std::env::var("EXECUTOR_PRIVATE_KEY").ok(),
            token_address: std::env::var("TOKEN_ADDRESS").ok(),
            contract_address: std::env::var("CONTRACT_ADDRESS").ok(),
            token_decimals: env_parse("TOKEN_DECIMALS", 6)?,
            fees_bps,
            split_payees,
            split_shares_bps,
            executor_interval: Duration::from_millis(env_parse("EXECUTOR_INTERVAL_MS", 15_000)?),
            confirmation_timeout: Duration::from_millis(env_parse(
                "CONFIRMATION_TIMEOUT_MS",
                60_000,
            )?),
            dev_mode: std::env::var("DEV_MODE").map(|v| v == "1").unwrap_or(false),
            webhook_secret: std::env::var("SHOPIFY_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "devsecret".to_string()),
        })
    }

    pub fn payee_splits(&self) -> Vec<PayeeSplit> {
        self.split_payees
            .iter()
            .zip(self.split_shares_bps.iter())
            .map(|(address, share_bps)| PayeeSplit {
                address: address.clone(),
                share_bps: *share_bps,
            })
            .collect()
    }

    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            secret: self.webhook_secret.clone(),
            dev_mode: self.dev_mode,
            fees_bps: self.fees_bps,
        }
    }
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Message(format!("{} is not a valid value for {}", raw, key))),
        Err(_) => Ok(default),
    }
}
