//! Ledger client configuration.

use crate::transaction::AssetParams;
use std::env;
use std::time::Duration;

/// Ledger node connection and transaction settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Base URL of the node API
    pub api_address: String,
    /// Value of the `X-API-Key` header
    pub api_key: String,
    /// Minimum fee paid per transaction, in micro-units (default: 1000)
    pub min_fee: u64,
    /// Rounds a transaction stays valid (default: 1000)
    pub validity_window: u64,
    /// Per-request HTTP timeout (default: 10 s)
    pub request_timeout: Duration,
    /// Delay between confirmation polls (default: 1 s)
    pub poll_interval: Duration,
    /// Name of minted ticket assets (default: "eventers")
    pub asset_name: String,
    /// Unit name of minted ticket assets (default: "tickets")
    pub asset_unit_name: String,
    /// Reference URL of minted ticket assets
    pub asset_url: String,
}

impl LedgerConfig {
    /// Configuration for a node at `api_address` with default settings.
    pub fn new(api_address: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_address: api_address.into(),
            api_key: api_key.into(),
            min_fee: 1_000,
            validity_window: 1_000,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            asset_name: "eventers".to_string(),
            asset_unit_name: "tickets".to_string(),
            asset_url: "https://www.eventersapp.com".to_string(),
        }
    }

    /// Load from `LEDGER_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::new(
            env::var("LEDGER_API_ADDRESS").unwrap_or_else(|_| "http://localhost:4001".to_string()),
            env::var("LEDGER_API_KEY").unwrap_or_default(),
        );

        Self {
            min_fee: env::var("LEDGER_MIN_FEE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_fee),
            validity_window: env::var("LEDGER_VALIDITY_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.validity_window),
            request_timeout: env::var("LEDGER_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.request_timeout, Duration::from_secs),
            poll_interval: env::var("LEDGER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.poll_interval, Duration::from_millis),
            asset_name: env::var("LEDGER_ASSET_NAME").unwrap_or_else(|_| defaults.asset_name.clone()),
            asset_unit_name: env::var("LEDGER_ASSET_UNIT_NAME")
                .unwrap_or_else(|_| defaults.asset_unit_name.clone()),
            asset_url: env::var("LEDGER_ASSET_URL").unwrap_or_else(|_| defaults.asset_url.clone()),
            ..defaults
        }
    }

    /// Parameters of a ticket asset: one indivisible unit.
    #[must_use]
    pub fn ticket_asset(&self) -> AssetParams {
        AssetParams {
            total: 1,
            decimals: 0,
            name: self.asset_name.clone(),
            unit_name: self.asset_unit_name.clone(),
            url: self.asset_url.clone(),
        }
    }
}
