//! Configuration management for the custody service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Each collaborator crate owns its own section; this module composes them.

use std::env;
use std::time::Duration;

use ticket_custody_core::SecretPaths;
use ticket_custody_ledger::LedgerConfig;
use ticket_custody_postgres::PostgresConfig;
use ticket_custody_vault::VaultConfig;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` pool
    pub postgres: PostgresConfig,
    /// Ledger node
    pub ledger: LedgerConfig,
    /// Vault connection
    pub vault: VaultConfig,
    /// Orchestrator settings
    pub custody: CustodyConfig,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    /// Secret store layout for user, temporary and treasury accounts
    pub paths: SecretPaths,
    /// Upper bound on one confirmation wait (default: 30 s)
    pub confirmation_timeout: Duration,
    /// Tickets of one event seeded concurrently (default: 4)
    pub seed_concurrency: usize,
    /// Native amount funded into a newly provisioned user account (default: 5 000 000)
    pub user_seed_amount: u64,
    /// Balance the ledger locks for any account (default: 100 000)
    pub account_min_balance: u64,
    /// Extra balance locked per asset an account creates (default: 100 000)
    pub asset_min_balance: u64,
    /// Fee per transaction (default: 1000, from `LEDGER_MIN_FEE`)
    pub min_fee: u64,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            paths: SecretPaths::default(),
            confirmation_timeout: Duration::from_secs(30),
            seed_concurrency: 4,
            user_seed_amount: 5_000_000,
            account_min_balance: 100_000,
            asset_min_balance: 100_000,
            min_fee: 1_000,
        }
    }
}

impl CustodyConfig {
    /// Load from `CUSTODY_*` and `VAULT_*_PATH` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            paths: SecretPaths::new(
                env::var("VAULT_USER_PATH").unwrap_or_else(|_| defaults.paths.user_root.clone()),
                env::var("VAULT_TEMP_PATH").unwrap_or_else(|_| defaults.paths.temp_root.clone()),
                env::var("VAULT_TREASURY_PATH").unwrap_or_else(|_| defaults.paths.treasury.clone()),
            ),
            confirmation_timeout: env::var("CUSTODY_CONFIRMATION_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.confirmation_timeout, Duration::from_secs),
            seed_concurrency: env::var("CUSTODY_SEED_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.seed_concurrency),
            user_seed_amount: env::var("CUSTODY_USER_SEED_AMOUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.user_seed_amount),
            account_min_balance: env::var("CUSTODY_ACCOUNT_MIN_BALANCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.account_min_balance),
            asset_min_balance: env::var("CUSTODY_ASSET_MIN_BALANCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.asset_min_balance),
            min_fee: env::var("LEDGER_MIN_FEE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_fee),
        }
    }

    /// Native amount funded into an event's temporary account.
    ///
    /// Covers one mint fee and one transfer fee per ticket, the balance
    /// locked for each created asset, and the account's own minimum balance.
    #[must_use]
    pub fn seed_fund_amount(&self, total_tickets: u32) -> u64 {
        let per_ticket = self.asset_min_balance.saturating_add(self.min_fee.saturating_mul(2));
        self.account_min_balance
            .saturating_add(per_ticket.saturating_mul(u64::from(total_tickets)))
    }

    /// Spendable balance an account needs to opt into one asset: the
    /// balance locked for the holding plus the fee.
    #[must_use]
    pub fn opt_in_reserve(&self) -> u64 {
        self.asset_min_balance.saturating_add(self.min_fee)
    }

    /// Native amount funded into the organizer's account when an event
    /// activates.
    ///
    /// Covers one opt-in per ticket and the fee of each ticket's first sale.
    #[must_use]
    pub fn organizer_fund_amount(&self, total_tickets: u32) -> u64 {
        self.opt_in_reserve()
            .saturating_add(self.min_fee)
            .saturating_mul(u64::from(total_tickets))
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file first when one is present.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            postgres: PostgresConfig::from_env(),
            ledger: LedgerConfig::from_env(),
            vault: VaultConfig::from_env(),
            custody: CustodyConfig::from_env(),
        }
    }
}
