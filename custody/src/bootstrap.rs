//! Process startup: tracing, collaborators, and the orchestrator.
//!
//! Every collaborator is constructed once here and handed to the
//! orchestrator; nothing is process-global.

use thiserror::Error;
use ticket_custody_core::{LedgerError, PersistenceError, SecretStoreError};
use ticket_custody_ledger::HttpLedgerClient;
use ticket_custody_postgres::PostgresTicketStore;
use ticket_custody_vault::VaultSecretStore;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Orchestrator over the production collaborators.
pub type ProductionOrchestrator = Orchestrator<HttpLedgerClient, VaultSecretStore, PostgresTicketStore>;

/// Startup failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The database could not be reached or migrated
    #[error("database: {0}")]
    Database(#[from] PersistenceError),

    /// Vault could not be reached, is sealed, or mounts failed
    #[error("vault: {0}")]
    Vault(#[from] SecretStoreError),

    /// The ledger client could not be built or the node is unreachable
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,ticket_custody=debug,sqlx=warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Connect every collaborator and build the orchestrator.
///
/// Runs database migrations, verifies Vault is unsealed, mounts the user,
/// temporary and treasury secret engines when missing, and checks the
/// ledger node answers.
///
/// # Errors
///
/// Returns [`BootstrapError`] naming the collaborator that failed.
pub async fn build(config: Config) -> Result<ProductionOrchestrator, BootstrapError> {
    let pool = config.postgres.connect().await?;
    let store = PostgresTicketStore::new(pool);
    store.migrate().await?;
    tracing::info!("Database ready");

    let secrets = VaultSecretStore::new(config.vault.clone())?;
    secrets.check_unsealed().await?;
    let paths = &config.custody.paths;
    let treasury_root = paths
        .treasury
        .split('/')
        .next()
        .unwrap_or(paths.treasury.as_str());
    secrets
        .ensure_mounts(&[paths.user_root.as_str(), paths.temp_root.as_str(), treasury_root])
        .await?;
    tracing::info!(address = %config.vault.address, "Vault ready");

    let ledger = HttpLedgerClient::new(config.ledger.clone())?;
    let status = ledger.status().await?;
    tracing::info!(
        address = %config.ledger.api_address,
        last_round = status.last_round,
        "Ledger node ready"
    );

    Ok(Orchestrator::new(ledger, secrets, store, config.custody))
}
