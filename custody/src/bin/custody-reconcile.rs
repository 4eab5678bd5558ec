//! Divergence reconciliation
//!
//! Re-applies the relational half of custody changes whose ledger transfer
//! succeeded but whose row update did not commit.
//!
//! This binary:
//! - Connects to `PostgreSQL`, Vault and the ledger node
//! - Lists pending divergences, oldest first
//! - Re-applies each one whose ledger state still matches
//! - Leaves the rest pending for an operator
//!
//! # Usage
//!
//! ```bash
//! # Reconcile up to 100 pending divergences
//! cargo run --bin custody-reconcile
//!
//! # Reconcile up to 10
//! cargo run --bin custody-reconcile -- 10
//! ```

use std::process::ExitCode;

use ticket_custody::{Config, bootstrap};

const DEFAULT_LIMIT: usize = 100;

#[tokio::main]
async fn main() -> ExitCode {
    bootstrap::init_tracing();

    let limit = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_LIMIT);

    let config = Config::from_env();
    tracing::info!(
        ledger = %config.ledger.api_address,
        vault = %config.vault.address,
        limit,
        "Starting divergence reconciliation"
    );

    let orchestrator = match bootstrap::build(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let pending = match orchestrator.pending_divergences(limit).await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list pending divergences");
            return ExitCode::FAILURE;
        }
    };

    if pending.is_empty() {
        tracing::info!("No pending divergences");
        return ExitCode::SUCCESS;
    }

    let mut resolved = 0usize;
    let mut left = 0usize;
    for record in &pending {
        match orchestrator.reconcile(record.id).await {
            Ok(ticket) => {
                resolved += 1;
                tracing::info!(
                    divergence_id = record.id,
                    ticket_id = %ticket.id,
                    holder = %ticket.current_holder_id,
                    "Divergence resolved"
                );
            }
            Err(e) => {
                left += 1;
                tracing::warn!(
                    divergence_id = record.id,
                    operation = %record.divergence.operation,
                    error = %e,
                    "Divergence left pending"
                );
            }
        }
    }

    tracing::info!(resolved, left, "Reconciliation finished");
    if left == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
