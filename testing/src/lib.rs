//! # Ticket Custody Testing
//!
//! In-memory implementations of the custody provider traits:
//!
//! - [`InMemoryLedger`]: accounts, assets, opt-ins and fees, with
//!   per-operation failure injection
//! - [`InMemorySecretStore`]: path-keyed account map
//! - [`InMemoryTicketStore`]: public events, tickets and divergences with
//!   failing updates on demand
//!
//! ## Example
//!
//! ```
//! use ticket_custody_testing::{InMemoryLedger, InMemorySecretStore, InMemoryTicketStore};
//! use ticket_custody_core::LedgerOperation;
//!
//! let ledger = InMemoryLedger::new();
//! let treasury = ledger.funded_account(1_000_000_000);
//! ledger.fail_next(LedgerOperation::Transfer);
//!
//! let secrets = InMemorySecretStore::new();
//! let store = InMemoryTicketStore::new();
//! # let _ = (treasury, secrets, store);
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

mod ledger;
mod secrets;
mod store;

pub use ledger::InMemoryLedger;
pub use secrets::InMemorySecretStore;
pub use store::InMemoryTicketStore;

/// Install a test-friendly tracing subscriber.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
