//! Collaborator traits.
//!
//! The orchestrator depends on three external systems of record. Each is a
//! trait so production wiring and tests can supply different
//! implementations:
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ LedgerClient     │   │ SecretStore      │   │ TicketStore      │
//! │ - accounts       │   │ - account keys   │   │ - public events  │
//! │ - mint / opt-in  │   │   by path        │   │ - event tickets  │
//! │ - transfer       │   │                  │   │ - divergences    │
//! │ - confirmations  │   │                  │   │                  │
//! └──────────────────┘   └──────────────────┘   └──────────────────┘
//!   HTTP node client       Vault KV client        PostgreSQL (sqlx)
//!   in-memory ledger       in-memory map          in-memory tables
//! ```
//!
//! Async methods return `impl Future + Send` so orchestrator futures can be
//! handed to `tokio::spawn`.

pub mod ledger;
pub mod secrets;
pub mod store;

pub use ledger::LedgerClient;
pub use secrets::{SecretPaths, SecretStore};
pub use store::TicketStore;
