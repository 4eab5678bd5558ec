//! # Ticket Custody Vault
//!
//! [`SecretStore`](ticket_custody_core::SecretStore) backed by a Vault
//! key-value (v1) secrets engine.
//!
//! Each account is one secret with three string fields:
//!
//! ```text
//! GET/PUT {address}/v1/{path}
//! {
//!   "account_address":     "...",
//!   "private_key":         "...",
//!   "security_passphrase": "..."
//! }
//! ```

pub mod client;

pub use client::{VaultConfig, VaultSecretStore};
