//! `PostgreSQL` ticket store for ticket custody.
//!
//! This crate provides the relational half of custody: public events, their
//! ticket rows, and the divergence log. It implements the `TicketStore`
//! trait from `ticket-custody-core` with sqlx and supports:
//!
//! - Conditional single-row ticket updates in short transactions
//! - First-sale selection in ascending ticket id order
//! - Listings and holder views for the read side
//! - A persistent log of ledger/relational divergences
//!
//! # Example
//!
//! ```ignore
//! use ticket_custody_postgres::{PostgresConfig, PostgresTicketStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PostgresConfig::from_env().connect().await?;
//!     let store = PostgresTicketStore::new(pool);
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod divergences;
mod store;

pub use config::PostgresConfig;
pub use divergences::DivergenceLog;
pub use store::PostgresTicketStore;
