//! # Ticket Custody Ledger
//!
//! Client for the asset ledger node that holds one indivisible asset per
//! ticket.
//!
//! - [`keys`]: account generation, addresses, recovery phrases
//! - [`transaction`]: typed transactions, signing bytes, ids
//! - [`HttpLedgerClient`]: the [`LedgerClient`](ticket_custody_core::LedgerClient)
//!   implementation over the node's REST API
//!
//! ## Lifecycle of a custody change
//!
//! ```text
//! suggested params ─► build ─► sign ─► POST /v2/transactions ─► tx id
//!                                                                 │
//!          ┌──────────────────────────────────────────────────────┘
//!          ▼
//! GET /v2/transactions/pending/{id}  (every poll_interval, bounded by timeout)
//!          │
//!          ├─ pool-error      → Rejected
//!          ├─ confirmed-round → Confirmation
//!          └─ lookup error    → retry
//! ```

pub mod client;
pub mod config;
pub mod keys;
pub mod transaction;

pub use client::{HttpLedgerClient, NodeStatus, PendingTransaction};
pub use config::LedgerConfig;
pub use transaction::{AssetParams, SignedTransaction, SuggestedParams, Transaction, TxBody};
