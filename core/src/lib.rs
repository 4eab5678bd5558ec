//! # Ticket Custody Core
//!
//! Domain types, error taxonomy and provider traits for keeping event tickets
//! consistent between a relational store and an external asset ledger.
//!
//! Every physical ticket exists twice: as an `Event_Tickets` row and as a
//! one-unit asset on the ledger. This crate defines the vocabulary shared by
//! the orchestrator and its collaborators:
//!
//! - **Types**: identifiers, [`PublicEvent`], [`EventTicket`], [`TicketStatus`]
//! - **Accounts**: [`LedgerAccount`] and ledger confirmations
//! - **Intents**: the [`TransferIntent`] sum type and its flat request form
//! - **Errors**: [`CustodyError`] and the per-collaborator error types
//! - **Providers**: [`LedgerClient`], [`SecretStore`], [`TicketStore`]
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────┐
//! │  Custody Orchestrator  │
//! └───┬─────────┬──────┬───┘
//!     │         │      │
//!     ▼         ▼      ▼
//! ┌────────┐ ┌──────┐ ┌───────────┐
//! │ Ledger │ │Secret│ │  Ticket   │
//! │ Client │ │Store │ │  Store    │
//! └────────┘ └──────┘ └───────────┘
//! ```
//!
//! Collaborators are traits so the orchestrator can run against real
//! services in production and in-memory doubles in tests.

pub mod account;
pub mod error;
pub mod intent;
pub mod providers;
pub mod types;

pub use account::{Confirmation, LedgerAccount, Round, TxId};
pub use error::{
    CustodyError, ErrorCategory, LedgerError, LedgerErrorKind, LedgerOperation, PersistenceError,
    SecretStoreError,
};
pub use intent::{TransferIntent, TransferRequest};
pub use providers::{LedgerClient, SecretPaths, SecretStore, TicketStore};
pub use types::{
    AssetId, DivergenceRecord, DivergenceStatus, EventTicket, HeldTicket, NewDivergence,
    NewEventTicket, NewPublicEvent, PublicEvent, PublicEventId, PublicEventListing, TicketChange,
    TicketId, TicketStatus, TicketUpdate, UserId,
};
