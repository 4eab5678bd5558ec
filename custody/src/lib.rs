//! # Ticket Custody
//!
//! The orchestrator that keeps event tickets consistent between the
//! relational store and the asset ledger.
//!
//! - [`Orchestrator`]: event creation, activation and the five custody
//!   operations, generic over its collaborators
//! - [`activation`]: observable background seeding of a new event's tickets
//! - [`config`]: environment-driven configuration
//! - [`bootstrap`]: wiring the production collaborators together
//!
//! ## Example
//!
//! ```ignore
//! use ticket_custody::{bootstrap, Config, TransferIntent};
//!
//! bootstrap::init_tracing();
//! let orchestrator = bootstrap::build(Config::from_env()).await?;
//!
//! let ticket = orchestrator
//!     .transfer(TransferIntent::FirstSaleBuy { public_event_id, buyer })
//!     .await?;
//! ```

#![forbid(unsafe_code)]

pub mod activation;
pub mod bootstrap;
pub mod config;
mod locks;
pub mod orchestrator;

pub use activation::{
    ActivationHandle, ActivationReport, ActivationStatus, ActivationTracker, SeedFailure, SeedStage,
};
pub use bootstrap::{BootstrapError, ProductionOrchestrator};
pub use config::{Config, CustodyConfig};
pub use orchestrator::Orchestrator;

pub use ticket_custody_core::{
    CustodyError, EventTicket, NewPublicEvent, PublicEvent, PublicEventId, TicketId, TicketStatus,
    TransferIntent, TransferRequest, UserId,
};
