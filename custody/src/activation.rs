//! Event activation tracking.
//!
//! Activation mints and seeds an event's tickets in the background after
//! the event row commits. Its progress is observable instead of being
//! logged and dropped:
//!
//! ```text
//! create_public_event ──► ActivationHandle ──wait()──► Completed(report)
//!          │                                          or Failed(reason)
//!          └──► ActivationTracker ──status(event)──► Pending | Running | ...
//! ```
//!
//! Seeding is best effort per ticket: a failed ticket is listed in the
//! report's `failures` and never gets a row.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use ticket_custody_core::{PublicEventId, TicketId};

// ============================================================================
// Report
// ============================================================================

/// Step of a ticket's seeding chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeedStage {
    /// Minting the asset from the temporary account
    Mint,
    /// Opting the organizer into the asset
    OptIn,
    /// Moving the unit to the organizer
    Transfer,
    /// Inserting the ticket row
    Insert,
    /// The seeding task itself did not finish
    Task,
}

impl SeedStage {
    /// Stage name used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::OptIn => "opt_in",
            Self::Transfer => "transfer",
            Self::Insert => "insert",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for SeedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ticket that was not seeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedFailure {
    /// Position of the ticket within the event, from zero
    pub index: u32,
    /// Step that failed
    pub stage: SeedStage,
    /// Rendered cause
    pub error: String,
}

/// Outcome of one event's activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationReport {
    /// Activated event
    pub public_event_id: PublicEventId,
    /// Tickets requested at creation
    pub requested: u32,
    /// Rows created, in ascending id order
    pub minted: Vec<TicketId>,
    /// Tickets that were not seeded, in ascending index order
    pub failures: Vec<SeedFailure>,
}

impl ActivationReport {
    /// Whether every requested ticket was seeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && u32::try_from(self.minted.len()).is_ok_and(|n| n == self.requested)
    }
}

/// Progress of an event's activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivationStatus {
    /// Registered but not started
    Pending,
    /// Funding or seeding in progress
    Running,
    /// Seeding finished; some tickets may have failed
    Completed(ActivationReport),
    /// Activation stopped before seeding any ticket
    Failed(String),
}

impl ActivationStatus {
    /// Whether no further progress will be reported.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Caller's view of one running activation.
///
/// # Example
///
/// ```ignore
/// let (event, mut activation) = orchestrator.create_public_event(organizer, new_event).await?;
/// if let ActivationStatus::Completed(report) = activation.wait().await {
///     println!("minted {} of {}", report.minted.len(), report.requested);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ActivationHandle {
    public_event_id: PublicEventId,
    status: watch::Receiver<ActivationStatus>,
}

impl ActivationHandle {
    /// Event being activated.
    #[must_use]
    pub const fn public_event_id(&self) -> PublicEventId {
        self.public_event_id
    }

    /// Current status without waiting.
    #[must_use]
    pub fn status(&self) -> ActivationStatus {
        self.status.borrow().clone()
    }

    /// Wait until activation completes or fails.
    ///
    /// If the activation task goes away without finishing, returns the last
    /// status it published.
    pub async fn wait(&mut self) -> ActivationStatus {
        loop {
            {
                let current = self.status.borrow_and_update();
                if current.is_finished() {
                    return current.clone();
                }
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Publishing side of one activation.
#[derive(Debug)]
pub(crate) struct ActivationProgress {
    status: watch::Sender<ActivationStatus>,
}

impl ActivationProgress {
    pub(crate) fn running(&self) {
        self.status.send_replace(ActivationStatus::Running);
    }

    pub(crate) fn finish(self, status: ActivationStatus) {
        self.status.send_replace(status);
    }
}

/// Activations started by this process, by event.
#[derive(Clone, Debug, Default)]
pub struct ActivationTracker {
    activations: Arc<Mutex<HashMap<PublicEventId, watch::Receiver<ActivationStatus>>>>,
}

impl ActivationTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, event: PublicEventId) -> (ActivationProgress, ActivationHandle) {
        let (tx, rx) = watch::channel(ActivationStatus::Pending);
        self.activations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(event, rx.clone());

        (
            ActivationProgress { status: tx },
            ActivationHandle {
                public_event_id: event,
                status: rx,
            },
        )
    }

    /// Status of `event`'s activation, if this process started one.
    #[must_use]
    pub fn status(&self, event: PublicEventId) -> Option<ActivationStatus> {
        self.activations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&event)
            .map(|rx| rx.borrow().clone())
    }
}
