//! Domain types for ticket custody.
//!
//! Identifiers, the public event and ticket rows, and the update shapes the
//! orchestrator hands to the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a registered user (organizer or ticket holder).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a `Public_Event` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicEventId(pub i64);

impl fmt::Display for PublicEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an `Event_Tickets` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger-assigned identifier of a minted ticket asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ticket status
// ============================================================================

/// Lifecycle status of a ticket.
///
/// ```text
/// ACTIVE ──resell──► RESELL ──resale buy──► ACTIVE
///   │                  │
///   └─────redeem───────┴──────────────────► REDEEM (terminal)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Held normally; may be transferred, listed or redeemed.
    Active,
    /// Listed for resale at the ticket's current price.
    Resell,
    /// Consumed at the venue. No further operation succeeds.
    Redeem,
}

impl TicketStatus {
    /// Tag stored in the `status` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Resell => "RESELL",
            Self::Redeem => "REDEEM",
        }
    }

    /// Parse a stored status tag.
    ///
    /// Returns `None` for unknown tags.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "RESELL" => Some(Self::Resell),
            "REDEEM" => Some(Self::Redeem),
            _ => None,
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Redeem)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Public events
// ============================================================================

/// Organizer's request to publish an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPublicEvent {
    /// When the event takes place.
    pub date_time: Option<DateTime<Utc>>,
    /// Event title.
    pub title: Option<String>,
    /// Event description.
    pub description: Option<String>,
    /// Image reference (URL or storage key).
    pub image: Option<String>,
    /// Number of tickets to mint.
    pub total_tickets: u32,
    /// Unit price of a first-sale ticket, in minor currency units.
    pub price: i64,
}

/// A stored `Public_Event` row.
///
/// Immutable after creation. The temporary account fields identify the
/// ledger account that minted and seeded this event's tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEvent {
    /// Row identifier.
    pub id: PublicEventId,
    /// When the event takes place.
    pub date_time: Option<DateTime<Utc>>,
    /// Event title.
    pub title: Option<String>,
    /// Event description.
    pub description: Option<String>,
    /// Image reference.
    pub image: Option<String>,
    /// Number of tickets requested at creation.
    pub total_tickets: u32,
    /// First-sale unit price.
    pub price: i64,
    /// Address of the temporary custodial account.
    pub temp_account_address: String,
    /// Recovery passphrase of the temporary custodial account.
    #[serde(skip_serializing, default)]
    pub temp_security_passphrase: String,
}

// ============================================================================
// Tickets
// ============================================================================

/// A stored `Event_Tickets` row: the off-ledger shadow of one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTicket {
    /// Row identifier.
    pub id: TicketId,
    /// Owning public event.
    pub public_event_id: PublicEventId,
    /// Organizer that minted the ticket.
    pub business_user_id: UserId,
    /// Ledger asset this row mirrors.
    pub asset_id: AssetId,
    /// User whose account holds the asset on the ledger.
    pub current_holder_id: UserId,
    /// Lifecycle status.
    pub status: TicketStatus,
    /// Current price (resale price while listed).
    pub price: i64,
    /// Whether the ticket is offered for resale.
    pub available_to_resell: Option<bool>,
}

impl EventTicket {
    /// Whether the organizer still holds this ticket.
    #[must_use]
    pub fn held_by_organizer(&self) -> bool {
        self.business_user_id == self.current_holder_id
    }
}

/// Insert shape for a freshly seeded ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEventTicket {
    /// Owning public event.
    pub public_event_id: PublicEventId,
    /// Organizer; also the initial holder.
    pub business_user_id: UserId,
    /// Minted asset.
    pub asset_id: AssetId,
    /// First-sale price.
    pub price: i64,
}

/// Column changes applied by a ticket update. `None` leaves a column as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TicketChange {
    /// New holder.
    pub holder: Option<UserId>,
    /// New status.
    pub status: Option<TicketStatus>,
    /// New price.
    pub price: Option<i64>,
    /// New resale flag.
    pub available_to_resell: Option<bool>,
}

/// A conditional single-row ticket update.
///
/// The update only applies while the row still has `expected_holder` and
/// `expected_status`; otherwise the store reports zero affected rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketUpdate {
    /// Row to update.
    pub ticket_id: TicketId,
    /// Holder the row must currently have.
    pub expected_holder: UserId,
    /// Status the row must currently have.
    pub expected_status: TicketStatus,
    /// Columns to set.
    pub change: TicketChange,
}

// ============================================================================
// Read models
// ============================================================================

/// A public event as advertised to buyers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicEventListing {
    /// The event.
    pub event: PublicEvent,
    /// Tickets still held by the organizer in ACTIVE status.
    pub available_tickets: u64,
    /// Tickets currently listed for resale.
    pub resale_tickets: Vec<EventTicket>,
}

/// A ticket paired with its public event, as shown to the holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldTicket {
    /// The event the ticket admits to.
    pub event: PublicEvent,
    /// The ticket.
    pub ticket: EventTicket,
}

// ============================================================================
// Divergences
// ============================================================================

/// Status of a recorded ledger/relational divergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivergenceStatus {
    /// Awaiting reconciliation.
    Pending,
    /// The relational update was re-applied.
    Resolved,
    /// An operator decided not to reconcile.
    Discarded,
}

impl DivergenceStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// A divergence about to be recorded: the ledger moved but the row did not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDivergence {
    /// Orchestrator operation that diverged.
    pub operation: String,
    /// The ticket update that failed to commit.
    pub update: TicketUpdate,
    /// Asset that moved on the ledger.
    pub asset_id: AssetId,
    /// Error reported by the relational store.
    pub error_message: String,
}

/// A recorded divergence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DivergenceRecord {
    /// Record identifier.
    pub id: i64,
    /// What diverged.
    pub divergence: NewDivergence,
    /// Reconciliation status.
    pub status: DivergenceStatus,
    /// When the divergence was recorded.
    pub recorded_at: DateTime<Utc>,
    /// When it was resolved or discarded.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator or process notes.
    pub resolution_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_stored_tag() {
        for status in [TicketStatus::Active, TicketStatus::Resell, TicketStatus::Redeem] {
            assert_eq!(TicketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::parse("active"), None);
    }

    #[test]
    fn redeem_is_the_only_terminal_status() {
        assert!(TicketStatus::Redeem.is_terminal());
        assert!(!TicketStatus::Active.is_terminal());
        assert!(!TicketStatus::Resell.is_terminal());
    }

    #[test]
    fn organizer_holding_is_detected() {
        let mut ticket = EventTicket {
            id: TicketId(1),
            public_event_id: PublicEventId(1),
            business_user_id: UserId(7),
            asset_id: AssetId(100),
            current_holder_id: UserId(7),
            status: TicketStatus::Active,
            price: 500,
            available_to_resell: None,
        };
        assert!(ticket.held_by_organizer());

        ticket.current_holder_id = UserId(8);
        assert!(!ticket.held_by_organizer());
    }

    #[test]
    fn temp_passphrase_is_not_serialized() {
        let event = PublicEvent {
            id: PublicEventId(3),
            date_time: None,
            title: Some("Gala".to_string()),
            description: None,
            image: None,
            total_tickets: 2,
            price: 1_000,
            temp_account_address: "addr".to_string(),
            temp_security_passphrase: "secret words".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("addr"));
        assert!(!json.contains("secret words"));
    }
}
