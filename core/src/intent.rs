//! Transfer intents.
//!
//! Callers describe a custody operation with a flat [`TransferRequest`]
//! where zero or absent fields mean "unset". [`TransferIntent`] is the typed
//! form the orchestrator accepts; converting between them applies a fixed
//! precedence and performs no I/O:
//!
//! ```text
//! price_to_resell > 0            → Resell
//! from_user_id and to_user_id    → DirectTransfer
//! status == "REDEEM"             → Redeem
//! public_event_id, no ticket id  → FirstSaleBuy
//! ticket id and public_event_id  → ResaleBuy
//! otherwise                      → Validation error
//! ```

use crate::error::CustodyError;
use crate::types::{PublicEventId, TicketId, TicketStatus, UserId};
use serde::{Deserialize, Serialize};

/// One custody operation against a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferIntent {
    /// List a held ticket for resale. No ledger interaction.
    Resell {
        /// Ticket to list
        ticket_id: TicketId,
        /// Current holder
        seller: UserId,
        /// Resale price
        price: i64,
    },
    /// Holder sends a ticket to another user.
    DirectTransfer {
        /// Ticket to send
        ticket_id: TicketId,
        /// Current holder
        from: UserId,
        /// Recipient
        to: UserId,
    },
    /// Consume a ticket at the venue. Terminal.
    Redeem {
        /// Ticket to redeem
        ticket_id: TicketId,
        /// Current holder
        holder: UserId,
    },
    /// Buy any ticket the organizer still holds for an event.
    FirstSaleBuy {
        /// Event to buy from
        public_event_id: PublicEventId,
        /// Buyer
        buyer: UserId,
    },
    /// Buy a specific ticket listed for resale.
    ResaleBuy {
        /// Listed ticket
        ticket_id: TicketId,
        /// Event the ticket belongs to
        public_event_id: PublicEventId,
        /// Buyer
        buyer: UserId,
    },
}

impl TransferIntent {
    /// Operation name used in logs, metrics and errors.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Resell { .. } => "resell",
            Self::DirectTransfer { .. } => "direct_transfer",
            Self::Redeem { .. } => "redeem",
            Self::FirstSaleBuy { .. } => "first_sale_buy",
            Self::ResaleBuy { .. } => "resale_buy",
        }
    }
}

/// Flat transfer request as received from the caller-facing layer.
///
/// Zero ids and a zero price mean "unset".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Ticket id.
    #[serde(default)]
    pub event_ticket_id: i64,
    /// Public event id.
    #[serde(default)]
    pub public_event_id: i64,
    /// Acting holder (sender, seller or redeemer).
    #[serde(default)]
    pub from_user_id: i64,
    /// Recipient or buyer.
    #[serde(default)]
    pub to_user_id: i64,
    /// Requested status tag.
    #[serde(default)]
    pub status: Option<String>,
    /// Resale price.
    #[serde(default)]
    pub price_to_resell: i64,
}

fn required_ticket(req: &TransferRequest, operation: &str) -> Result<TicketId, CustodyError> {
    if req.event_ticket_id > 0 {
        Ok(TicketId(req.event_ticket_id))
    } else {
        Err(CustodyError::Validation(format!(
            "{operation} requires event_ticket_id"
        )))
    }
}

fn required_user(id: i64, field: &str, operation: &str) -> Result<UserId, CustodyError> {
    if id > 0 {
        Ok(UserId(id))
    } else {
        Err(CustodyError::Validation(format!(
            "{operation} requires {field}"
        )))
    }
}

impl TryFrom<TransferRequest> for TransferIntent {
    type Error = CustodyError;

    fn try_from(req: TransferRequest) -> Result<Self, Self::Error> {
        if req.price_to_resell < 0 {
            return Err(CustodyError::Validation(
                "price_to_resell must not be negative".to_string(),
            ));
        }

        if req.price_to_resell > 0 {
            return Ok(Self::Resell {
                ticket_id: required_ticket(&req, "resell")?,
                seller: required_user(req.from_user_id, "from_user_id", "resell")?,
                price: req.price_to_resell,
            });
        }

        if req.from_user_id > 0 && req.to_user_id > 0 {
            if req.from_user_id == req.to_user_id {
                return Err(CustodyError::Validation(
                    "direct_transfer recipient must differ from sender".to_string(),
                ));
            }
            return Ok(Self::DirectTransfer {
                ticket_id: required_ticket(&req, "direct_transfer")?,
                from: UserId(req.from_user_id),
                to: UserId(req.to_user_id),
            });
        }

        if let Some(tag) = req.status.as_deref() {
            if TicketStatus::parse(tag) == Some(TicketStatus::Redeem) {
                return Ok(Self::Redeem {
                    ticket_id: required_ticket(&req, "redeem")?,
                    holder: required_user(req.from_user_id, "from_user_id", "redeem")?,
                });
            }
        }

        if req.public_event_id > 0 && req.event_ticket_id <= 0 {
            return Ok(Self::FirstSaleBuy {
                public_event_id: PublicEventId(req.public_event_id),
                buyer: required_user(req.to_user_id, "to_user_id", "first_sale_buy")?,
            });
        }

        if req.public_event_id > 0 && req.event_ticket_id > 0 {
            return Ok(Self::ResaleBuy {
                ticket_id: TicketId(req.event_ticket_id),
                public_event_id: PublicEventId(req.public_event_id),
                buyer: required_user(req.to_user_id, "to_user_id", "resale_buy")?,
            });
        }

        Err(CustodyError::Validation(
            "request matches no transfer operation".to_string(),
        ))
    }
}
