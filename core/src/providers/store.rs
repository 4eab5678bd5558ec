//! Relational ticket store trait.

use crate::error::PersistenceError;
use crate::types::{
    DivergenceRecord, DivergenceStatus, EventTicket, HeldTicket, NewDivergence, NewEventTicket,
    NewPublicEvent, PublicEvent, PublicEventId, PublicEventListing, TicketId, TicketUpdate, UserId,
};

/// Relational store for public events and their tickets.
///
/// Every mutation runs in its own short-lived transaction. No transaction
/// is held open across a ledger round trip.
pub trait TicketStore: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════
    // Public events
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a public event together with its temporary account address
    /// and passphrase.
    ///
    /// # Errors
    ///
    /// Returns error if the insert or commit fails.
    fn insert_public_event(
        &self,
        event: &NewPublicEvent,
        temp_account_address: &str,
        temp_security_passphrase: &str,
    ) -> impl std::future::Future<Output = Result<PublicEvent, PersistenceError>> + Send;

    /// Fetch a public event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. A missing row is `Ok(None)`.
    fn get_public_event(
        &self,
        id: PublicEventId,
    ) -> impl std::future::Future<Output = Result<Option<PublicEvent>, PersistenceError>> + Send;

    /// All public events with their organizer-held ACTIVE count and resale
    /// listings, ordered by event id.
    ///
    /// # Errors
    ///
    /// Returns error if a query fails.
    fn list_public_events(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PublicEventListing>, PersistenceError>> + Send;

    // ═══════════════════════════════════════════════════════════════════════
    // Tickets
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a freshly seeded ticket: status ACTIVE, held by the organizer.
    ///
    /// # Errors
    ///
    /// Returns error if the insert or commit fails.
    fn insert_ticket(
        &self,
        ticket: &NewEventTicket,
    ) -> impl std::future::Future<Output = Result<EventTicket, PersistenceError>> + Send;

    /// Fetch a ticket.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. A missing row is `Ok(None)`.
    fn get_ticket(
        &self,
        id: TicketId,
    ) -> impl std::future::Future<Output = Result<Option<EventTicket>, PersistenceError>> + Send;

    /// The lowest-id ACTIVE ticket of `event` still held by its organizer.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. No qualifying ticket is `Ok(None)`.
    fn pick_first_sale_ticket(
        &self,
        event: PublicEventId,
    ) -> impl std::future::Future<Output = Result<Option<EventTicket>, PersistenceError>> + Send;

    /// Apply a conditional update in a transaction scoped to that one row.
    ///
    /// Returns the updated row.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The row no longer has the expected holder and status
    ///   → `PersistenceError::NoRowsAffected` (rolled back)
    /// - The statement or commit fails
    fn apply_ticket_update(
        &self,
        update: &TicketUpdate,
    ) -> impl std::future::Future<Output = Result<EventTicket, PersistenceError>> + Send;

    /// Number of ticket rows for `event`: its advertised inventory.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn count_tickets(
        &self,
        event: PublicEventId,
    ) -> impl std::future::Future<Output = Result<u64, PersistenceError>> + Send;

    /// Tickets currently held by `user`, each with its public event.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_tickets_held_by(
        &self,
        user: UserId,
    ) -> impl std::future::Future<Output = Result<Vec<HeldTicket>, PersistenceError>> + Send;

    // ═══════════════════════════════════════════════════════════════════════
    // Divergences
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a ledger/relational divergence. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    fn record_divergence(
        &self,
        divergence: &NewDivergence,
    ) -> impl std::future::Future<Output = Result<i64, PersistenceError>> + Send;

    /// Divergences with `status`, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_divergences(
        &self,
        status: DivergenceStatus,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<DivergenceRecord>, PersistenceError>> + Send;

    /// Fetch one divergence.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails. A missing record is `Ok(None)`.
    fn get_divergence(
        &self,
        id: i64,
    ) -> impl std::future::Future<Output = Result<Option<DivergenceRecord>, PersistenceError>> + Send;

    /// Close a pending divergence as resolved or discarded.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The record is not pending → `PersistenceError::NoRowsAffected`
    /// - The update fails
    fn close_divergence(
        &self,
        id: i64,
        status: DivergenceStatus,
        notes: &str,
    ) -> impl std::future::Future<Output = Result<(), PersistenceError>> + Send;
}
