//! In-memory ticket store.

use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use ticket_custody_core::{
    DivergenceRecord, DivergenceStatus, EventTicket, HeldTicket, NewDivergence, NewEventTicket,
    NewPublicEvent, PersistenceError, PublicEvent, PublicEventId, PublicEventListing, TicketId,
    TicketStatus, TicketStore, TicketUpdate, UserId,
};

#[derive(Debug, Default)]
struct StoreState {
    events: BTreeMap<PublicEventId, PublicEvent>,
    tickets: BTreeMap<TicketId, EventTicket>,
    divergences: BTreeMap<i64, DivergenceRecord>,
    next_event: i64,
    next_ticket: i64,
    next_divergence: i64,
    fail_updates: Vec<PersistenceError>,
    fail_ticket_inserts: Vec<PersistenceError>,
    fail_divergence_records: usize,
    update_attempts: usize,
}

/// Relational store kept in ordered maps.
///
/// Updates are conditional exactly as in the SQL store: a row whose holder
/// or status no longer matches reports `NoRowsAffected`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next ticket update fail with `error` and leave the row as is.
    pub fn fail_next_update(&self, error: PersistenceError) {
        self.state.lock().unwrap().fail_updates.push(error);
    }

    /// Make the next ticket update fail at commit.
    pub fn fail_next_commit(&self) {
        self.fail_next_update(PersistenceError::Commit("injected failure".to_string()));
    }

    /// Make the next ticket insert fail with `error`.
    pub fn fail_next_ticket_insert(&self, error: PersistenceError) {
        self.state.lock().unwrap().fail_ticket_inserts.push(error);
    }

    /// Make the next divergence record fail.
    pub fn fail_next_divergence_record(&self) {
        self.state.lock().unwrap().fail_divergence_records += 1;
    }

    /// All tickets of `event`, ordered by id.
    #[must_use]
    pub fn tickets_for(&self, event: PublicEventId) -> Vec<EventTicket> {
        let state = self.state.lock().unwrap();
        state
            .tickets
            .values()
            .filter(|t| t.public_event_id == event)
            .cloned()
            .collect()
    }

    /// A ticket by id.
    #[must_use]
    pub fn ticket(&self, id: TicketId) -> Option<EventTicket> {
        self.state.lock().unwrap().tickets.get(&id).cloned()
    }

    /// Overwrite a ticket row directly.
    pub fn put_ticket(&self, ticket: EventTicket) {
        self.state.lock().unwrap().tickets.insert(ticket.id, ticket);
    }

    /// Every recorded divergence.
    #[must_use]
    pub fn divergences(&self) -> Vec<DivergenceRecord> {
        self.state
            .lock()
            .unwrap()
            .divergences
            .values()
            .cloned()
            .collect()
    }

    /// Number of ticket updates attempted, including failed ones.
    #[must_use]
    pub fn update_attempts(&self) -> usize {
        self.state.lock().unwrap().update_attempts
    }
}

fn apply(ticket: &mut EventTicket, update: &TicketUpdate) {
    let change = &update.change;
    if let Some(holder) = change.holder {
        ticket.current_holder_id = holder;
    }
    if let Some(status) = change.status {
        ticket.status = status;
    }
    if let Some(price) = change.price {
        ticket.price = price;
    }
    if let Some(flag) = change.available_to_resell {
        ticket.available_to_resell = Some(flag);
    }
}

impl TicketStore for InMemoryTicketStore {
    fn insert_public_event(
        &self,
        event: &NewPublicEvent,
        temp_account_address: &str,
        temp_security_passphrase: &str,
    ) -> impl Future<Output = Result<PublicEvent, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        let event = event.clone();
        let address = temp_account_address.to_string();
        let passphrase = temp_security_passphrase.to_string();

        async move {
            let mut state = state.lock().unwrap();
            state.next_event += 1;
            let row = PublicEvent {
                id: PublicEventId(state.next_event),
                date_time: event.date_time,
                title: event.title,
                description: event.description,
                image: event.image,
                total_tickets: event.total_tickets,
                price: event.price,
                temp_account_address: address,
                temp_security_passphrase: passphrase,
            };
            state.events.insert(row.id, row.clone());
            Ok(row)
        }
    }

    fn get_public_event(
        &self,
        id: PublicEventId,
    ) -> impl Future<Output = Result<Option<PublicEvent>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        async move { Ok(state.lock().unwrap().events.get(&id).cloned()) }
    }

    fn list_public_events(
        &self,
    ) -> impl Future<Output = Result<Vec<PublicEventListing>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            let state = state.lock().unwrap();
            let listings = state
                .events
                .values()
                .map(|event| {
                    let tickets = state.tickets.values().filter(|t| t.public_event_id == event.id);
                    let available_tickets = tickets
                        .clone()
                        .filter(|t| t.held_by_organizer() && t.status == TicketStatus::Active)
                        .count() as u64;
                    let resale_tickets = tickets
                        .filter(|t| t.status == TicketStatus::Resell)
                        .cloned()
                        .collect();
                    PublicEventListing {
                        event: event.clone(),
                        available_tickets,
                        resale_tickets,
                    }
                })
                .collect();
            Ok(listings)
        }
    }

    fn insert_ticket(
        &self,
        ticket: &NewEventTicket,
    ) -> impl Future<Output = Result<EventTicket, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        let ticket = ticket.clone();

        async move {
            let mut state = state.lock().unwrap();
            if let Some(err) = state.fail_ticket_inserts.pop() {
                return Err(err);
            }
            state.next_ticket += 1;
            let row = EventTicket {
                id: TicketId(state.next_ticket),
                public_event_id: ticket.public_event_id,
                business_user_id: ticket.business_user_id,
                asset_id: ticket.asset_id,
                current_holder_id: ticket.business_user_id,
                status: TicketStatus::Active,
                price: ticket.price,
                available_to_resell: None,
            };
            state.tickets.insert(row.id, row.clone());
            Ok(row)
        }
    }

    fn get_ticket(
        &self,
        id: TicketId,
    ) -> impl Future<Output = Result<Option<EventTicket>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        async move { Ok(state.lock().unwrap().tickets.get(&id).cloned()) }
    }

    fn pick_first_sale_ticket(
        &self,
        event: PublicEventId,
    ) -> impl Future<Output = Result<Option<EventTicket>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            let state = state.lock().unwrap();
            Ok(state
                .tickets
                .values()
                .find(|t| {
                    t.public_event_id == event
                        && t.held_by_organizer()
                        && t.status == TicketStatus::Active
                })
                .cloned())
        }
    }

    fn apply_ticket_update(
        &self,
        update: &TicketUpdate,
    ) -> impl Future<Output = Result<EventTicket, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        let update = update.clone();

        async move {
            let mut state = state.lock().unwrap();
            state.update_attempts += 1;
            if let Some(err) = state.fail_updates.pop() {
                return Err(err);
            }

            let no_rows = || PersistenceError::NoRowsAffected {
                table: "event_tickets",
                key: update.ticket_id.to_string(),
            };
            let ticket = state.tickets.get_mut(&update.ticket_id).ok_or_else(no_rows)?;
            if ticket.current_holder_id != update.expected_holder
                || ticket.status != update.expected_status
            {
                return Err(no_rows());
            }
            apply(ticket, &update);
            Ok(ticket.clone())
        }
    }

    fn count_tickets(
        &self,
        event: PublicEventId,
    ) -> impl Future<Output = Result<u64, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            let state = state.lock().unwrap();
            Ok(state
                .tickets
                .values()
                .filter(|t| t.public_event_id == event)
                .count() as u64)
        }
    }

    fn list_tickets_held_by(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<HeldTicket>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            let state = state.lock().unwrap();
            Ok(state
                .tickets
                .values()
                .filter(|t| t.current_holder_id == user)
                .filter_map(|t| {
                    state.events.get(&t.public_event_id).map(|event| HeldTicket {
                        event: event.clone(),
                        ticket: t.clone(),
                    })
                })
                .collect())
        }
    }

    fn record_divergence(
        &self,
        divergence: &NewDivergence,
    ) -> impl Future<Output = Result<i64, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        let divergence = divergence.clone();

        async move {
            let mut state = state.lock().unwrap();
            if state.fail_divergence_records > 0 {
                state.fail_divergence_records -= 1;
                return Err(PersistenceError::Database("injected failure".to_string()));
            }
            state.next_divergence += 1;
            let id = state.next_divergence;
            state.divergences.insert(
                id,
                DivergenceRecord {
                    id,
                    divergence,
                    status: DivergenceStatus::Pending,
                    recorded_at: Utc::now(),
                    resolved_at: None,
                    resolution_notes: None,
                },
            );
            Ok(id)
        }
    }

    fn list_divergences(
        &self,
        status: DivergenceStatus,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DivergenceRecord>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            let state = state.lock().unwrap();
            Ok(state
                .divergences
                .values()
                .filter(|d| d.status == status)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn get_divergence(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<DivergenceRecord>, PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        async move { Ok(state.lock().unwrap().divergences.get(&id).cloned()) }
    }

    fn close_divergence(
        &self,
        id: i64,
        status: DivergenceStatus,
        notes: &str,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        let state = Arc::clone(&self.state);
        let notes = notes.to_string();

        async move {
            let mut state = state.lock().unwrap();
            let record = state
                .divergences
                .get_mut(&id)
                .filter(|d| d.status == DivergenceStatus::Pending)
                .ok_or_else(|| PersistenceError::NoRowsAffected {
                    table: "custody_divergences",
                    key: id.to_string(),
                })?;
            record.status = status;
            record.resolved_at = Some(Utc::now());
            record.resolution_notes = Some(notes);
            Ok(())
        }
    }
}
