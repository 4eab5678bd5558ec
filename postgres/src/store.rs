//! `PostgreSQL` implementation of [`TicketStore`].
//!
//! Two tables carry the relational half of custody:
//!
//! ```text
//! public_event (1) ──── (N) event_tickets
//!                              │
//!                              └── asset_id UNIQUE: one row per ledger asset
//! ```
//!
//! Ticket updates are conditional on the holder and status the caller last
//! observed. Each runs in a transaction scoped to that one row, and the
//! transaction is rolled back when the condition no longer holds.

use std::collections::BTreeMap;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use ticket_custody_core::{
    AssetId, DivergenceRecord, DivergenceStatus, EventTicket, HeldTicket, NewDivergence,
    NewEventTicket, NewPublicEvent, PersistenceError, PublicEvent, PublicEventId,
    PublicEventListing, TicketId, TicketStatus, TicketStore, TicketUpdate, UserId,
};

use crate::divergences::DivergenceLog;

const EVENT_COLUMNS: &str = r"
    public_event_id, date_time, title, description, image, total_tickets, price,
    temp_account_address, temp_security_passphrase
";

const TICKET_COLUMNS: &str = r"
    event_ticket_id, public_event_id, business_user_id, asset_id, current_holder_id,
    status, price, available_to_resell
";

// ============================================================================
// Row mapping
// ============================================================================

pub(crate) fn database_error(context: &str, e: &sqlx::Error) -> PersistenceError {
    PersistenceError::Database(format!("Failed to {context}: {e}"))
}

#[allow(clippy::needless_pass_by_value)] // used as `map_err(decode_error)`
pub(crate) fn decode_error(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Decode(e.to_string())
}

pub(crate) fn asset_to_db(asset: AssetId) -> Result<i64, PersistenceError> {
    i64::try_from(asset.0)
        .map_err(|_| PersistenceError::Decode(format!("asset id {asset} out of range")))
}

fn row_to_event(row: &PgRow) -> Result<PublicEvent, PersistenceError> {
    let total_tickets: i32 = row.try_get("total_tickets").map_err(decode_error)?;

    Ok(PublicEvent {
        id: PublicEventId(row.try_get("public_event_id").map_err(decode_error)?),
        date_time: row.try_get("date_time").map_err(decode_error)?,
        title: row.try_get("title").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        image: row.try_get("image").map_err(decode_error)?,
        total_tickets: u32::try_from(total_tickets).map_err(|_| {
            PersistenceError::Decode(format!("negative total_tickets {total_tickets}"))
        })?,
        price: row.try_get("price").map_err(decode_error)?,
        temp_account_address: row.try_get("temp_account_address").map_err(decode_error)?,
        temp_security_passphrase: row
            .try_get("temp_security_passphrase")
            .map_err(decode_error)?,
    })
}

fn row_to_ticket(row: &PgRow) -> Result<EventTicket, PersistenceError> {
    let asset_id: i64 = row.try_get("asset_id").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;

    Ok(EventTicket {
        id: TicketId(row.try_get("event_ticket_id").map_err(decode_error)?),
        public_event_id: PublicEventId(row.try_get("public_event_id").map_err(decode_error)?),
        business_user_id: UserId(row.try_get("business_user_id").map_err(decode_error)?),
        asset_id: AssetId(
            u64::try_from(asset_id)
                .map_err(|_| PersistenceError::Decode(format!("negative asset id {asset_id}")))?,
        ),
        current_holder_id: UserId(row.try_get("current_holder_id").map_err(decode_error)?),
        status: TicketStatus::parse(&status)
            .ok_or_else(|| PersistenceError::Decode(format!("unknown ticket status {status}")))?,
        price: row.try_get("price").map_err(decode_error)?,
        available_to_resell: row.try_get("available_to_resell").map_err(decode_error)?,
    })
}

// ============================================================================
// Store
// ============================================================================

/// Ticket store backed by `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use ticket_custody_postgres::{PostgresConfig, PostgresTicketStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PostgresConfig::new("postgres://localhost/tickets").connect().await?;
/// let store = PostgresTicketStore::new(pool);
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
    divergences: DivergenceLog,
}

impl PostgresTicketStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let divergences = DivergenceLog::new(pool.clone());
        Self { pool, divergences }
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Divergence log sharing this store's pool.
    #[must_use]
    pub const fn divergences(&self) -> &DivergenceLog {
        &self.divergences
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if migrations fail.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn events_by_id(
        &self,
        ids: &[i64],
    ) -> Result<BTreeMap<PublicEventId, PublicEvent>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM public_event WHERE public_event_id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("load public events", &e))?;

        rows.iter()
            .map(|row| row_to_event(row).map(|event| (event.id, event)))
            .collect()
    }
}

impl TicketStore for PostgresTicketStore {
    async fn insert_public_event(
        &self,
        event: &NewPublicEvent,
        temp_account_address: &str,
        temp_security_passphrase: &str,
    ) -> Result<PublicEvent, PersistenceError> {
        let total_tickets = i32::try_from(event.total_tickets).map_err(|_| {
            PersistenceError::Decode(format!("total_tickets {} out of range", event.total_tickets))
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;

        let row = sqlx::query(&format!(
            "INSERT INTO public_event (
                date_time, title, description, image, total_tickets, price,
                temp_account_address, temp_security_passphrase
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event.date_time)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.image)
        .bind(total_tickets)
        .bind(event.price)
        .bind(temp_account_address)
        .bind(temp_security_passphrase)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| database_error("insert public event", &e))?;
        let stored = row_to_event(&row)?;

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Commit(e.to_string()))?;

        tracing::debug!(public_event_id = %stored.id, "Inserted public event");
        Ok(stored)
    }

    async fn get_public_event(
        &self,
        id: PublicEventId,
    ) -> Result<Option<PublicEvent>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM public_event WHERE public_event_id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("get public event", &e))?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn list_public_events(&self) -> Result<Vec<PublicEventListing>, PersistenceError> {
        let event_rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM public_event ORDER BY public_event_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("list public events", &e))?;

        let available: Vec<(i64, i64)> = sqlx::query_as(
            r"
            SELECT public_event_id, COUNT(*)
            FROM event_tickets
            WHERE status = 'ACTIVE' AND current_holder_id = business_user_id
            GROUP BY public_event_id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("count available tickets", &e))?;
        let available: BTreeMap<i64, i64> = available.into_iter().collect();

        let resale_rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM event_tickets
             WHERE status = 'RESELL'
             ORDER BY event_ticket_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("list resale tickets", &e))?;

        let mut resale: BTreeMap<PublicEventId, Vec<EventTicket>> = BTreeMap::new();
        for row in &resale_rows {
            let ticket = row_to_ticket(row)?;
            resale.entry(ticket.public_event_id).or_default().push(ticket);
        }

        event_rows
            .iter()
            .map(|row| {
                let event = row_to_event(row)?;
                let count = available.get(&event.id.0).copied().unwrap_or(0);
                Ok(PublicEventListing {
                    available_tickets: u64::try_from(count).unwrap_or(0),
                    resale_tickets: resale.remove(&event.id).unwrap_or_default(),
                    event,
                })
            })
            .collect()
    }

    async fn insert_ticket(&self, ticket: &NewEventTicket) -> Result<EventTicket, PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;

        let row = sqlx::query(&format!(
            "INSERT INTO event_tickets (
                public_event_id, business_user_id, asset_id, current_holder_id, status, price
             ) VALUES ($1, $2, $3, $2, 'ACTIVE', $4)
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(ticket.public_event_id.0)
        .bind(ticket.business_user_id.0)
        .bind(asset_to_db(ticket.asset_id)?)
        .bind(ticket.price)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| database_error("insert ticket", &e))?;
        let stored = row_to_ticket(&row)?;

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Commit(e.to_string()))?;

        Ok(stored)
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<EventTicket>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM event_tickets WHERE event_ticket_id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("get ticket", &e))?;

        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn pick_first_sale_ticket(
        &self,
        event: PublicEventId,
    ) -> Result<Option<EventTicket>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM event_tickets
             WHERE public_event_id = $1
               AND status = 'ACTIVE'
               AND current_holder_id = business_user_id
             ORDER BY event_ticket_id
             LIMIT 1"
        ))
        .bind(event.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("pick first-sale ticket", &e))?;

        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn apply_ticket_update(&self, update: &TicketUpdate) -> Result<EventTicket, PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;

        let result = sqlx::query(
            r"
            UPDATE event_tickets
            SET current_holder_id = COALESCE($2::BIGINT, current_holder_id),
                status = COALESCE($3::TEXT, status),
                price = COALESCE($4::BIGINT, price),
                available_to_resell = COALESCE($5::BOOLEAN, available_to_resell),
                updated_at = NOW()
            WHERE event_ticket_id = $1
              AND current_holder_id = $6
              AND status = $7
            ",
        )
        .bind(update.ticket_id.0)
        .bind(update.change.holder.map(|u| u.0))
        .bind(update.change.status.map(|s| s.as_str()))
        .bind(update.change.price)
        .bind(update.change.available_to_resell)
        .bind(update.expected_holder.0)
        .bind(update.expected_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| database_error("update ticket", &e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| database_error("roll back ticket update", &e))?;
            return Err(PersistenceError::NoRowsAffected {
                table: "event_tickets",
                key: update.ticket_id.to_string(),
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM event_tickets WHERE event_ticket_id = $1"
        ))
        .bind(update.ticket_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| database_error("reload ticket", &e))?;
        let ticket = row_to_ticket(&row)?;

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Commit(e.to_string()))?;

        Ok(ticket)
    }

    async fn count_tickets(&self, event: PublicEventId) -> Result<u64, PersistenceError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_tickets WHERE public_event_id = $1")
                .bind(event.0)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| database_error("count tickets", &e))?;

        u64::try_from(count).map_err(|_| PersistenceError::Decode(format!("negative count {count}")))
    }

    async fn list_tickets_held_by(&self, user: UserId) -> Result<Vec<HeldTicket>, PersistenceError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM event_tickets
             WHERE current_holder_id = $1
             ORDER BY event_ticket_id"
        ))
        .bind(user.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("list held tickets", &e))?;

        let tickets = rows
            .iter()
            .map(row_to_ticket)
            .collect::<Result<Vec<_>, _>>()?;
        let event_ids: Vec<i64> = tickets.iter().map(|t| t.public_event_id.0).collect();
        let events = self.events_by_id(&event_ids).await?;

        tickets
            .into_iter()
            .map(|ticket| {
                let event = events.get(&ticket.public_event_id).cloned().ok_or_else(|| {
                    PersistenceError::Decode(format!(
                        "ticket {} references missing public event {}",
                        ticket.id, ticket.public_event_id
                    ))
                })?;
                Ok(HeldTicket { event, ticket })
            })
            .collect()
    }

    async fn record_divergence(&self, divergence: &NewDivergence) -> Result<i64, PersistenceError> {
        self.divergences.record(divergence).await
    }

    async fn list_divergences(
        &self,
        status: DivergenceStatus,
        limit: usize,
    ) -> Result<Vec<DivergenceRecord>, PersistenceError> {
        self.divergences.list_by_status(status, limit).await
    }

    async fn get_divergence(&self, id: i64) -> Result<Option<DivergenceRecord>, PersistenceError> {
        self.divergences.get_by_id(id).await
    }

    async fn close_divergence(
        &self,
        id: i64,
        status: DivergenceStatus,
        notes: &str,
    ) -> Result<(), PersistenceError> {
        self.divergences.close(id, status, notes).await
    }
}
