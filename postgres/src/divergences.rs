//! Divergence log.
//!
//! Persistent record of custody changes where the ledger transfer
//! confirmed but the ticket row was not updated. Entries stay `pending`
//! until reconciliation re-applies the row update (`resolved`) or an
//! operator gives up on them (`discarded`).

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use ticket_custody_core::{
    AssetId, DivergenceRecord, DivergenceStatus, NewDivergence, PersistenceError, TicketChange,
    TicketId, TicketStatus, TicketUpdate, UserId,
};

use crate::store::{asset_to_db, database_error, decode_error};

const COLUMNS: &str = r"
    id, operation, event_ticket_id, asset_id, expected_holder_id, expected_status,
    intended_holder_id, intended_status, intended_price, intended_available_to_resell,
    error_message, status, recorded_at, resolved_at, resolution_notes
";

/// `PostgreSQL` table of ledger/relational divergences.
#[derive(Clone, Debug)]
pub struct DivergenceLog {
    pool: PgPool,
}

impl DivergenceLog {
    /// Create a log over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a divergence.
    ///
    /// # Returns
    ///
    /// The id of the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if the insert fails and
    /// [`PersistenceError::Commit`] if it does not commit.
    pub async fn record(&self, divergence: &NewDivergence) -> Result<i64, PersistenceError> {
        let update = &divergence.update;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO custody_divergences (
                operation, event_ticket_id, asset_id, expected_holder_id, expected_status,
                intended_holder_id, intended_status, intended_price,
                intended_available_to_resell, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(&divergence.operation)
        .bind(update.ticket_id.0)
        .bind(asset_to_db(divergence.asset_id)?)
        .bind(update.expected_holder.0)
        .bind(update.expected_status.as_str())
        .bind(update.change.holder.map(|u| u.0))
        .bind(update.change.status.map(|s| s.as_str()))
        .bind(update.change.price)
        .bind(update.change.available_to_resell)
        .bind(&divergence.error_message)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| database_error("record divergence", &e))?;

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Commit(e.to_string()))?;

        tracing::error!(
            divergence_id = id,
            operation = %divergence.operation,
            ticket_id = %update.ticket_id,
            asset_id = %divergence.asset_id,
            error = %divergence.error_message,
            "Custody divergence recorded"
        );

        Ok(id)
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DivergenceStatus,
        limit: usize,
    ) -> Result<Vec<DivergenceRecord>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM custody_divergences
             WHERE status = $1
             ORDER BY recorded_at ASC, id ASC
             LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("list divergences", &e))?;

        rows.iter().map(row_to_record).collect()
    }

    /// One entry.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<DivergenceRecord>, PersistenceError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM custody_divergences WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("get divergence", &e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Close a pending entry as resolved or discarded.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::NoRowsAffected`] if the entry is missing or
    /// no longer pending.
    pub async fn close(
        &self,
        id: i64,
        status: DivergenceStatus,
        notes: &str,
    ) -> Result<(), PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database_error("begin transaction", &e))?;

        let result = sqlx::query(
            r"
            UPDATE custody_divergences
            SET status = $1,
                resolved_at = NOW(),
                resolution_notes = $2
            WHERE id = $3 AND status = 'pending'
            ",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| database_error("close divergence", &e))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| database_error("roll back divergence close", &e))?;
            return Err(PersistenceError::NoRowsAffected {
                table: "custody_divergences",
                key: id.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Commit(e.to_string()))?;

        tracing::info!(divergence_id = id, status = status.as_str(), "Custody divergence closed");
        metrics::counter!("custody.divergence.closed", "status" => status.as_str()).increment(1);

        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<TicketStatus, PersistenceError> {
    TicketStatus::parse(raw)
        .ok_or_else(|| PersistenceError::Decode(format!("unknown ticket status {raw}")))
}

fn row_to_record(row: &PgRow) -> Result<DivergenceRecord, PersistenceError> {
    let expected_status: String = row.try_get("expected_status").map_err(decode_error)?;
    let intended_status: Option<String> = row.try_get("intended_status").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let asset_id: i64 = row.try_get("asset_id").map_err(decode_error)?;

    Ok(DivergenceRecord {
        id: row.try_get("id").map_err(decode_error)?,
        divergence: NewDivergence {
            operation: row.try_get("operation").map_err(decode_error)?,
            update: TicketUpdate {
                ticket_id: TicketId(row.try_get("event_ticket_id").map_err(decode_error)?),
                expected_holder: UserId(row.try_get("expected_holder_id").map_err(decode_error)?),
                expected_status: parse_status(&expected_status)?,
                change: TicketChange {
                    holder: row
                        .try_get::<Option<i64>, _>("intended_holder_id")
                        .map_err(decode_error)?
                        .map(UserId),
                    status: intended_status.as_deref().map(parse_status).transpose()?,
                    price: row.try_get("intended_price").map_err(decode_error)?,
                    available_to_resell: row
                        .try_get("intended_available_to_resell")
                        .map_err(decode_error)?,
                },
            },
            asset_id: AssetId(
                u64::try_from(asset_id)
                    .map_err(|_| PersistenceError::Decode(format!("negative asset id {asset_id}")))?,
            ),
            error_message: row.try_get("error_message").map_err(decode_error)?,
        },
        status: DivergenceStatus::parse(&status)
            .ok_or_else(|| PersistenceError::Decode(format!("unknown divergence status {status}")))?,
        recorded_at: row.try_get("recorded_at").map_err(decode_error)?,
        resolved_at: row.try_get("resolved_at").map_err(decode_error)?,
        resolution_notes: row.try_get("resolution_notes").map_err(decode_error)?,
    })
}
