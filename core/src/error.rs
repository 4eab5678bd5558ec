//! Error types for ticket custody operations.
//!
//! Each collaborator has its own error type ([`LedgerError`],
//! [`SecretStoreError`], [`PersistenceError`]). The orchestrator wraps them
//! in [`CustodyError`] together with the operation name and the key that
//! identifies the affected entity.
//!
//! | Variant        | Ledger moved? | Category         |
//! |----------------|---------------|------------------|
//! | `Validation`   | no            | Rejected         |
//! | `NotFound`     | no            | Rejected         |
//! | `TicketState`  | no            | Rejected         |
//! | `Ledger`       | no            | RetryableFailure |
//! | `SecretStore`  | no            | RetryableFailure |
//! | `Persistence`  | no            | RetryableFailure |
//! | `Diverged`     | **yes**       | RetryableFailure |

use crate::types::{AssetId, TicketId, TicketStatus, UserId};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, CustodyError>;

// ============================================================================
// Ledger
// ============================================================================

/// Ledger operation that produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerOperation {
    /// Key generation.
    CreateAccount,
    /// Native currency payment.
    Fund,
    /// Asset creation.
    MintAsset,
    /// Asset opt-in.
    OptIn,
    /// Asset transfer.
    Transfer,
    /// Confirmation polling.
    WaitForConfirmation,
    /// Account asset holding lookup.
    AccountAssets,
    /// Account balance lookup.
    AccountBalance,
    /// Suggested transaction parameters lookup.
    SuggestedParams,
    /// Node status lookup.
    Status,
    /// Building the client connection.
    Connect,
}

impl LedgerOperation {
    /// Name used in logs and error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAccount => "create_account",
            Self::Fund => "fund",
            Self::MintAsset => "mint_asset",
            Self::OptIn => "opt_in",
            Self::Transfer => "transfer",
            Self::WaitForConfirmation => "wait_for_confirmation",
            Self::AccountAssets => "account_assets",
            Self::AccountBalance => "account_balance",
            Self::SuggestedParams => "suggested_params",
            Self::Status => "status",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a ledger failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerErrorKind {
    /// Network or HTTP failure talking to the node.
    #[error("transport error: {0}")]
    Transport(String),

    /// The node rejected the transaction or request.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// The sending account cannot cover the amount plus fees.
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The receiving account has not opted into the asset.
    #[error("account not opted in: {0}")]
    NotOptedIn(String),

    /// The account already opted into the asset.
    #[error("account already opted in: {0}")]
    AlreadyOptedIn(String),

    /// The transaction did not reach a confirmed round before the deadline.
    #[error("confirmation timed out after {seconds}s")]
    ConfirmationTimeout {
        /// Deadline that elapsed
        seconds: u64,
    },

    /// Key material was malformed or did not match the address.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The node's response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// A failed ledger call: which operation, and why.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("ledger {operation} failed: {kind}")]
pub struct LedgerError {
    /// Operation that failed.
    pub operation: LedgerOperation,
    /// Cause.
    #[source]
    pub kind: LedgerErrorKind,
}

impl LedgerError {
    /// Create a ledger error.
    #[must_use]
    pub const fn new(operation: LedgerOperation, kind: LedgerErrorKind) -> Self {
        Self { operation, kind }
    }

    /// Whether the error reports a duplicate opt-in.
    #[must_use]
    pub const fn is_already_opted_in(&self) -> bool {
        matches!(self.kind, LedgerErrorKind::AlreadyOptedIn(_))
    }
}

// ============================================================================
// Secret store
// ============================================================================

/// Errors from the secret store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    /// Nothing is stored at the path.
    #[error("no secret at path: {0}")]
    NotFound(String),

    /// Network or HTTP failure talking to the store.
    #[error("secret store transport error: {0}")]
    Transport(String),

    /// A secret exists but lacks required fields.
    #[error("malformed secret: {0}")]
    Malformed(String),
}

// ============================================================================
// Persistence
// ============================================================================

/// Errors from the relational store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Statement preparation or execution failed.
    #[error("database error: {0}")]
    Database(String),

    /// A conditional update matched no row (stale or concurrent change).
    #[error("no rows affected in {table} for {key}")]
    NoRowsAffected {
        /// Table that was updated
        table: &'static str,
        /// Key of the row that was expected to change
        key: String,
    },

    /// The transaction could not be committed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// A stored row could not be decoded into a domain type.
    #[error("decode error: {0}")]
    Decode(String),
}

// ============================================================================
// Orchestrator boundary
// ============================================================================

/// How a failure is presented at the API boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request was refused; retrying it unchanged will not help.
    Rejected,
    /// Something failed underneath; the operation may be retried.
    RetryableFailure,
}

/// Errors surfaced by the custody orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CustodyError {
    // ═══════════════════════════════════════════════════════════
    // Rejections (no I/O side effects)
    // ═══════════════════════════════════════════════════════════

    /// The request is malformed or ambiguous.
    #[error("validation error: {0}")]
    Validation(String),

    /// A user account, ticket or event does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of entity
        entity: &'static str,
        /// Identifying key
        key: String,
    },

    /// The ticket's status does not allow the operation.
    #[error("ticket {ticket_id} in status {status} does not allow {operation}")]
    TicketState {
        /// Ticket
        ticket_id: TicketId,
        /// Current status
        status: TicketStatus,
        /// Attempted operation
        operation: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Failures (stores consistent)
    // ═══════════════════════════════════════════════════════════

    /// A ledger call failed. Relational state is untouched.
    #[error("{operation} failed for {key}: {source}")]
    Ledger {
        /// Orchestrator operation
        operation: &'static str,
        /// Identifying key
        key: String,
        /// Underlying ledger error
        #[source]
        source: LedgerError,
    },

    /// The secret store failed.
    #[error("{operation} failed for {key}: {source}")]
    SecretStore {
        /// Orchestrator operation
        operation: &'static str,
        /// Identifying key
        key: String,
        /// Underlying secret store error
        #[source]
        source: SecretStoreError,
    },

    /// The relational store failed before any ledger side effect.
    #[error("{operation} failed for {key}: {source}")]
    Persistence {
        /// Orchestrator operation
        operation: &'static str,
        /// Identifying key
        key: String,
        /// Underlying persistence error
        #[source]
        source: PersistenceError,
    },

    // ═══════════════════════════════════════════════════════════
    // Divergence (ledger ahead of the relational store)
    // ═══════════════════════════════════════════════════════════

    /// The ledger moved the asset but the row update did not commit.
    ///
    /// Recovery re-applies the relational update only; the ledger step must
    /// not be repeated.
    #[error(
        "{operation} diverged: asset {asset_id} moved to user {intended_holder} \
         but ticket {ticket_id} was not updated: {source}"
    )]
    Diverged {
        /// Orchestrator operation
        operation: &'static str,
        /// Ticket whose row is stale
        ticket_id: TicketId,
        /// Asset that moved
        asset_id: AssetId,
        /// Holder the row should now have
        intended_holder: UserId,
        /// Underlying persistence error
        #[source]
        source: PersistenceError,
    },
}

impl CustodyError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Create a ledger failure.
    pub fn ledger(operation: &'static str, key: impl fmt::Display, source: LedgerError) -> Self {
        Self::Ledger {
            operation,
            key: key.to_string(),
            source,
        }
    }

    /// Create a persistence failure (ledger untouched).
    pub fn persistence(
        operation: &'static str,
        key: impl fmt::Display,
        source: PersistenceError,
    ) -> Self {
        Self::Persistence {
            operation,
            key: key.to_string(),
            source,
        }
    }

    /// Map a secret store error, keeping `NotFound` distinct.
    pub fn secret_store(
        operation: &'static str,
        key: impl fmt::Display,
        source: SecretStoreError,
    ) -> Self {
        match source {
            SecretStoreError::NotFound(_) => Self::not_found("ledger account", key),
            other => Self::SecretStore {
                operation,
                key: key.to_string(),
                source: other,
            },
        }
    }

    /// How this error is presented to callers.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::NotFound { .. } | Self::TicketState { .. } => {
                ErrorCategory::Rejected
            }
            Self::Ledger { .. }
            | Self::SecretStore { .. }
            | Self::Persistence { .. }
            | Self::Diverged { .. } => ErrorCategory::RetryableFailure,
        }
    }

    /// Whether the ledger and the relational store now disagree.
    #[must_use]
    pub const fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }
}
