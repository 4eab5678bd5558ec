//! Secret store trait and path layout.

use crate::account::LedgerAccount;
use crate::error::SecretStoreError;
use crate::types::{PublicEventId, UserId};

/// Durable storage for ledger account credentials.
pub trait SecretStore: Send + Sync {
    /// Read the account stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Nothing is stored at `path` → `SecretStoreError::NotFound`
    /// - The store is unreachable → `SecretStoreError::Transport`
    /// - The stored secret lacks a field → `SecretStoreError::Malformed`
    fn read(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<LedgerAccount, SecretStoreError>> + Send;

    /// Store `account` at `path`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or refuses the write.
    fn write(
        &self,
        path: &str,
        account: &LedgerAccount,
    ) -> impl std::future::Future<Output = Result<(), SecretStoreError>> + Send;
}

/// Deterministic secret paths.
///
/// ```text
/// <user_root>/<user_id>           permanent user account
/// <temp_root>/<public_event_id>   event seeding account
/// <treasury>                      account that funds the others
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretPaths {
    /// Prefix for user accounts.
    pub user_root: String,
    /// Prefix for temporary event accounts.
    pub temp_root: String,
    /// Path of the treasury account.
    pub treasury: String,
}

impl SecretPaths {
    /// Create a path layout.
    pub fn new(
        user_root: impl Into<String>,
        temp_root: impl Into<String>,
        treasury: impl Into<String>,
    ) -> Self {
        Self {
            user_root: user_root.into(),
            temp_root: temp_root.into(),
            treasury: treasury.into(),
        }
    }

    /// Path of a user's permanent account.
    #[must_use]
    pub fn for_user(&self, user: UserId) -> String {
        format!("{}/{user}", self.user_root.trim_end_matches('/'))
    }

    /// Path of an event's temporary seeding account.
    #[must_use]
    pub fn for_event(&self, event: PublicEventId) -> String {
        format!("{}/{event}", self.temp_root.trim_end_matches('/'))
    }
}

impl Default for SecretPaths {
    fn default() -> Self {
        Self::new("users", "temp", "treasury/main")
    }
}
