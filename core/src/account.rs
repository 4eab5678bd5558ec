//! Ledger accounts and transaction confirmations.

use crate::types::AssetId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A ledger account: address plus the key material that signs for it.
///
/// Accounts are owned by the secret store. The orchestrator borrows one for
/// the duration of a single signing operation and never persists it.
///
/// # Security
///
/// `Debug` redacts the private key and recovery phrase. Never log these
/// fields directly.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccount {
    /// Public address.
    pub address: String,
    /// Hex-encoded private key seed.
    pub private_key: String,
    /// Mnemonic recovery phrase for the same key.
    pub recovery_phrase: String,
}

impl LedgerAccount {
    /// Create an account from its parts.
    #[must_use]
    pub const fn new(address: String, private_key: String, recovery_phrase: String) -> Self {
        Self {
            address,
            private_key,
            recovery_phrase,
        }
    }
}

impl fmt::Debug for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerAccount")
            .field("address", &self.address)
            .field("private_key", &"[REDACTED]")
            .field("recovery_phrase", &"[REDACTED]")
            .finish()
    }
}

/// Identifier of a submitted ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub String);

impl TxId {
    /// Create a transaction id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ledger consensus round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(pub u64);

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a transaction that reached a confirmed round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    /// The confirmed transaction.
    pub tx_id: TxId,
    /// Round the transaction was confirmed in.
    pub round: Round,
    /// Asset created by the transaction, for asset-creation transactions.
    pub created_asset: Option<AssetId>,
}
