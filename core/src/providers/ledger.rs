//! Ledger client trait.

use crate::account::{Confirmation, LedgerAccount, TxId};
use crate::error::LedgerError;
use crate::types::AssetId;
use std::time::Duration;

/// Client for the external asset ledger.
///
/// Submitting methods return as soon as the node accepts the transaction;
/// callers must [`wait_for_confirmation`](Self::wait_for_confirmation)
/// before relying on its effect.
pub trait LedgerClient: Send + Sync {
    /// Generate a new account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::InvalidKey` if the entropy source fails.
    fn create_account(&self) -> Result<LedgerAccount, LedgerError>;

    /// Pay `amount` micro-units of native currency from `from` to `to_address`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The node is unreachable
    /// - `from` cannot cover the amount plus fee
    fn fund(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        amount: u64,
    ) -> impl std::future::Future<Output = Result<TxId, LedgerError>> + Send;

    /// Create one indivisible unit of a new asset owned by `creator`.
    ///
    /// The asset id is reported by the confirmation of the returned
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the node rejects the asset creation.
    fn mint_asset(
        &self,
        creator: &LedgerAccount,
    ) -> impl std::future::Future<Output = Result<TxId, LedgerError>> + Send;

    /// Opt `account` into `asset` so it may receive it.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::AlreadyOptedIn` for a duplicate opt-in;
    /// callers treat that as success.
    fn opt_in(
        &self,
        account: &LedgerAccount,
        asset: AssetId,
    ) -> impl std::future::Future<Output = Result<TxId, LedgerError>> + Send;

    /// Transfer `amount` units of `asset` from `from` to `to_address`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The receiver has not opted in → `LedgerErrorKind::NotOptedIn`
    /// - `from` does not hold the asset or cannot pay the fee
    fn transfer(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        asset: AssetId,
        amount: u64,
    ) -> impl std::future::Future<Output = Result<TxId, LedgerError>> + Send;

    /// Block until `tx` reaches a confirmed round or `timeout` elapses.
    ///
    /// Transient lookup failures are retried until the deadline.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The deadline elapses → `LedgerErrorKind::ConfirmationTimeout`
    /// - The transaction was dropped from the pool → `LedgerErrorKind::Rejected`
    fn wait_for_confirmation(
        &self,
        tx: &TxId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Confirmation, LedgerError>> + Send;

    /// Whether `address` currently holds at least one unit of `asset`.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable.
    fn holds_asset(
        &self,
        address: &str,
        asset: AssetId,
    ) -> impl std::future::Future<Output = Result<bool, LedgerError>> + Send;

    /// Native balance `address` can spend: its balance minus what the
    /// ledger locks for the account and its assets.
    ///
    /// An address unknown to the ledger has nothing to spend.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable or the response is malformed.
    fn spendable_balance(
        &self,
        address: &str,
    ) -> impl std::future::Future<Output = Result<u64, LedgerError>> + Send;
}
