//! HTTP ledger node client.

use crate::config::LedgerConfig;
use crate::keys;
use crate::transaction::{SignedTransaction, SuggestedParams, Transaction, TxBody};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use ticket_custody_core::{
    AssetId, Confirmation, LedgerAccount, LedgerClient, LedgerError, LedgerErrorKind,
    LedgerOperation, Round, TxId,
};
use tokio::time::{interval, timeout};

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// A transaction as reported by the pending-transaction endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PendingTransaction {
    /// Round the transaction was confirmed in, zero while pending.
    #[serde(default)]
    pub confirmed_round: u64,
    /// Non-empty if the node dropped the transaction.
    #[serde(default)]
    pub pool_error: String,
    /// Asset created by the transaction.
    #[serde(default)]
    pub asset_index: Option<u64>,
}

/// Node status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeStatus {
    /// Latest round.
    pub last_round: u64,
}

#[derive(Debug, Deserialize)]
struct AssetHoldingResponse {
    #[serde(rename = "asset-holding")]
    asset_holding: AssetHolding,
}

#[derive(Debug, Deserialize)]
struct AssetHolding {
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    amount: u64,
    #[serde(rename = "min-balance", default)]
    min_balance: u64,
}

/// Ledger client over the node's JSON REST API.
///
/// Every request carries the `X-API-Key` header. Submitting methods build a
/// transaction from the node's suggested parameters, sign it with the
/// account's key and return its id. An id from the node that differs from
/// the locally computed one is a rejection.
#[derive(Clone, Debug)]
pub struct HttpLedgerClient {
    client: Client,
    config: LedgerConfig,
}

impl HttpLedgerClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `LedgerErrorKind::Transport` if the HTTP client cannot be built.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                LedgerError::new(LedgerOperation::Connect, LedgerErrorKind::Transport(e.to_string()))
            })?;
        Ok(Self { client, config })
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_address.trim_end_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: LedgerOperation,
        path: &str,
    ) -> Result<Option<T>, LedgerError> {
        let response = self
            .client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(|e| LedgerError::new(operation, LedgerErrorKind::Transport(e.to_string())))?;

        match response.status() {
            StatusCode::OK => response.json::<T>().await.map(Some).map_err(|e| {
                LedgerError::new(operation, LedgerErrorKind::Decode(e.to_string()))
            }),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(LedgerError::new(
                operation,
                error_kind(status, &response.text().await.unwrap_or_default()),
            )),
        }
    }

    /// Suggested parameters for a new transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable or the response is malformed.
    pub async fn suggested_params(&self) -> Result<SuggestedParams, LedgerError> {
        self.get(LedgerOperation::SuggestedParams, "/v2/transactions/params")
            .await?
            .ok_or_else(|| {
                LedgerError::new(
                    LedgerOperation::SuggestedParams,
                    LedgerErrorKind::Decode("node returned no parameters".to_string()),
                )
            })
    }

    /// Current node status.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable or the response is malformed.
    pub async fn status(&self) -> Result<NodeStatus, LedgerError> {
        self.get(LedgerOperation::Status, "/v2/status")
            .await?
            .ok_or_else(|| {
                LedgerError::new(
                    LedgerOperation::Status,
                    LedgerErrorKind::Decode("node returned no status".to_string()),
                )
            })
    }

    /// Look up a submitted transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable or does not know `tx`.
    pub async fn pending_transaction(&self, tx: &TxId) -> Result<PendingTransaction, LedgerError> {
        self.get(
            LedgerOperation::WaitForConfirmation,
            &format!("/v2/transactions/pending/{tx}"),
        )
        .await?
        .ok_or_else(|| {
            LedgerError::new(
                LedgerOperation::WaitForConfirmation,
                LedgerErrorKind::Transport(format!("transaction {tx} not yet visible")),
            )
        })
    }

    /// Units of `asset` held by `address`, or `None` if it never opted in.
    ///
    /// # Errors
    ///
    /// Returns error if the node is unreachable or the response is malformed.
    pub async fn asset_holding(
        &self,
        address: &str,
        asset: AssetId,
    ) -> Result<Option<u64>, LedgerError> {
        let holding: Option<AssetHoldingResponse> = self
            .get(
                LedgerOperation::AccountAssets,
                &format!("/v2/accounts/{address}/assets/{asset}"),
            )
            .await?;
        Ok(holding.map(|h| h.asset_holding.amount))
    }

    async fn account(&self, address: &str) -> Result<Option<AccountResponse>, LedgerError> {
        self.get(
            LedgerOperation::AccountBalance,
            &format!("/v2/accounts/{address}"),
        )
        .await
    }

    async fn submit(
        &self,
        operation: LedgerOperation,
        signer: &LedgerAccount,
        body: TxBody,
    ) -> Result<TxId, LedgerError> {
        let params = self.suggested_params().await.map_err(|e| LedgerError {
            operation,
            kind: e.kind,
        })?;
        let signed: SignedTransaction = Transaction::new(
            &signer.address,
            &params,
            self.config.min_fee,
            self.config.validity_window,
            body,
        )
        .sign(operation, signer)?;
        let expected = signed.txn.id(operation)?;

        let response = self
            .client
            .post(self.url("/v2/transactions"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&signed)
            .send()
            .await
            .map_err(|e| LedgerError::new(operation, LedgerErrorKind::Transport(e.to_string())))?;

        match response.status() {
            StatusCode::OK => {
                let submitted = response.json::<SubmitResponse>().await.map_err(|e| {
                    LedgerError::new(operation, LedgerErrorKind::Decode(e.to_string()))
                })?;
                let tx_id = TxId::new(submitted.tx_id);
                if tx_id != expected {
                    return Err(LedgerError::new(
                        operation,
                        LedgerErrorKind::Rejected(format!(
                            "node assigned id {tx_id} to a transaction hashing to {expected}"
                        )),
                    ));
                }
                tracing::info!(%operation, tx_id = %tx_id, sender = %signer.address, "Submitted ledger transaction");
                Ok(tx_id)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(LedgerError::new(operation, error_kind(status, &body)))
            }
        }
    }
}

/// Classify a non-success node response.
fn error_kind(status: StatusCode, body: &str) -> LedgerErrorKind {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return LedgerErrorKind::Transport(format!("{status}: {message}"));
    }

    let lower = message.to_lowercase();
    if lower.contains("overspend") || lower.contains("insufficient") || lower.contains("below min")
    {
        LedgerErrorKind::InsufficientBalance(message)
    } else if lower.contains("already opted in") {
        LedgerErrorKind::AlreadyOptedIn(message)
    } else if lower.contains("must optin") || lower.contains("not opted in") || lower.contains("missing from")
    {
        LedgerErrorKind::NotOptedIn(message)
    } else {
        LedgerErrorKind::Rejected(format!("{status}: {message}"))
    }
}

impl LedgerClient for HttpLedgerClient {
    fn create_account(&self) -> Result<LedgerAccount, LedgerError> {
        keys::generate_account()
    }

    fn fund(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        amount: u64,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        async move {
            keys::decode_address(LedgerOperation::Fund, to_address)?;
            self.submit(
                LedgerOperation::Fund,
                from,
                TxBody::Payment {
                    receiver: to_address.to_string(),
                    amount,
                },
            )
            .await
        }
    }

    fn mint_asset(
        &self,
        creator: &LedgerAccount,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        async move {
            self.submit(
                LedgerOperation::MintAsset,
                creator,
                TxBody::AssetConfig {
                    params: self.config.ticket_asset(),
                },
            )
            .await
        }
    }

    fn opt_in(
        &self,
        account: &LedgerAccount,
        asset: AssetId,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        async move {
            if self.asset_holding(&account.address, asset).await?.is_some() {
                return Err(LedgerError::new(
                    LedgerOperation::OptIn,
                    LedgerErrorKind::AlreadyOptedIn(format!("{} / {asset}", account.address)),
                ));
            }
            self.submit(
                LedgerOperation::OptIn,
                account,
                TxBody::AssetTransfer {
                    asset: asset.0,
                    amount: 0,
                    receiver: account.address.clone(),
                },
            )
            .await
        }
    }

    fn transfer(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        asset: AssetId,
        amount: u64,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        async move {
            keys::decode_address(LedgerOperation::Transfer, to_address)?;
            self.submit(
                LedgerOperation::Transfer,
                from,
                TxBody::AssetTransfer {
                    asset: asset.0,
                    amount,
                    receiver: to_address.to_string(),
                },
            )
            .await
        }
    }

    fn wait_for_confirmation(
        &self,
        tx: &TxId,
        deadline: Duration,
    ) -> impl Future<Output = Result<Confirmation, LedgerError>> + Send {
        async move {
            let poll = async {
                let mut ticker = interval(self.config.poll_interval);

                loop {
                    ticker.tick().await;

                    let pending = match self.pending_transaction(tx).await {
                        Ok(pending) => pending,
                        Err(e) => {
                            tracing::debug!(tx_id = %tx, error = %e, "Confirmation lookup failed, retrying");
                            continue;
                        }
                    };

                    if !pending.pool_error.is_empty() {
                        return Err(LedgerError::new(
                            LedgerOperation::WaitForConfirmation,
                            LedgerErrorKind::Rejected(pending.pool_error),
                        ));
                    }

                    if pending.confirmed_round > 0 {
                        return Ok(Confirmation {
                            tx_id: tx.clone(),
                            round: Round(pending.confirmed_round),
                            created_asset: pending.asset_index.map(AssetId),
                        });
                    }

                    tracing::debug!(tx_id = %tx, "Transaction pending");
                }
            };

            match timeout(deadline, poll).await {
                Ok(result) => {
                    if let Ok(confirmation) = &result {
                        tracing::info!(tx_id = %tx, round = %confirmation.round, "Transaction confirmed");
                    }
                    result
                }
                Err(_) => Err(LedgerError::new(
                    LedgerOperation::WaitForConfirmation,
                    LedgerErrorKind::ConfirmationTimeout {
                        seconds: deadline.as_secs(),
                    },
                )),
            }
        }
    }

    fn holds_asset(
        &self,
        address: &str,
        asset: AssetId,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send {
        async move {
            Ok(self
                .asset_holding(address, asset)
                .await?
                .is_some_and(|amount| amount > 0))
        }
    }

    fn spendable_balance(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send {
        async move {
            Ok(self
                .account(address)
                .await?
                .map_or(0, |a| a.amount.saturating_sub(a.min_balance)))
        }
    }
}
