//! Vault KV client.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::Future;
use std::time::Duration;
use ticket_custody_core::{LedgerAccount, SecretStore, SecretStoreError};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault connection settings.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault base URL
    pub address: String,
    /// Client token
    pub token: String,
    /// Per-request HTTP timeout (default: 10 s)
    pub request_timeout: Duration,
}

impl VaultConfig {
    /// Configuration with the default request timeout.
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Load from `VAULT_ADDRESS` and `VAULT_TOKEN`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            env::var("VAULT_ADDRESS").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string()),
            env::var("VAULT_TOKEN").unwrap_or_default(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountSecret {
    account_address: Option<String>,
    private_key: Option<String>,
    security_passphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: AccountSecret,
}

#[derive(Debug, Deserialize)]
struct SealStatus {
    sealed: bool,
}

/// Secret store over Vault's KV v1 HTTP API.
#[derive(Clone, Debug)]
pub struct VaultSecretStore {
    client: Client,
    config: VaultConfig,
}

impl VaultSecretStore {
    /// Create a store.
    ///
    /// # Errors
    ///
    /// Returns `SecretStoreError::Transport` if the HTTP client cannot be
    /// built.
    pub fn new(config: VaultConfig) -> Result<Self, SecretStoreError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SecretStoreError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Fail unless Vault is unsealed.
    ///
    /// # Errors
    ///
    /// Returns `SecretStoreError::Transport` if Vault is unreachable or sealed.
    pub async fn check_unsealed(&self) -> Result<(), SecretStoreError> {
        let response = self
            .client
            .get(self.url("sys/seal-status"))
            .send()
            .await
            .map_err(|e| SecretStoreError::Transport(e.to_string()))?;
        let status: SealStatus = response
            .json()
            .await
            .map_err(|e| SecretStoreError::Transport(format!("seal status: {e}")))?;

        if status.sealed {
            return Err(SecretStoreError::Transport("vault is sealed".to_string()));
        }
        Ok(())
    }

    /// Mount a KV engine at each of `roots` that is not mounted yet.
    ///
    /// # Errors
    ///
    /// Returns `SecretStoreError::Transport` if listing or mounting fails.
    pub async fn ensure_mounts(&self, roots: &[&str]) -> Result<(), SecretStoreError> {
        let response = self
            .client
            .get(self.url("sys/mounts"))
            .header(TOKEN_HEADER, &self.config.token)
            .send()
            .await
            .map_err(|e| SecretStoreError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SecretStoreError::Transport(format!(
                "listing mounts returned {}",
                response.status()
            )));
        }
        let listing: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SecretStoreError::Transport(format!("mount listing: {e}")))?;
        let mounts = listing.get("data").unwrap_or(&listing);

        for root in roots {
            let root = root.trim_matches('/');
            if mounts.get(format!("{root}/")).is_some() {
                continue;
            }

            let response = self
                .client
                .post(self.url(&format!("sys/mounts/{root}")))
                .header(TOKEN_HEADER, &self.config.token)
                .json(&serde_json::json!({ "type": "kv" }))
                .send()
                .await
                .map_err(|e| SecretStoreError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(SecretStoreError::Transport(format!(
                    "mounting {root} returned {}",
                    response.status()
                )));
            }
            tracing::info!(mount = %root, "Mounted secrets engine");
        }
        Ok(())
    }
}

impl SecretStore for VaultSecretStore {
    fn read(&self, path: &str) -> impl Future<Output = Result<LedgerAccount, SecretStoreError>> + Send {
        async move {
            let response = self
                .client
                .get(self.url(path))
                .header(TOKEN_HEADER, &self.config.token)
                .send()
                .await
                .map_err(|e| SecretStoreError::Transport(e.to_string()))?;

            match response.status() {
                StatusCode::OK => {
                    let secret = response
                        .json::<ReadResponse>()
                        .await
                        .map_err(|e| SecretStoreError::Malformed(format!("{path}: {e}")))?
                        .data;
                    let field = |value: Option<String>, name: &str| {
                        value.ok_or_else(|| SecretStoreError::Malformed(format!("{path}: {name} missing")))
                    };
                    Ok(LedgerAccount::new(
                        field(secret.account_address, "account_address")?,
                        field(secret.private_key, "private_key")?,
                        field(secret.security_passphrase, "security_passphrase")?,
                    ))
                }
                StatusCode::NOT_FOUND => Err(SecretStoreError::NotFound(path.to_string())),
                status => Err(SecretStoreError::Transport(format!(
                    "reading {path} returned {status}"
                ))),
            }
        }
    }

    fn write(
        &self,
        path: &str,
        account: &LedgerAccount,
    ) -> impl Future<Output = Result<(), SecretStoreError>> + Send {
        async move {
            let secret = AccountSecret {
                account_address: Some(account.address.clone()),
                private_key: Some(account.private_key.clone()),
                security_passphrase: Some(account.recovery_phrase.clone()),
            };

            let response = self
                .client
                .put(self.url(path))
                .header(TOKEN_HEADER, &self.config.token)
                .json(&secret)
                .send()
                .await
                .map_err(|e| SecretStoreError::Transport(e.to_string()))?;

            if response.status().is_success() {
                tracing::debug!(path = %path, "Stored account secret");
                Ok(())
            } else {
                Err(SecretStoreError::Transport(format!(
                    "writing {path} returned {}",
                    response.status()
                )))
            }
        }
    }
}
