//! In-memory secret store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use ticket_custody_core::{LedgerAccount, SecretStore, SecretStoreError};

#[derive(Debug, Default)]
struct SecretState {
    secrets: HashMap<String, LedgerAccount>,
    fail_reads: usize,
    fail_writes: usize,
}

/// Path-keyed account map.
#[derive(Clone, Debug, Default)]
pub struct InMemorySecretStore {
    state: Arc<Mutex<SecretState>>,
}

impl InMemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `account` at `path` directly.
    pub fn insert(&self, path: impl Into<String>, account: LedgerAccount) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(path.into(), account);
    }

    /// The account at `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<LedgerAccount> {
        self.state.lock().unwrap().secrets.get(path).cloned()
    }

    /// Number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().secrets.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next read fail with a transport error.
    pub fn fail_next_read(&self) {
        self.state.lock().unwrap().fail_reads += 1;
    }

    /// Make the next write fail with a transport error.
    pub fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_writes += 1;
    }
}

impl SecretStore for InMemorySecretStore {
    fn read(&self, path: &str) -> impl Future<Output = Result<LedgerAccount, SecretStoreError>> + Send {
        let state = Arc::clone(&self.state);
        let path = path.to_string();

        async move {
            let mut state = state.lock().unwrap();
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(SecretStoreError::Transport("injected failure".to_string()));
            }
            state
                .secrets
                .get(&path)
                .cloned()
                .ok_or(SecretStoreError::NotFound(path))
        }
    }

    fn write(
        &self,
        path: &str,
        account: &LedgerAccount,
    ) -> impl Future<Output = Result<(), SecretStoreError>> + Send {
        let state = Arc::clone(&self.state);
        let path = path.to_string();
        let account = account.clone();

        async move {
            let mut state = state.lock().unwrap();
            if state.fail_writes > 0 {
                state.fail_writes -= 1;
                return Err(SecretStoreError::Transport("injected failure".to_string()));
            }
            state.secrets.insert(path, account);
            Ok(())
        }
    }
}
