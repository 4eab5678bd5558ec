//! In-memory asset ledger.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticket_custody_core::{
    AssetId, Confirmation, LedgerAccount, LedgerClient, LedgerError, LedgerErrorKind,
    LedgerOperation, Round, TxId,
};

/// Fee charged per transaction, in micro-units.
const FEE: u64 = 1_000;

#[derive(Debug, Default)]
struct AccountState {
    private_key: Option<String>,
    balance: u64,
    holdings: HashMap<AssetId, u64>,
    opted_in: HashSet<AssetId>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, AccountState>,
    confirmations: HashMap<TxId, Confirmation>,
    failures: VecDeque<(LedgerOperation, LedgerErrorKind)>,
    calls: Vec<LedgerOperation>,
    next_account: u64,
    next_asset: u64,
    next_tx: u64,
    round: u64,
}

impl LedgerState {
    fn take_failure(&mut self, operation: LedgerOperation) -> Result<(), LedgerError> {
        self.calls.push(operation);
        if let Some(pos) = self.failures.iter().position(|(op, _)| *op == operation) {
            if let Some((_, kind)) = self.failures.remove(pos) {
                return Err(LedgerError::new(operation, kind));
            }
        }
        Ok(())
    }

    fn authorize(
        &mut self,
        operation: LedgerOperation,
        signer: &LedgerAccount,
    ) -> Result<&mut AccountState, LedgerError> {
        let state = self.accounts.get_mut(&signer.address).ok_or_else(|| {
            LedgerError::new(
                operation,
                LedgerErrorKind::InsufficientBalance(format!("{} has no balance", signer.address)),
            )
        })?;

        if let Some(key) = &state.private_key {
            if *key != signer.private_key {
                return Err(LedgerError::new(
                    operation,
                    LedgerErrorKind::InvalidKey(format!("key does not match {}", signer.address)),
                ));
            }
        }

        if state.balance < FEE {
            return Err(LedgerError::new(
                operation,
                LedgerErrorKind::InsufficientBalance(format!(
                    "{} holds {} but the fee is {FEE}",
                    signer.address, state.balance
                )),
            ));
        }
        Ok(state)
    }

    fn confirm(&mut self, created_asset: Option<AssetId>) -> TxId {
        self.next_tx += 1;
        self.round += 1;
        let tx_id = TxId::new(format!("TX{:06}", self.next_tx));
        self.confirmations.insert(
            tx_id.clone(),
            Confirmation {
                tx_id: tx_id.clone(),
                round: Round(self.round),
                created_asset,
            },
        );
        tx_id
    }
}

/// In-memory ledger with fees, opt-ins and failure injection.
///
/// Every submitted transaction is confirmed immediately. Each account pays a
/// flat fee per transaction it signs, and receivers must opt in before an
/// asset transfer, as on the real ledger.
///
/// # Example
///
/// ```
/// use ticket_custody_testing::InMemoryLedger;
/// use ticket_custody_core::{LedgerClient, LedgerOperation};
///
/// # async fn example() {
/// let ledger = InMemoryLedger::new();
/// let creator = ledger.funded_account(100_000);
///
/// let tx = ledger.mint_asset(&creator).await.unwrap();
/// let confirmation = ledger
///     .wait_for_confirmation(&tx, std::time::Duration::from_secs(1))
///     .await
///     .unwrap();
/// let asset = confirmation.created_asset.unwrap();
/// assert!(ledger.holds_asset(&creator.address, asset).await.unwrap());
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                next_asset: 1_000,
                ..LedgerState::default()
            })),
        }
    }

    /// Create an account holding `balance` micro-units.
    #[must_use]
    pub fn funded_account(&self, balance: u64) -> LedgerAccount {
        let account = self.new_account();
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(
            account.address.clone(),
            AccountState {
                private_key: Some(account.private_key.clone()),
                balance,
                ..AccountState::default()
            },
        );
        account
    }

    /// Make the next call of `operation` fail with a transport error.
    pub fn fail_next(&self, operation: LedgerOperation) {
        self.fail_next_with(
            operation,
            LedgerErrorKind::Transport("injected failure".to_string()),
        );
    }

    /// Make the next call of `operation` fail with `kind`.
    pub fn fail_next_with(&self, operation: LedgerOperation, kind: LedgerErrorKind) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back((operation, kind));
    }

    /// Address currently holding `asset`, if any account holds a unit.
    #[must_use]
    pub fn holder_of(&self, asset: AssetId) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .iter()
            .find(|(_, account)| account.holdings.get(&asset).copied().unwrap_or(0) > 0)
            .map(|(address, _)| address.clone())
    }

    /// Native balance of `address`.
    #[must_use]
    pub fn balance(&self, address: &str) -> u64 {
        let state = self.state.lock().unwrap();
        state.accounts.get(address).map_or(0, |a| a.balance)
    }

    /// Whether `address` opted into `asset`.
    #[must_use]
    pub fn is_opted_in(&self, address: &str, asset: AssetId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .get(address)
            .is_some_and(|a| a.opted_in.contains(&asset))
    }

    /// Every ledger operation attempted so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<LedgerOperation> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of assets minted so far.
    #[must_use]
    pub fn minted_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        usize::try_from(state.next_asset.saturating_sub(1_000)).unwrap_or(usize::MAX)
    }

    fn new_account(&self) -> LedgerAccount {
        let mut state = self.state.lock().unwrap();
        state.next_account += 1;
        let n = state.next_account;
        LedgerAccount::new(
            format!("MEMACCOUNT{n:04}"),
            format!("memkey{n:04}"),
            format!("memory phrase number {n}"),
        )
    }
}

impl LedgerClient for InMemoryLedger {
    fn create_account(&self) -> Result<LedgerAccount, LedgerError> {
        self.state
            .lock()
            .unwrap()
            .take_failure(LedgerOperation::CreateAccount)?;

        let account = self.new_account();
        self.state.lock().unwrap().accounts.insert(
            account.address.clone(),
            AccountState {
                private_key: Some(account.private_key.clone()),
                ..AccountState::default()
            },
        );
        Ok(account)
    }

    fn fund(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        amount: u64,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let from = from.clone();
        let to_address = to_address.to_string();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::Fund)?;

            let sender = state.authorize(LedgerOperation::Fund, &from)?;
            if sender.balance < amount + FEE {
                return Err(LedgerError::new(
                    LedgerOperation::Fund,
                    LedgerErrorKind::InsufficientBalance(format!(
                        "{} cannot pay {amount}",
                        from.address
                    )),
                ));
            }
            sender.balance -= amount + FEE;
            state.accounts.entry(to_address).or_default().balance += amount;

            Ok(state.confirm(None))
        }
    }

    fn mint_asset(
        &self,
        creator: &LedgerAccount,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let creator = creator.clone();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::MintAsset)?;

            let asset = AssetId(state.next_asset);
            let account = state.authorize(LedgerOperation::MintAsset, &creator)?;
            account.balance -= FEE;
            account.holdings.insert(asset, 1);
            account.opted_in.insert(asset);
            state.next_asset += 1;

            Ok(state.confirm(Some(asset)))
        }
    }

    fn opt_in(
        &self,
        account: &LedgerAccount,
        asset: AssetId,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let account = account.clone();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::OptIn)?;

            let holder = state.authorize(LedgerOperation::OptIn, &account)?;
            if holder.opted_in.contains(&asset) {
                return Err(LedgerError::new(
                    LedgerOperation::OptIn,
                    LedgerErrorKind::AlreadyOptedIn(format!("{} / {asset}", account.address)),
                ));
            }
            holder.balance -= FEE;
            holder.opted_in.insert(asset);
            holder.holdings.entry(asset).or_insert(0);

            Ok(state.confirm(None))
        }
    }

    fn transfer(
        &self,
        from: &LedgerAccount,
        to_address: &str,
        asset: AssetId,
        amount: u64,
    ) -> impl Future<Output = Result<TxId, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let from = from.clone();
        let to_address = to_address.to_string();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::Transfer)?;

            let receiver_ready = state
                .accounts
                .get(&to_address)
                .is_some_and(|a| a.opted_in.contains(&asset));
            if !receiver_ready {
                return Err(LedgerError::new(
                    LedgerOperation::Transfer,
                    LedgerErrorKind::NotOptedIn(format!("{to_address} / {asset}")),
                ));
            }

            let sender = state.authorize(LedgerOperation::Transfer, &from)?;
            let held = sender.holdings.get(&asset).copied().unwrap_or(0);
            if held < amount {
                return Err(LedgerError::new(
                    LedgerOperation::Transfer,
                    LedgerErrorKind::Rejected(format!(
                        "{} holds {held} of asset {asset}",
                        from.address
                    )),
                ));
            }
            sender.balance -= FEE;
            sender.holdings.insert(asset, held - amount);

            if let Some(receiver) = state.accounts.get_mut(&to_address) {
                *receiver.holdings.entry(asset).or_insert(0) += amount;
            }

            Ok(state.confirm(None))
        }
    }

    fn wait_for_confirmation(
        &self,
        tx: &TxId,
        timeout: Duration,
    ) -> impl Future<Output = Result<Confirmation, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let tx = tx.clone();

        async move {
            let mut state = state.lock().unwrap();
            if let Err(mut err) = state.take_failure(LedgerOperation::WaitForConfirmation) {
                if let LedgerErrorKind::ConfirmationTimeout { seconds } = &mut err.kind {
                    *seconds = timeout.as_secs();
                }
                return Err(err);
            }

            state.confirmations.get(&tx).cloned().ok_or_else(|| {
                LedgerError::new(
                    LedgerOperation::WaitForConfirmation,
                    LedgerErrorKind::Rejected(format!("unknown transaction {tx}")),
                )
            })
        }
    }

    fn holds_asset(
        &self,
        address: &str,
        asset: AssetId,
    ) -> impl Future<Output = Result<bool, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let address = address.to_string();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::AccountAssets)?;
            Ok(state
                .accounts
                .get(&address)
                .and_then(|a| a.holdings.get(&asset))
                .is_some_and(|units| *units > 0))
        }
    }

    fn spendable_balance(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<u64, LedgerError>> + Send {
        let state = Arc::clone(&self.state);
        let address = address.to_string();

        async move {
            let mut state = state.lock().unwrap();
            state.take_failure(LedgerOperation::AccountBalance)?;
            Ok(state.accounts.get(&address).map_or(0, |a| a.balance))
        }
    }
}
