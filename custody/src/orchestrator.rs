//! The ticket custody orchestrator.
//!
//! Keeps each ticket's `current_holder_id` equal to the account holding its
//! asset on the ledger. Custody changes run ledger first, then commit the
//! row:
//!
//! ```text
//! resolve accounts ─► opt-in ─► confirm ─► transfer ─► confirm ─► update row
//!        │               │                     │                      │
//!   NotFound /       Ledger error          Ledger error          Diverged
//!   SecretStore     (row untouched)       (row untouched)   (ledger moved, row
//!                                                            not; logged and
//!                                                            recorded)
//! ```
//!
//! Accounts short of the fees for their next step are topped up from the
//! treasury first. A recipient without an account is provisioned under a
//! per-user lock, so concurrent requests for one user share one account.
//!
//! Resell and redeem never touch the ledger; they are conditional row
//! updates only.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use ticket_custody_core::error::Result;
use ticket_custody_core::{
    AssetId, Confirmation, CustodyError, DivergenceRecord, DivergenceStatus, EventTicket, HeldTicket,
    LedgerAccount, LedgerClient, LedgerError, LedgerErrorKind, LedgerOperation, NewDivergence,
    NewEventTicket, NewPublicEvent, PersistenceError, PublicEvent, PublicEventId,
    PublicEventListing, SecretStore, SecretStoreError, TicketChange, TicketId, TicketStatus,
    TicketStore, TicketUpdate, TransferIntent, TxId, UserId,
};

use crate::activation::{
    ActivationHandle, ActivationProgress, ActivationReport, ActivationStatus, ActivationTracker,
    SeedFailure, SeedStage,
};
use crate::config::CustodyConfig;
use crate::locks::UserLocks;

const ACTIVATE: &str = "activate_public_event";
const RECONCILE: &str = "reconcile";

/// Coordinates the ledger, the secret store and the ticket store.
///
/// Collaborators are injected at construction. Cloning is cheap and clones
/// share collaborators and the activation tracker.
///
/// # Example
///
/// ```ignore
/// let orchestrator = Orchestrator::new(ledger, secrets, store, CustodyConfig::default());
///
/// let (event, mut activation) = orchestrator.create_public_event(organizer, new_event).await?;
/// activation.wait().await;
///
/// let ticket = orchestrator
///     .transfer(TransferIntent::FirstSaleBuy { public_event_id: event.id, buyer })
///     .await?;
/// ```
pub struct Orchestrator<L, S, R> {
    ledger: Arc<L>,
    secrets: Arc<S>,
    store: Arc<R>,
    config: Arc<CustodyConfig>,
    activations: ActivationTracker,
    provisioning: UserLocks,
}

impl<L, S, R> Clone for Orchestrator<L, S, R> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            secrets: Arc::clone(&self.secrets),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            activations: self.activations.clone(),
            provisioning: self.provisioning.clone(),
        }
    }
}

impl<L, S, R> Orchestrator<L, S, R>
where
    L: LedgerClient + 'static,
    S: SecretStore + 'static,
    R: TicketStore + 'static,
{
    /// Create an orchestrator over its collaborators.
    pub fn new(ledger: L, secrets: S, store: R, config: CustodyConfig) -> Self {
        Self {
            ledger: Arc::new(ledger),
            secrets: Arc::new(secrets),
            store: Arc::new(store),
            config: Arc::new(config),
            activations: ActivationTracker::new(),
            provisioning: UserLocks::new(),
        }
    }

    /// Ledger client.
    #[must_use]
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Ticket store.
    #[must_use]
    pub fn store(&self) -> &R {
        &self.store
    }

    /// Orchestrator settings.
    #[must_use]
    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    // ========================================================================
    // Event activation
    // ========================================================================

    /// Publish an event and start minting its tickets in the background.
    ///
    /// Creates the event's temporary ledger account, commits the event row,
    /// stores the temporary account at `<temp>/<event id>`, then dispatches
    /// activation. The returned handle reports activation progress.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `total_tickets` is zero or `price` is negative → `Validation`
    /// - The temporary account cannot be created → `Ledger`
    /// - The event insert fails → `Persistence`
    /// - The temporary account cannot be stored → `SecretStore`
    #[tracing::instrument(
        skip(self, event),
        fields(total_tickets = event.total_tickets, price = event.price)
    )]
    pub async fn create_public_event(
        &self,
        organizer: UserId,
        event: NewPublicEvent,
    ) -> Result<(PublicEvent, ActivationHandle)> {
        const OPERATION: &str = "create_public_event";

        if event.total_tickets == 0 {
            return Err(CustodyError::Validation(
                "an event needs at least one ticket".to_string(),
            ));
        }
        if event.price < 0 {
            return Err(CustodyError::Validation(format!(
                "ticket price must not be negative, got {}",
                event.price
            )));
        }

        let key = format!("organizer {organizer}");
        let temp = self
            .ledger
            .create_account()
            .map_err(|e| self.ledger_failure(OPERATION, &key, e))?;

        let stored = self
            .store
            .insert_public_event(&event, &temp.address, &temp.recovery_phrase)
            .await
            .map_err(|e| CustodyError::persistence(OPERATION, &key, e))?;

        let key = format!("event {}", stored.id);
        self.secrets
            .write(&self.config.paths.for_event(stored.id), &temp)
            .await
            .map_err(|e| {
                tracing::error!(
                    public_event_id = %stored.id,
                    error = %e,
                    "Event committed but its temporary account was not stored"
                );
                CustodyError::secret_store(OPERATION, &key, e)
            })?;

        let (progress, handle) = self.activations.register(stored.id);
        let span = tracing::info_span!("activation", public_event_id = %stored.id);
        tokio::spawn(
            self.clone()
                .activate(stored.clone(), organizer, progress)
                .instrument(span),
        );

        tracing::info!(public_event_id = %stored.id, "Public event created");
        Ok((stored, handle))
    }

    /// Activation progress of `event`, if this process started it.
    #[must_use]
    pub fn activation_status(&self, event: PublicEventId) -> Option<ActivationStatus> {
        self.activations.status(event)
    }

    async fn activate(self, event: PublicEvent, organizer: UserId, progress: ActivationProgress) {
        progress.running();

        let status = match self.seed_event(&event, organizer).await {
            Ok(report) => {
                tracing::info!(
                    requested = report.requested,
                    minted = report.minted.len(),
                    failed = report.failures.len(),
                    "Activation completed"
                );
                ActivationStatus::Completed(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Activation failed");
                ActivationStatus::Failed(e.to_string())
            }
        };

        progress.finish(status);
    }

    /// Fund the temporary and organizer accounts, then seed every ticket
    /// independently.
    async fn seed_event(&self, event: &PublicEvent, organizer: UserId) -> Result<ActivationReport> {
        let key = format!("event {}", event.id);

        let temp = self
            .secrets
            .read(&self.config.paths.for_event(event.id))
            .await
            .map_err(|e| CustodyError::secret_store(ACTIVATE, &key, e))?;
        let treasury = self.treasury_account(ACTIVATE).await?;

        let amount = self.config.seed_fund_amount(event.total_tickets);
        let funded = self.ledger.fund(&treasury, &temp.address, amount).await;
        self.confirmed(ACTIVATE, &key, funded).await?;
        tracing::debug!(amount, "Funded temporary account");

        let organizer_account = self.recipient_account(ACTIVATE, organizer).await?;
        let amount = self.config.organizer_fund_amount(event.total_tickets);
        let funded = self
            .ledger
            .fund(&treasury, &organizer_account.address, amount)
            .await;
        self.confirmed(ACTIVATE, &key, funded).await?;
        tracing::debug!(amount, "Funded organizer account");

        let organizer_account = Arc::new(organizer_account);
        let temp = Arc::new(temp);
        let permits = Arc::new(Semaphore::new(self.config.seed_concurrency.max(1)));

        let mut tasks = JoinSet::new();
        for index in 0..event.total_tickets {
            let this = self.clone();
            let temp = Arc::clone(&temp);
            let organizer_account = Arc::clone(&organizer_account);
            let permits = Arc::clone(&permits);
            let (event_id, price) = (event.id, event.price);

            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let seeded = this
                        .seed_ticket(event_id, organizer, price, index, &temp, &organizer_account)
                        .await;
                    (index, seeded)
                }
                .in_current_span(),
            );
        }

        let mut finished = HashSet::new();
        let mut minted = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, seeded)) => {
                    finished.insert(index);
                    match seeded {
                        Ok(ticket_id) => minted.push(ticket_id),
                        Err(failure) => failures.push(failure),
                    }
                }
                Err(e) => tracing::error!(error = %e, "Seeding task did not finish"),
            }
        }

        for index in (0..event.total_tickets).filter(|i| !finished.contains(i)) {
            metrics::counter!("custody.seeding.failed", "stage" => SeedStage::Task.as_str())
                .increment(1);
            failures.push(SeedFailure {
                index,
                stage: SeedStage::Task,
                error: "seeding task did not finish".to_string(),
            });
        }

        minted.sort_unstable();
        failures.sort_by_key(|f| f.index);

        Ok(ActivationReport {
            public_event_id: event.id,
            requested: event.total_tickets,
            minted,
            failures,
        })
    }

    /// Mint one asset, move it to the organizer, and insert its row.
    ///
    /// The row is only inserted once the transfer is confirmed.
    async fn seed_ticket(
        &self,
        event_id: PublicEventId,
        organizer: UserId,
        price: i64,
        index: u32,
        temp: &LedgerAccount,
        organizer_account: &LedgerAccount,
    ) -> std::result::Result<TicketId, SeedFailure> {
        let key = format!("event {event_id} ticket #{index}");
        let fail = move |stage: SeedStage, error: CustodyError| {
            tracing::warn!(index, stage = stage.as_str(), error = %error, "Ticket not seeded");
            metrics::counter!("custody.seeding.failed", "stage" => stage.as_str()).increment(1);
            SeedFailure {
                index,
                stage,
                error: error.to_string(),
            }
        };

        let minted = self.ledger.mint_asset(temp).await;
        let confirmation = self
            .confirmed(ACTIVATE, &key, minted)
            .await
            .map_err(|e| fail(SeedStage::Mint, e))?;
        let asset_id = confirmation.created_asset.ok_or_else(|| {
            fail(
                SeedStage::Mint,
                CustodyError::ledger(
                    ACTIVATE,
                    &key,
                    LedgerError::new(
                        LedgerOperation::MintAsset,
                        LedgerErrorKind::Decode("confirmation carried no asset id".to_string()),
                    ),
                ),
            )
        })?;

        self.opt_in(ACTIVATE, &key, organizer_account, asset_id)
            .await
            .map_err(|e| fail(SeedStage::OptIn, e))?;

        let sent = self
            .ledger
            .transfer(temp, &organizer_account.address, asset_id, 1)
            .await;
        self.confirmed(ACTIVATE, &key, sent)
            .await
            .map_err(|e| fail(SeedStage::Transfer, e))?;

        let ticket = self
            .store
            .insert_ticket(&NewEventTicket {
                public_event_id: event_id,
                business_user_id: organizer,
                asset_id,
                price,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    asset_id = %asset_id,
                    "Asset reached the organizer but its ticket row was not inserted"
                );
                fail(SeedStage::Insert, CustodyError::persistence(ACTIVATE, &key, e))
            })?;

        metrics::counter!("custody.seeding.minted").increment(1);
        tracing::debug!(ticket_id = %ticket.id, asset_id = %asset_id, "Seeded ticket");
        Ok(ticket.id)
    }

    // ========================================================================
    // Custody transfers
    // ========================================================================

    /// Perform one custody operation.
    ///
    /// # Errors
    ///
    /// See the per-operation methods. A `Diverged` error means the ledger
    /// moved and the row did not; the divergence has been recorded for
    /// [`reconcile`](Self::reconcile).
    #[tracing::instrument(skip(self), fields(operation = intent.operation()))]
    pub async fn transfer(&self, intent: TransferIntent) -> Result<EventTicket> {
        match intent {
            TransferIntent::Resell {
                ticket_id,
                seller,
                price,
            } => self.resell(ticket_id, seller, price).await,
            TransferIntent::DirectTransfer {
                ticket_id,
                from,
                to,
            } => self.direct_transfer(ticket_id, from, to).await,
            TransferIntent::Redeem { ticket_id, holder } => self.redeem(ticket_id, holder).await,
            TransferIntent::FirstSaleBuy {
                public_event_id,
                buyer,
            } => self.first_sale_buy(public_event_id, buyer).await,
            TransferIntent::ResaleBuy {
                ticket_id,
                public_event_id,
                buyer,
            } => self.resale_buy(ticket_id, public_event_id, buyer).await,
        }
    }

    /// List an ACTIVE ticket for resale at `price`. Holder unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `price` is not positive or `seller` is not the holder → `Validation`
    /// - The ticket does not exist → `NotFound`
    /// - The ticket is not ACTIVE → `TicketState`
    /// - The row update fails → `Persistence`
    #[tracing::instrument(skip(self))]
    pub async fn resell(&self, ticket_id: TicketId, seller: UserId, price: i64) -> Result<EventTicket> {
        const OPERATION: &str = "resell";

        if price <= 0 {
            return Err(CustodyError::Validation(format!(
                "resale price must be positive, got {price}"
            )));
        }

        let ticket = self.load_ticket(OPERATION, ticket_id).await?;
        ensure_status(&ticket, &[TicketStatus::Active], OPERATION)?;
        ensure_holder(&ticket, seller)?;

        self.update_in_place(
            OPERATION,
            &ticket,
            TicketChange {
                status: Some(TicketStatus::Resell),
                price: Some(price),
                available_to_resell: Some(true),
                ..TicketChange::default()
            },
        )
        .await
    }

    /// Consume a ticket. REDEEM is terminal.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `holder` is not the holder → `Validation`
    /// - The ticket does not exist → `NotFound`
    /// - The ticket is already redeemed → `TicketState`
    /// - The row update fails → `Persistence`
    #[tracing::instrument(skip(self))]
    pub async fn redeem(&self, ticket_id: TicketId, holder: UserId) -> Result<EventTicket> {
        const OPERATION: &str = "redeem";

        let ticket = self.load_ticket(OPERATION, ticket_id).await?;
        ensure_not_redeemed(&ticket, OPERATION)?;
        ensure_holder(&ticket, holder)?;

        self.update_in_place(
            OPERATION,
            &ticket,
            TicketChange {
                status: Some(TicketStatus::Redeem),
                available_to_resell: Some(false),
                ..TicketChange::default()
            },
        )
        .await
    }

    /// Send a held ticket to another user. Status unchanged.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `from == to` or `from` is not the holder → `Validation`
    /// - The ticket or the sender's account does not exist → `NotFound`
    /// - The ticket is redeemed → `TicketState`
    /// - Opt-in, transfer or confirmation fails → `Ledger` (row unchanged)
    /// - The row update fails after the transfer → `Diverged`
    #[tracing::instrument(skip(self))]
    pub async fn direct_transfer(
        &self,
        ticket_id: TicketId,
        from: UserId,
        to: UserId,
    ) -> Result<EventTicket> {
        const OPERATION: &str = "direct_transfer";

        if from == to {
            return Err(CustodyError::Validation(format!(
                "user {from} cannot send a ticket to themselves"
            )));
        }

        let ticket = self.load_ticket(OPERATION, ticket_id).await?;
        ensure_not_redeemed(&ticket, OPERATION)?;
        ensure_holder(&ticket, from)?;

        let sender = self.user_account(OPERATION, from).await?;
        self.move_custody(OPERATION, &ticket, &sender, to, TicketChange::default())
            .await
    }

    /// Buy the lowest-id ticket the organizer still holds for an event.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `buyer` is the organizer → `Validation`
    /// - The event or an available ticket does not exist → `NotFound`
    /// - Opt-in, transfer or confirmation fails → `Ledger` (row unchanged)
    /// - The row update fails after the transfer → `Diverged`
    #[tracing::instrument(skip(self))]
    pub async fn first_sale_buy(
        &self,
        public_event_id: PublicEventId,
        buyer: UserId,
    ) -> Result<EventTicket> {
        const OPERATION: &str = "first_sale_buy";

        self.load_public_event(OPERATION, public_event_id).await?;
        let ticket = self
            .store
            .pick_first_sale_ticket(public_event_id)
            .await
            .map_err(|e| CustodyError::persistence(OPERATION, format!("event {public_event_id}"), e))?
            .ok_or_else(|| {
                CustodyError::not_found("available ticket", format!("event {public_event_id}"))
            })?;

        if ticket.business_user_id == buyer {
            return Err(CustodyError::Validation(format!(
                "organizer {buyer} cannot buy their own ticket"
            )));
        }

        let seller = self.user_account(OPERATION, ticket.current_holder_id).await?;
        self.move_custody(OPERATION, &ticket, &seller, buyer, TicketChange::default())
            .await
    }

    /// Buy a ticket listed for resale.
    ///
    /// On success the ticket is ACTIVE again, no longer listed, and priced
    /// at its event's original ticket price.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The ticket belongs to another event or `buyer` holds it → `Validation`
    /// - The ticket, the event or the seller's account does not exist → `NotFound`
    /// - The ticket is not RESELL → `TicketState`
    /// - Opt-in, transfer or confirmation fails → `Ledger` (row unchanged)
    /// - The row update fails after the transfer → `Diverged`
    #[tracing::instrument(skip(self))]
    pub async fn resale_buy(
        &self,
        ticket_id: TicketId,
        public_event_id: PublicEventId,
        buyer: UserId,
    ) -> Result<EventTicket> {
        const OPERATION: &str = "resale_buy";

        let ticket = self.load_ticket(OPERATION, ticket_id).await?;
        if ticket.public_event_id != public_event_id {
            return Err(CustodyError::Validation(format!(
                "ticket {ticket_id} does not belong to event {public_event_id}"
            )));
        }
        ensure_status(&ticket, &[TicketStatus::Resell], OPERATION)?;
        if ticket.current_holder_id == buyer {
            return Err(CustodyError::Validation(format!(
                "user {buyer} already holds ticket {ticket_id}"
            )));
        }

        let event = self.load_public_event(OPERATION, public_event_id).await?;
        let seller = self.user_account(OPERATION, ticket.current_holder_id).await?;
        self.move_custody(
            OPERATION,
            &ticket,
            &seller,
            buyer,
            TicketChange {
                status: Some(TicketStatus::Active),
                price: Some(event.price),
                available_to_resell: Some(false),
                ..TicketChange::default()
            },
        )
        .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// A public event.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown event, `Persistence` if the query fails.
    pub async fn public_event(&self, id: PublicEventId) -> Result<PublicEvent> {
        self.load_public_event("public_event", id).await
    }

    /// Every public event with its available and resale tickets.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a query fails.
    pub async fn list_public_events(&self) -> Result<Vec<PublicEventListing>> {
        self.store
            .list_public_events()
            .await
            .map_err(|e| CustodyError::persistence("list_public_events", "all events", e))
    }

    /// Tickets `user` holds, each with its event.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn tickets_held_by(&self, user: UserId) -> Result<Vec<HeldTicket>> {
        self.store
            .list_tickets_held_by(user)
            .await
            .map_err(|e| CustodyError::persistence("tickets_held_by", format!("user {user}"), e))
    }

    /// Advertised inventory of `event`: the number of ticket rows.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn ticket_count(&self, event: PublicEventId) -> Result<u64> {
        self.store
            .count_tickets(event)
            .await
            .map_err(|e| CustodyError::persistence("ticket_count", format!("event {event}"), e))
    }

    /// A ticket.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ticket, `Persistence` if the query fails.
    pub async fn ticket(&self, id: TicketId) -> Result<EventTicket> {
        self.load_ticket("ticket", id).await
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Pending divergences, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    pub async fn pending_divergences(&self, limit: usize) -> Result<Vec<DivergenceRecord>> {
        self.store
            .list_divergences(DivergenceStatus::Pending, limit)
            .await
            .map_err(|e| CustodyError::persistence("pending_divergences", "pending", e))
    }

    /// Re-apply the row update of a recorded divergence.
    ///
    /// The ledger step is never repeated. The update is only applied once
    /// the ledger shows the intended holder's account holding the asset.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The divergence does not exist → `NotFound`
    /// - It is no longer pending, has no intended holder, or the ledger does
    ///   not show the intended holder → `Validation` (entry stays pending)
    /// - The holder's account cannot be read → `NotFound` / `SecretStore`
    /// - The holding lookup fails → `Ledger`
    /// - The row update or closing the entry fails → `Persistence`
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, divergence_id: i64) -> Result<EventTicket> {
        let key = format!("divergence {divergence_id}");

        let record = self
            .store
            .get_divergence(divergence_id)
            .await
            .map_err(|e| CustodyError::persistence(RECONCILE, &key, e))?
            .ok_or_else(|| CustodyError::not_found("divergence", divergence_id))?;

        if record.status != DivergenceStatus::Pending {
            return Err(CustodyError::Validation(format!(
                "{key} is already {}",
                record.status.as_str()
            )));
        }

        let divergence = record.divergence;
        let holder = divergence.update.change.holder.ok_or_else(|| {
            CustodyError::Validation(format!("{key} has no intended holder"))
        })?;

        let account = self.user_account(RECONCILE, holder).await?;
        let holds = self
            .ledger
            .holds_asset(&account.address, divergence.asset_id)
            .await
            .map_err(|e| self.ledger_failure(RECONCILE, &key, e))?;
        if !holds {
            return Err(CustodyError::Validation(format!(
                "ledger does not show user {holder} holding asset {}",
                divergence.asset_id
            )));
        }

        let ticket = self
            .store
            .apply_ticket_update(&divergence.update)
            .await
            .map_err(|e| CustodyError::persistence(RECONCILE, &key, e))?;

        self.store
            .close_divergence(divergence_id, DivergenceStatus::Resolved, "relational update re-applied")
            .await
            .map_err(|e| CustodyError::persistence(RECONCILE, &key, e))?;

        tracing::info!(ticket_id = %ticket.id, holder = %holder, "Divergence reconciled");
        Ok(ticket)
    }

    /// Close a pending divergence without touching the ticket.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the entry is not pending or the update fails.
    pub async fn discard_divergence(&self, divergence_id: i64, notes: &str) -> Result<()> {
        self.store
            .close_divergence(divergence_id, DivergenceStatus::Discarded, notes)
            .await
            .map_err(|e| {
                CustodyError::persistence("discard_divergence", format!("divergence {divergence_id}"), e)
            })
    }

    // ========================================================================
    // Custody steps
    // ========================================================================

    /// Opt in, transfer, confirm, then commit the row. In that order.
    ///
    /// Each signer is topped up before its step if it cannot pay for it.
    async fn move_custody(
        &self,
        operation: &'static str,
        ticket: &EventTicket,
        from: &LedgerAccount,
        to: UserId,
        change: TicketChange,
    ) -> Result<EventTicket> {
        let key = format!("ticket {}", ticket.id);

        let recipient = self.recipient_account(operation, to).await?;
        self.ensure_spendable(operation, &key, &recipient, self.config.opt_in_reserve())
            .await?;
        self.opt_in(operation, &key, &recipient, ticket.asset_id).await?;

        self.ensure_spendable(operation, &key, from, self.config.min_fee)
            .await?;
        let sent = self
            .ledger
            .transfer(from, &recipient.address, ticket.asset_id, 1)
            .await;
        self.confirmed(operation, &key, sent).await?;

        let update = TicketUpdate {
            ticket_id: ticket.id,
            expected_holder: ticket.current_holder_id,
            expected_status: ticket.status,
            change: TicketChange {
                holder: Some(to),
                ..change
            },
        };

        match self.store.apply_ticket_update(&update).await {
            Ok(updated) => {
                metrics::counter!("custody.transfer.completed", "operation" => operation)
                    .increment(1);
                tracing::info!(
                    ticket_id = %updated.id,
                    from = %ticket.current_holder_id,
                    to = %to,
                    "Custody moved"
                );
                Ok(updated)
            }
            Err(source) => Err(self.diverged(operation, ticket.asset_id, update, source).await),
        }
    }

    /// Apply a conditional row update that does not involve the ledger.
    async fn update_in_place(
        &self,
        operation: &'static str,
        ticket: &EventTicket,
        change: TicketChange,
    ) -> Result<EventTicket> {
        let update = TicketUpdate {
            ticket_id: ticket.id,
            expected_holder: ticket.current_holder_id,
            expected_status: ticket.status,
            change,
        };

        let updated = self
            .store
            .apply_ticket_update(&update)
            .await
            .map_err(|e| CustodyError::persistence(operation, format!("ticket {}", ticket.id), e))?;

        metrics::counter!("custody.transfer.completed", "operation" => operation).increment(1);
        tracing::info!(ticket_id = %updated.id, status = %updated.status, "Ticket updated");
        Ok(updated)
    }

    /// Record a divergence best effort and build the error for the caller.
    async fn diverged(
        &self,
        operation: &'static str,
        asset_id: AssetId,
        update: TicketUpdate,
        source: PersistenceError,
    ) -> CustodyError {
        metrics::counter!("custody.diverged", "operation" => operation).increment(1);

        let ticket_id = update.ticket_id;
        let intended_holder = update.change.holder.unwrap_or(update.expected_holder);
        tracing::error!(
            ticket_id = %ticket_id,
            asset_id = %asset_id,
            intended_holder = %intended_holder,
            error = %source,
            "Ledger moved but the ticket row was not updated"
        );

        let record = NewDivergence {
            operation: operation.to_string(),
            update,
            asset_id,
            error_message: source.to_string(),
        };
        if let Err(e) = self.store.record_divergence(&record).await {
            tracing::error!(ticket_id = %ticket_id, error = %e, "Failed to record divergence");
        }

        CustodyError::Diverged {
            operation,
            ticket_id,
            asset_id,
            intended_holder,
            source,
        }
    }

    /// Opt `account` into `asset`. An existing opt-in counts as success.
    async fn opt_in(
        &self,
        operation: &'static str,
        key: &str,
        account: &LedgerAccount,
        asset: AssetId,
    ) -> Result<()> {
        match self.ledger.opt_in(account, asset).await {
            Err(e) if e.is_already_opted_in() => {
                tracing::debug!(address = %account.address, asset_id = %asset, "Already opted in");
                Ok(())
            }
            submitted => self.confirmed(operation, key, submitted).await.map(|_| ()),
        }
    }

    /// Fund `account` from the treasury when it cannot spend `needed`.
    ///
    /// Tops up by at least `user_seed_amount` so one short account does not
    /// need a top-up before every step.
    async fn ensure_spendable(
        &self,
        operation: &'static str,
        key: &str,
        account: &LedgerAccount,
        needed: u64,
    ) -> Result<()> {
        let spendable = self
            .ledger
            .spendable_balance(&account.address)
            .await
            .map_err(|e| self.ledger_failure(operation, key, e))?;
        if spendable >= needed {
            return Ok(());
        }

        let amount = self.config.user_seed_amount.max(needed - spendable);
        let treasury = self.treasury_account(operation).await?;
        let funded = self.ledger.fund(&treasury, &account.address, amount).await;
        self.confirmed(operation, key, funded).await?;

        metrics::counter!("custody.account.topped_up", "operation" => operation).increment(1);
        tracing::info!(address = %account.address, spendable, amount, "Topped up account");
        Ok(())
    }

    /// Wait for a submitted transaction, bounded by the confirmation timeout.
    async fn confirmed(
        &self,
        operation: &'static str,
        key: &str,
        submitted: std::result::Result<TxId, LedgerError>,
    ) -> Result<Confirmation> {
        let tx = submitted.map_err(|e| self.ledger_failure(operation, key, e))?;
        tracing::info!(tx_id = %tx, operation, key, "Submitted ledger transaction");

        self.ledger
            .wait_for_confirmation(&tx, self.config.confirmation_timeout)
            .await
            .map_err(|e| self.ledger_failure(operation, key, e))
    }

    fn ledger_failure(&self, operation: &'static str, key: &str, error: LedgerError) -> CustodyError {
        metrics::counter!("custody.transfer.ledger_failed", "operation" => operation).increment(1);
        tracing::warn!(operation, key, error = %error, "Ledger step failed");
        CustodyError::ledger(operation, key, error)
    }

    // ========================================================================
    // Accounts and rows
    // ========================================================================

    /// Account of a user that must already exist.
    async fn user_account(&self, operation: &'static str, user: UserId) -> Result<LedgerAccount> {
        self.secrets
            .read(&self.config.paths.for_user(user))
            .await
            .map_err(|e| CustodyError::secret_store(operation, format!("user {user}"), e))
    }

    /// Account of a receiving user, provisioned on first use.
    ///
    /// Provisioning holds the user's lock and re-reads first, so concurrent
    /// first uses in this process end with one stored account.
    async fn recipient_account(&self, operation: &'static str, user: UserId) -> Result<LedgerAccount> {
        if let Some(account) = self.stored_account(operation, user).await? {
            return Ok(account);
        }

        let _guard = self.provisioning.lock(user).await;
        match self.stored_account(operation, user).await? {
            Some(account) => Ok(account),
            None => {
                self.provision_account(operation, user, &self.config.paths.for_user(user))
                    .await
            }
        }
    }

    async fn stored_account(
        &self,
        operation: &'static str,
        user: UserId,
    ) -> Result<Option<LedgerAccount>> {
        match self.secrets.read(&self.config.paths.for_user(user)).await {
            Ok(account) => Ok(Some(account)),
            Err(SecretStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(CustodyError::secret_store(operation, format!("user {user}"), e)),
        }
    }

    /// Create, store and fund a user's account.
    ///
    /// The secret is written before funding so a funded account is never
    /// without its key.
    async fn provision_account(
        &self,
        operation: &'static str,
        user: UserId,
        path: &str,
    ) -> Result<LedgerAccount> {
        let key = format!("user {user}");

        let account = self
            .ledger
            .create_account()
            .map_err(|e| self.ledger_failure(operation, &key, e))?;
        self.secrets
            .write(path, &account)
            .await
            .map_err(|e| CustodyError::secret_store(operation, &key, e))?;

        let treasury = self.treasury_account(operation).await?;
        let funded = self
            .ledger
            .fund(&treasury, &account.address, self.config.user_seed_amount)
            .await;
        self.confirmed(operation, &key, funded).await?;

        tracing::info!(user = %user, address = %account.address, "Provisioned ledger account");
        Ok(account)
    }

    async fn treasury_account(&self, operation: &'static str) -> Result<LedgerAccount> {
        let path = &self.config.paths.treasury;
        self.secrets.read(path).await.map_err(|e| match e {
            SecretStoreError::NotFound(_) => CustodyError::not_found("treasury account", path),
            other => CustodyError::secret_store(operation, "treasury", other),
        })
    }

    async fn load_ticket(&self, operation: &'static str, id: TicketId) -> Result<EventTicket> {
        self.store
            .get_ticket(id)
            .await
            .map_err(|e| CustodyError::persistence(operation, format!("ticket {id}"), e))?
            .ok_or_else(|| CustodyError::not_found("ticket", id))
    }

    async fn load_public_event(
        &self,
        operation: &'static str,
        id: PublicEventId,
    ) -> Result<PublicEvent> {
        self.store
            .get_public_event(id)
            .await
            .map_err(|e| CustodyError::persistence(operation, format!("event {id}"), e))?
            .ok_or_else(|| CustodyError::not_found("public event", id))
    }
}

fn ensure_status(ticket: &EventTicket, allowed: &[TicketStatus], operation: &'static str) -> Result<()> {
    if allowed.contains(&ticket.status) {
        Ok(())
    } else {
        Err(CustodyError::TicketState {
            ticket_id: ticket.id,
            status: ticket.status,
            operation,
        })
    }
}

fn ensure_not_redeemed(ticket: &EventTicket, operation: &'static str) -> Result<()> {
    if ticket.status.is_terminal() {
        Err(CustodyError::TicketState {
            ticket_id: ticket.id,
            status: ticket.status,
            operation,
        })
    } else {
        Ok(())
    }
}

fn ensure_holder(ticket: &EventTicket, user: UserId) -> Result<()> {
    if ticket.current_holder_id == user {
        Ok(())
    } else {
        Err(CustodyError::Validation(format!(
            "user {user} does not hold ticket {}",
            ticket.id
        )))
    }
}
