//! End-to-end custody tests against the in-memory collaborators.
//!
//! Every test builds a fresh ledger, secret store and ticket store, so the
//! orchestrator runs exactly as in production minus the network.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::future::Future;

use ticket_custody::{
    ActivationReport, ActivationStatus, CustodyConfig, Orchestrator, SeedStage,
};
use ticket_custody_core::{
    CustodyError, DivergenceStatus, ErrorCategory, EventTicket, LedgerAccount, LedgerOperation,
    NewDivergence, NewPublicEvent, PersistenceError, PublicEvent, SecretStore, SecretStoreError,
    TicketChange, TicketStatus, TicketStore, TicketUpdate, TransferIntent, TransferRequest, UserId,
};
use ticket_custody_testing::{
    InMemoryLedger, InMemorySecretStore, InMemoryTicketStore, init_test_tracing,
};

const ORGANIZER: UserId = UserId(1);
const BUYER: UserId = UserId(2);
const RESALE_BUYER: UserId = UserId(3);
const FRIEND: UserId = UserId(4);

const TICKET_PRICE: i64 = 2_500;

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    ledger: InMemoryLedger,
    secrets: InMemorySecretStore,
    store: InMemoryTicketStore,
    orchestrator: Orchestrator<InMemoryLedger, InMemorySecretStore, InMemoryTicketStore>,
}

impl Harness {
    /// Collaborators with a funded treasury.
    fn new() -> Self {
        Self::with_config(CustodyConfig::default())
    }

    fn with_config(config: CustodyConfig) -> Self {
        let harness = Self::unfunded(config);
        let treasury = harness.ledger.funded_account(1_000_000_000);
        harness
            .secrets
            .insert(harness.orchestrator.config().paths.treasury.clone(), treasury);
        harness
    }

    fn without_treasury() -> Self {
        Self::unfunded(CustodyConfig::default())
    }

    fn unfunded(config: CustodyConfig) -> Self {
        init_test_tracing();

        let ledger = InMemoryLedger::new();
        let secrets = InMemorySecretStore::new();
        let store = InMemoryTicketStore::new();
        let orchestrator =
            Orchestrator::new(ledger.clone(), secrets.clone(), store.clone(), config);

        Self {
            ledger,
            secrets,
            store,
            orchestrator,
        }
    }

    /// Create an event and wait for its activation to finish.
    async fn activated_event(&self, total_tickets: u32) -> (PublicEvent, ActivationReport) {
        let (event, mut activation) = self
            .orchestrator
            .create_public_event(ORGANIZER, new_event(total_tickets))
            .await
            .expect("event should be created");

        match activation.wait().await {
            ActivationStatus::Completed(report) => (event, report),
            other => panic!("activation did not complete: {other:?}"),
        }
    }

    fn address_of(&self, user: UserId) -> String {
        self.secrets
            .get(&self.orchestrator.config().paths.for_user(user))
            .expect("user should have an account")
            .address
    }

    /// The ledger shows the row's holder holding the asset.
    fn assert_custody_consistent(&self, ticket: &EventTicket) {
        assert_eq!(
            self.ledger.holder_of(ticket.asset_id),
            Some(self.address_of(ticket.current_holder_id)),
            "ledger and row disagree on ticket {}",
            ticket.id
        );
    }

    /// Give `user` an existing account holding `balance`.
    fn existing_account(&self, user: UserId, balance: u64) -> String {
        let account = self.ledger.funded_account(balance);
        let address = account.address.clone();
        self.secrets
            .insert(self.orchestrator.config().paths.for_user(user), account);
        address
    }

    fn held_by(&self, event: &PublicEvent, user: UserId) -> Vec<EventTicket> {
        self.store
            .tickets_for(event.id)
            .into_iter()
            .filter(|t| t.current_holder_id == user)
            .collect()
    }
}

/// Secret store that yields before every call, so concurrent requests
/// interleave at each secret read and write.
#[derive(Clone)]
struct Interleaving(InMemorySecretStore);

impl SecretStore for Interleaving {
    fn read(&self, path: &str) -> impl Future<Output = Result<LedgerAccount, SecretStoreError>> + Send {
        let inner = self.0.clone();
        let path = path.to_string();
        async move {
            tokio::task::yield_now().await;
            inner.read(&path).await
        }
    }

    fn write(
        &self,
        path: &str,
        account: &LedgerAccount,
    ) -> impl Future<Output = Result<(), SecretStoreError>> + Send {
        let inner = self.0.clone();
        let path = path.to_string();
        let account = account.clone();
        async move {
            tokio::task::yield_now().await;
            inner.write(&path, &account).await
        }
    }
}

fn created_accounts(ledger: &InMemoryLedger) -> usize {
    ledger
        .calls()
        .iter()
        .filter(|op| **op == LedgerOperation::CreateAccount)
        .count()
}

fn new_event(total_tickets: u32) -> NewPublicEvent {
    NewPublicEvent {
        date_time: None,
        title: Some("Harbour Concert".to_string()),
        description: Some("Open air".to_string()),
        image: None,
        total_tickets,
        price: TICKET_PRICE,
    }
}

// ============================================================================
// Activation
// ============================================================================

#[tokio::test]
async fn test_activation_seeds_every_ticket_to_the_organizer() {
    let h = Harness::new();
    let (event, report) = h.activated_event(3).await;

    assert!(report.is_complete());
    assert_eq!(report.public_event_id, event.id);
    assert_eq!(report.minted.len(), 3);
    assert_eq!(h.ledger.minted_count(), 3);

    let tickets = h.store.tickets_for(event.id);
    assert_eq!(tickets.len(), 3);
    for ticket in &tickets {
        assert_eq!(ticket.status, TicketStatus::Active);
        assert_eq!(ticket.current_holder_id, ORGANIZER);
        assert_eq!(ticket.business_user_id, ORGANIZER);
        assert_eq!(ticket.price, TICKET_PRICE);
        h.assert_custody_consistent(ticket);
    }

    assert_eq!(h.orchestrator.ticket_count(event.id).await.unwrap(), 3);
    assert!(matches!(
        h.orchestrator.activation_status(event.id),
        Some(ActivationStatus::Completed(_))
    ));
}

#[tokio::test]
async fn test_organizer_is_funded_for_every_opt_in() {
    let h = Harness::with_config(CustodyConfig {
        user_seed_amount: 3_000,
        ..CustodyConfig::default()
    });

    let (event, report) = h.activated_event(5).await;

    assert!(report.is_complete(), "failures: {:?}", report.failures);
    assert_eq!(h.ledger.minted_count(), 5);
    assert_eq!(h.held_by(&event, ORGANIZER).len(), 5);
}

#[tokio::test]
async fn test_temporary_account_is_stored_under_the_event_id() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;

    let temp = h
        .secrets
        .get(&h.orchestrator.config().paths.for_event(event.id))
        .expect("temporary account should be stored");
    assert_eq!(temp.address, event.temp_account_address);
    assert_eq!(temp.recovery_phrase, event.temp_security_passphrase);
}

#[tokio::test]
async fn test_failed_mint_is_reported_not_dropped() {
    let h = Harness::new();
    h.ledger.fail_next(LedgerOperation::MintAsset);

    let (event, report) = h.activated_event(3).await;

    assert!(!report.is_complete());
    assert_eq!(report.requested, 3);
    assert_eq!(report.minted.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, SeedStage::Mint);
    assert_eq!(h.store.tickets_for(event.id).len(), 2);
}

#[tokio::test]
async fn test_failed_row_insert_leaves_asset_with_organizer() {
    let h = Harness::new();
    h.store
        .fail_next_ticket_insert(PersistenceError::Database("disk full".to_string()));

    let (event, report) = h.activated_event(2).await;

    assert_eq!(report.minted.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, SeedStage::Insert);
    assert_eq!(h.store.tickets_for(event.id).len(), 1);

    // Both assets reached the organizer even though one has no row.
    let organizer = h.address_of(ORGANIZER);
    let seeded_assets = h.ledger.minted_count();
    assert_eq!(seeded_assets, 2);
    let row_asset = h.store.tickets_for(event.id)[0].asset_id;
    assert_eq!(h.ledger.holder_of(row_asset), Some(organizer));
}

#[tokio::test]
async fn test_activation_without_treasury_fails_observably() {
    let h = Harness::without_treasury();

    let (event, mut activation) = h
        .orchestrator
        .create_public_event(ORGANIZER, new_event(2))
        .await
        .expect("event row does not need the treasury");

    let status = activation.wait().await;
    assert!(matches!(status, ActivationStatus::Failed(ref reason) if reason.contains("treasury")));
    assert_eq!(h.orchestrator.activation_status(event.id), Some(status));
    assert!(h.store.tickets_for(event.id).is_empty());
    assert_eq!(h.ledger.minted_count(), 0);
}

#[tokio::test]
async fn test_event_without_tickets_is_rejected() {
    let h = Harness::new();

    let err = h
        .orchestrator
        .create_public_event(ORGANIZER, new_event(0))
        .await
        .unwrap_err();

    assert!(matches!(err, CustodyError::Validation(_)));
    assert!(h.ledger.calls().is_empty());
}

// ============================================================================
// Custody lifecycle
// ============================================================================

#[tokio::test]
async fn test_first_sale_resell_resale_buy_redeem() {
    let h = Harness::new();
    let (event, _) = h.activated_event(3).await;

    // First-sale buy moves exactly one ticket.
    let bought = h
        .orchestrator
        .transfer(TransferIntent::FirstSaleBuy {
            public_event_id: event.id,
            buyer: BUYER,
        })
        .await
        .expect("first-sale buy");
    assert_eq!(bought.current_holder_id, BUYER);
    assert_eq!(bought.status, TicketStatus::Active);
    assert_eq!(h.held_by(&event, BUYER).len(), 1);
    assert_eq!(h.held_by(&event, ORGANIZER).len(), 2);
    h.assert_custody_consistent(&bought);

    // Resell keeps the holder.
    let listed = h
        .orchestrator
        .transfer(TransferIntent::Resell {
            ticket_id: bought.id,
            seller: BUYER,
            price: 9_000,
        })
        .await
        .expect("resell");
    assert_eq!(listed.current_holder_id, BUYER);
    assert_eq!(listed.status, TicketStatus::Resell);
    assert_eq!(listed.price, 9_000);
    assert_eq!(listed.available_to_resell, Some(true));
    h.assert_custody_consistent(&listed);

    // Resale buy restores the original price.
    let resold = h
        .orchestrator
        .transfer(TransferIntent::ResaleBuy {
            ticket_id: listed.id,
            public_event_id: event.id,
            buyer: RESALE_BUYER,
        })
        .await
        .expect("resale buy");
    assert_eq!(resold.current_holder_id, RESALE_BUYER);
    assert_eq!(resold.status, TicketStatus::Active);
    assert_eq!(resold.price, TICKET_PRICE);
    assert_eq!(resold.available_to_resell, Some(false));
    h.assert_custody_consistent(&resold);

    // Redeem is terminal.
    let redeemed = h
        .orchestrator
        .transfer(TransferIntent::Redeem {
            ticket_id: resold.id,
            holder: RESALE_BUYER,
        })
        .await
        .expect("redeem");
    assert_eq!(redeemed.status, TicketStatus::Redeem);

    let attempts = [
        TransferIntent::DirectTransfer {
            ticket_id: redeemed.id,
            from: RESALE_BUYER,
            to: FRIEND,
        },
        TransferIntent::Resell {
            ticket_id: redeemed.id,
            seller: RESALE_BUYER,
            price: 1_000,
        },
        TransferIntent::ResaleBuy {
            ticket_id: redeemed.id,
            public_event_id: event.id,
            buyer: FRIEND,
        },
        TransferIntent::Redeem {
            ticket_id: redeemed.id,
            holder: RESALE_BUYER,
        },
    ];
    for intent in attempts {
        let err = h.orchestrator.transfer(intent).await.unwrap_err();
        assert!(
            matches!(err, CustodyError::TicketState { status: TicketStatus::Redeem, .. }),
            "unexpected error: {err:?}"
        );
    }
    let after = h.orchestrator.ticket(redeemed.id).await.unwrap();
    assert_eq!(after.current_holder_id, RESALE_BUYER);
    h.assert_custody_consistent(&after);
}

#[tokio::test]
async fn test_first_sale_buys_lowest_id_until_sold_out() {
    let h = Harness::new();
    let (event, report) = h.activated_event(2).await;

    let first = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    let second = h.orchestrator.first_sale_buy(event.id, FRIEND).await.unwrap();
    assert_eq!(vec![first.id, second.id], report.minted);

    let err = h.orchestrator.first_sale_buy(event.id, RESALE_BUYER).await.unwrap_err();
    assert!(matches!(err, CustodyError::NotFound { entity: "available ticket", .. }));
}

#[tokio::test]
async fn test_direct_transfer_keeps_status() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    let listed = h.orchestrator.resell(bought.id, BUYER, 4_000).await.unwrap();

    let sent = h
        .orchestrator
        .direct_transfer(listed.id, BUYER, FRIEND)
        .await
        .expect("direct transfer");

    assert_eq!(sent.current_holder_id, FRIEND);
    assert_eq!(sent.status, TicketStatus::Resell);
    assert_eq!(sent.price, 4_000);
    h.assert_custody_consistent(&sent);
}

#[tokio::test]
async fn test_direct_transfer_moves_ledger_before_row() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    h.existing_account(FRIEND, 1_000_000);
    let calls_before = h.ledger.calls().len();
    let updates_before = h.store.update_attempts();

    let sent = h
        .orchestrator
        .direct_transfer(bought.id, BUYER, FRIEND)
        .await
        .unwrap();

    assert_eq!(
        h.ledger.calls()[calls_before..],
        [
            LedgerOperation::AccountBalance,
            LedgerOperation::OptIn,
            LedgerOperation::WaitForConfirmation,
            LedgerOperation::AccountBalance,
            LedgerOperation::Transfer,
            LedgerOperation::WaitForConfirmation,
        ]
    );
    assert_eq!(h.store.update_attempts(), updates_before + 1);
    assert_eq!(sent.current_holder_id, FRIEND);
    h.assert_custody_consistent(&sent);
}

#[tokio::test]
async fn test_failed_opt_in_never_touches_the_row() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    let friend = h.existing_account(FRIEND, 1_000_000);
    let calls_before = h.ledger.calls().len();
    let updates_before = h.store.update_attempts();
    h.ledger.fail_next(LedgerOperation::OptIn);

    let err = h
        .orchestrator
        .direct_transfer(bought.id, BUYER, FRIEND)
        .await
        .unwrap_err();

    assert!(matches!(err, CustodyError::Ledger { .. }));
    assert_eq!(h.store.update_attempts(), updates_before);
    assert!(!h.ledger.is_opted_in(&friend, bought.asset_id));
    assert!(!h.ledger.calls()[calls_before..].contains(&LedgerOperation::Transfer));
    let ticket = h.orchestrator.ticket(bought.id).await.unwrap();
    assert_eq!(ticket.current_holder_id, BUYER);
    h.assert_custody_consistent(&ticket);
}

#[tokio::test]
async fn test_recipient_short_of_fees_is_topped_up() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let friend = h.existing_account(FRIEND, 0);

    let bought = h
        .orchestrator
        .first_sale_buy(event.id, FRIEND)
        .await
        .expect("empty account should be topped up");

    assert_eq!(bought.current_holder_id, FRIEND);
    h.assert_custody_consistent(&bought);
    assert!(h.ledger.is_opted_in(&friend, bought.asset_id));
    // Topped up by the seed amount, less the opt-in fee.
    assert_eq!(
        h.ledger.balance(&friend),
        h.orchestrator.config().user_seed_amount - 1_000
    );
}

#[tokio::test]
async fn test_concurrent_first_buys_share_one_account() {
    init_test_tracing();
    let ledger = InMemoryLedger::new();
    let secrets = InMemorySecretStore::new();
    let store = InMemoryTicketStore::new();
    let config = CustodyConfig::default();
    secrets.insert(config.paths.treasury.clone(), ledger.funded_account(1_000_000_000));
    let orchestrator = Orchestrator::new(
        ledger.clone(),
        Interleaving(secrets.clone()),
        store.clone(),
        config,
    );

    let mut events = Vec::new();
    for _ in 0..2 {
        let (event, mut activation) = orchestrator
            .create_public_event(ORGANIZER, new_event(1))
            .await
            .unwrap();
        assert!(matches!(activation.wait().await, ActivationStatus::Completed(_)));
        events.push(event);
    }
    let created_before = created_accounts(&ledger);

    let (first, second) = tokio::join!(
        orchestrator.first_sale_buy(events[0].id, BUYER),
        orchestrator.first_sale_buy(events[1].id, BUYER),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(created_accounts(&ledger) - created_before, 1);
    let buyer = secrets
        .get(&orchestrator.config().paths.for_user(BUYER))
        .expect("buyer account stored")
        .address;
    assert_eq!(ledger.holder_of(first.asset_id), Some(buyer.clone()));
    assert_eq!(ledger.holder_of(second.asset_id), Some(buyer));
}

#[tokio::test]
async fn test_flat_request_dispatches_to_intent() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;

    let request = TransferRequest {
        public_event_id: event.id.0,
        to_user_id: BUYER.0,
        ..TransferRequest::default()
    };
    let intent = TransferIntent::try_from(request).unwrap();
    let bought = h.orchestrator.transfer(intent).await.unwrap();

    assert_eq!(bought.current_holder_id, BUYER);
}

#[tokio::test]
async fn test_listings_and_holdings_follow_custody() {
    let h = Harness::new();
    let (event, _) = h.activated_event(3).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    h.orchestrator.resell(bought.id, BUYER, 6_000).await.unwrap();

    let listings = h.orchestrator.list_public_events().await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].available_tickets, 2);
    assert_eq!(listings[0].resale_tickets.len(), 1);
    assert_eq!(listings[0].resale_tickets[0].id, bought.id);

    let held = h.orchestrator.tickets_held_by(BUYER).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].event.id, event.id);
    assert_eq!(h.orchestrator.public_event(event.id).await.unwrap(), event);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_side_effects() {
    let h = Harness::new();
    let (event, _) = h.activated_event(2).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    let calls_before = h.ledger.calls().len();
    let updates_before = h.store.update_attempts();

    let cases = [
        h.orchestrator.resell(bought.id, BUYER, 0).await,
        h.orchestrator.resell(bought.id, FRIEND, 5_000).await,
        h.orchestrator.direct_transfer(bought.id, BUYER, BUYER).await,
        h.orchestrator.direct_transfer(bought.id, FRIEND, BUYER).await,
        h.orchestrator.first_sale_buy(event.id, ORGANIZER).await,
    ];
    for result in cases {
        let err = result.unwrap_err();
        assert!(matches!(err, CustodyError::Validation(_)), "unexpected error: {err:?}");
        assert_eq!(err.category(), ErrorCategory::Rejected);
    }

    // Not listed, so not buyable on resale.
    let err = h
        .orchestrator
        .resale_buy(bought.id, event.id, FRIEND)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::TicketState { status: TicketStatus::Active, .. }));

    assert_eq!(h.ledger.calls().len(), calls_before);
    assert_eq!(h.store.update_attempts(), updates_before);
}

#[tokio::test]
async fn test_resale_buy_checks_the_event() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let (other, _) = h.activated_event(1).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    h.orchestrator.resell(bought.id, BUYER, 3_000).await.unwrap();

    let err = h
        .orchestrator
        .resale_buy(bought.id, other.id, FRIEND)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::Validation(_)));

    let err = h
        .orchestrator
        .resale_buy(bought.id, event.id, BUYER)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_ticket_and_event_are_not_found() {
    let h = Harness::new();

    let err = h
        .orchestrator
        .redeem(ticket_custody_core::TicketId(404), BUYER)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::NotFound { entity: "ticket", .. }));

    let err = h
        .orchestrator
        .first_sale_buy(ticket_custody_core::PublicEventId(404), BUYER)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::NotFound { entity: "public event", .. }));
}

#[tokio::test]
async fn test_sender_without_account_is_not_found() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;

    // A row whose holder never got a ledger account.
    let mut orphan = h.store.tickets_for(event.id)[0].clone();
    orphan.current_holder_id = UserId(77);
    h.store.put_ticket(orphan.clone());

    let err = h
        .orchestrator
        .direct_transfer(orphan.id, UserId(77), FRIEND)
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::NotFound { entity: "ledger account", .. }));
    assert_eq!(h.orchestrator.ticket(orphan.id).await.unwrap().current_holder_id, UserId(77));
}

// ============================================================================
// Ledger failures
// ============================================================================

#[tokio::test]
async fn test_ledger_transfer_failure_leaves_row_unchanged() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let updates_before = h.store.update_attempts();
    h.ledger.fail_next(LedgerOperation::Transfer);

    let err = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap_err();

    assert!(matches!(err, CustodyError::Ledger { .. }));
    assert_eq!(err.category(), ErrorCategory::RetryableFailure);
    assert_eq!(h.store.update_attempts(), updates_before);
    let ticket = &h.store.tickets_for(event.id)[0];
    assert_eq!(ticket.current_holder_id, ORGANIZER);
    h.assert_custody_consistent(ticket);

    // The buyer stays opted in; the retry goes through.
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();
    assert_eq!(bought.current_holder_id, BUYER);
    h.assert_custody_consistent(&bought);
}

#[tokio::test]
async fn test_confirmation_timeout_leaves_row_unchanged() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let bought = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap();

    // FRIEND is provisioned and opted in first; fail the transfer's wait.
    h.orchestrator
        .direct_transfer(bought.id, BUYER, FRIEND)
        .await
        .unwrap();
    h.ledger.fail_next_with(
        LedgerOperation::WaitForConfirmation,
        ticket_custody_core::LedgerErrorKind::ConfirmationTimeout { seconds: 0 },
    );

    let err = h
        .orchestrator
        .direct_transfer(bought.id, FRIEND, BUYER)
        .await
        .unwrap_err();

    assert!(matches!(err, CustodyError::Ledger { .. }));
    let ticket = h.orchestrator.ticket(bought.id).await.unwrap();
    assert_eq!(ticket.current_holder_id, FRIEND);
}

// ============================================================================
// Divergence and reconciliation
// ============================================================================

#[tokio::test]
async fn test_commit_failure_after_transfer_is_recorded_and_reconciled() {
    let h = Harness::new();
    let (event, _) = h.activated_event(2).await;
    h.store.fail_next_commit();

    let err = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap_err();

    let (ticket_id, asset_id, intended_holder) = match err {
        CustodyError::Diverged {
            ticket_id,
            asset_id,
            intended_holder,
            ..
        } => (ticket_id, asset_id, intended_holder),
        other => panic!("expected a divergence, got {other:?}"),
    };
    assert_eq!(intended_holder, BUYER);

    // The ledger moved, the row did not.
    assert_eq!(h.ledger.holder_of(asset_id), Some(h.address_of(BUYER)));
    assert_eq!(
        h.orchestrator.ticket(ticket_id).await.unwrap().current_holder_id,
        ORGANIZER
    );

    let pending = h.orchestrator.pending_divergences(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].divergence.operation, "first_sale_buy");
    assert_eq!(pending[0].divergence.asset_id, asset_id);

    let repaired = h.orchestrator.reconcile(pending[0].id).await.unwrap();
    assert_eq!(repaired.id, ticket_id);
    assert_eq!(repaired.current_holder_id, BUYER);
    h.assert_custody_consistent(&repaired);

    assert!(h.orchestrator.pending_divergences(10).await.unwrap().is_empty());
    assert_eq!(h.store.divergences()[0].status, DivergenceStatus::Resolved);

    // Closed entries are not applied twice.
    let err = h.orchestrator.reconcile(pending[0].id).await.unwrap_err();
    assert!(matches!(err, CustodyError::Validation(_)));
}

#[tokio::test]
async fn test_divergence_is_reported_even_when_recording_fails() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    h.store.fail_next_commit();
    h.store.fail_next_divergence_record();

    let err = h.orchestrator.first_sale_buy(event.id, BUYER).await.unwrap_err();

    assert!(err.is_diverged());
    assert!(h.store.divergences().is_empty());
}

#[tokio::test]
async fn test_reconcile_refuses_when_ledger_disagrees() {
    let h = Harness::new();
    let (event, _) = h.activated_event(1).await;
    let ticket = h.store.tickets_for(event.id)[0].clone();

    // BUYER has an account but never received the asset.
    h.secrets.insert(
        h.orchestrator.config().paths.for_user(BUYER),
        h.ledger.funded_account(1_000_000),
    );
    let id = h
        .store
        .record_divergence(&NewDivergence {
            operation: "first_sale_buy".to_string(),
            update: TicketUpdate {
                ticket_id: ticket.id,
                expected_holder: ORGANIZER,
                expected_status: TicketStatus::Active,
                change: TicketChange {
                    holder: Some(BUYER),
                    ..TicketChange::default()
                },
            },
            asset_id: ticket.asset_id,
            error_message: "commit failed".to_string(),
        })
        .await
        .unwrap();

    let err = h.orchestrator.reconcile(id).await.unwrap_err();

    assert!(matches!(err, CustodyError::Validation(_)));
    assert_eq!(h.orchestrator.ticket(ticket.id).await.unwrap().current_holder_id, ORGANIZER);
    assert_eq!(h.orchestrator.pending_divergences(10).await.unwrap().len(), 1);

    h.orchestrator
        .discard_divergence(id, "asset never moved")
        .await
        .unwrap();
    assert!(h.orchestrator.pending_divergences(10).await.unwrap().is_empty());
    assert_eq!(h.store.divergences()[0].status, DivergenceStatus::Discarded);
}

#[tokio::test]
async fn test_reconcile_unknown_divergence_is_not_found() {
    let h = Harness::new();

    let err = h.orchestrator.reconcile(99).await.unwrap_err();

    assert!(matches!(err, CustodyError::NotFound { entity: "divergence", .. }));
}
