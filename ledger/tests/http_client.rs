//! HTTP ledger client against a mock node.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use serde_json::json;
use std::time::Duration;
use ticket_custody_core::{AssetId, LedgerClient, LedgerErrorKind, LedgerOperation, TxId};
use ticket_custody_ledger::{HttpLedgerClient, LedgerConfig, SignedTransaction};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const API_KEY: &str = "test-api-key";

fn client(server: &MockServer) -> HttpLedgerClient {
    let mut config = LedgerConfig::new(server.uri(), API_KEY);
    config.poll_interval = Duration::from_millis(10);
    HttpLedgerClient::new(config).expect("client builds")
}

async fn mount_params(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/transactions/params"))
        .and(header("X-API-Key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "last-round": 1200,
            "genesis-id": "testnet-v1",
            "genesis-hash": "SGO1GKSzyE7IEPItTxCByw9x8FmnrCDexi9/cOUJOiI=",
            "min-fee": 1000
        })))
        .mount(server)
        .await;
}

/// Answers a submission with the id of the transaction it carries.
struct AcceptWithHash;

impl Respond for AcceptWithHash {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let signed: SignedTransaction =
            serde_json::from_slice(&request.body).expect("body is a signed transaction");
        let id = signed.txn.id(LedgerOperation::Transfer).expect("transaction encodes");
        ResponseTemplate::new(200).set_body_json(json!({ "txId": id.to_string() }))
    }
}

fn is_transaction_hash(tx: &TxId) -> bool {
    tx.0.len() == 64 && tx.0.chars().all(|c| c.is_ascii_hexdigit())
}

#[tokio::test]
async fn mint_submits_signed_asset_config() {
    let server = MockServer::start().await;
    mount_params(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .and(header("X-API-Key", API_KEY))
        .and(body_partial_json(json!({
            "txn": {
                "type": "acfg",
                "fv": 1200,
                "lv": 2200,
                "apar": { "t": 1, "dc": 0, "an": "eventers", "un": "tickets" }
            }
        })))
        .respond_with(AcceptWithHash)
        .expect(1)
        .mount(&server)
        .await;

    let ledger = client(&server);
    let creator = ledger.create_account().unwrap();

    let tx = ledger.mint_asset(&creator).await.unwrap();
    assert!(is_transaction_hash(&tx), "unexpected id {tx}");
}

#[tokio::test]
async fn node_id_that_does_not_match_the_transaction_is_rejected() {
    let server = MockServer::start().await;
    mount_params(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "txId": "SOMETHINGELSE" })))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = client(&server);
    let from = ledger.create_account().unwrap();
    let to = ledger.create_account().unwrap();

    let err = ledger.fund(&from, &to.address, 500).await.unwrap_err();
    assert_eq!(err.operation, LedgerOperation::Fund);
    assert!(matches!(err.kind, LedgerErrorKind::Rejected(ref m) if m.contains("SOMETHINGELSE")));
}

#[tokio::test]
async fn rejected_transfer_reports_cause() {
    let server = MockServer::start().await;
    mount_params(&server).await;

    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "TransactionPool.Remember: asset 77 missing from RECEIVER"
        })))
        .mount(&server)
        .await;

    let ledger = client(&server);
    let from = ledger.create_account().unwrap();
    let to = ledger.create_account().unwrap();

    let err = ledger
        .transfer(&from, &to.address, AssetId(77), 1)
        .await
        .unwrap_err();
    assert_eq!(err.operation, LedgerOperation::Transfer);
    assert!(matches!(err.kind, LedgerErrorKind::NotOptedIn(_)));
}

#[tokio::test]
async fn transfer_to_malformed_address_never_reaches_the_node() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ledger = client(&server);
    let from = ledger.create_account().unwrap();

    let err = ledger
        .transfer(&from, "NOT-AN-ADDRESS", AssetId(1), 1)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, LedgerErrorKind::InvalidKey(_)));
}

#[tokio::test]
async fn duplicate_opt_in_is_detected_before_submission() {
    let server = MockServer::start().await;
    let ledger = client(&server);
    let account = ledger.create_account().unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/v2/accounts/{}/assets/55", account.address)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "asset-holding": { "amount": 0, "asset-id": 55, "is-frozen": false }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = ledger.opt_in(&account, AssetId(55)).await.unwrap_err();
    assert!(err.is_already_opted_in());
}

#[tokio::test]
async fn opt_in_is_a_zero_amount_self_transfer() {
    let server = MockServer::start().await;
    mount_params(&server).await;
    let ledger = client(&server);
    let account = ledger.create_account().unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/v2/accounts/{}/assets/55", account.address)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "account asset info not found"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/transactions"))
        .and(body_partial_json(json!({
            "txn": {
                "type": "axfer",
                "xaid": 55,
                "aamt": 0,
                "arcv": account.address,
                "snd": account.address
            }
        })))
        .respond_with(AcceptWithHash)
        .expect(1)
        .mount(&server)
        .await;

    let tx = ledger.opt_in(&account, AssetId(55)).await.unwrap();
    assert!(is_transaction_hash(&tx), "unexpected id {tx}");
}

#[tokio::test]
async fn confirmation_polls_until_confirmed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/transactions/pending/TX1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/transactions/pending/TX1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "confirmed-round": 0 })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/transactions/pending/TX1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "confirmed-round": 1210,
            "asset-index": 9001
        })))
        .mount(&server)
        .await;

    let ledger = client(&server);
    let confirmation = ledger
        .wait_for_confirmation(&TxId::new("TX1"), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(confirmation.round.0, 1210);
    assert_eq!(confirmation.created_asset, Some(AssetId(9001)));
}

#[tokio::test]
async fn confirmation_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/transactions/pending/SLOW"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "confirmed-round": 0 })))
        .mount(&server)
        .await;

    let ledger = client(&server);
    let err = ledger
        .wait_for_confirmation(&TxId::new("SLOW"), Duration::from_millis(100))
        .await
        .unwrap_err();

    assert_eq!(err.operation, LedgerOperation::WaitForConfirmation);
    assert!(matches!(err.kind, LedgerErrorKind::ConfirmationTimeout { .. }));
}

#[tokio::test]
async fn pool_error_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/transactions/pending/DROPPED"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "confirmed-round": 0,
            "pool-error": "transaction already in ledger"
        })))
        .mount(&server)
        .await;

    let ledger = client(&server);
    let err = ledger
        .wait_for_confirmation(&TxId::new("DROPPED"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err.kind, LedgerErrorKind::Rejected(_)));
}

#[tokio::test]
async fn holds_asset_reads_the_holding_amount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/accounts/HOLDER/assets/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "asset-holding": { "amount": 1, "asset-id": 7, "is-frozen": false }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/accounts/STRANGER/assets/7"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ledger = client(&server);
    assert!(ledger.holds_asset("HOLDER", AssetId(7)).await.unwrap());
    assert!(!ledger.holds_asset("STRANGER", AssetId(7)).await.unwrap());
}

#[tokio::test]
async fn spendable_balance_excludes_the_locked_minimum() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/accounts/BUYER"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "address": "BUYER",
            "amount": 350_000,
            "min-balance": 200_000
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/accounts/NEWCOMER"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ledger = client(&server);
    assert_eq!(ledger.spendable_balance("BUYER").await.unwrap(), 150_000);
    assert_eq!(ledger.spendable_balance("NEWCOMER").await.unwrap(), 0);
}

#[tokio::test]
async fn node_status_reports_last_round() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "last-round": 40 })))
        .mount(&server)
        .await;

    let ledger = client(&server);
    assert_eq!(ledger.status().await.unwrap().last_round, 40);
}

#[tokio::test]
async fn unreachable_node_status_names_the_status_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let ledger = client(&server);
    let err = ledger.status().await.unwrap_err();
    assert_eq!(err.operation, LedgerOperation::Status);
    assert!(matches!(err.kind, LedgerErrorKind::Transport(_)));
}
