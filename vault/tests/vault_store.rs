//! Vault secret store against a mock Vault server.

#![allow(clippy::unwrap_used)]

use serde_json::json;
use ticket_custody_core::{LedgerAccount, SecretStore, SecretStoreError};
use ticket_custody_vault::{VaultConfig, VaultSecretStore};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "s.testtoken";

fn store(server: &MockServer) -> VaultSecretStore {
    VaultSecretStore::new(VaultConfig::new(server.uri(), TOKEN)).unwrap()
}

#[tokio::test]
async fn reads_account_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/42"))
        .and(header("X-Vault-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_duration": 2764800,
            "data": {
                "account_address": "ADDR42",
                "private_key": "abcd",
                "security_passphrase": "word word word"
            }
        })))
        .mount(&server)
        .await;

    let account = store(&server).read("users/42").await.unwrap();
    assert_eq!(account.address, "ADDR42");
    assert_eq!(account.private_key, "abcd");
    assert_eq!(account.recovery_phrase, "word word word");
}

#[tokio::test]
async fn missing_secret_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/7"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    let err = store(&server).read("users/7").await.unwrap_err();
    assert_eq!(err, SecretStoreError::NotFound("users/7".to_string()));
}

#[tokio::test]
async fn incomplete_secret_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/temp/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "account_address": "ADDR" }
        })))
        .mount(&server)
        .await;

    let err = store(&server).read("temp/3").await.unwrap_err();
    assert!(matches!(err, SecretStoreError::Malformed(_)));
}

#[tokio::test]
async fn server_errors_are_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/users/1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = store(&server).read("users/1").await.unwrap_err();
    assert!(matches!(err, SecretStoreError::Transport(_)));
}

#[tokio::test]
async fn writes_account_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/temp/9"))
        .and(header("X-Vault-Token", TOKEN))
        .and(body_json(json!({
            "account_address": "TEMP9",
            "private_key": "beef",
            "security_passphrase": "one two"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let account = LedgerAccount::new("TEMP9".into(), "beef".into(), "one two".into());
    store(&server).write("temp/9", &account).await.unwrap();
}

#[tokio::test]
async fn mounts_only_missing_engines() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/mounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "users/": { "type": "kv" },
                "sys/": { "type": "system" }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/temp"))
        .and(body_json(json!({ "type": "kv" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/sys/mounts/users"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    store(&server).ensure_mounts(&["users", "temp"]).await.unwrap();
}

#[tokio::test]
async fn sealed_vault_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/sys/seal-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sealed": true })))
        .mount(&server)
        .await;

    let err = store(&server).check_unsealed().await.unwrap_err();
    assert!(matches!(err, SecretStoreError::Transport(_)));
}
