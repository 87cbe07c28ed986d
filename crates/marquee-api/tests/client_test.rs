#![allow(clippy::unwrap_used)]
// Integration tests for `SignageClient` using wiremock.

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marquee_api::{CommandKind, CommandStatus, DeviceStatus, Error, PairingStatus, SignageClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, SignageClient) {
    let server = MockServer::start().await;
    let client = SignageClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

fn secret(s: &str) -> secrecy::SecretString {
    s.to_string().into()
}

// ── Authentication tests ────────────────────────────────────────────

#[tokio::test]
async fn test_login_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_partial_json(json!({
            "deviceId": "dev-1",
            "username": "lobby",
            "screenName": "Lobby Display",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    client
        .login("dev-1", "lobby", &secret("x"), "Lobby Display")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_login_rejection_surfaces_backend_message() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "Unknown screen for this account",
        })))
        .mount(&server)
        .await;

    let result = client
        .login("dev-1", "lobby", &secret("wrong"), "Lobby Display")
        .await;

    match result {
        Err(Error::Authentication { message }) => {
            assert_eq!(message, "Unknown screen for this account");
        }
        other => panic!("expected Authentication error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_login_unauthorized_status() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "error": "invalid API key",
        })))
        .mount(&server)
        .await;

    let result = client
        .login("dev-1", "lobby", &secret("x"), "Lobby Display")
        .await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

// ── Pairing tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_pairing_code() {
    let (server, client) = setup().await;

    let expires = Utc::now() + Duration::minutes(10);

    Mock::given(method("POST"))
        .and(path("/api/v1/pairing/generate"))
        .and(body_partial_json(json!({ "deviceId": "dev-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "197695",
            "expiresAt": expires,
        })))
        .mount(&server)
        .await;

    let grant = client
        .generate_pairing_code("dev-1", Some("Sony Bravia 55"))
        .await
        .unwrap();

    assert_eq!(grant.code, "197695");
    assert_eq!(grant.expires_at, expires);
}

#[tokio::test]
async fn test_poll_pairing_pending() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pairing/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "pending",
        })))
        .mount(&server)
        .await;

    let poll = client.poll_pairing("dev-1").await.unwrap();
    assert_eq!(poll.status, PairingStatus::Pending);
    assert!(poll.credentials.is_none());
}

#[tokio::test]
async fn test_poll_pairing_authenticated_delivers_credentials() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pairing/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "authenticated",
            "credentials": {
                "username": "lobby",
                "password": "s3cret",
                "screenName": "Lobby Display",
            },
        })))
        .mount(&server)
        .await;

    let poll = client.poll_pairing("dev-1").await.unwrap();
    assert_eq!(poll.status, PairingStatus::Authenticated);

    let creds = poll.credentials.expect("credentials present");
    assert_eq!(creds.username, "lobby");
    assert_eq!(creds.screen_name, "Lobby Display");
}

#[tokio::test]
async fn test_poll_pairing_expired() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/pairing/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "expired",
        })))
        .mount(&server)
        .await;

    let poll = client.poll_pairing("dev-1").await.unwrap();
    assert_eq!(poll.status, PairingStatus::Expired);
}

#[tokio::test]
async fn test_clear_device_auth() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/clear"))
        .and(body_partial_json(json!({ "deviceId": "dev-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    client.clear_device_auth("dev-1").await.unwrap();
}

// ── Status tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_push_status() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/devices/status"))
        .and(body_partial_json(json!({
            "deviceId": "dev-1",
            "screenName": "Lobby Display",
            "status": "online",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    client
        .push_status(
            "dev-1",
            "Lobby Display",
            "lobby",
            &secret("x"),
            DeviceStatus::Online,
            Utc::now(),
        )
        .await
        .unwrap();
}

// ── Command tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_commands() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "commands": [{
                "id": "c1",
                "deviceId": "dev-1",
                "command": "sync_status",
                "status": "pending",
                "payload": {},
            }],
        })))
        .mount(&server)
        .await;

    let commands = client.poll_commands("dev-1").await.unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].id, "c1");
    assert_eq!(commands[0].kind, CommandKind::SyncStatus);
    assert_eq!(commands[0].status, CommandStatus::Pending);
}

#[tokio::test]
async fn test_poll_commands_empty() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/poll"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "commands": [] })),
        )
        .mount(&server)
        .await;

    let commands = client.poll_commands("dev-1").await.unwrap();
    assert!(commands.is_empty());
}

#[tokio::test]
async fn test_ack_command_with_error_message() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/ack"))
        .and(body_partial_json(json!({
            "commandId": "c2",
            "status": "failed",
            "errorMessage": "no handler registered",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    client
        .ack_command("c2", CommandStatus::Failed, Some("no handler registered"))
        .await
        .unwrap();
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_server_error_maps_to_http() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/poll"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let result = client.poll_commands("dev-1").await;
    assert!(
        matches!(result, Err(Error::Http { status: 500, .. })),
        "expected Http error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_envelope_failure_maps_to_backend() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/ack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "unknown command id",
        })))
        .mount(&server)
        .await;

    let result = client
        .ack_command("nope", CommandStatus::Completed, None)
        .await;

    match result {
        Err(Error::Backend { message }) => assert_eq!(message, "unknown command id"),
        other => panic!("expected Backend error, got: {other:?}"),
    }
}
