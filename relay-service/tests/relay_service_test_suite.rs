use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use crate::setup::TestRelay;

mod setup;

fn b64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

#[tokio::test]
async fn health_reports_ready_once_started() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let response = relay.server.get("/health").await;
    response.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn version_reports_package_name() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let response = relay.server.get("/version").await;
    response.assert_status_ok();
    assert!(response.text().contains("consortium-relay-service"));
    Ok(())
}

#[tokio::test]
async fn auth_rejects_bad_signature() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let key = relay_test_utils::test_signing_key();
    let response = relay
        .server
        .post("/v1/auth")
        .json(&json!({
            "publicKey": b64(key.verifying_key().to_bytes()),
            "challenge": b64(b"challenge"),
            "signature": b64([0u8; 64]),
        }))
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn create_session_is_idempotent_on_tag() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let body = json!({
        "tag": "main",
        "metadata": "ciphertext-metadata",
        "agentState": null,
        "dataEncryptionKey": null,
    });

    let first = relay
        .server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&body)
        .await;
    first.assert_status_ok();
    let first_session: serde_json::Value = first.json();

    let second = relay
        .server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&body)
        .await;
    second.assert_status_ok();
    let second_session: serde_json::Value = second.json();

    assert_eq!(first_session["id"], second_session["id"]);

    let listed = relay
        .server
        .get("/v1/sessions")
        .authorization_bearer(&token)
        .await;
    listed.assert_status_ok();
    let sessions: Vec<serde_json::Value> = listed.json();
    assert_eq!(sessions.len(), 1);

    Ok(())
}

#[tokio::test]
async fn delete_session_then_messages_not_found() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let created = relay
        .server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&json!({
            "tag": "to-delete",
            "metadata": "m",
            "agentState": null,
            "dataEncryptionKey": null,
        }))
        .await;
    created.assert_status_ok();
    let session: serde_json::Value = created.json();
    let session_id = session["id"].as_str().expect("id is a string").to_owned();

    let deleted = relay
        .server
        .delete(&format!("/v1/sessions/{session_id}"))
        .authorization_bearer(&token)
        .await;
    deleted.assert_status_ok();

    let again = relay
        .server
        .delete(&format!("/v1/sessions/{session_id}"))
        .authorization_bearer(&token)
        .await;
    again.assert_status_not_found();

    let messages = relay
        .server
        .get(&format!("/v1/sessions/{session_id}/messages"))
        .authorization_bearer(&token)
        .await;
    messages.assert_status_not_found();

    Ok(())
}

#[tokio::test]
async fn register_machine_is_idempotent_and_listed() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let body = json!({
        "id": "laptop-1",
        "metadata": "machine-metadata",
        "daemonState": null,
        "dataEncryptionKey": null,
    });

    let first = relay
        .server
        .post("/v1/machines")
        .authorization_bearer(&token)
        .json(&body)
        .await;
    first.assert_status_ok();

    let second = relay
        .server
        .post("/v1/machines")
        .authorization_bearer(&token)
        .json(&body)
        .await;
    second.assert_status_ok();

    let listed = relay
        .server
        .get("/v1/machines")
        .authorization_bearer(&token)
        .await;
    listed.assert_status_ok();
    let machines: Vec<serde_json::Value> = listed.json();
    assert_eq!(machines.len(), 1);

    let got = relay
        .server
        .get("/v1/machines/laptop-1")
        .authorization_bearer(&token)
        .await;
    got.assert_status_ok();

    Ok(())
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let response = relay.server.get("/v1/sessions").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn websocket_update_round_trip_on_create_session() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let mut socket = relay
        .server
        .get_websocket(&format!(
            "/v1/updates?token={token}&clientType=user"
        ))
        .await
        .into_websocket()
        .await;

    let created = relay
        .server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&json!({
            "tag": "socket-session",
            "metadata": "m",
            "agentState": null,
            "dataEncryptionKey": null,
        }))
        .await;
    created.assert_status_ok();

    let frame: serde_json::Value = socket.receive_json().await;
    assert_eq!(frame["event"], "update");
    assert_eq!(frame["data"]["body"]["t"], "new-session");

    Ok(())
}

#[tokio::test]
async fn websocket_ping_replies_with_matching_ack() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let mut socket = relay
        .server
        .get_websocket(&format!(
            "/v1/updates?token={token}&clientType=user"
        ))
        .await
        .into_websocket()
        .await;

    socket
        .send_json(&json!({"event": "ping", "data": {}, "ackId": "ping-1"}))
        .await;
    let frame: serde_json::Value = socket.receive_json().await;
    assert_eq!(frame["event"], "ping");
    assert_eq!(frame["ackId"], "ping-1");

    Ok(())
}

#[tokio::test]
async fn websocket_update_metadata_reports_version_mismatch() -> eyre::Result<()> {
    let relay = TestRelay::start().await?;
    let token = relay.auth_new_account().await;

    let created = relay
        .server
        .post("/v1/sessions")
        .authorization_bearer(&token)
        .json(&json!({
            "tag": "race",
            "metadata": "m",
            "agentState": null,
            "dataEncryptionKey": null,
        }))
        .await;
    created.assert_status_ok();
    let session: serde_json::Value = created.json();
    let session_id = session["id"].as_str().expect("id is a string").to_owned();

    let mut socket = relay
        .server
        .get_websocket(&format!(
            "/v1/updates?token={token}&clientType=user"
        ))
        .await
        .into_websocket()
        .await;

    socket
        .send_json(&json!({
            "event": "update-metadata",
            "data": {"sid": session_id, "metadata": "v2", "expectedVersion": 999},
            "ackId": "upd-1",
        }))
        .await;
    let frame: serde_json::Value = socket.receive_json().await;
    assert_eq!(frame["event"], "update-metadata");
    assert_eq!(frame["ackId"], "upd-1");
    assert_eq!(frame["data"]["result"], "version-mismatch");

    Ok(())
}
