//! The `/v1/updates` WebSocket protocol layer (§4.5).
//!
//! A connection's lifecycle is: validate the handshake, register with the
//! [`crate::router::EventRouter`], then process frames strictly in arrival
//! order until the socket closes, at which point the connection and any RPC
//! methods it had registered are torn down. Replies to the connection's own
//! frames — including server-initiated `rpc-request` forwards that land back
//! on a *different* connection of the same account — all flow back through
//! the router, never through a handler holding the socket's write half
//! directly.

pub mod errors;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::any;
use futures::{SinkExt, StreamExt};
use relay_types::api::v1::{
    ClientType, EphemeralEvent, ErrorEvent, MachineAliveFrame, MachineUpdateMetadataFrame,
    MachineUpdateStateFrame, MessageFrame, RpcCallFrame, RpcCallResult, RpcRegisterFrame,
    RpcRegisteredEvent, RpcUnregisterFrame, RpcUnregisteredEvent, ServerFrame, SessionAliveFrame,
    SessionEndFrame, UpdateBody, UpdateCallbackResult, UpdateCallbackValue, UpdateMetadataFrame,
    UpdateStateFrame, UpdatedField, WsAuthHandshake,
};
use relay_types::AccountId;
use relay_types::api::v1::ClientFrame;
use serde::Serialize;
use serde_json::Value;

use crate::RelayState;
use crate::events::{emit_ephemeral, emit_update};
use crate::metrics::{
    METRICS_ID_MESSAGES_DROPPED_DUPLICATE, METRICS_ID_MESSAGES_PERSISTED, METRICS_ID_RPC_CALLS,
    METRICS_ID_RPC_CALL_DURATION, METRICS_ID_RPC_TIMEOUTS, METRICS_ID_VERSION_CONFLICTS,
};
use crate::router::{ConnectionId, ConnectionScope, EventRouter, RecipientFilter};
use crate::rpc::RpcCallError;
use crate::time::{from_millis, now_millis, validate_heartbeat_time};
use crate::ws::errors::FrameError;
use relay_store::ConditionalUpdateOutcome;

/// Builds a router exposing the `/v1/updates` upgrade endpoint.
pub fn routes() -> Router<RelayState> {
    Router::new().route("/v1/updates", any(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    Query(handshake): Query<WsAuthHandshake>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.ws_max_message_size)
        .on_failed_upgrade(|err| tracing::warn!("websocket upgrade failed: {err:?}"))
        .on_upgrade(move |socket| handle_connection(socket, state, handshake))
}

fn validate_handshake(
    state: &RelayState,
    handshake: &WsAuthHandshake,
) -> Result<(AccountId, ConnectionScope), FrameError> {
    let verified = state
        .tokens
        .verify(&handshake.token)
        .ok_or_else(|| FrameError::AuthFailed("invalid or expired token".to_owned()))?;
    let scope = match handshake.client_type {
        ClientType::User => ConnectionScope::User,
        ClientType::Session => {
            let sid = handshake.session_id.ok_or_else(|| {
                FrameError::BadRequest("sessionId required for session-scoped connection".to_owned())
            })?;
            ConnectionScope::Session(sid)
        }
        ClientType::Machine => {
            let mid = handshake.machine_id.clone().ok_or_else(|| {
                FrameError::BadRequest("machineId required for machine-scoped connection".to_owned())
            })?;
            ConnectionScope::Machine(mid)
        }
    };
    Ok((verified.account_id, scope))
}

async fn reject(mut socket: WebSocket, err: FrameError) {
    let message = err.message();
    let frame = ServerFrame::push("error", ErrorEvent { message });
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::text(text)).await;
    }
    let _ = socket.send(Message::Close(Some(err.into_close_frame()))).await;
}

async fn handle_connection(socket: WebSocket, state: RelayState, handshake: WsAuthHandshake) {
    let (account_id, scope) = match validate_handshake(&state, &handshake) {
        Ok(v) => v,
        Err(err) => {
            reject(socket, err).await;
            return;
        }
    };

    let (connection_id, mut outbox) = state.router.add(account_id, scope.clone());

    if let ConnectionScope::Machine(ref mid) = scope {
        emit_ephemeral(
            &state.router,
            account_id,
            EphemeralEvent::MachineActivity {
                id: mid.clone(),
                active: true,
                active_at: now_millis(),
            },
            RecipientFilter::UserScopedOnly,
            None,
        );
    }

    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if sink.send(Message::text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                dispatch_frame(&state, account_id, connection_id, text.as_bytes()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.router.remove(account_id, connection_id);
    state.rpc.remove_connection(account_id, connection_id);
    if let ConnectionScope::Machine(ref mid) = scope {
        emit_ephemeral(
            &state.router,
            account_id,
            EphemeralEvent::MachineActivity {
                id: mid.clone(),
                active: false,
                active_at: now_millis(),
            },
            RecipientFilter::UserScopedOnly,
            None,
        );
    }
    send_task.abort();
}

/// Sends either a correlated reply (when `ack_id` is set) or a fire-and-forget
/// push to exactly one connection.
fn respond(
    router: &EventRouter,
    account_id: AccountId,
    connection_id: ConnectionId,
    event: &str,
    ack_id: Option<&str>,
    data: impl Serialize,
) {
    let frame = match ack_id {
        Some(id) => ServerFrame::reply(event, id, data),
        None => ServerFrame::push(event, data),
    };
    if let Ok(payload) = serde_json::to_string(&frame) {
        router.send_to_connection(account_id, connection_id, &payload);
    }
}

async fn dispatch_frame(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, raw: &[u8]) {
    let frame: ClientFrame = match serde_json::from_slice(raw) {
        Ok(f) => f,
        Err(err) => {
            tracing::debug!("malformed frame: {err}");
            return;
        }
    };

    if frame.event == "rpc-error" {
        if let Some(ack_id) = &frame.ack_id {
            let message = frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("RPC call failed")
                .to_owned();
            state.rpc.resolve(account_id, ack_id, Err(message));
        }
        return;
    }
    if let Some(ack_id) = &frame.ack_id
        && state.rpc.resolve(account_id, ack_id, Ok(frame.data.clone()))
    {
        return;
    }

    match frame.event.as_str() {
        "message" => handle_message(state, account_id, connection_id, frame).await,
        "session-alive" => handle_session_alive(state, account_id, frame).await,
        "session-end" => handle_session_end(state, account_id, frame).await,
        "machine-alive" => handle_machine_alive(state, account_id, frame).await,
        "update-metadata" => handle_update_metadata(state, account_id, connection_id, frame).await,
        "update-state" => handle_update_state(state, account_id, connection_id, frame).await,
        "machine-update-metadata" => {
            handle_machine_update_metadata(state, account_id, connection_id, frame).await
        }
        "machine-update-state" => {
            handle_machine_update_state(state, account_id, connection_id, frame).await
        }
        "rpc-register" => handle_rpc_register(state, account_id, connection_id, frame).await,
        "rpc-unregister" => handle_rpc_unregister(state, account_id, connection_id, frame).await,
        "rpc-call" => handle_rpc_call(state, account_id, connection_id, frame).await,
        "ping" => handle_ping(state, account_id, connection_id, frame),
        other => tracing::debug!("unknown frame event {other:?}"),
    }
}

async fn handle_message(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<MessageFrame>(frame.data) else {
        return;
    };
    match state.store.get_session_owned(account_id, body.sid).await {
        Ok(Some(_)) => {}
        Ok(None) => return,
        Err(err) => {
            tracing::error!("{err:?}");
            return;
        }
    }

    let content = serde_json::json!({ "t": "encrypted", "c": body.message });
    match state
        .store
        .insert_message(account_id, body.sid, content, body.local_id.as_deref())
        .await
    {
        Ok(relay_store::InsertMessageOutcome::Inserted { message, account_seq }) => {
            metrics::counter!(METRICS_ID_MESSAGES_PERSISTED).increment(1);
            emit_update(
                &state.router,
                account_id,
                account_seq,
                UpdateBody::NewMessage(message),
                RecipientFilter::AllInterestedInSession(body.sid),
                Some(connection_id),
            );
        }
        Ok(relay_store::InsertMessageOutcome::Dropped) => {
            metrics::counter!(METRICS_ID_MESSAGES_DROPPED_DUPLICATE).increment(1);
        }
        Err(err) => tracing::error!("{err:?}"),
    }
}

async fn handle_session_alive(state: &RelayState, account_id: AccountId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<SessionAliveFrame>(frame.data) else {
        return;
    };
    let Some(clamped) = validate_heartbeat_time(body.time) else {
        return;
    };
    match state
        .store
        .update_session_heartbeat(account_id, body.sid, true, from_millis(clamped))
        .await
    {
        Ok(true) => emit_ephemeral(
            &state.router,
            account_id,
            EphemeralEvent::Activity {
                id: body.sid,
                active: true,
                active_at: clamped,
                thinking: body.thinking.unwrap_or(false),
            },
            RecipientFilter::UserScopedOnly,
            None,
        ),
        Ok(false) => {}
        Err(err) => tracing::error!("{err:?}"),
    }
}

async fn handle_session_end(state: &RelayState, account_id: AccountId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<SessionEndFrame>(frame.data) else {
        return;
    };
    let Some(clamped) = validate_heartbeat_time(body.time) else {
        return;
    };
    match state
        .store
        .update_session_heartbeat(account_id, body.sid, false, from_millis(clamped))
        .await
    {
        Ok(true) => emit_ephemeral(
            &state.router,
            account_id,
            EphemeralEvent::Activity {
                id: body.sid,
                active: false,
                active_at: clamped,
                thinking: false,
            },
            RecipientFilter::UserScopedOnly,
            None,
        ),
        Ok(false) => {}
        Err(err) => tracing::error!("{err:?}"),
    }
}

async fn handle_machine_alive(state: &RelayState, account_id: AccountId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<MachineAliveFrame>(frame.data) else {
        return;
    };
    let Some(clamped) = validate_heartbeat_time(body.time) else {
        return;
    };
    match state
        .store
        .update_machine_heartbeat(account_id, &body.mid, true, from_millis(clamped))
        .await
    {
        Ok(true) => emit_ephemeral(
            &state.router,
            account_id,
            EphemeralEvent::MachineActivity {
                id: body.mid,
                active: true,
                active_at: clamped,
            },
            RecipientFilter::UserScopedOnly,
            None,
        ),
        Ok(false) => {}
        Err(err) => tracing::error!("{err:?}"),
    }
}

fn conditional_update_reply(
    outcome: ConditionalUpdateOutcome,
    wrap: impl Fn(String) -> UpdateCallbackValue,
) -> UpdateCallbackResult {
    match outcome {
        ConditionalUpdateOutcome::Success { version, value } => UpdateCallbackResult::Success {
            version,
            value: wrap(value.unwrap_or_default()),
        },
        ConditionalUpdateOutcome::VersionMismatch { version, value } => {
            UpdateCallbackResult::VersionMismatch {
                version,
                value: wrap(value.unwrap_or_default()),
            }
        }
        ConditionalUpdateOutcome::NotFound => UpdateCallbackResult::Error,
    }
}

async fn handle_update_metadata(
    state: &RelayState,
    account_id: AccountId,
    connection_id: ConnectionId,
    frame: ClientFrame,
) {
    let ack_id = frame.ack_id.clone();
    let Ok(body) = serde_json::from_value::<UpdateMetadataFrame>(frame.data) else {
        respond(
            &state.router,
            account_id,
            connection_id,
            "update-metadata",
            ack_id.as_deref(),
            UpdateCallbackResult::Error,
        );
        return;
    };
    let outcome = match state
        .store
        .update_session_metadata(account_id, body.sid, &body.metadata, body.expected_version)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("{err:?}");
            respond(
                &state.router,
                account_id,
                connection_id,
                "update-metadata",
                ack_id.as_deref(),
                UpdateCallbackResult::Error,
            );
            return;
        }
    };
    if let ConditionalUpdateOutcome::VersionMismatch { .. } = outcome {
        metrics::counter!(METRICS_ID_VERSION_CONFLICTS).increment(1);
    }
    if let ConditionalUpdateOutcome::Success { version, ref value } = outcome {
        match state.store.allocate_account_seq(account_id).await {
            Ok(seq) => emit_update(
                &state.router,
                account_id,
                seq,
                UpdateBody::UpdateSession {
                    id: body.sid,
                    value: value.clone().unwrap_or_default(),
                    field: UpdatedField::Metadata,
                    version,
                },
                RecipientFilter::AllInterestedInSession(body.sid),
                None,
            ),
            Err(err) => tracing::error!("{err:?}"),
        }
    }
    let result = conditional_update_reply(outcome, |metadata| UpdateCallbackValue::Metadata { metadata });
    respond(
        &state.router,
        account_id,
        connection_id,
        "update-metadata",
        ack_id.as_deref(),
        result,
    );
}

async fn handle_update_state(
    state: &RelayState,
    account_id: AccountId,
    connection_id: ConnectionId,
    frame: ClientFrame,
) {
    let ack_id = frame.ack_id.clone();
    let Ok(body) = serde_json::from_value::<UpdateStateFrame>(frame.data) else {
        respond(
            &state.router,
            account_id,
            connection_id,
            "update-state",
            ack_id.as_deref(),
            UpdateCallbackResult::Error,
        );
        return;
    };
    let outcome = match state
        .store
        .update_session_state(account_id, body.sid, &body.agent_state, body.expected_version)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("{err:?}");
            respond(
                &state.router,
                account_id,
                connection_id,
                "update-state",
                ack_id.as_deref(),
                UpdateCallbackResult::Error,
            );
            return;
        }
    };
    if let ConditionalUpdateOutcome::VersionMismatch { .. } = outcome {
        metrics::counter!(METRICS_ID_VERSION_CONFLICTS).increment(1);
    }
    if let ConditionalUpdateOutcome::Success { version, ref value } = outcome {
        match state.store.allocate_account_seq(account_id).await {
            Ok(seq) => emit_update(
                &state.router,
                account_id,
                seq,
                UpdateBody::UpdateSession {
                    id: body.sid,
                    value: value.clone().unwrap_or_default(),
                    field: UpdatedField::State,
                    version,
                },
                RecipientFilter::AllInterestedInSession(body.sid),
                None,
            ),
            Err(err) => tracing::error!("{err:?}"),
        }
    }
    let result = conditional_update_reply(outcome, |agent_state| UpdateCallbackValue::AgentState { agent_state });
    respond(
        &state.router,
        account_id,
        connection_id,
        "update-state",
        ack_id.as_deref(),
        result,
    );
}

async fn handle_machine_update_metadata(
    state: &RelayState,
    account_id: AccountId,
    connection_id: ConnectionId,
    frame: ClientFrame,
) {
    let ack_id = frame.ack_id.clone();
    let Ok(body) = serde_json::from_value::<MachineUpdateMetadataFrame>(frame.data) else {
        respond(
            &state.router,
            account_id,
            connection_id,
            "machine-update-metadata",
            ack_id.as_deref(),
            UpdateCallbackResult::Error,
        );
        return;
    };
    let outcome = match state
        .store
        .update_machine_metadata(account_id, &body.mid, &body.metadata, body.expected_version)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("{err:?}");
            respond(
                &state.router,
                account_id,
                connection_id,
                "machine-update-metadata",
                ack_id.as_deref(),
                UpdateCallbackResult::Error,
            );
            return;
        }
    };
    if let ConditionalUpdateOutcome::VersionMismatch { .. } = outcome {
        metrics::counter!(METRICS_ID_VERSION_CONFLICTS).increment(1);
    }
    if let ConditionalUpdateOutcome::Success { version, ref value } = outcome {
        match state.store.allocate_account_seq(account_id).await {
            Ok(seq) => emit_update(
                &state.router,
                account_id,
                seq,
                UpdateBody::UpdateMachine {
                    id: body.mid.clone(),
                    value: value.clone().unwrap_or_default(),
                    field: UpdatedField::Metadata,
                    version,
                },
                RecipientFilter::MachineScopedOnly(body.mid.clone()),
                None,
            ),
            Err(err) => tracing::error!("{err:?}"),
        }
    }
    let result = conditional_update_reply(outcome, |metadata| UpdateCallbackValue::Metadata { metadata });
    respond(
        &state.router,
        account_id,
        connection_id,
        "machine-update-metadata",
        ack_id.as_deref(),
        result,
    );
}

async fn handle_machine_update_state(
    state: &RelayState,
    account_id: AccountId,
    connection_id: ConnectionId,
    frame: ClientFrame,
) {
    let ack_id = frame.ack_id.clone();
    let Ok(body) = serde_json::from_value::<MachineUpdateStateFrame>(frame.data) else {
        respond(
            &state.router,
            account_id,
            connection_id,
            "machine-update-state",
            ack_id.as_deref(),
            UpdateCallbackResult::Error,
        );
        return;
    };
    let outcome = match state
        .store
        .update_machine_state(account_id, &body.mid, &body.daemon_state, body.expected_version)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!("{err:?}");
            respond(
                &state.router,
                account_id,
                connection_id,
                "machine-update-state",
                ack_id.as_deref(),
                UpdateCallbackResult::Error,
            );
            return;
        }
    };
    if let ConditionalUpdateOutcome::VersionMismatch { .. } = outcome {
        metrics::counter!(METRICS_ID_VERSION_CONFLICTS).increment(1);
    }
    if let ConditionalUpdateOutcome::Success { version, ref value } = outcome {
        match state.store.allocate_account_seq(account_id).await {
            Ok(seq) => emit_update(
                &state.router,
                account_id,
                seq,
                UpdateBody::UpdateMachine {
                    id: body.mid.clone(),
                    value: value.clone().unwrap_or_default(),
                    field: UpdatedField::State,
                    version,
                },
                RecipientFilter::MachineScopedOnly(body.mid.clone()),
                None,
            ),
            Err(err) => tracing::error!("{err:?}"),
        }
    }
    let result = conditional_update_reply(outcome, |daemon_state| UpdateCallbackValue::DaemonState { daemon_state });
    respond(
        &state.router,
        account_id,
        connection_id,
        "machine-update-state",
        ack_id.as_deref(),
        result,
    );
}

async fn handle_rpc_register(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<RpcRegisterFrame>(frame.data) else {
        return;
    };
    state.rpc.register(account_id, body.method.clone(), connection_id);
    respond(
        &state.router,
        account_id,
        connection_id,
        "rpc-registered",
        frame.ack_id.as_deref(),
        RpcRegisteredEvent { method: body.method },
    );
}

async fn handle_rpc_unregister(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, frame: ClientFrame) {
    let Ok(body) = serde_json::from_value::<RpcUnregisterFrame>(frame.data) else {
        return;
    };
    state.rpc.unregister(account_id, &body.method, connection_id);
    respond(
        &state.router,
        account_id,
        connection_id,
        "rpc-unregistered",
        frame.ack_id.as_deref(),
        RpcUnregisteredEvent { method: body.method },
    );
}

async fn handle_rpc_call(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, frame: ClientFrame) {
    let Some(ack_id) = frame.ack_id.clone() else {
        return;
    };
    let Ok(body) = serde_json::from_value::<RpcCallFrame>(frame.data) else {
        respond(
            &state.router,
            account_id,
            connection_id,
            "rpc-call",
            Some(ack_id.as_str()),
            RpcCallResult {
                ok: false,
                result: None,
                error: Some("malformed rpc-call frame".to_owned()),
            },
        );
        return;
    };

    metrics::counter!(METRICS_ID_RPC_CALLS).increment(1);
    let start = std::time::Instant::now();
    let outcome = state
        .rpc
        .call(
            &state.router,
            account_id,
            connection_id,
            &body.method,
            body.params,
            state.config.rpc_call_timeout,
        )
        .await;
    metrics::histogram!(METRICS_ID_RPC_CALL_DURATION).record(start.elapsed().as_millis() as f64);

    let result = match outcome {
        Ok(value) => RpcCallResult {
            ok: true,
            result: Some(value),
            error: None,
        },
        Err(err) => {
            if matches!(err, RpcCallError::Timeout) {
                metrics::counter!(METRICS_ID_RPC_TIMEOUTS).increment(1);
            }
            RpcCallResult {
                ok: false,
                result: None,
                error: Some(err.message()),
            }
        }
    };
    respond(&state.router, account_id, connection_id, "rpc-call", Some(ack_id.as_str()), result);
}

fn handle_ping(state: &RelayState, account_id: AccountId, connection_id: ConnectionId, frame: ClientFrame) {
    respond(
        &state.router,
        account_id,
        connection_id,
        "ping",
        frame.ack_id.as_deref(),
        serde_json::json!({}),
    );
}
