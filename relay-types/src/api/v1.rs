//! # v1 API types
//!
//! Data transfer objects for the version 1 relay API, covering both the
//! `/v1/*` HTTP surface and the `/v1/updates` WebSocket protocol.
//!
//! Every ciphertext-carrying field (`metadata`, `agentState`, `daemonState`,
//! message `content`, `dataEncryptionKey`, pairing `response`) is opaque to
//! the relay: it is stored and forwarded verbatim, never parsed.
//!
//! All wire structs use `camelCase` field names, matching the client SDKs
//! this relay serves (out of scope here, but their wire contract is not).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AccountId, MachineId, MessageId, SessionId};

/// Relay-specific WebSocket close codes, mirrored after the private-use range
/// conventions the corpus uses for protocol-specific close reasons.
pub mod relay_error_codes {
    /// The handshake's token did not verify, or a required handshake field
    /// was missing for the declared client type.
    pub const AUTH_FAILED: u16 = 4401;
    /// A received frame could not be parsed or failed validation.
    pub const BAD_REQUEST: u16 = 4002;
}

// ---------------------------------------------------------------------
// HTTP: auth
// ---------------------------------------------------------------------

/// `POST /v1/auth` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Base64-encoded Ed25519 public key (32 bytes).
    pub public_key: String,
    /// Base64-encoded challenge that was signed.
    pub challenge: String,
    /// Base64-encoded Ed25519 signature of `challenge` by `public_key`.
    pub signature: String,
}

/// `POST /v1/auth` success response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Always `true`; the handler returns 401 instead of `success:false`.
    pub success: bool,
    /// Bearer token bound to the upserted account.
    pub token: String,
}

/// `POST /v1/auth/account/request` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPairingRequest {
    /// Base64-encoded ephemeral public key, must decode to exactly 32 bytes.
    pub public_key: String,
}

/// `POST /v1/auth/account/request` response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum AccountPairingPollResponse {
    /// No authenticated client has responded to the pairing request yet.
    Requested,
    /// An authenticated client has written a response.
    Authorized {
        /// Freshly issued token for the account that responded.
        token: String,
        /// Opaque ciphertext response written by the responding client.
        response: String,
    },
}

/// `POST /v1/auth/account/response` request body (authenticated).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPairingResponseRequest {
    /// Base64-encoded ephemeral public key identifying the pairing request.
    pub public_key: String,
    /// Opaque ciphertext response to store for the pairing requester.
    pub response: String,
}

// ---------------------------------------------------------------------
// HTTP: sessions
// ---------------------------------------------------------------------

/// Wire representation of a [`crate::SessionId`]-keyed session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    /// Session id.
    pub id: SessionId,
    /// Owning account.
    pub account_id: AccountId,
    /// Client-chosen idempotency key, unique per account.
    pub tag: String,
    /// Monotonic per-session message counter.
    pub seq: i64,
    /// Opaque ciphertext metadata.
    pub metadata: String,
    /// Version of `metadata`, starts at 1.
    pub metadata_version: i64,
    /// Opaque ciphertext agent state, absent until first set.
    pub agent_state: Option<String>,
    /// Version of `agent_state`, starts at 0.
    pub agent_state_version: i64,
    /// Opaque wrapped data-encryption key.
    pub data_encryption_key: Option<String>,
    /// Whether the session is currently considered live.
    pub active: bool,
    /// Last heartbeat timestamp, milliseconds since epoch.
    pub last_active_at: i64,
    /// Alias of `last_active_at` for client convenience.
    pub active_at: i64,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at: i64,
    /// Last-update timestamp, milliseconds since epoch.
    pub updated_at: i64,
}

/// `POST /v1/sessions` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Client-chosen idempotency key.
    pub tag: String,
    /// Opaque ciphertext metadata.
    pub metadata: String,
    /// Opaque ciphertext agent state, if already known at creation time.
    pub agent_state: Option<String>,
    /// Opaque wrapped data-encryption key.
    pub data_encryption_key: Option<String>,
}

/// Wire representation of a persisted [`crate::MessageId`]-keyed message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    /// Message id.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Monotonic per-session sequence number.
    pub seq: i64,
    /// Opaque wrapped ciphertext, shape `{t:"encrypted", c:<base64>}`.
    pub content: Value,
    /// Client-supplied deduplication key.
    pub local_id: Option<String>,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at: i64,
}

// ---------------------------------------------------------------------
// HTTP: machines
// ---------------------------------------------------------------------

/// Wire representation of a registered machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDto {
    /// Client-chosen machine id, unique per account.
    pub id: MachineId,
    /// Owning account.
    pub account_id: AccountId,
    /// Opaque ciphertext metadata.
    pub metadata: String,
    /// Version of `metadata`, starts at 1.
    pub metadata_version: i64,
    /// Opaque ciphertext daemon state.
    pub daemon_state: Option<String>,
    /// Version of `daemon_state`, starts at 0.
    pub daemon_state_version: i64,
    /// Opaque wrapped data-encryption key.
    pub data_encryption_key: Option<String>,
    /// Whether the machine daemon is currently considered live.
    pub active: bool,
    /// Last heartbeat timestamp, milliseconds since epoch.
    pub last_active_at: i64,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at: i64,
    /// Last-update timestamp, milliseconds since epoch.
    pub updated_at: i64,
}

/// `POST /v1/machines` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMachineRequest {
    /// Client-chosen machine id.
    pub id: MachineId,
    /// Opaque ciphertext metadata.
    pub metadata: String,
    /// Opaque ciphertext daemon state, if already known at registration time.
    pub daemon_state: Option<String>,
    /// Opaque wrapped data-encryption key.
    pub data_encryption_key: Option<String>,
}

// ---------------------------------------------------------------------
// WebSocket: envelope
// ---------------------------------------------------------------------

/// A frame received from a client over `/v1/updates`.
///
/// Every client-to-server frame shares this envelope: `event` names the
/// frame kind, `data` carries the kind-specific body (re-parsed into one of
/// the `*Frame` types below once `event` is known), and `ack_id` is present
/// both when the client expects a correlated reply to a request it is
/// making, and when the frame itself *is* the reply to a server-initiated
/// `rpc-request` (distinguished by whether `ack_id` matches a call the
/// server has outstanding).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    /// The frame kind, e.g. `"message"`, `"rpc-call"`, `"ping"`.
    pub event: String,
    /// Kind-specific body, opaque at this layer.
    #[serde(default)]
    pub data: Value,
    /// Present when a correlated reply is expected.
    pub ack_id: Option<String>,
}

/// A frame sent to a client over `/v1/updates`, the server-side mirror of
/// [`ClientFrame`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    /// The frame kind. For push events this is the event kind (`"update"`,
    /// `"ephemeral"`, `"rpc-request"`, ...); for replies it echoes the
    /// triggering frame's `event`.
    pub event: String,
    /// Kind-specific body.
    pub data: Value,
    /// Echoes the triggering [`ClientFrame::ack_id`] for request-reply
    /// frames; absent for fire-and-forget pushes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
}

impl ServerFrame {
    /// Builds a fire-and-forget push frame (no `ack_id`).
    pub fn push(event: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            event: event.into(),
            data: serde_json::to_value(data).expect("server event payload must serialize"),
            ack_id: None,
        }
    }

    /// Builds a correlated reply frame, echoing the client's `ack_id`.
    pub fn reply(event: impl Into<String>, ack_id: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            event: event.into(),
            data: serde_json::to_value(data).expect("server event payload must serialize"),
            ack_id: Some(ack_id.into()),
        }
    }
}

// ---------------------------------------------------------------------
// WebSocket: handshake
// ---------------------------------------------------------------------

/// The `auth` parameters read from the WebSocket handshake query string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsAuthHandshake {
    /// Bearer token, as issued by `/v1/auth`.
    pub token: String,
    /// Declared scope of the connection.
    pub client_type: ClientType,
    /// Required when `client_type == Session`.
    pub session_id: Option<SessionId>,
    /// Required when `client_type == Machine`.
    pub machine_id: Option<MachineId>,
}

/// The declared scope of a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    /// User-scoped (dashboard): sees everything for the account.
    User,
    /// Session-scoped: sees only traffic for one session.
    Session,
    /// Machine-scoped: sees only traffic for one machine.
    Machine,
}

// ---------------------------------------------------------------------
// WebSocket: client -> server frames
// ---------------------------------------------------------------------

/// `message` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    /// Target session id.
    pub sid: SessionId,
    /// Base64 ciphertext payload.
    pub message: String,
    /// Client-supplied deduplication key.
    pub local_id: Option<String>,
}

/// `session-alive` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAliveFrame {
    /// Target session id.
    pub sid: SessionId,
    /// Client-reported time, milliseconds since epoch.
    pub time: i64,
    /// Whether the agent is currently "thinking" (model call in flight).
    pub thinking: Option<bool>,
}

/// `session-end` frame body. Same shape as [`SessionAliveFrame`] minus `thinking`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndFrame {
    /// Target session id.
    pub sid: SessionId,
    /// Client-reported time, milliseconds since epoch.
    pub time: i64,
}

/// `machine-alive` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineAliveFrame {
    /// Target machine id.
    pub mid: MachineId,
    /// Client-reported time, milliseconds since epoch.
    pub time: i64,
}

/// `update-metadata` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMetadataFrame {
    /// Target session id.
    pub sid: SessionId,
    /// New opaque ciphertext metadata.
    pub metadata: String,
    /// Version the client last observed.
    pub expected_version: i64,
}

/// `update-state` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStateFrame {
    /// Target session id.
    pub sid: SessionId,
    /// New opaque ciphertext agent state.
    pub agent_state: String,
    /// Version the client last observed.
    pub expected_version: i64,
}

/// `machine-update-metadata` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineUpdateMetadataFrame {
    /// Target machine id.
    pub mid: MachineId,
    /// New opaque ciphertext metadata.
    pub metadata: String,
    /// Version the client last observed.
    pub expected_version: i64,
}

/// `machine-update-state` frame body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineUpdateStateFrame {
    /// Target machine id.
    pub mid: MachineId,
    /// New opaque ciphertext daemon state.
    pub daemon_state: String,
    /// Version the client last observed.
    pub expected_version: i64,
}

/// `rpc-register` frame body.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRegisterFrame {
    /// Method name, conventionally namespaced by session id.
    pub method: String,
}

/// `rpc-unregister` frame body. Same shape as [`RpcRegisterFrame`].
#[derive(Debug, Clone, Deserialize)]
pub struct RpcUnregisterFrame {
    /// Method name to unregister.
    pub method: String,
}

/// `rpc-call` frame body.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcCallFrame {
    /// Target method name.
    pub method: String,
    /// Opaque ciphertext parameters, never inspected by the relay.
    pub params: Value,
}

// ---------------------------------------------------------------------
// WebSocket: server -> client push events
// ---------------------------------------------------------------------

/// A persistent, account-sequenced `update` push event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// 12-character random key, for client-side idempotency.
    pub id: String,
    /// Account seq allocated at emission time.
    pub seq: i64,
    /// Kind-tagged body.
    pub body: UpdateBody,
    /// Emission timestamp, milliseconds since epoch.
    pub created_at: i64,
}

/// The kind-specific body of an [`UpdateEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum UpdateBody {
    /// A session was created.
    NewSession(SessionDto),
    /// A session's metadata or agent state changed.
    UpdateSession {
        /// Session the update applies to.
        id: SessionId,
        /// New ciphertext value (metadata or agent state, per `field`).
        value: String,
        /// Which field changed.
        field: UpdatedField,
        /// New version, `expectedVersion + 1`.
        version: i64,
    },
    /// A session (and its messages) was deleted.
    DeleteSession {
        /// Deleted session id.
        id: SessionId,
    },
    /// A new message was appended to a session.
    NewMessage(MessageDto),
    /// A machine was registered.
    NewMachine(MachineDto),
    /// A machine's metadata or daemon state changed.
    UpdateMachine {
        /// Machine the update applies to.
        id: MachineId,
        /// New ciphertext value (metadata or daemon state, per `field`).
        value: String,
        /// Which field changed.
        field: UpdatedField,
        /// New version, `expectedVersion + 1`.
        version: i64,
    },
}

/// Which versioned field an [`UpdateBody::UpdateSession`] /
/// [`UpdateBody::UpdateMachine`] event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatedField {
    /// `metadata` / `metadataVersion`.
    Metadata,
    /// `agentState`/`agentStateVersion` (sessions) or `daemonState` /
    /// `daemonStateVersion` (machines).
    State,
}

/// A transient, unsequenced `ephemeral` push event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EphemeralEvent {
    /// Session-level presence/activity signal.
    Activity {
        /// Session id.
        id: SessionId,
        /// Whether the session is currently active.
        active: bool,
        /// Client-reported time of the signal, milliseconds since epoch.
        #[serde(rename = "activeAt")]
        active_at: i64,
        /// Whether the agent is currently "thinking".
        thinking: bool,
    },
    /// Machine-level presence/activity signal.
    MachineActivity {
        /// Machine id.
        id: MachineId,
        /// Whether the machine daemon is currently active.
        active: bool,
        /// Client-reported time of the signal, milliseconds since epoch.
        #[serde(rename = "activeAt")]
        active_at: i64,
    },
}

/// Server-initiated `rpc-request`, forwarded to the registering socket.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequestEvent {
    /// Method being invoked.
    pub method: String,
    /// Opaque ciphertext parameters.
    pub params: Value,
}

/// Callback result of an `update-metadata` / `update-state` /
/// `machine-update-metadata` / `machine-update-state` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum UpdateCallbackResult {
    /// The conditional write succeeded.
    Success {
        /// New version, `expectedVersion + 1`.
        version: i64,
        /// Field-appropriate key: `metadata` or `agentState`/`daemonState`.
        #[serde(flatten)]
        value: UpdateCallbackValue,
    },
    /// The stored version did not match `expectedVersion`; no write occurred.
    VersionMismatch {
        /// Currently stored version.
        version: i64,
        /// Field-appropriate key: `metadata` or `agentState`/`daemonState`.
        #[serde(flatten)]
        value: UpdateCallbackValue,
    },
    /// The target row does not exist, or is not owned by the caller.
    Error,
}

/// The field-appropriate payload carried by [`UpdateCallbackResult`], flattened
/// so the wire shape matches whichever of `metadata`/`agentState`/`daemonState`
/// the originating frame referred to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateCallbackValue {
    /// `{"metadata": <value>}`
    Metadata {
        /// Ciphertext metadata value.
        metadata: String,
    },
    /// `{"agentState": <value>}`
    AgentState {
        /// Ciphertext agent-state value.
        agent_state: String,
    },
    /// `{"daemonState": <value>}`
    DaemonState {
        /// Ciphertext daemon-state value.
        daemon_state: String,
    },
}

/// Callback result of an `rpc-call`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcCallResult {
    /// Whether the call succeeded.
    pub ok: bool,
    /// Present when `ok == true`: the target's ack payload.
    pub result: Option<Value>,
    /// Present when `ok == false`: a human-readable error message.
    pub error: Option<String>,
}

/// Ack sent in response to `rpc-register`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRegisteredEvent {
    /// The method that was registered.
    pub method: String,
}

/// Ack sent in response to `rpc-unregister`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcUnregisteredEvent {
    /// The method that was unregistered.
    pub method: String,
}

/// Payload of a server-pushed `error` frame.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    /// Human-readable description.
    pub message: String,
}
