//! `/v1/*` HTTP handlers (§4.4): account pairing, sessions, and machines.
//!
//! Every handler that mutates state and has live subscribers also emits the
//! matching `update` push event through the [`crate::events`] helpers, using
//! the account seq the store allocated in the same write.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use relay_store::{PairingPollOutcome, UpsertMachineOutcome};
use relay_types::api::v1::{
    AccountPairingPollResponse, AccountPairingRequest, AccountPairingResponseRequest, AuthRequest,
    AuthResponse, CreateSessionRequest, MachineDto, MessageDto, RegisterMachineRequest,
    SessionDto, UpdateBody, UpdatedField,
};
use relay_types::{AccountId, MachineId, SessionId};

use crate::RelayState;
use crate::api::errors::ApiError;
use crate::events::emit_update;
use crate::router::RecipientFilter;

/// Builds a router for the `/v1/*` HTTP surface. Nest under `/v1`.
pub fn routes() -> Router<RelayState> {
    Router::new()
        .route("/auth", post(auth))
        .route("/auth/account/request", post(account_pairing_request))
        .route("/auth/account/response", post(account_pairing_response))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}/messages", get(list_messages))
        .route("/sessions/{id}", delete(delete_session))
        .route("/machines", get(list_machines).post(register_machine))
        .route("/machines/{id}", get(get_machine))
}

/// Extracts and verifies the bearer token carried in `Authorization`,
/// recovering the account it is bound to.
struct AuthenticatedAccount(AccountId);

impl<S> axum::extract::FromRequestParts<S> for AuthenticatedAccount
where
    RelayState: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let relay_state = RelayState::from_ref(state);
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::Unauthorized)?;
        let verified = relay_state
            .tokens
            .verify(bearer.token())
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self(verified.account_id))
    }
}

fn decode_public_key(encoded: &str) -> Result<[u8; 32], ApiError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| ApiError::BadRequest("publicKey must be base64".to_owned()))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::BadRequest("publicKey must decode to 32 bytes".to_owned()))
}

async fn auth(
    State(state): State<RelayState>,
    Json(body): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let public_key_bytes = decode_public_key(&body.public_key)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public_key_bytes).map_err(|_| ApiError::Unauthorized)?;
    let challenge = STANDARD
        .decode(&body.challenge)
        .map_err(|_| ApiError::BadRequest("challenge must be base64".to_owned()))?;
    let signature_bytes: [u8; 64] = STANDARD
        .decode(&body.signature)
        .map_err(|_| ApiError::BadRequest("signature must be base64".to_owned()))?
        .try_into()
        .map_err(|_| ApiError::Unauthorized)?;
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key
        .verify(&challenge, &signature)
        .map_err(|_| ApiError::Unauthorized)?;

    let account_id = state
        .store
        .upsert_account(&hex::encode(public_key_bytes))
        .await?;
    let token = state.tokens.create(account_id, None);
    Ok(Json(AuthResponse {
        success: true,
        token,
    }))
}

async fn account_pairing_request(
    State(state): State<RelayState>,
    Json(body): Json<AccountPairingRequest>,
) -> Result<Json<AccountPairingPollResponse>, ApiError> {
    let public_key_bytes = decode_public_key(&body.public_key)?;
    let key_hex = hex::encode(public_key_bytes);
    state.store.upsert_pairing_request(&key_hex).await?;
    match state.store.poll_pairing_request(&key_hex).await? {
        PairingPollOutcome::Requested => Ok(Json(AccountPairingPollResponse::Requested)),
        PairingPollOutcome::Authorized {
            account_id,
            response,
        } => {
            let token = state.tokens.create(account_id, None);
            Ok(Json(AccountPairingPollResponse::Authorized {
                token,
                response,
            }))
        }
    }
}

async fn account_pairing_response(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(body): Json<AccountPairingResponseRequest>,
) -> Result<StatusCode, ApiError> {
    let public_key_bytes = decode_public_key(&body.public_key)?;
    let key_hex = hex::encode(public_key_bytes);
    state
        .store
        .write_pairing_response(&key_hex, account_id, &body.response)
        .await?;
    Ok(StatusCode::OK)
}

async fn list_sessions(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
) -> Result<Json<Vec<SessionDto>>, ApiError> {
    Ok(Json(state.store.list_recent_sessions(account_id).await?))
}

async fn create_session(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<SessionDto>, ApiError> {
    let (session, seq) = state
        .store
        .create_session_or_get_existing(
            account_id,
            &body.tag,
            &body.metadata,
            body.agent_state.as_deref(),
            body.data_encryption_key.as_deref(),
        )
        .await?;
    if let Some(seq) = seq {
        emit_update(
            &state.router,
            account_id,
            seq,
            UpdateBody::NewSession(session.clone()),
            RecipientFilter::UserScopedOnly,
            None,
        );
    }
    Ok(Json(session))
}

async fn list_messages(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    state
        .store
        .get_session_owned(account_id, session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(state.store.list_recent_messages(session_id).await?))
}

async fn delete_session(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.store.delete_session(account_id, session_id).await?;
    if !deleted {
        return Err(ApiError::NotFound);
    }
    let seq = state.store.allocate_account_seq(account_id).await?;
    emit_update(
        &state.router,
        account_id,
        seq,
        UpdateBody::DeleteSession { id: session_id },
        RecipientFilter::UserScopedOnly,
        None,
    );
    Ok(StatusCode::OK)
}

async fn register_machine(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Json(body): Json<RegisterMachineRequest>,
) -> Result<Json<MachineDto>, ApiError> {
    let outcome = state
        .store
        .upsert_machine(
            account_id,
            &body.id,
            &body.metadata,
            body.daemon_state.as_deref(),
            body.data_encryption_key.as_deref(),
        )
        .await?;
    match outcome {
        UpsertMachineOutcome::Created {
            machine,
            account_seq,
        } => {
            emit_update(
                &state.router,
                account_id,
                account_seq,
                UpdateBody::NewMachine(machine.clone()),
                RecipientFilter::UserScopedOnly,
                None,
            );
            // The daemon that just registered is itself a machine-scoped
            // subscriber the moment it connects, so it also gets its own
            // initial metadata via an update-machine push.
            let update_seq = state.store.allocate_account_seq(account_id).await?;
            emit_update(
                &state.router,
                account_id,
                update_seq,
                UpdateBody::UpdateMachine {
                    id: machine.id.clone(),
                    value: machine.metadata.clone(),
                    field: UpdatedField::Metadata,
                    version: machine.metadata_version,
                },
                RecipientFilter::MachineScopedOnly(machine.id.clone()),
                None,
            );
            Ok(Json(machine))
        }
        UpsertMachineOutcome::AlreadyExisted(machine) => Ok(Json(machine)),
    }
}

async fn list_machines(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
) -> Result<Json<Vec<MachineDto>>, ApiError> {
    Ok(Json(state.store.list_machines(account_id).await?))
}

async fn get_machine(
    State(state): State<RelayState>,
    AuthenticatedAccount(account_id): AuthenticatedAccount,
    Path(machine_id): Path<MachineId>,
) -> Result<Json<MachineDto>, ApiError> {
    state
        .store
        .find_machine(account_id, &machine_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}
