//! WebSocket handshake error taxonomy (§7): `validate_handshake()` is the
//! only producer of [`FrameError`] — a failure there happens before any
//! connection is registered with the event router, so the only sensible
//! response is an `error` frame followed by a close. Per-frame failures
//! once a connection is live (malformed frame bodies, ownership checks,
//! store failures inside the individual `handle_*` functions) are handled
//! ad hoc: logged and answered in-band (a callback error result, or
//! silently dropped for ephemeral-only frames) without this type, since
//! each frame kind's failure response has a different shape on the wire.

use axum::extract::ws::CloseFrame;
use relay_types::api::v1::relay_error_codes;

/// A handshake-time failure: the token did not verify, or a required scope
/// field was missing/invalid for the declared `clientType`.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The handshake token did not verify.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// A required scope field was missing or invalid for the declared
    /// `clientType`.
    #[error("{0}")]
    BadRequest(String),
}

impl FrameError {
    /// A client-safe message sent in the `error` frame before disconnect.
    pub fn message(&self) -> String {
        match self {
            Self::AuthFailed(msg) | Self::BadRequest(msg) => msg.clone(),
        }
    }

    /// Maps a handshake-time failure onto a close frame carrying a
    /// relay-specific close code.
    pub fn into_close_frame(self) -> CloseFrame {
        match self {
            Self::AuthFailed(msg) => CloseFrame {
                code: relay_error_codes::AUTH_FAILED,
                reason: msg.into(),
            },
            Self::BadRequest(msg) => CloseFrame {
                code: relay_error_codes::BAD_REQUEST,
                reason: msg.into(),
            },
        }
    }
}
