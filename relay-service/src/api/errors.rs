//! HTTP error taxonomy (§7): maps internal failures to response status codes
//! without leaking store error text to the client.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

/// Errors an HTTP handler can return, turned into a response by
/// [`IntoResponse`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or invalid request body.
    #[error("{0}")]
    BadRequest(String),
    /// Missing, malformed, or invalid bearer token.
    #[error("unauthorized")]
    Unauthorized,
    /// The resource does not exist, or exists but is owned by another
    /// account — the two are deliberately indistinguishable to the caller.
    #[error("not found")]
    NotFound,
    /// Failure inside the store.
    #[error(transparent)]
    Store(#[from] relay_store::StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(err) => {
                tracing::error!("{err:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            Self::Store(_) => "internal error".to_owned(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
