//! Health endpoint.

use axum::Extension;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::RelayState;
use crate::readiness::Readiness;

/// Builds a router exposing `/health`, reporting `200` once every
/// registered service has started and the store answers a liveness probe,
/// `503` otherwise.
pub fn routes(readiness: Readiness) -> Router<RelayState> {
    Router::new()
        .route("/health", get(health))
        .layer(Extension(readiness))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

async fn health(
    State(state): State<RelayState>,
    Extension(readiness): Extension<Readiness>,
) -> impl IntoResponse {
    if !readiness.all_started() {
        return (StatusCode::SERVICE_UNAVAILABLE, "starting");
    }
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(err) => {
            tracing::error!("health check: store ping failed: {err:?}");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}
