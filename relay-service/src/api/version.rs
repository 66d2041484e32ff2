//! Version endpoint (§4.4 ambient surface).

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::RelayState;

/// The git hash of the tree this binary was built from, embedded at compile
/// time by `git-version`. Falls back to a marker string outside a git
/// checkout (e.g. a source tarball build) rather than failing the build.
const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

/// Builds a router exposing `/version`, reporting the package name, version,
/// and git hash baked in at build time.
pub fn routes() -> Router<RelayState> {
    Router::new()
        .route("/version", get(version))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
}

async fn version() -> impl IntoResponse {
    format!(
        "{} v{} ({GIT_VERSION})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}
