#![deny(missing_docs)]
//! Core service library for the zero-knowledge real-time relay.
//!
//! This crate wires together the pieces described in SPEC_FULL.md §4: token
//! issuance/verification ([`token`]), the per-account event router
//! ([`router`]) and its emission helpers ([`events`]), the inter-client RPC
//! bridge ([`rpc`]), and the transport endpoints that drive them
//! ([`api`] for HTTP, [`ws`] for the `/v1/updates` WebSocket protocol).
//!
//! [`RelayState`] is the single piece of shared state every handler sees;
//! [`build_router`] assembles the full `axum::Router` a hosting binary (see
//! `relay-server`) serves.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod readiness;
pub mod router;
pub mod rpc;
pub mod shutdown;
pub mod time;
pub mod token;
pub mod ws;

pub use config::RelayConfig;
pub use readiness::Readiness;

/// Body size limit applied to every HTTP request (§6).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state handed to every HTTP and WebSocket handler.
///
/// Cheap to clone: every field is itself a cheaply-cloneable handle (a
/// connection pool, a `dashmap`-backed map, or an `Arc`).
#[derive(Clone)]
pub struct RelayState {
    /// Persistence handle (§3, §4.1).
    pub store: relay_store::Store,
    /// Bearer-token issuance/verification (§4.2).
    pub tokens: token::TokenService,
    /// Live-connection fan-out (§4.3).
    pub router: router::EventRouter,
    /// Inter-client RPC registry (§4.5).
    pub rpc: rpc::RpcBridge,
    /// Effective runtime configuration.
    pub config: Arc<RelayConfig>,
}

/// Builds the complete HTTP + WebSocket router for the relay (§4.4, §4.5),
/// layered with CORS (allow-any-origin, §6), the 10 MB body limit, and HTTP
/// tracing.
pub fn build_router(state: RelayState, readiness: Readiness) -> Router {
    Router::new()
        .merge(api::health::routes(readiness))
        .merge(api::version::routes())
        .nest("/v1", api::v1::routes())
        .merge(ws::routes())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
