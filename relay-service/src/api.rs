//! HTTP API for the relay.
//!
//! Organizes the endpoints described in SPEC_FULL.md §4.4 into submodules:
//!
//! - [`health`] – the `/health` readiness probe.
//! - [`version`] – the `/version` build-info endpoint.
//! - [`v1`] – account pairing, sessions, and machines.
//! - [`errors`] – the [`errors::ApiError`] taxonomy every handler returns into.

pub mod errors;
pub mod health;
pub mod v1;
pub mod version;
