//! # API module
//!
//! Entry point for all API version modules.
//!
//! Currently exposes the version 1 relay API types under [`v1`].

use http::HeaderName;

pub mod v1;

/// The name of the relay-protocol-version header, mirrored from requests for
/// observability; the relay does not currently reject on mismatch.
pub static RELAY_PROTOCOL_VERSION_HEADER: HeaderName =
    http::HeaderName::from_static("x-consortium-relay-protocol-version");
