#![deny(missing_docs)]
//! Shared wire types for the zero-knowledge real-time relay.
//!
//! This crate groups together the strongly-typed identifiers and message
//! structures exchanged between the relay and its clients. It provides:
//!
//! * Thin wrappers around opaque identifiers (account, session, machine ids)
//!   with consistent serialization and display implementations.
//! * The HTTP request/response DTOs for the `/v1` surface (see [`api`]).
//! * The WebSocket frame types for the `/v1/updates` protocol (see [`api::v1`]).
//!
//! None of the payload fields carried by these types are interpreted by the
//! relay itself — ciphertext, RPC params, and session/machine metadata are
//! opaque bytes as far as this crate and its consumers are concerned.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod api;

/// Opaque identifier of an authenticated account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

/// Opaque identifier of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

/// Identifier of a registered machine. Client-chosen, unique per account.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

/// Opaque identifier of a pairing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingRequestId(Uuid);

/// Opaque identifier of a persisted session message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

macro_rules! uuid_id {
    ($ty:ident) => {
        impl $ty {
            /// Generates a fresh random identifier.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing [`Uuid`].
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner [`Uuid`].
            pub fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $ty {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$ty> for Uuid {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(AccountId);
uuid_id!(SessionId);
uuid_id!(PairingRequestId);
uuid_id!(MessageId);

impl MachineId {
    /// Wraps a client-supplied machine id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MachineId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
