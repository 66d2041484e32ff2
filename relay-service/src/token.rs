//! Opaque bearer-token issuance and verification (§4.2).
//!
//! Tokens are self-contained: authenticity is a pure HMAC check, never a
//! database lookup. The signing key is derived from `CONSORTIUM_MASTER_SECRET`
//! with a fixed context string via `blake3::derive_key`, so the same master
//! secret across restarts accepts previously issued tokens, and a rotated
//! master secret invalidates all of them at once.
//!
//! Positive verification results are cached in memory, keyed by the token
//! string itself, in a `dashmap::DashMap` shared by every clone of a
//! [`TokenService`] — the same sharded-map shape `router`/`rpc` use for
//! their per-account state. A cache hit skips the HMAC recompute entirely;
//! there is no eviction, since a token's bound identity never changes and
//! the only way to invalidate one is to rotate the master secret (which
//! hands out a fresh `TokenService` with an empty cache).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use relay_types::AccountId;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::Sha256;

const TOKEN_VERSION: u8 = 1;
const TAG_LEN: usize = 32;
const DERIVE_CONTEXT: &str = "consortium-relay bearer token signing key v1";

type HmacSha256 = Hmac<Sha256>;

/// Issues and verifies opaque bearer tokens bound to an account id.
#[derive(Clone)]
pub struct TokenService {
    signing_key: [u8; 32],
    verified_cache: Arc<dashmap::DashMap<String, VerifiedToken>>,
}

/// An authenticated identity recovered from a verified token.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The account the token is bound to.
    pub account_id: AccountId,
    /// Opaque extras carried alongside the account id, if any.
    pub extras: Option<serde_json::Value>,
}

impl TokenService {
    /// Derives the signing key from the master secret. Does not touch the
    /// store.
    pub fn new(master_secret: &SecretString) -> Self {
        let signing_key =
            blake3::derive_key(DERIVE_CONTEXT, master_secret.expose_secret().as_bytes());
        Self {
            signing_key,
            verified_cache: Arc::new(dashmap::DashMap::new()),
        }
    }

    /// Issues a token bound to `account_id`, optionally carrying `extras`.
    pub fn create(&self, account_id: AccountId, extras: Option<serde_json::Value>) -> String {
        let extras_bytes = extras
            .as_ref()
            .map(|v| serde_json::to_vec(v).expect("extras must serialize"))
            .unwrap_or_default();
        let extras_len = u16::try_from(extras_bytes.len()).expect("extras too large");

        let mut payload = Vec::with_capacity(1 + 16 + 2 + extras_bytes.len());
        payload.push(TOKEN_VERSION);
        payload.extend_from_slice(account_id.into_inner().as_bytes());
        payload.extend_from_slice(&extras_len.to_be_bytes());
        payload.extend_from_slice(&extras_bytes);

        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).expect("HMAC accepts any key length");
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        payload.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(payload)
    }

    /// Verifies a token's authenticity and recovers the bound identity.
    /// Returns `None` for any malformed, tampered, or unsupported-version
    /// token. A prior positive result for the same token string is served
    /// from [`Self::verified_cache`] without recomputing the HMAC.
    pub fn verify(&self, token: &str) -> Option<VerifiedToken> {
        if let Some(cached) = self.verified_cache.get(token) {
            return Some(cached.clone());
        }

        let verified = self.verify_uncached(token)?;
        self.verified_cache
            .insert(token.to_owned(), verified.clone());
        Some(verified)
    }

    fn verify_uncached(&self, token: &str) -> Option<VerifiedToken> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        if bytes.len() < 1 + 16 + 2 + TAG_LEN {
            return None;
        }
        let (payload, tag) = bytes.split_at(bytes.len() - TAG_LEN);

        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.verify_slice(tag).ok()?;

        if payload[0] != TOKEN_VERSION {
            return None;
        }
        let account_id_bytes: [u8; 16] = payload[1..17].try_into().ok()?;
        let extras_len = u16::from_be_bytes([payload[17], payload[18]]) as usize;
        let extras_bytes = payload.get(19..19 + extras_len)?;
        let extras = if extras_bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(extras_bytes).ok()?
        };

        Some(VerifiedToken {
            account_id: AccountId::from(uuid::Uuid::from_bytes(account_id_bytes)),
            extras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&SecretString::from(
            "a".repeat(32).chars().collect::<String>(),
        ))
    }

    #[test]
    fn round_trips_account_id() {
        let svc = service();
        let account_id = AccountId::new_v4();
        let token = svc.create(account_id, None);
        let verified = svc.verify(&token).expect("token verifies");
        assert_eq!(verified.account_id, account_id);
        assert!(verified.extras.is_none());
    }

    #[test]
    fn caches_positive_verification_by_token_string() {
        let svc = service();
        let account_id = AccountId::new_v4();
        let token = svc.create(account_id, None);

        assert_eq!(svc.verified_cache.len(), 0);
        let first = svc.verify(&token).expect("token verifies");
        assert_eq!(svc.verified_cache.len(), 1);
        let second = svc.verify(&token).expect("cache hit verifies");
        assert_eq!(first.account_id, second.account_id);
        assert_eq!(svc.verified_cache.len(), 1);
    }

    #[test]
    fn rejects_tampered_token() {
        let svc = service();
        let mut token = svc.create(AccountId::new_v4(), None);
        token.push('x');
        assert!(svc.verify(&token).is_none());
    }

    #[test]
    fn rejects_token_from_different_secret() {
        let svc_a = service();
        let svc_b = TokenService::new(&SecretString::from(
            "b".repeat(32).chars().collect::<String>(),
        ));
        let token = svc_a.create(AccountId::new_v4(), None);
        assert!(svc_b.verify(&token).is_none());
    }
}
