//! Browser-to-account pairing request persistence (`/v1/auth/account/*`).

use relay_types::AccountId;

use crate::Store;
use crate::error::StoreError;
use crate::model::PairingRequestRow;

/// Outcome of polling a pairing request.
#[derive(Debug, Clone)]
pub enum PairingPollOutcome {
    /// No account has responded yet.
    Requested,
    /// An account authorized the request. The caller (service layer) still
    /// has to mint the bearer token for `response_account_id`.
    Authorized {
        /// The account that authorized the pairing.
        account_id: AccountId,
        /// The caller-supplied response payload, opaque to the store.
        response: String,
    },
}

impl Store {
    /// Creates (or re-surfaces) a pairing request for a given public key.
    /// Idempotent: polling or re-requesting with the same key returns the
    /// same row rather than creating duplicates.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn upsert_pairing_request(&self, public_key_hex: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                INSERT INTO account_auth_requests (id, public_key)
                VALUES ($1, $2)
                ON CONFLICT (public_key) DO UPDATE SET updated_at = account_auth_requests.updated_at
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(public_key_hex)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Polls the current state of a pairing request.
    pub async fn poll_pairing_request(
        &self,
        public_key_hex: &str,
    ) -> Result<PairingPollOutcome, StoreError> {
        let row: Option<PairingRequestRow> =
            sqlx::query_as("SELECT * FROM account_auth_requests WHERE public_key = $1")
                .bind(public_key_hex)
                .fetch_optional(&self.pool)
                .await?;
        match row.and_then(|r| r.response.zip(r.response_account_id)) {
            Some((response, account_id)) => Ok(PairingPollOutcome::Authorized {
                account_id: AccountId::from(account_id),
                response,
            }),
            None => Ok(PairingPollOutcome::Requested),
        }
    }

    /// Records an authorizing account's response to a pairing request.
    /// Idempotent: a pairing request that already carries a response is
    /// left untouched.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn write_pairing_response(
        &self,
        public_key_hex: &str,
        account_id: AccountId,
        response: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
                UPDATE account_auth_requests
                SET response = $1, response_account_id = $2, updated_at = now()
                WHERE public_key = $3 AND response IS NULL
            "#,
        )
        .bind(response)
        .bind(account_id.into_inner())
        .bind(public_key_hex)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
