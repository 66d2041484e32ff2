#![deny(missing_docs)]
//! Transactional persistence for the zero-knowledge real-time relay.
//!
//! This crate owns the Postgres schema (`migrations/`) for accounts,
//! sessions, session messages, machines, and pairing requests, and exposes a
//! [`Store`] handle for the relay service to drive CRUD and optimistic
//! concurrency operations against it. Atomic sequence allocation lives
//! separately in [`sequencer`], since it is usable both standalone and
//! composed into a surrounding transaction.
//!
//! Every ciphertext column the schema holds (`metadata`, `agent_state`,
//! `daemon_state`, message `content`, `data_encryption_key`, pairing
//! `response`) is stored and returned as-is; this crate never attempts to
//! interpret the bytes.

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub mod error;
mod machines;
mod messages;
mod model;
mod pairing;
mod sessions;
pub mod sequencer;

pub use error::StoreError;
pub use machines::UpsertMachineOutcome;
pub use messages::InsertMessageOutcome;
pub use pairing::PairingPollOutcome;
pub use sessions::ConditionalUpdateOutcome;

/// A handle to the relay's Postgres-backed store.
///
/// Cheap to clone: internally wraps a [`PgPool`], which is itself a
/// reference-counted connection pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connects to Postgres with the given connection string and pool
    /// tuning, without running migrations.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn connect(
        connection_string: &SecretString,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        tracing::info!("connecting to postgres...");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(connection_string.expose_secret())
            .await?;
        Ok(Self { pool })
    }

    /// Runs the embedded migrations against the connected database.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        tracing::info!("running migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Runs a trivial query to verify the pool can still reach the database.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Upserts an account keyed by its hex-encoded Ed25519 public key.
    ///
    /// Returns the account id whether the account was just created or
    /// already existed.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn upsert_account(
        &self,
        public_key_hex: &str,
    ) -> Result<relay_types::AccountId, StoreError> {
        let id: uuid::Uuid = sqlx::query_scalar(
            r#"
                INSERT INTO accounts (id, public_key)
                VALUES ($1, $2)
                ON CONFLICT (public_key) DO UPDATE SET updated_at = accounts.updated_at
                RETURNING id
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(public_key_hex)
        .fetch_one(&self.pool)
        .await?;
        Ok(relay_types::AccountId::from(id))
    }

    /// Allocates a fresh account seq outside of any other write. Used by
    /// callers that emit an `update` event after a transaction (e.g. a
    /// session delete, or a machine's post-registration `update-machine`
    /// push) has already committed without allocating one itself.
    pub async fn allocate_account_seq(
        &self,
        account_id: relay_types::AccountId,
    ) -> Result<i64, StoreError> {
        sequencer::allocate_account_seq(&self.pool, account_id).await
    }
}
