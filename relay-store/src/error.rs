//! Errors produced by the [`crate::Store`].

/// Failure modes surfaced by store operations.
///
/// Conditions the caller is expected to handle as ordinary control flow
/// (not-found, conflict, stale version) are modeled as `Ok(None)` /
/// dedicated return types on the individual methods rather than as error
/// variants here — this enum is reserved for genuinely unexpected failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying Postgres driver returned an error.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// Running the embedded migrations failed.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
