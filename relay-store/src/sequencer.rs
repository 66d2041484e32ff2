//! Atomic monotonic counter allocation, per-account and per-session.
//!
//! Both operations are a single conditional `UPDATE ... RETURNING`, never an
//! application-level read-then-write, so concurrent callers for the same key
//! observe a strictly increasing, gap-free sequence. Each function is generic
//! over [`sqlx::PgExecutor`] so callers can run it against the pool directly
//! for a standalone allocation, or against an open transaction when the
//! allocation must be atomic with a surrounding write (e.g. inserting a
//! message alongside allocating its session seq).

use relay_types::{AccountId, SessionId};

use crate::error::StoreError;

/// Atomically increments and returns an account's `seq`.
pub async fn allocate_account_seq<'e, E>(
    executor: E,
    account_id: AccountId,
) -> Result<i64, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let seq: i64 = sqlx::query_scalar(
        r#"
            UPDATE accounts
            SET seq = seq + 1, updated_at = now()
            WHERE id = $1
            RETURNING seq
        "#,
    )
    .bind(account_id.into_inner())
    .fetch_one(executor)
    .await?;
    Ok(seq)
}

/// Atomically increments and returns a session's `seq`.
pub async fn allocate_session_seq<'e, E>(
    executor: E,
    session_id: SessionId,
) -> Result<i64, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let seq: i64 = sqlx::query_scalar(
        r#"
            UPDATE sessions
            SET seq = seq + 1
            WHERE id = $1
            RETURNING seq
        "#,
    )
    .bind(session_id.into_inner())
    .fetch_one(executor)
    .await?;
    Ok(seq)
}
