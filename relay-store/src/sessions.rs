//! Session and session-message persistence.

use relay_types::api::v1::SessionDto;
use relay_types::{AccountId, SessionId};
use time::OffsetDateTime;

use crate::Store;
use crate::error::StoreError;
use crate::model::SessionRow;
use crate::sequencer;

/// Outcome of a version-checked conditional write (§4.5 optimistic-concurrency
/// update algorithm), shared by sessions and machines, metadata and state.
#[derive(Debug, Clone)]
pub enum ConditionalUpdateOutcome {
    /// The write applied; carries the new version and new value.
    Success {
        /// `expectedVersion + 1`.
        version: i64,
        /// The newly stored value.
        value: Option<String>,
    },
    /// The stored version did not match `expectedVersion`; no write occurred.
    VersionMismatch {
        /// Currently stored version.
        version: i64,
        /// Currently stored value.
        value: Option<String>,
    },
    /// The row does not exist, or is not owned by the caller.
    NotFound,
}

impl Store {
    /// Returns the account's 150 most-recently-updated sessions.
    pub async fn list_recent_sessions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<SessionDto>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
                SELECT * FROM sessions
                WHERE account_id = $1
                ORDER BY updated_at DESC
                LIMIT 150
            "#,
        )
        .bind(account_id.into_inner())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SessionDto::from).collect())
    }

    /// Looks up a session by `(accountId, tag)`.
    pub async fn find_session_by_tag(
        &self,
        account_id: AccountId,
        tag: &str,
    ) -> Result<Option<SessionDto>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE account_id = $1 AND tag = $2")
                .bind(account_id.into_inner())
                .bind(tag)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SessionDto::from))
    }

    /// Looks up a session by id, scoped to the owning account.
    pub async fn get_session_owned(
        &self,
        account_id: AccountId,
        session_id: SessionId,
    ) -> Result<Option<SessionDto>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE id = $1 AND account_id = $2")
                .bind(session_id.into_inner())
                .bind(account_id.into_inner())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(SessionDto::from))
    }

    /// Creates a session, or returns the existing one if `(accountId, tag)`
    /// already exists (idempotent on `tag`).
    ///
    /// Returns the session and, only when a new row was actually inserted,
    /// the account seq allocated for the `new-session` emission. A `None`
    /// seq means the caller found an existing session and must not emit.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn create_session_or_get_existing(
        &self,
        account_id: AccountId,
        tag: &str,
        metadata: &str,
        agent_state: Option<&str>,
        data_encryption_key: Option<&str>,
    ) -> Result<(SessionDto, Option<i64>), StoreError> {
        let agent_state_version: i64 = if agent_state.is_some() { 1 } else { 0 };
        let mut tx = self.pool.begin().await?;
        let inserted: Option<SessionRow> = sqlx::query_as(
            r#"
                INSERT INTO sessions
                    (id, account_id, tag, metadata, metadata_version, agent_state, agent_state_version, data_encryption_key)
                VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
                ON CONFLICT (account_id, tag) DO NOTHING
                RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(account_id.into_inner())
        .bind(tag)
        .bind(metadata)
        .bind(agent_state)
        .bind(agent_state_version)
        .bind(data_encryption_key)
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(row) => {
                let seq = sequencer::allocate_account_seq(&mut *tx, account_id).await?;
                tx.commit().await?;
                Ok((row.into(), Some(seq)))
            }
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_session_by_tag(account_id, tag)
                    .await?
                    .expect("insert conflicted, so a matching row must exist");
                Ok((existing, None))
            }
        }
    }

    /// Deletes a session and all its messages in a single transaction.
    ///
    /// Returns `true` if a row was deleted, `false` if the session did not
    /// exist or was not owned by `account_id`. The caller is responsible for
    /// allocating the account seq and emitting `delete-session` *after* this
    /// returns `true`, matching the source's post-commit emission ordering.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn delete_session(
        &self,
        account_id: AccountId,
        session_id: SessionId,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM session_messages WHERE session_id = $1")
            .bind(session_id.into_inner())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1 AND account_id = $2")
            .bind(session_id.into_inner())
            .bind(account_id.into_inner())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Updates `active`/`lastActiveAt` for a `session-alive`/`session-end`
    /// heartbeat. Returns `true` if the session existed and was owned.
    pub async fn update_session_heartbeat(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        active: bool,
        at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
                UPDATE sessions
                SET active = $1, last_active_at = $2, updated_at = now()
                WHERE id = $3 AND account_id = $4
            "#,
        )
        .bind(active)
        .bind(at)
        .bind(session_id.into_inner())
        .bind(account_id.into_inner())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        Ok(updated)
    }

    /// Applies the §4.5 optimistic-concurrency update algorithm to a
    /// session's `metadata`/`metadataVersion`.
    pub async fn update_session_metadata(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        new_metadata: &str,
        expected_version: i64,
    ) -> Result<ConditionalUpdateOutcome, StoreError> {
        let Some(current) = self.get_session_owned(account_id, session_id).await? else {
            return Ok(ConditionalUpdateOutcome::NotFound);
        };
        if current.metadata_version != expected_version {
            return Ok(ConditionalUpdateOutcome::VersionMismatch {
                version: current.metadata_version,
                value: Some(current.metadata),
            });
        }
        let updated: Option<SessionRow> = sqlx::query_as(
            r#"
                UPDATE sessions
                SET metadata = $1, metadata_version = $2, updated_at = now()
                WHERE id = $3 AND account_id = $4 AND metadata_version = $5
                RETURNING *
            "#,
        )
        .bind(new_metadata)
        .bind(expected_version + 1)
        .bind(session_id.into_inner())
        .bind(account_id.into_inner())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(row) => Ok(ConditionalUpdateOutcome::Success {
                version: row.metadata_version,
                value: Some(row.metadata),
            }),
            None => {
                let latest = self
                    .get_session_owned(account_id, session_id)
                    .await?
                    .expect("row existed a moment ago");
                Ok(ConditionalUpdateOutcome::VersionMismatch {
                    version: latest.metadata_version,
                    value: Some(latest.metadata),
                })
            }
        }
    }

    /// Applies the §4.5 optimistic-concurrency update algorithm to a
    /// session's `agentState`/`agentStateVersion`.
    pub async fn update_session_state(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        new_state: &str,
        expected_version: i64,
    ) -> Result<ConditionalUpdateOutcome, StoreError> {
        let Some(current) = self.get_session_owned(account_id, session_id).await? else {
            return Ok(ConditionalUpdateOutcome::NotFound);
        };
        if current.agent_state_version != expected_version {
            return Ok(ConditionalUpdateOutcome::VersionMismatch {
                version: current.agent_state_version,
                value: current.agent_state,
            });
        }
        let updated: Option<SessionRow> = sqlx::query_as(
            r#"
                UPDATE sessions
                SET agent_state = $1, agent_state_version = $2, updated_at = now()
                WHERE id = $3 AND account_id = $4 AND agent_state_version = $5
                RETURNING *
            "#,
        )
        .bind(new_state)
        .bind(expected_version + 1)
        .bind(session_id.into_inner())
        .bind(account_id.into_inner())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(row) => Ok(ConditionalUpdateOutcome::Success {
                version: row.agent_state_version,
                value: row.agent_state,
            }),
            None => {
                let latest = self
                    .get_session_owned(account_id, session_id)
                    .await?
                    .expect("row existed a moment ago");
                Ok(ConditionalUpdateOutcome::VersionMismatch {
                    version: latest.agent_state_version,
                    value: latest.agent_state,
                })
            }
        }
    }
}
