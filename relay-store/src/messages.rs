//! Session message persistence.

use relay_types::api::v1::MessageDto;
use relay_types::{AccountId, SessionId};

use crate::Store;
use crate::error::StoreError;
use crate::model::SessionMessageRow;
use crate::sequencer;

/// Outcome of [`Store::insert_message`].
#[derive(Debug, Clone)]
pub enum InsertMessageOutcome {
    /// The message was persisted. Carries the account seq allocated for the
    /// `new-message` emission; the message's own `seq` is on the DTO.
    Inserted {
        /// The stored message, including its allocated `Message.seq`.
        message: MessageDto,
        /// The account seq for the `new-message` update event.
        account_seq: i64,
    },
    /// A message with this `(sessionId, localId)` already existed; the
    /// insert was a no-op and no sequences were allocated.
    Dropped,
}

impl Store {
    /// Returns a session's 150 most-recent messages, newest first.
    pub async fn list_recent_messages(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<MessageDto>, StoreError> {
        let rows: Vec<SessionMessageRow> = sqlx::query_as(
            r#"
                SELECT * FROM session_messages
                WHERE session_id = $1
                ORDER BY created_at DESC
                LIMIT 150
            "#,
        )
        .bind(session_id.into_inner())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MessageDto::from).collect())
    }

    /// Inserts a message, allocating both the session seq (for
    /// `Message.seq`) and the account seq (for the `new-message` emission)
    /// in a single transaction.
    ///
    /// If `local_id` is set and a message with that `(sessionId, localId)`
    /// already exists, the insert is silently dropped: no row is written
    /// and no sequences are allocated, so a retried send produces exactly
    /// one persisted message.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn insert_message(
        &self,
        account_id: AccountId,
        session_id: SessionId,
        content: serde_json::Value,
        local_id: Option<&str>,
    ) -> Result<InsertMessageOutcome, StoreError> {
        if let Some(local_id) = local_id {
            let existing: Option<uuid::Uuid> = sqlx::query_scalar(
                "SELECT id FROM session_messages WHERE session_id = $1 AND local_id = $2",
            )
            .bind(session_id.into_inner())
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
            if existing.is_some() {
                return Ok(InsertMessageOutcome::Dropped);
            }
        }

        let mut tx = self.pool.begin().await?;
        let session_seq = sequencer::allocate_session_seq(&mut *tx, session_id).await?;
        let account_seq = sequencer::allocate_account_seq(&mut *tx, account_id).await?;
        let inserted: Result<SessionMessageRow, sqlx::Error> = sqlx::query_as(
            r#"
                INSERT INTO session_messages (id, session_id, seq, content, local_id)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(session_id.into_inner())
        .bind(session_seq)
        .bind(content)
        .bind(local_id)
        .fetch_one(&mut *tx)
        .await;

        // A concurrent sender with the same localId can win the race between
        // our existence check above and this insert; the unique constraint
        // catches it, and we treat that exactly like the pre-check finding a
        // row (silently dropped, no sequences end up visible).
        match inserted {
            Ok(row) => {
                tx.commit().await?;
                Ok(InsertMessageOutcome::Inserted {
                    message: row.into(),
                    account_seq,
                })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                Ok(InsertMessageOutcome::Dropped)
            }
            Err(err) => Err(err.into()),
        }
    }
}
