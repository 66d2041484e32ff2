//! Machine (daemon) persistence.

use relay_types::api::v1::MachineDto;
use relay_types::{AccountId, MachineId};
use time::OffsetDateTime;

use crate::Store;
use crate::error::StoreError;
use crate::model::MachineRow;
use crate::sequencer;
use crate::sessions::ConditionalUpdateOutcome;

/// Outcome of [`Store::upsert_machine`].
#[derive(Debug, Clone)]
pub enum UpsertMachineOutcome {
    /// The machine was registered for the first time. Carries the account
    /// seq allocated for the `new-machine` emission.
    Created {
        /// The newly stored machine.
        machine: MachineDto,
        /// The account seq for the `new-machine` update event.
        account_seq: i64,
    },
    /// The machine already existed; registration is a no-op beyond the
    /// heartbeat touch a caller may apply separately.
    AlreadyExisted(MachineDto),
}

impl Store {
    /// Looks up a machine by `(accountId, id)`.
    pub async fn find_machine(
        &self,
        account_id: AccountId,
        machine_id: &MachineId,
    ) -> Result<Option<MachineDto>, StoreError> {
        let row: Option<MachineRow> =
            sqlx::query_as("SELECT * FROM machines WHERE account_id = $1 AND id = $2")
                .bind(account_id.into_inner())
                .bind(machine_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(MachineDto::from))
    }

    /// Returns all machines registered to an account.
    pub async fn list_machines(&self, account_id: AccountId) -> Result<Vec<MachineDto>, StoreError> {
        let rows: Vec<MachineRow> = sqlx::query_as(
            "SELECT * FROM machines WHERE account_id = $1 ORDER BY updated_at DESC",
        )
        .bind(account_id.into_inner())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MachineDto::from).collect())
    }

    /// Registers a machine, or returns the existing one if `(accountId,
    /// id)` is already registered (idempotent on `id`).
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn upsert_machine(
        &self,
        account_id: AccountId,
        machine_id: &MachineId,
        metadata: &str,
        daemon_state: Option<&str>,
        data_encryption_key: Option<&str>,
    ) -> Result<UpsertMachineOutcome, StoreError> {
        let daemon_state_version: i64 = if daemon_state.is_some() { 1 } else { 0 };
        let mut tx = self.pool.begin().await?;
        let inserted: Option<MachineRow> = sqlx::query_as(
            r#"
                INSERT INTO machines
                    (id, account_id, metadata, metadata_version, daemon_state, daemon_state_version, data_encryption_key)
                VALUES ($1, $2, $3, 1, $4, $5, $6)
                ON CONFLICT (account_id, id) DO NOTHING
                RETURNING *
            "#,
        )
        .bind(machine_id.as_str())
        .bind(account_id.into_inner())
        .bind(metadata)
        .bind(daemon_state)
        .bind(daemon_state_version)
        .bind(data_encryption_key)
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(row) => {
                let account_seq = sequencer::allocate_account_seq(&mut *tx, account_id).await?;
                tx.commit().await?;
                Ok(UpsertMachineOutcome::Created {
                    machine: row.into(),
                    account_seq,
                })
            }
            None => {
                tx.rollback().await?;
                let existing = self
                    .find_machine(account_id, machine_id)
                    .await?
                    .expect("insert conflicted, so a matching row must exist");
                Ok(UpsertMachineOutcome::AlreadyExisted(existing))
            }
        }
    }

    /// Updates `active`/`lastActiveAt` for a `machine-alive` heartbeat.
    /// Returns `true` if the machine existed and was owned.
    pub async fn update_machine_heartbeat(
        &self,
        account_id: AccountId,
        machine_id: &MachineId,
        active: bool,
        at: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"
                UPDATE machines
                SET active = $1, last_active_at = $2, updated_at = now()
                WHERE account_id = $3 AND id = $4
            "#,
        )
        .bind(active)
        .bind(at)
        .bind(account_id.into_inner())
        .bind(machine_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;
        Ok(updated)
    }

    /// Applies the §4.5 optimistic-concurrency update algorithm to a
    /// machine's `metadata`/`metadataVersion`.
    pub async fn update_machine_metadata(
        &self,
        account_id: AccountId,
        machine_id: &MachineId,
        new_metadata: &str,
        expected_version: i64,
    ) -> Result<ConditionalUpdateOutcome, StoreError> {
        let Some(current) = self.find_machine(account_id, machine_id).await? else {
            return Ok(ConditionalUpdateOutcome::NotFound);
        };
        if current.metadata_version != expected_version {
            return Ok(ConditionalUpdateOutcome::VersionMismatch {
                version: current.metadata_version,
                value: Some(current.metadata),
            });
        }
        let updated: Option<MachineRow> = sqlx::query_as(
            r#"
                UPDATE machines
                SET metadata = $1, metadata_version = $2, updated_at = now()
                WHERE account_id = $3 AND id = $4 AND metadata_version = $5
                RETURNING *
            "#,
        )
        .bind(new_metadata)
        .bind(expected_version + 1)
        .bind(account_id.into_inner())
        .bind(machine_id.as_str())
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
                    .find_machine(account_id, machine_id)
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
    /// machine's `daemonState`/`daemonStateVersion`.
    pub async fn update_machine_state(
        &self,
        account_id: AccountId,
        machine_id: &MachineId,
        new_state: &str,
        expected_version: i64,
    ) -> Result<ConditionalUpdateOutcome, StoreError> {
        let Some(current) = self.find_machine(account_id, machine_id).await? else {
            return Ok(ConditionalUpdateOutcome::NotFound);
        };
        if current.daemon_state_version != expected_version {
            return Ok(ConditionalUpdateOutcome::VersionMismatch {
                version: current.daemon_state_version,
                value: current.daemon_state,
            });
        }
        let updated: Option<MachineRow> = sqlx::query_as(
            r#"
                UPDATE machines
                SET daemon_state = $1, daemon_state_version = $2, updated_at = now()
                WHERE account_id = $3 AND id = $4 AND daemon_state_version = $5
                RETURNING *
            "#,
        )
        .bind(new_state)
        .bind(expected_version + 1)
        .bind(account_id.into_inner())
        .bind(machine_id.as_str())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(row) => Ok(ConditionalUpdateOutcome::Success {
                version: row.daemon_state_version,
                value: row.daemon_state,
            }),
            None => {
                let latest = self
                    .find_machine(account_id, machine_id)
                    .await?
                    .expect("row existed a moment ago");
                Ok(ConditionalUpdateOutcome::VersionMismatch {
                    version: latest.daemon_state_version,
                    value: latest.daemon_state,
                })
            }
        }
    }
}
