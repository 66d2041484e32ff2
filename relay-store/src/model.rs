//! Row types mirroring the tables in `migrations/0001_init.sql`, plus their
//! conversions into the wire DTOs from `relay_types::api::v1`.

use relay_types::api::v1::{MachineDto, MessageDto, SessionDto};
use relay_types::{AccountId, MachineId, MessageId, SessionId};
use time::OffsetDateTime;
use uuid::Uuid;

/// Converts a Postgres timestamp into milliseconds since the Unix epoch.
pub(crate) fn millis(ts: OffsetDateTime) -> i64 {
    ts.unix_timestamp() * 1000 + i64::from(ts.millisecond())
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub id: Uuid,
    #[allow(dead_code)]
    pub public_key: String,
    pub seq: i64,
    #[allow(dead_code)]
    pub created_at: OffsetDateTime,
    #[allow(dead_code)]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    pub id: Uuid,
    pub account_id: Uuid,
    pub tag: String,
    pub seq: i64,
    pub metadata: String,
    pub metadata_version: i64,
    pub agent_state: Option<String>,
    pub agent_state_version: i64,
    pub data_encryption_key: Option<String>,
    pub active: bool,
    pub last_active_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<SessionRow> for SessionDto {
    fn from(row: SessionRow) -> Self {
        let last_active_at = millis(row.last_active_at);
        SessionDto {
            id: SessionId::from(row.id),
            account_id: AccountId::from(row.account_id),
            tag: row.tag,
            seq: row.seq,
            metadata: row.metadata,
            metadata_version: row.metadata_version,
            agent_state: row.agent_state,
            agent_state_version: row.agent_state_version,
            data_encryption_key: row.data_encryption_key,
            active: row.active,
            last_active_at,
            active_at: last_active_at,
            created_at: millis(row.created_at),
            updated_at: millis(row.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionMessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seq: i64,
    pub content: serde_json::Value,
    pub local_id: Option<String>,
    pub created_at: OffsetDateTime,
}

impl From<SessionMessageRow> for MessageDto {
    fn from(row: SessionMessageRow) -> Self {
        MessageDto {
            id: MessageId::from(row.id),
            session_id: SessionId::from(row.session_id),
            seq: row.seq,
            content: row.content,
            local_id: row.local_id,
            created_at: millis(row.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MachineRow {
    pub id: String,
    pub account_id: Uuid,
    pub metadata: String,
    pub metadata_version: i64,
    pub daemon_state: Option<String>,
    pub daemon_state_version: i64,
    pub data_encryption_key: Option<String>,
    pub active: bool,
    pub last_active_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<MachineRow> for MachineDto {
    fn from(row: MachineRow) -> Self {
        MachineDto {
            id: MachineId::new(row.id),
            account_id: AccountId::from(row.account_id),
            metadata: row.metadata,
            metadata_version: row.metadata_version,
            daemon_state: row.daemon_state,
            daemon_state_version: row.daemon_state_version,
            data_encryption_key: row.data_encryption_key,
            active: row.active,
            last_active_at: millis(row.last_active_at),
            created_at: millis(row.created_at),
            updated_at: millis(row.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PairingRequestRow {
    #[allow(dead_code)]
    pub id: Uuid,
    #[allow(dead_code)]
    pub public_key: String,
    pub response: Option<String>,
    pub response_account_id: Option<Uuid>,
}
