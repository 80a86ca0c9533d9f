use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use citabot_core::domain::conversation::{
    ControlState, Conversation, ConversationId, PauseReason,
};

use super::{parse_optional_timestamp, parse_timestamp, ts, ConversationStore, RepositoryError};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id, client_phone, client_name, bot_active, pause_reason, \
     paused_by, paused_at, last_message_at, created_at";

pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqlConversationStore {
    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn upsert_on_contact(
        &self,
        id: ConversationId,
        client_phone: &str,
        client_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (
                id, client_phone, client_name, bot_active, last_message_at, created_at, updated_at
             ) VALUES (?, ?, ?, 1, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                client_name = COALESCE(conversation.client_name, excluded.client_name),
                last_message_at = excluded.last_message_at,
                updated_at = excluded.updated_at",
        )
        .bind(id.0)
        .bind(client_phone)
        .bind(client_name)
        .bind(ts(now))
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;

        let row =
            sqlx::query(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversation WHERE id = ?"))
                .bind(id.0)
                .fetch_one(&self.pool)
                .await?;

        conversation_from_row(row)
    }

    async fn set_state(
        &self,
        id: ConversationId,
        state: ControlState,
        paused_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match state {
            ControlState::Automated => {
                sqlx::query(
                    "UPDATE conversation SET
                        bot_active = 1,
                        pause_reason = NULL,
                        paused_by = NULL,
                        paused_at = NULL,
                        updated_at = ?
                     WHERE id = ?",
                )
                .bind(ts(now))
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            }
            ControlState::Paused(reason) => {
                sqlx::query(
                    "UPDATE conversation SET
                        bot_active = 0,
                        pause_reason = ?,
                        paused_by = ?,
                        paused_at = ?,
                        updated_at = ?
                     WHERE id = ?",
                )
                .bind(reason.as_str())
                .bind(paused_by)
                .bind(ts(now))
                .bind(ts(now))
                .bind(id.0)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let bot_active = row.try_get::<i64, _>("bot_active")? != 0;
    let pause_reason_raw = row.try_get::<Option<String>, _>("pause_reason")?;

    // The pause invariant is enforced on decode: a paused row without a
    // reason (or vice versa) is corrupt, not a default.
    let state = match (bot_active, pause_reason_raw) {
        (true, None) => ControlState::Automated,
        (true, Some(reason)) => {
            return Err(RepositoryError::Decode(format!(
                "active conversation carries pause_reason `{reason}`"
            )));
        }
        (false, Some(reason_raw)) => {
            let reason = PauseReason::parse(&reason_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown pause reason `{reason_raw}`"))
            })?;
            ControlState::Paused(reason)
        }
        (false, None) => {
            return Err(RepositoryError::Decode(
                "paused conversation is missing pause_reason".to_string(),
            ));
        }
    };

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        client_phone: row.try_get("client_phone")?,
        client_name: row.try_get("client_name")?,
        state,
        paused_by: row.try_get("paused_by")?,
        paused_at: parse_optional_timestamp("paused_at", row.try_get("paused_at")?)?,
        last_message_at: parse_optional_timestamp(
            "last_message_at",
            row.try_get("last_message_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
