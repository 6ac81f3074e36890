use sqlx::{sqlite::SqliteRow, Row};

use handoff_core::domain::agent::AgentId;
use handoff_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use handoff_core::domain::user::UserId;
use handoff_core::handoff::ConversationStore;
use handoff_core::StoreError;

use super::{decode, parse_optional_timestamp, parse_timestamp, unavailable};
use crate::DbPool;

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
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conversations (
                id,
                user_id,
                status,
                agent_id,
                started_at,
                escalated_at,
                ended_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.user_id.0)
        .bind(conversation.status.as_str())
        .bind(conversation.agent_id.as_ref().map(|agent_id| agent_id.0.as_str()))
        .bind(conversation.started_at.to_rfc3339())
        .bind(conversation.escalated_at.map(|value| value.to_rfc3339()))
        .bind(conversation.ended_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, status, agent_id, started_at, escalated_at, ended_at
             FROM conversations
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(conversation_from_row).transpose()
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE conversations SET
                status = ?,
                agent_id = ?,
                escalated_at = ?,
                ended_at = ?
             WHERE id = ?",
        )
        .bind(conversation.status.as_str())
        .bind(conversation.agent_id.as_ref().map(|agent_id| agent_id.0.as_str()))
        .bind(conversation.escalated_at.map(|value| value.to_rfc3339()))
        .bind(conversation.ended_at.map(|value| value.to_rfc3339()))
        .bind(&conversation.id.0)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unavailable(format!(
                "conversation {} does not exist",
                conversation.id
            )));
        }
        Ok(())
    }

    async fn find_open_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, status, agent_id, started_at, escalated_at, ended_at
             FROM conversations
             WHERE user_id = ? AND status != 'closed'
             ORDER BY started_at ASC, id ASC
             LIMIT 1",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(conversation_from_row).transpose()
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, StoreError> {
    let status_raw = row.try_get::<String, _>("status").map_err(unavailable)?;
    let status = ConversationStatus::parse(&status_raw)
        .ok_or_else(|| decode(format!("unknown conversation status `{status_raw}`")))?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id").map_err(unavailable)?),
        user_id: UserId(row.try_get("user_id").map_err(unavailable)?),
        status,
        agent_id: row.try_get::<Option<String>, _>("agent_id").map_err(unavailable)?.map(AgentId),
        started_at: parse_timestamp("started_at", row.try_get("started_at").map_err(unavailable)?)?,
        escalated_at: parse_optional_timestamp(
            "escalated_at",
            row.try_get("escalated_at").map_err(unavailable)?,
        )?,
        ended_at: parse_optional_timestamp("ended_at", row.try_get("ended_at").map_err(unavailable)?)?,
    })
}
