use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use handoff_core::domain::conversation::ConversationId;
use handoff_core::domain::user::{MessageRecord, SenderKind};

use super::RepositoryError;
use crate::DbPool;

/// Conversation transcript. Append-only.
pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, message: &MessageRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, sender_kind, body, sent_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id.0)
        .bind(&message.sender_id)
        .bind(message.sender_kind.as_str())
        .bind(&message.body)
        .bind(message.sent_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, sender_kind, body, sent_at
             FROM messages
             WHERE conversation_id = ?
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<MessageRecord, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("sender_kind")?;
    let sender_kind = SenderKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown sender kind `{kind_raw}`")))?;

    Ok(MessageRecord {
        id: row.try_get("id")?,
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        sender_id: row.try_get("sender_id")?,
        sender_kind,
        body: row.try_get("body")?,
        sent_at: parse_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
