use sqlx::{sqlite::SqliteRow, Row};

use handoff_core::domain::agent::AgentId;
use handoff_core::domain::conversation::ConversationId;
use handoff_core::domain::ticket::{Ticket, TicketId, TicketStatus};
use handoff_core::domain::user::UserId;
use handoff_core::handoff::TicketStore;
use handoff_core::StoreError;

use super::{decode, parse_optional_timestamp, parse_timestamp, unavailable};
use crate::DbPool;

const TICKET_COLUMNS: &str = "id,
                conversation_id,
                user_id,
                agent_id,
                status,
                priority,
                subject,
                description,
                escalated_at,
                resolved_at,
                timeout_at";

pub struct SqlTicketStore {
    pool: DbPool,
}

impl SqlTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TicketStore for SqlTicketStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO support_tickets (
                id,
                conversation_id,
                user_id,
                agent_id,
                status,
                priority,
                subject,
                description,
                escalated_at,
                resolved_at,
                timeout_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.id.0)
        .bind(&ticket.conversation_id.0)
        .bind(&ticket.user_id.0)
        .bind(ticket.agent_id.as_ref().map(|agent_id| agent_id.0.as_str()))
        .bind(ticket.status.as_str())
        .bind(&ticket.priority)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.escalated_at.to_rfc3339())
        .bind(ticket.resolved_at.map(|value| value.to_rfc3339()))
        .bind(ticket.timeout_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM support_tickets WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(ticket_from_row).transpose()
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE support_tickets SET
                agent_id = ?,
                status = ?,
                priority = ?,
                subject = ?,
                description = ?,
                resolved_at = ?,
                timeout_at = ?
             WHERE id = ?",
        )
        .bind(ticket.agent_id.as_ref().map(|agent_id| agent_id.0.as_str()))
        .bind(ticket.status.as_str())
        .bind(&ticket.priority)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.resolved_at.map(|value| value.to_rfc3339()))
        .bind(ticket.timeout_at.to_rfc3339())
        .bind(&ticket.id.0)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unavailable(format!("ticket {} does not exist", ticket.id)));
        }
        Ok(())
    }

    async fn delete_ticket(&self, id: &TicketId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM support_tickets WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn find_open_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS}
             FROM support_tickets
             WHERE conversation_id = ?
               AND status IN ('pending', 'assigned', 'in_progress')
             ORDER BY escalated_at ASC, id ASC
             LIMIT 1"
        ))
        .bind(&conversation_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(ticket_from_row).transpose()
    }

    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS}
             FROM support_tickets
             WHERE status = ?
             ORDER BY escalated_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(ticket_from_row).collect()
    }
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, StoreError> {
    let status_raw = row.try_get::<String, _>("status").map_err(unavailable)?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| decode(format!("unknown ticket status `{status_raw}`")))?;

    Ok(Ticket {
        id: TicketId(row.try_get("id").map_err(unavailable)?),
        conversation_id: ConversationId(row.try_get("conversation_id").map_err(unavailable)?),
        user_id: UserId(row.try_get("user_id").map_err(unavailable)?),
        agent_id: row.try_get::<Option<String>, _>("agent_id").map_err(unavailable)?.map(AgentId),
        status,
        priority: row.try_get("priority").map_err(unavailable)?,
        subject: row.try_get("subject").map_err(unavailable)?,
        description: row.try_get("description").map_err(unavailable)?,
        escalated_at: parse_timestamp("escalated_at", row.try_get("escalated_at").map_err(unavailable)?)?,
        resolved_at: parse_optional_timestamp(
            "resolved_at",
            row.try_get("resolved_at").map_err(unavailable)?,
        )?,
        timeout_at: parse_timestamp("timeout_at", row.try_get("timeout_at").map_err(unavailable)?)?,
    })
}
