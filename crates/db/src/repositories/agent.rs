use sqlx::{sqlite::SqliteRow, Row};

use handoff_core::domain::agent::{Agent, AgentId};
use handoff_core::handoff::AgentStore;
use handoff_core::StoreError;

use super::{parse_timestamp, parse_u32, unavailable, RepositoryError};
use crate::DbPool;

pub struct SqlAgentStore {
    pool: DbPool,
}

impl SqlAgentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Registers or refreshes an agent. Chat count is preserved on refresh
    /// so re-seeding never forgets live load.
    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agents (
                id,
                name,
                email,
                role,
                is_available,
                max_concurrent_chats,
                current_chats,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                is_available = excluded.is_available,
                max_concurrent_chats = excluded.max_concurrent_chats",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(&agent.email)
        .bind(&agent.role)
        .bind(agent.is_available)
        .bind(i64::from(agent.max_concurrent_chats))
        .bind(i64::from(agent.current_chats))
        .bind(agent.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_availability(
        &self,
        id: &AgentId,
        is_available: bool,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE agents SET is_available = ? WHERE id = ?")
            .bind(is_available)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl AgentStore for SqlAgentStore {
    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                email,
                role,
                is_available,
                max_concurrent_chats,
                current_chats,
                created_at
             FROM agents
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(agent_from_row).collect()
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            "SELECT
                id,
                name,
                email,
                role,
                is_available,
                max_concurrent_chats,
                current_chats,
                created_at
             FROM agents
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(agent_from_row).transpose()
    }

    async fn increment_chats(&self, id: &AgentId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE agents SET current_chats = current_chats + 1 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn decrement_chats(&self, id: &AgentId) -> Result<bool, StoreError> {
        // MAX keeps the count from going negative on a double release.
        let result =
            sqlx::query("UPDATE agents SET current_chats = MAX(0, current_chats - 1) WHERE id = ?")
                .bind(&id.0)
                .execute(&self.pool)
                .await
                .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }
}

fn agent_from_row(row: SqliteRow) -> Result<Agent, StoreError> {
    Ok(Agent {
        id: AgentId(row.try_get("id").map_err(unavailable)?),
        name: row.try_get("name").map_err(unavailable)?,
        email: row.try_get("email").map_err(unavailable)?,
        role: row.try_get("role").map_err(unavailable)?,
        is_available: row.try_get("is_available").map_err(unavailable)?,
        max_concurrent_chats: parse_u32(
            "max_concurrent_chats",
            row.try_get("max_concurrent_chats").map_err(unavailable)?,
        )?,
        current_chats: parse_u32("current_chats", row.try_get("current_chats").map_err(unavailable)?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at").map_err(unavailable)?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use handoff_core::domain::agent::{Agent, AgentId};
    use handoff_core::handoff::AgentStore;

    use super::SqlAgentStore;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn agent(id: &str, created_at: &str) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
            name: format!("Agent {id}"),
            email: format!("{id}@support.test"),
            role: "agent".to_string(),
            is_available: true,
            max_concurrent_chats: 3,
            current_chats: 0,
            created_at: parse_ts(created_at),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn list_agents_preserves_registration_order() {
        let pool = setup_pool().await;
        let store = SqlAgentStore::new(pool.clone());

        store.upsert_agent(&agent("agent-b", "2026-08-01T10:00:00Z")).await.expect("upsert");
        store.upsert_agent(&agent("agent-a", "2026-08-01T09:00:00Z")).await.expect("upsert");

        let agents = store.list_agents().await.expect("list agents");
        let ids: Vec<&str> = agents.iter().map(|agent| agent.id.0.as_str()).collect();
        assert_eq!(ids, vec!["agent-a", "agent-b"]);

        pool.close().await;
    }

    #[tokio::test]
    async fn chat_count_updates_report_unknown_agents() {
        let pool = setup_pool().await;
        let store = SqlAgentStore::new(pool.clone());
        store.upsert_agent(&agent("agent-a", "2026-08-01T09:00:00Z")).await.expect("upsert");

        assert!(store.increment_chats(&AgentId("agent-a".to_string())).await.expect("increment"));
        assert!(!store.increment_chats(&AgentId("agent-x".to_string())).await.expect("increment"));

        let loaded = store
            .get_agent(&AgentId("agent-a".to_string()))
            .await
            .expect("get agent")
            .expect("agent exists");
        assert_eq!(loaded.current_chats, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn decrement_never_goes_below_zero() {
        let pool = setup_pool().await;
        let store = SqlAgentStore::new(pool.clone());
        store.upsert_agent(&agent("agent-a", "2026-08-01T09:00:00Z")).await.expect("upsert");

        assert!(store.decrement_chats(&AgentId("agent-a".to_string())).await.expect("decrement"));
        let loaded = store
            .get_agent(&AgentId("agent-a".to_string()))
            .await
            .expect("get agent")
            .expect("agent exists");
        assert_eq!(loaded.current_chats, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn upsert_refresh_keeps_live_chat_count() {
        let pool = setup_pool().await;
        let store = SqlAgentStore::new(pool.clone());
        store.upsert_agent(&agent("agent-a", "2026-08-01T09:00:00Z")).await.expect("upsert");
        store.increment_chats(&AgentId("agent-a".to_string())).await.expect("increment");

        let mut refreshed = agent("agent-a", "2026-08-01T09:00:00Z");
        refreshed.max_concurrent_chats = 8;
        store.upsert_agent(&refreshed).await.expect("re-upsert");

        let loaded = store
            .get_agent(&AgentId("agent-a".to_string()))
            .await
            .expect("get agent")
            .expect("agent exists");
        assert_eq!(loaded.max_concurrent_chats, 8);
        assert_eq!(loaded.current_chats, 1);

        pool.close().await;
    }
}
