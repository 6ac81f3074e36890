use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use handoff_core::domain::user::{ChannelUser, UserId, UserStatus};

use super::RepositoryError;
use crate::DbPool;

/// Registry of channel subscribers. Only the webhook flow writes here, so
/// this stays a concrete repository rather than a core port.
pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_user(&self, user: &ChannelUser) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_users (id, name, language, status, created_at, last_active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                language = excluded.language,
                status = excluded.status,
                last_active = excluded.last_active",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(&user.language)
        .bind(user.status.as_str())
        .bind(user.created_at.to_rfc3339())
        .bind(user.last_active.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &UserId) -> Result<Option<ChannelUser>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, language, status, created_at, last_active
             FROM channel_users
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    pub async fn touch_last_active(
        &self,
        id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE channel_users SET last_active = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn user_from_row(row: SqliteRow) -> Result<ChannelUser, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = UserStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown user status `{status_raw}`")))?;

    Ok(ChannelUser {
        id: UserId(row.try_get("id")?),
        name: row.try_get("name")?,
        language: row.try_get("language")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_active: parse_timestamp("last_active", row.try_get("last_active")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
