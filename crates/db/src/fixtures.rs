use sqlx::{Executor, Row};

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_AGENT_IDS: &[&str] = &["agent-maria", "agent-petar", "agent-elena"];
const SEED_USER_IDS: &[&str] = &["user-demo"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedReport {
    pub agents_seeded: usize,
    pub users_seeded: usize,
}

/// Deterministic demo fixtures: a three-person support team and one
/// channel subscriber. Safe to load repeatedly.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedReport, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedReport { agents_seeded: SEED_AGENT_IDS.len(), users_seeded: SEED_USER_IDS.len() })
    }

    /// Confirms the seeded rows are present with their expected identity.
    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        for agent_id in SEED_AGENT_IDS {
            let count = sqlx::query("SELECT COUNT(*) AS count FROM agents WHERE id = ?")
                .bind(agent_id)
                .fetch_one(pool)
                .await?
                .get::<i64, _>("count");
            if count != 1 {
                return Ok(false);
            }
        }

        for user_id in SEED_USER_IDS {
            let count = sqlx::query("SELECT COUNT(*) AS count FROM channel_users WHERE id = ?")
                .bind(user_id)
                .fetch_one(pool)
                .await?
                .get::<i64, _>("count");
            if count != 1 {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::DemoSeedDataset;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_loads_and_verifies() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let report = DemoSeedDataset::load(&pool).await.expect("load seed");
        assert_eq!(report.agents_seeded, 3);
        assert_eq!(report.users_seeded, 1);

        assert!(DemoSeedDataset::verify(&pool).await.expect("verify seed"));

        pool.close().await;
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        DemoSeedDataset::load(&pool).await.expect("first load");
        DemoSeedDataset::load(&pool).await.expect("second load");

        assert!(DemoSeedDataset::verify(&pool).await.expect("verify seed"));

        pool.close().await;
    }
}
