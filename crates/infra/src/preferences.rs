use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// The durable flags row: a single-row table of process-wide scheduling
/// state that must survive restarts.
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    pub earliest_schedule_refresh_date: Option<DateTime<Utc>>,
    pub authorization_disallowed_last_scheduling: bool,
}

#[derive(Clone)]
pub struct PreferencesStore {
    pool: SqlitePool,
}

impl PreferencesStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<Preferences> {
        let row: (Option<DateTime<Utc>>, bool) = sqlx::query_as(
            "SELECT earliest_schedule_refresh_date, authorization_disallowed_last_scheduling FROM preferences WHERE row_id = 0",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Preferences {
            earliest_schedule_refresh_date: row.0,
            authorization_disallowed_last_scheduling: row.1,
        })
    }

    pub async fn set_earliest_schedule_refresh_date(&self, at: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE preferences SET earliest_schedule_refresh_date = ? WHERE row_id = 0")
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_authorization_disallowed_last_scheduling(&self, disallowed: bool) -> Result<()> {
        sqlx::query("UPDATE preferences SET authorization_disallowed_last_scheduling = ? WHERE row_id = 0")
            .bind(disallowed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn starts_with_no_refresh_date_and_authorization_allowed() {
        let store = PreferencesStore::new(setup().await);
        let prefs = store.load().await.unwrap();
        assert!(prefs.earliest_schedule_refresh_date.is_none());
        assert!(!prefs.authorization_disallowed_last_scheduling);
    }

    #[tokio::test]
    async fn persists_updates() {
        let store = PreferencesStore::new(setup().await);
        let now = chrono::Utc::now();
        store.set_earliest_schedule_refresh_date(Some(now)).await.unwrap();
        store.set_authorization_disallowed_last_scheduling(true).await.unwrap();

        let prefs = store.load().await.unwrap();
        assert_eq!(prefs.earliest_schedule_refresh_date.unwrap(), now);
        assert!(prefs.authorization_disallowed_last_scheduling);
    }
}
