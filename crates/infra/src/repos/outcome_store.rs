use std::ops::Range;

use async_trait::async_trait;
use caretask_domain::{Outcome, UserInfo, ID};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::instrument;

use crate::error::Result;

/// Completion records, one per `(task_version, occurrence_start)`.
#[async_trait]
pub trait IOutcomeStore: Send + Sync {
    /// Inserts or replaces the outcome for `outcome`'s `(task_version_id,
    /// occurrence_start)` pair.
    async fn add_outcome(&self, outcome: Outcome) -> Result<Outcome>;

    async fn remove_outcome(&self, id: &ID) -> Result<()>;

    /// Outcomes whose `occurrence_start` falls in `range`, for the given
    /// version ids.
    async fn query_outcomes(&self, version_ids: &[ID], range: Range<DateTime<Utc>>) -> Result<Vec<Outcome>>;

    async fn find_for_occurrence(&self, version_id: &ID, occurrence_start: DateTime<Utc>) -> Result<Option<Outcome>>;
}

#[derive(Debug, FromRow)]
struct OutcomeRow {
    id: String,
    completion_date: DateTime<Utc>,
    occurrence_start: DateTime<Utc>,
    task_version_id: String,
    user_info: String,
}

impl TryFrom<OutcomeRow> for Outcome {
    type Error = anyhow::Error;

    fn try_from(row: OutcomeRow) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.id.parse()?,
            completion_date: row.completion_date,
            occurrence_start: row.occurrence_start,
            task_version_id: row.task_version_id.parse()?,
            user_info: UserInfo::from_json(serde_json::from_str(&row.user_info)?),
        })
    }
}

#[derive(Debug)]
pub struct SqliteOutcomeStore {
    pool: SqlitePool,
}

impl SqliteOutcomeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IOutcomeStore for SqliteOutcomeStore {
    #[instrument(skip(self, outcome))]
    async fn add_outcome(&self, outcome: Outcome) -> Result<Outcome> {
        let user_info = serde_json::to_string(&outcome.user_info.to_json()).map_err(anyhow::Error::from)?;

        sqlx::query(
            "INSERT INTO outcomes (id, completion_date, occurrence_start, task_version_id, user_info) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(task_version_id, occurrence_start) DO UPDATE SET \
               id = excluded.id, completion_date = excluded.completion_date, user_info = excluded.user_info",
        )
        .bind(outcome.id.to_string())
        .bind(outcome.completion_date)
        .bind(outcome.occurrence_start)
        .bind(outcome.task_version_id.to_string())
        .bind(user_info)
        .execute(&self.pool)
        .await?;

        Ok(outcome)
    }

    async fn remove_outcome(&self, id: &ID) -> Result<()> {
        sqlx::query("DELETE FROM outcomes WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_outcomes(&self, version_ids: &[ID], range: Range<DateTime<Utc>>) -> Result<Vec<Outcome>> {
        if version_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = version_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, completion_date, occurrence_start, task_version_id, user_info FROM outcomes \
             WHERE occurrence_start >= ? AND occurrence_start < ? AND task_version_id IN ({placeholders})"
        );

        let mut query = sqlx::query_as::<_, OutcomeRow>(&sql).bind(range.start).bind(range.end);
        for id in version_ids {
            query = query.bind(id.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| Outcome::try_from(r).map_err(Into::into)).collect()
    }

    async fn find_for_occurrence(&self, version_id: &ID, occurrence_start: DateTime<Utc>) -> Result<Option<Outcome>> {
        let row: Option<OutcomeRow> = sqlx::query_as(
            "SELECT id, completion_date, occurrence_start, task_version_id, user_info FROM outcomes \
             WHERE task_version_id = ? AND occurrence_start = ?",
        )
        .bind(version_id.to_string())
        .bind(occurrence_start)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Outcome::try_from).transpose().map_err(Into::into)
    }
}
