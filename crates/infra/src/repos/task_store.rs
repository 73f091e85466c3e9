use std::{ops::Range, time::Duration};

use async_trait::async_trait;
use caretask_domain::{
    CompletionPolicy, NotificationThread, SchedulerError, Schedule, TaskCategory, TaskVersion,
    TaskVersionFields, UserInfo, ID,
};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::{FromRow, SqlitePool};
use tracing::{error, instrument};

use crate::error::{Result, StoreError};

const TASK_COLUMNS: &str = "task_id, version_id, title, instructions, category, schedule, \
     completion_policy, schedule_notifications, notification_thread, tags, effective_from, \
     previous_version_id, next_version_id, user_info";

/// Append-only persistent store of task version chains.
#[async_trait]
pub trait ITaskStore: Send + Sync {
    /// Locates the current head by `task_id`. If absent, inserts a new
    /// chain. If present and `fields` differs from the head's content,
    /// creates a new version; otherwise returns the head unchanged with
    /// `did_change = false`.
    async fn upsert(
        &self,
        task_id: &ID,
        fields: TaskVersionFields,
        effective_from: DateTime<Utc>,
        user_info: UserInfo,
    ) -> Result<(TaskVersion, bool)>;

    /// Creates a new head version from `head`. Fails with `OutdatedTask` if
    /// `head` is not the current head, or `ShadowingPreviousOutcomes` if any
    /// outcome on the chain has `occurrence_start >= effective_from`.
    async fn create_updated_version(
        &self,
        head: &TaskVersion,
        fields: TaskVersionFields,
        effective_from: DateTime<Utc>,
        user_info: UserInfo,
    ) -> Result<TaskVersion>;

    /// Deletes exactly this version and its outcomes. Does not repair
    /// surrounding chain links.
    async fn delete_task(&self, version_id: &ID) -> Result<()>;

    async fn find_head(&self, task_id: &ID) -> Result<Option<TaskVersion>>;

    async fn find_version(&self, version_id: &ID) -> Result<Option<TaskVersion>>;

    /// Versions whose effective window intersects `range`.
    async fn query_tasks(&self, range: Range<DateTime<Utc>>) -> Result<Vec<TaskVersion>>;

    /// Identifier-only variant of `query_tasks`, cheap enough to use as a
    /// change-detection anchor.
    async fn query_task_identifiers(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ID>>;

    async fn has_tasks_with_notifications(&self, from: DateTime<Utc>) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: String,
    version_id: String,
    title: String,
    instructions: String,
    category: Option<String>,
    schedule: String,
    completion_policy: String,
    schedule_notifications: bool,
    notification_thread: String,
    tags: String,
    effective_from: DateTime<Utc>,
    previous_version_id: Option<String>,
    next_version_id: Option<String>,
    user_info: String,
}

impl TryFrom<TaskRow> for TaskVersion {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> anyhow::Result<Self> {
        Ok(Self {
            task_id: row.task_id.parse()?,
            version_id: row.version_id.parse()?,
            title: row.title,
            instructions: row.instructions,
            category: row.category.map(TaskCategory),
            schedule: serde_json::from_str::<Schedule>(&row.schedule)?,
            completion_policy: serde_json::from_str::<CompletionPolicy>(&row.completion_policy)?,
            schedule_notifications: row.schedule_notifications,
            notification_thread: serde_json::from_str::<NotificationThread>(&row.notification_thread)?,
            tags: serde_json::from_str::<Vec<String>>(&row.tags)?,
            effective_from: row.effective_from,
            previous_version: row.previous_version_id.map(|s| s.parse()).transpose()?,
            next_version: row.next_version_id.map(|s| s.parse()).transpose()?,
            user_info: UserInfo::from_json(serde_json::from_str(&row.user_info)?),
        })
    }
}

#[derive(Debug)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
    /// Caches `find_head` by `task_id`, the lookup `upsert` performs on
    /// every call. Mirrors `PostgresAccountRepo`'s by-id cache.
    head_cache: Cache<String, TaskVersion>,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        let head_cache = Cache::builder().time_to_live(Duration::from_secs(30)).build();
        Self { pool, head_cache }
    }

    fn build(task_id: &ID, version_id: ID, fields: &TaskVersionFields, effective_from: DateTime<Utc>, user_info: &UserInfo) -> TaskVersion {
        TaskVersion {
            task_id: task_id.clone(),
            version_id,
            title: fields.title.clone(),
            instructions: fields.instructions.clone(),
            category: fields.category.clone(),
            schedule: fields.schedule.clone(),
            completion_policy: fields.completion_policy,
            schedule_notifications: fields.schedule_notifications,
            notification_thread: fields.notification_thread.clone(),
            tags: fields.tags.clone(),
            effective_from,
            previous_version: None,
            next_version: None,
            user_info: user_info.clone(),
        }
    }

    async fn insert_row(&self, v: &TaskVersion) -> Result<()> {
        let schedule = serde_json::to_string(&v.schedule).map_err(anyhow::Error::from)?;
        let completion_policy = serde_json::to_string(&v.completion_policy).map_err(anyhow::Error::from)?;
        let notification_thread = serde_json::to_string(&v.notification_thread).map_err(anyhow::Error::from)?;
        let tags = serde_json::to_string(&v.tags).map_err(anyhow::Error::from)?;
        let user_info = serde_json::to_string(&v.user_info.to_json()).map_err(anyhow::Error::from)?;

        sqlx::query(
            "INSERT INTO tasks (task_id, version_id, title, instructions, category, schedule, \
             completion_policy, schedule_notifications, notification_thread, tags, effective_from, \
             previous_version_id, next_version_id, user_info) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(v.task_id.to_string())
        .bind(v.version_id.to_string())
        .bind(&v.title)
        .bind(&v.instructions)
        .bind(v.category.as_ref().map(|c| c.0.clone()))
        .bind(schedule)
        .bind(completion_policy)
        .bind(v.schedule_notifications)
        .bind(notification_thread)
        .bind(tags)
        .bind(v.effective_from)
        .bind(v.previous_version.as_ref().map(|id| id.to_string()))
        .bind(v.next_version.as_ref().map(|id| id.to_string()))
        .bind(user_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ITaskStore for SqliteTaskStore {
    #[instrument(skip(self, fields, user_info))]
    async fn upsert(
        &self,
        task_id: &ID,
        fields: TaskVersionFields,
        effective_from: DateTime<Utc>,
        user_info: UserInfo,
    ) -> Result<(TaskVersion, bool)> {
        match self.find_head(task_id).await? {
            None => {
                let version_id = ID::new_v4();
                let head = Self::build(task_id, version_id, &fields, effective_from, &user_info);
                self.insert_row(&head).await?;
                self.head_cache.insert(task_id.to_string(), head.clone()).await;
                Ok((head, true))
            }
            Some(head) if head.content_eq(&fields) => Ok((head, false)),
            Some(head) => {
                let new_head = self.create_updated_version(&head, fields, effective_from, user_info).await?;
                Ok((new_head, true))
            }
        }
    }

    #[instrument(skip(self, fields, user_info))]
    async fn create_updated_version(
        &self,
        head: &TaskVersion,
        fields: TaskVersionFields,
        effective_from: DateTime<Utc>,
        user_info: UserInfo,
    ) -> Result<TaskVersion> {
        if !head.is_head() {
            return Err(StoreError::Scheduler(SchedulerError::OutdatedTask(head.version_id.to_string())));
        }

        let shadowed: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT o.occurrence_start FROM outcomes o \
             JOIN tasks t ON t.version_id = o.task_version_id \
             WHERE t.task_id = ? AND o.occurrence_start >= ? LIMIT 1",
        )
        .bind(head.task_id.to_string())
        .bind(effective_from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(shadowed_at) = shadowed {
            return Err(StoreError::Scheduler(SchedulerError::ShadowingPreviousOutcomes {
                new_effective_from: effective_from,
                shadowed_occurrence_start: shadowed_at,
            }));
        }

        let new_version_id = ID::new_v4();
        let mut new_head = Self::build(&head.task_id, new_version_id.clone(), &fields, effective_from, &user_info);
        new_head.previous_version = Some(head.version_id.clone());

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE tasks SET next_version_id = ? WHERE version_id = ?")
            .bind(new_version_id.to_string())
            .bind(head.version_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.insert_row(&new_head).await?;
        self.head_cache.invalidate(&head.task_id.to_string()).await;
        Ok(new_head)
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, version_id: &ID) -> Result<()> {
        let task_id = self.find_version(version_id).await?.map(|v| v.task_id);

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM outcomes WHERE task_version_id = ?")
            .bind(version_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE version_id = ?")
            .bind(version_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Some(task_id) = task_id {
            self.head_cache.invalidate(&task_id.to_string()).await;
        }
        Ok(())
    }

    async fn find_head(&self, task_id: &ID) -> Result<Option<TaskVersion>> {
        let key = task_id.to_string();
        if let Some(cached) = self.head_cache.get(&key).await {
            return Ok(Some(cached));
        }

        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ? AND next_version_id IS NULL"
        ))
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        let head = row.map(TaskVersion::try_from).transpose().map_err(StoreError::from)?;
        if let Some(head) = &head {
            self.head_cache.insert(key, head.clone()).await;
        }
        Ok(head)
    }

    async fn find_version(&self, version_id: &ID) -> Result<Option<TaskVersion>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE version_id = ?"))
            .bind(version_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskVersion::try_from).transpose().map_err(StoreError::from)
    }

    #[instrument(skip(self))]
    async fn query_tasks(&self, range: Range<DateTime<Utc>>) -> Result<Vec<TaskVersion>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT t.task_id, t.version_id, t.title, t.instructions, t.category, t.schedule, \
             t.completion_policy, t.schedule_notifications, t.notification_thread, t.tags, \
             t.effective_from, t.previous_version_id, t.next_version_id, t.user_info \
             FROM tasks t LEFT JOIN tasks nxt ON t.next_version_id = nxt.version_id \
             WHERE t.effective_from < ? AND (nxt.effective_from IS NULL OR ? < nxt.effective_from) \
             ORDER BY t.effective_from ASC",
        )
        .bind(range.end)
        .bind(range.start)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                TaskVersion::try_from(r).map_err(|e| {
                    error!(error = %e, "failed to decode task row");
                    StoreError::from(e)
                })
            })
            .collect()
    }

    async fn query_task_identifiers(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ID>> {
        Ok(self.query_tasks(range).await?.into_iter().map(|t| t.version_id).collect())
    }

    async fn has_tasks_with_notifications(&self, from: DateTime<Utc>) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE schedule_notifications = 1 AND next_version_id IS NULL \
             AND effective_from >= ?",
        )
        .bind(from)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
