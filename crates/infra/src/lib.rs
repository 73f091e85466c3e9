//! Persistence and I/O for CareTask: SQLite-backed stores, the event
//! assembler, durable preferences, and the notification reconciliation
//! service. Laid out as `repos` + `services` plus a context struct that
//! wires a connection pool into both.

mod error;
pub mod event_assembler;
pub mod preferences;
pub mod repos;
pub mod services;

use std::sync::Arc;

pub use error::{Result, StoreError};
pub use event_assembler::EventAssembler;
pub use preferences::{Preferences, PreferencesStore};
pub use repos::{IOutcomeStore, ITaskStore, SqliteOutcomeStore, SqliteTaskStore};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// The wiring a host application needs to operate CareTask's persistent
/// layer: stores, the assembler built on top of them, and durable
/// preferences. Notification collaborators (`NotificationCenter`,
/// `BackgroundTaskScheduler`) are supplied separately by the host, since they
/// are platform adapters this crate cannot construct generically.
#[derive(Clone)]
pub struct SchedulerContext {
    pub tasks: Arc<dyn ITaskStore>,
    pub outcomes: Arc<dyn IOutcomeStore>,
    pub assembler: Arc<EventAssembler>,
    pub preferences: PreferencesStore,
    pool: SqlitePool,
}

impl SchedulerContext {
    /// Opens (creating if absent) the SQLite file at `storage_path` and runs
    /// pending migrations.
    pub async fn connect(storage_path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{storage_path}?mode=rwc"))
            .await?;
        Self::from_pool(pool).await
    }

    /// An in-memory store, for tests and simulator/preview hosts.
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        Self::from_pool(pool).await
    }

    /// Opens the storage path from `caretask_utils::config::APP_CONFIG`.
    pub async fn connect_from_config() -> anyhow::Result<Self> {
        let storage_path = &caretask_utils::config::APP_CONFIG.storage_path;
        if storage_path == ":memory:" {
            Self::connect_in_memory().await
        } else {
            Self::connect(storage_path).await
        }
    }

    async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        run_migrations(&pool).await?;
        let tasks: Arc<dyn ITaskStore> = Arc::new(SqliteTaskStore::new(pool.clone()));
        let outcomes: Arc<dyn IOutcomeStore> = Arc::new(SqliteOutcomeStore::new(pool.clone()));
        let assembler = Arc::new(EventAssembler::new(tasks.clone(), outcomes.clone()));
        let preferences = PreferencesStore::new(pool.clone());
        Ok(Self { tasks, outcomes, assembler, preferences, pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Run pending migrations against an already-open pool. Exposed separately
/// so a host can run migrations ahead of time (e.g. during app startup,
/// before `SchedulerContext::connect` is called on the main executor).
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.map_err(Into::into)
}
