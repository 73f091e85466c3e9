use thiserror::Error;

/// Errors surfaced by `caretask_infra`'s stores and services. Domain
/// validation failures pass through typed; everything below the store
/// boundary (the database driver, ad-hoc I/O failures) is wrapped rather
/// than re-modeled.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Scheduler(#[from] caretask_domain::SchedulerError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
