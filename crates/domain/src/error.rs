use thiserror::Error;

/// Error taxonomy for CareTask, per the error-handling design: local
/// validation errors surface synchronously from store APIs, while
/// reconciliation failures are logged and recorded via durable flags rather
/// than bubbling up to callers that merely mutated a task.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The persistent store failed to initialize, or was accessed before
    /// configuration. Reads should return empty; writes should no-op with a
    /// log line rather than panicking.
    #[error("persistent container is unavailable: {0}")]
    InvalidContainer(String),

    /// A new task version's `effective_from` would move at or before an
    /// outcome already recorded on an earlier version in the chain.
    #[error(
        "new version effective from {new_effective_from} would shadow an outcome recorded at {shadowed_occurrence_start} on an earlier version"
    )]
    ShadowingPreviousOutcomes {
        new_effective_from: chrono::DateTime<chrono::Utc>,
        shadowed_occurrence_start: chrono::DateTime<chrono::Utc>,
    },

    /// Attempted to create a new version from a task version that is not the
    /// current head (its `next_version` slot is already occupied).
    #[error("task version {0} is not the current head (a next version already exists)")]
    OutdatedTask(String),

    /// Invalid schedule construction parameters.
    #[error("invalid schedule configuration: {0}")]
    ScheduleConfig(String),

    /// Completion was attempted outside the task's completion window.
    #[error("completion is not allowed outside the task's completion window")]
    PreventedByCompletionPolicy,

    /// Completion was attempted on an event whose `outcome_state` is
    /// `PreventCreation` (e.g. a read-only projection).
    #[error("this event does not allow creating an outcome")]
    CompletionCreationPrevented,

    /// The OS notification center rejected a request (content/config error).
    #[error("notification center rejected request {identifier}: {reason}")]
    NotificationAdd { identifier: String, reason: String },

    /// Notification authorization was denied or is undetermined.
    #[error("notification authorization unavailable")]
    AuthorizationUnavailable,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
