use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    schedule::Schedule,
    shared::{entity::ID, user_info::UserInfo},
};

/// Opaque, UI-supplied category label. Appearance (icon, color) is owned by
/// the host application; this crate only carries the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskCategory(pub String);

/// Governs when `Event::can_complete` allows recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CompletionPolicy {
    /// Allowed only on the same calendar day as the occurrence start, in the
    /// task's calendar.
    #[default]
    SameDay,
    /// Allowed from the occurrence start onward, with no upper bound.
    AfterStart,
    /// Same-day AND at-or-after start.
    SameDayAfterStart,
    /// Allowed only within `[occurrence.start, occurrence.end)`.
    DuringEvent,
    /// Always allowed.
    Anytime,
}

/// Which OS notification thread a task's reminders are grouped under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum NotificationThread {
    Global,
    #[default]
    PerTask,
    Custom(String),
    None,
}

/// One row in a task's version chain. `task_id` is the stable identity
/// shared by every version in the chain; `version_id` identifies this row
/// specifically and is what `previous_version`/`next_version` point at. The
/// head of a chain is the unique version with `next_version == None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskVersion {
    pub task_id: ID,
    pub version_id: ID,
    pub title: String,
    pub instructions: String,
    pub category: Option<TaskCategory>,
    pub schedule: Schedule,
    pub completion_policy: CompletionPolicy,
    pub schedule_notifications: bool,
    pub notification_thread: NotificationThread,
    pub tags: Vec<String>,
    pub effective_from: DateTime<Utc>,
    pub previous_version: Option<ID>,
    pub next_version: Option<ID>,
    pub user_info: UserInfo,
}

impl TaskVersion {
    /// `[effective_from, next_effective_from)`, the span during which this
    /// version governs occurrence generation.
    pub fn effective_window_end(&self, next_effective_from: Option<DateTime<Utc>>) -> DateTime<Utc> {
        next_effective_from.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_head(&self) -> bool {
        self.next_version.is_none()
    }

    /// Fields compared by `upsert` to decide whether a new version is
    /// required. `id`, version links, and `effective_from` are excluded:
    /// they are identity/lifecycle fields, not content.
    pub fn content_eq(&self, other: &TaskVersionFields) -> bool {
        self.title == other.title
            && self.instructions == other.instructions
            && self.category == other.category
            && self.schedule.start == other.schedule.start
            && self.schedule.duration == other.schedule.duration
            && self.schedule.recurrence == other.schedule.recurrence
            && self.completion_policy == other.completion_policy
            && self.schedule_notifications == other.schedule_notifications
            && self.notification_thread == other.notification_thread
            && self.tags == other.tags
    }
}

/// The caller-supplied content fields of a task, used both to construct a
/// new head and to detect whether an `upsert` actually changes anything.
#[derive(Debug, Clone)]
pub struct TaskVersionFields {
    pub title: String,
    pub instructions: String,
    pub category: Option<TaskCategory>,
    pub schedule: Schedule,
    pub completion_policy: CompletionPolicy,
    pub schedule_notifications: bool,
    pub notification_thread: NotificationThread,
    pub tags: Vec<String>,
}
