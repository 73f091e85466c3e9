//! Pure value types and calculations for CareTask: schedules, recurrence
//! expansion, the task/outcome data model, and the notification planner.
//! Nothing in this crate performs I/O.

pub mod error;
pub mod event;
pub mod notification_planner;
pub mod outcome;
pub mod recurrence;
pub mod schedule;
pub mod shared;
pub mod task;

pub use error::{Result, SchedulerError};
pub use event::{Event, OutcomeState};
pub use outcome::Outcome;
pub use recurrence::{EndCondition, Frequency, MatchingPolicy, RecurrenceRule, RecurrenceWeekday, RepeatedTimePolicy};
pub use schedule::{Occurrence, OccurrenceIter, Schedule, ScheduleDuration};
pub use shared::{
    calendar::{CalendarContext, CalendarIdentifier},
    entity::{Entity, InvalidIdError, ID},
    user_info::{UserInfo, UserInfoKey},
};
pub use task::{CompletionPolicy, NotificationThread, TaskCategory, TaskVersion, TaskVersionFields};
