use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    outcome::Outcome,
    schedule::Occurrence,
    task::{CompletionPolicy, TaskVersion},
};

/// Whether (and how) an `Event`'s occurrence carries a completion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutcomeState {
    /// A real outcome is persisted for this occurrence.
    Present(Outcome),
    /// No outcome yet; completing will create and persist one.
    CreateWith,
    /// Test/preview double: completing flips this to an in-memory `Present`
    /// without persisting.
    Mocked,
    /// Completion is refused unconditionally (e.g. a read-only projection).
    PreventCreation,
}

/// A task version, one of its occurrences, and whether that occurrence has
/// been completed. Constructed on demand by the event assembler; never
/// stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub task: TaskVersion,
    pub occurrence: Occurrence,
    pub outcome_state: OutcomeState,
}

impl Event {
    pub fn new(task: TaskVersion, occurrence: Occurrence, outcome: Option<Outcome>) -> Self {
        let outcome_state = match outcome {
            Some(o) => OutcomeState::Present(o),
            None => OutcomeState::CreateWith,
        };
        Self { task, occurrence, outcome_state }
    }

    /// Whether `complete()` is allowed at `now` under this event's
    /// completion policy, ignoring `PreventCreation`/override handling.
    pub fn can_complete(&self, now: DateTime<Utc>) -> bool {
        match self.task.completion_policy {
            CompletionPolicy::SameDay => self.same_calendar_day(now, self.occurrence.start),
            CompletionPolicy::AfterStart => now >= self.occurrence.start,
            CompletionPolicy::SameDayAfterStart => {
                self.same_calendar_day(now, self.occurrence.start) && now >= self.occurrence.start
            }
            CompletionPolicy::DuringEvent => now >= self.occurrence.start && now < self.occurrence.end,
            CompletionPolicy::Anytime => true,
        }
    }

    /// The next instant at which `can_complete` flips from `false` to `true`
    /// (e.g. the occurrence start, or local midnight), if any remains ahead
    /// of `now`.
    pub fn date_once_allowed(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.task.completion_policy {
            CompletionPolicy::AfterStart | CompletionPolicy::SameDayAfterStart | CompletionPolicy::DuringEvent => {
                (now < self.occurrence.start).then_some(self.occurrence.start)
            }
            CompletionPolicy::SameDay => None,
            CompletionPolicy::Anytime => None,
        }
    }

    /// The next instant at which `can_complete` flips from `true` to
    /// `false`, if any remains ahead of `now`.
    pub fn date_once_disallowed(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.task.completion_policy {
            CompletionPolicy::DuringEvent => (now < self.occurrence.end).then_some(self.occurrence.end),
            CompletionPolicy::SameDay | CompletionPolicy::SameDayAfterStart => {
                let tz = self.task.schedule.calendar.timezone;
                let end_of_day = self.occurrence.start.with_timezone(&tz).date_naive().succ_opt().map(
                    |next_day| {
                        tz.from_local_datetime(&next_day.and_hms_opt(0, 0, 0).unwrap_or_default())
                            .earliest()
                            .unwrap_or(self.occurrence.start.with_timezone(&tz))
                            .with_timezone(&Utc)
                    },
                );
                end_of_day.filter(|d| now < *d)
            }
            CompletionPolicy::AfterStart | CompletionPolicy::Anytime => None,
        }
    }

    /// Whether `a` and `b` fall on the same calendar day in the task's
    /// timezone, matching `date_once_disallowed`'s zone-aware comparison
    /// (comparing raw UTC instants would misclassify the boundary for any
    /// timezone not at UTC+0).
    fn same_calendar_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let tz = self.task.schedule.calendar.timezone;
        a.with_timezone(&tz).date_naive() == b.with_timezone(&tz).date_naive()
    }
}
