use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Calendar identifier. Only Gregorian is implemented; other values are
/// accepted by the type but rejected at `Schedule` construction time with
/// `ScheduleConfig`, since this crate does not carry a non-Gregorian
/// calendar implementation (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CalendarIdentifier {
    #[default]
    Gregorian,
    Other,
}

/// The calendar a `RecurrenceRule` is evaluated against: locale-independent
/// timezone, first day of the week, and calendar system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarContext {
    pub timezone: Tz,
    pub first_weekday: Weekday,
    pub identifier: CalendarIdentifier,
}

impl Default for CalendarContext {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            first_weekday: Weekday::Mon,
            identifier: CalendarIdentifier::Gregorian,
        }
    }
}

impl CalendarContext {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            ..Default::default()
        }
    }
}
