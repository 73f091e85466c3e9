use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration as ChronoDuration, Month, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rrule::{Frequency as RRuleFrequency, NWeekday, RRule, RRuleSet};
use serde::{Deserialize, Serialize, de::Visitor};
use thiserror::Error;

use crate::{
    error::{Result, SchedulerError},
    shared::calendar::CalendarContext,
};

/// How often a schedule repeats. Maps 1:1 onto `rrule::Frequency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn to_rrule(self) -> RRuleFrequency {
        match self {
            Frequency::Daily => RRuleFrequency::Daily,
            Frequency::Weekly => RRuleFrequency::Weekly,
            Frequency::Monthly => RRuleFrequency::Monthly,
            Frequency::Yearly => RRuleFrequency::Yearly,
        }
    }
}

/// When a recurrence stops producing occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EndCondition {
    #[default]
    Never,
    AfterOccurrences(u32),
    AfterDate(DateTime<Utc>),
}

/// What to do when a candidate occurrence's local wall-clock time falls in a
/// spring-forward DST gap (the time never occurred in the calendar's
/// timezone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MatchingPolicy {
    /// Drop the occurrence entirely.
    #[default]
    Strict,
    /// Drop the occurrence entirely (alias kept distinct from `Strict` so
    /// callers can express "no occurrence should ever be synthesized" versus
    /// "the generator happened not to find one").
    Exact,
    /// Walk forward minute by minute until a valid local time is found.
    NextValid,
    /// Walk backward minute by minute until a valid local time is found.
    PreviousValid,
}

/// What to do when a candidate occurrence's local wall-clock time is
/// ambiguous (a fall-back DST transition repeats it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RepeatedTimePolicy {
    /// Use the earlier of the two instants sharing this wall-clock time.
    #[default]
    First,
    /// Use the later of the two instants sharing this wall-clock time.
    Second,
}

/// A single weekday constraint, optionally scoped to its nth occurrence
/// within the recurrence period (e.g. "2nd Tuesday", "-1 Friday" for "last
/// Friday"). Mirrors the "Nmon" textual shorthand used for RRULE BYDAY terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceWeekday {
    nth: Option<i16>,
    weekday: Weekday,
}

impl RecurrenceWeekday {
    pub fn every(weekday: Weekday) -> Self {
        Self { nth: None, weekday }
    }

    pub fn nth(weekday: Weekday, n: i16) -> Option<Self> {
        if n == 0 || !(-500..500).contains(&n) {
            return None;
        }
        Some(Self { nth: Some(n), weekday })
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    fn to_nweekday(self) -> NWeekday {
        match self.nth {
            // Bare weekday terms (no ordinal) are encoded as "1st" of the
            // period; for WEEKLY frequency that is equivalent to "every",
            // since each period contains exactly one instance of a weekday.
            None => NWeekday::Nth(1, self.weekday),
            Some(n) => NWeekday::Nth(n, self.weekday),
        }
    }
}

impl Display for RecurrenceWeekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.nth {
            Some(n) => write!(f, "{n}{}", self.weekday),
            None => write!(f, "{}", self.weekday),
        }
    }
}

#[derive(Error, Debug)]
pub enum InvalidRecurrenceWeekdayError {
    #[error("malformed weekday term: {0}")]
    Malformed(String),
}

impl FromStr for RecurrenceWeekday {
    type Err = InvalidRecurrenceWeekdayError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use InvalidRecurrenceWeekdayError::Malformed;
        let err = Malformed(s.to_string());
        match s.len() {
            0..=2 => Err(err),
            3 => {
                let weekday = Weekday::from_str(s).map_err(|_| Malformed(s.to_string()))?;
                Ok(RecurrenceWeekday::every(weekday))
            }
            _ => {
                let weekday = Weekday::from_str(&s[s.len() - 3..]).map_err(|_| err.clone())?;
                let n = s[..s.len() - 3].parse::<i16>().map_err(|_| err.clone())?;
                RecurrenceWeekday::nth(weekday, n).ok_or(err)
            }
        }
    }
}

impl Clone for InvalidRecurrenceWeekdayError {
    fn clone(&self) -> Self {
        match self {
            Self::Malformed(s) => Self::Malformed(s.clone()),
        }
    }
}

impl Serialize for RecurrenceWeekday {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecurrenceWeekday {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RecurrenceWeekdayVisitor;

        impl Visitor<'_> for RecurrenceWeekdayVisitor {
            type Value = RecurrenceWeekday;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a weekday term such as `mon` or `-1fri`")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<RecurrenceWeekday, E>
            where
                E: serde::de::Error,
            {
                value
                    .parse::<RecurrenceWeekday>()
                    .map_err(|_| E::custom(format!("malformed weekday term: {value}")))
            }
        }

        deserializer.deserialize_str(RecurrenceWeekdayVisitor)
    }
}

/// Positional recurrence constraints plus the end condition and DST
/// disambiguation policies, evaluated against a `CalendarContext`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u16,
    pub end: EndCondition,
    pub matching_policy: MatchingPolicy,
    pub repeated_time_policy: RepeatedTimePolicy,
    #[serde(default)]
    pub weekdays: Vec<RecurrenceWeekday>,
    /// 1-31, or negative to count from the end of the month.
    #[serde(default)]
    pub days_of_month: Vec<i8>,
    /// 1-366, or negative to count from the end of the year.
    #[serde(default)]
    pub days_of_year: Vec<i16>,
    /// 1-12.
    #[serde(default)]
    pub months: Vec<u8>,
    /// ISO week numbers, or negative to count from the end of the year.
    #[serde(default)]
    pub weeks: Vec<i8>,
    /// 0-23. Empty means "use the schedule start's own hour".
    #[serde(default)]
    pub hours: Vec<u32>,
    /// 0-59. Empty means "use the schedule start's own minute".
    #[serde(default)]
    pub minutes: Vec<u32>,
    /// 0-59. Empty means "use the schedule start's own second".
    #[serde(default)]
    pub seconds: Vec<u32>,
    #[serde(default)]
    pub set_positions: Vec<i32>,
}

/// Upper bound on how many raw candidates a single `RRuleSet::all` call may
/// materialize; protects against pathological rules (e.g. a huge interval
/// with a distant `until`) from blocking the caller.
const MATERIALIZE_CAP: u16 = 2_000;

/// How many one-minute steps a `NextValid`/`PreviousValid` search takes
/// before giving up. Six hours comfortably covers every real-world DST
/// transition, which never exceeds two hours.
const SNAP_SEARCH_STEPS: i64 = 6 * 60;

impl RecurrenceRule {
    pub fn validate(&self) -> Result<()> {
        if self.interval < 1 {
            return Err(SchedulerError::ScheduleConfig(
                "recurrence interval must be at least 1".into(),
            ));
        }
        if let EndCondition::AfterOccurrences(0) = self.end {
            return Err(SchedulerError::ScheduleConfig(
                "afterOccurrences end condition must allow at least one occurrence".into(),
            ));
        }
        let has_other_by_rule = !self.weekdays.is_empty()
            || !self.days_of_month.is_empty()
            || !self.days_of_year.is_empty()
            || !self.months.is_empty()
            || !self.weeks.is_empty();
        if !self.set_positions.is_empty() && !has_other_by_rule {
            return Err(SchedulerError::ScheduleConfig(
                "setPositions requires at least one other positional constraint".into(),
            ));
        }
        for month in &self.months {
            if Month::try_from(*month).is_err() {
                return Err(SchedulerError::ScheduleConfig(format!(
                    "invalid month constraint: {month}"
                )));
            }
        }
        if self.hours.iter().any(|h| *h > 23) {
            return Err(SchedulerError::ScheduleConfig(
                "hour constraint must be in 0-23".into(),
            ));
        }
        if self.minutes.iter().any(|m| *m > 59) {
            return Err(SchedulerError::ScheduleConfig(
                "minute constraint must be in 0-59".into(),
            ));
        }
        if self.seconds.iter().any(|s| *s > 59) {
            return Err(SchedulerError::ScheduleConfig(
                "second constraint must be in 0-59".into(),
            ));
        }
        Ok(())
    }

    /// Builds the underlying `rrule::RRuleSet` anchored at `dtstart`,
    /// evaluated in `calendar`'s timezone. The rrule crate walks calendar
    /// dates directly in the real IANA timezone, so month/week/day arithmetic
    /// already accounts for variable month lengths and leap years; DST
    /// disambiguation on top of its output is handled separately by
    /// `resolve_candidate`.
    fn build_rrule_set(&self, dtstart: DateTime<Utc>, calendar: &CalendarContext) -> Result<RRuleSet> {
        self.validate()?;

        let tz = calendar.timezone;
        let dtstart_tz = dtstart.with_timezone(&rrule::Tz::Tz(tz));

        let months = self
            .months
            .iter()
            .filter_map(|m| Month::try_from(*m).ok())
            .collect::<Vec<_>>();
        let weekdays = self
            .weekdays
            .iter()
            .map(|w| w.to_nweekday())
            .collect::<Vec<_>>();
        let hours: Vec<u8> = if self.hours.is_empty() {
            vec![dtstart_tz.hour() as u8]
        } else {
            self.hours.iter().map(|h| *h as u8).collect()
        };
        let minutes: Vec<u8> = if self.minutes.is_empty() {
            vec![dtstart_tz.minute() as u8]
        } else {
            self.minutes.iter().map(|m| *m as u8).collect()
        };
        let seconds: Vec<u8> = if self.seconds.is_empty() {
            vec![dtstart_tz.second() as u8]
        } else {
            self.seconds.iter().map(|s| *s as u8).collect()
        };

        let assemble = |hours: &[u8], minutes: &[u8], seconds: &[u8]| -> Result<RRuleSet> {
            let mut rule = RRule::new(self.frequency.to_rrule())
                .by_month(&months)
                .by_month_day(self.days_of_month.clone())
                .by_weekday(weekdays.clone())
                .by_year_day(self.days_of_year.clone())
                .by_set_pos(self.set_positions.clone())
                .by_week_no(self.weeks.clone())
                .by_hour(hours.to_vec())
                .by_minute(minutes.to_vec())
                .by_second(seconds.to_vec())
                .week_start(calendar.first_weekday)
                .interval(self.interval);

            match self.end {
                EndCondition::Never => {}
                EndCondition::AfterOccurrences(n) => {
                    rule = rule.count(n);
                }
                EndCondition::AfterDate(until) => {
                    rule = rule.until(until.with_timezone(&rrule::Tz::UTC));
                }
            }

            rule.build(dtstart_tz)
                .map_err(|e| SchedulerError::ScheduleConfig(e.to_string()))
        };

        let built = assemble(&hours, &minutes, &seconds)?;

        // The by-hour/minute/second constraints are independent of dtstart's
        // own time component when explicitly set; if none of the combinations
        // they describe ever lands on a real instant, fail construction
        // rather than silently producing an empty schedule.
        if !self.hours.is_empty() || !self.minutes.is_empty() || !self.seconds.is_empty() {
            let probe = assemble(&hours, &minutes, &seconds)?;
            let just_before = dtstart_tz - ChronoDuration::milliseconds(1);
            if probe.after(just_before).all(1).dates.is_empty() {
                return Err(SchedulerError::ScheduleConfig(
                    "hour/minute/second constraints produce no valid moment on the schedule start".into(),
                ));
            }
        }

        Ok(built)
    }

    /// Expands raw occurrence instants in `[lo, hi)`, applying the DST
    /// disambiguation policies to every candidate. Bounded by
    /// `MATERIALIZE_CAP` per underlying rrule call; very sparse rules with a
    /// wide `[lo, hi)` window may need repeated calls with a narrower window.
    pub fn expand(
        &self,
        dtstart: DateTime<Utc>,
        calendar: &CalendarContext,
        lo: DateTime<Utc>,
        hi: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let tz = calendar.timezone;
        let set = self.build_rrule_set(dtstart, calendar)?;

        // RRuleSet::after is exclusive; subtract a millisecond to make `lo`
        // inclusive, matching half-open `[lo, hi)` range semantics.
        let after = (lo - ChronoDuration::milliseconds(1)).with_timezone(&rrule::Tz::Tz(tz));
        let before = hi.with_timezone(&rrule::Tz::Tz(tz));

        let raw = set.after(after).before(before).all(MATERIALIZE_CAP);
        Ok(raw
            .dates
            .iter()
            .filter_map(|d| self.resolve_candidate(tz, d.naive_local()))
            .filter(|dt| *dt >= lo && *dt < hi)
            .collect())
    }

    /// Advances from `after` (exclusive) taking up to `limit` resolved
    /// occurrences, used by the lazy iterator to page through a recurrence
    /// without materializing the whole sequence.
    pub(crate) fn expand_after(
        &self,
        dtstart: DateTime<Utc>,
        calendar: &CalendarContext,
        after: DateTime<Utc>,
        limit: u16,
    ) -> Result<Vec<DateTime<Utc>>> {
        let tz = calendar.timezone;
        let set = self.build_rrule_set(dtstart, calendar)?;
        let after_tz = after.with_timezone(&rrule::Tz::Tz(tz));
        let raw = set.after(after_tz).all(limit);
        Ok(raw
            .dates
            .iter()
            .filter_map(|d| self.resolve_candidate(tz, d.naive_local()))
            .collect())
    }

    fn resolve_candidate(
        &self,
        tz: Tz,
        naive: chrono::NaiveDateTime,
    ) -> Option<DateTime<Utc>> {
        match tz.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(earlier, later) => Some(
                match self.repeated_time_policy {
                    RepeatedTimePolicy::First => earlier,
                    RepeatedTimePolicy::Second => later,
                }
                .with_timezone(&Utc),
            ),
            chrono::LocalResult::None => match self.matching_policy {
                MatchingPolicy::Strict | MatchingPolicy::Exact => None,
                MatchingPolicy::NextValid => snap(tz, naive, true),
                MatchingPolicy::PreviousValid => snap(tz, naive, false),
            },
        }
    }
}

fn snap(tz: Tz, naive: chrono::NaiveDateTime, forward: bool) -> Option<DateTime<Utc>> {
    let step = ChronoDuration::minutes(if forward { 1 } else { -1 });
    let mut candidate = naive;
    for _ in 0..SNAP_SEARCH_STEPS {
        candidate += step;
        if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&candidate) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::calendar::CalendarContext;
    use chrono_tz::America::New_York;

    fn calendar(tz: Tz) -> CalendarContext {
        CalendarContext::new(tz)
    }

    #[test]
    fn daily_recurrence_expands_within_range() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            end: EndCondition::AfterOccurrences(5),
            ..Default::default()
        };
        let out = rule
            .expand(start, &calendar(chrono_tz::UTC), start, start + ChronoDuration::days(10))
            .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], start);
        assert_eq!(out[1], start + ChronoDuration::days(1));
    }

    #[test]
    fn rejects_zero_interval() {
        let rule = RecurrenceRule {
            interval: 0,
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn rejects_set_pos_without_other_constraint() {
        let rule = RecurrenceRule {
            interval: 1,
            set_positions: vec![1],
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn spring_forward_gap_is_skipped_under_strict_policy() {
        // 2026-03-08 is the US spring-forward date; 02:30 local never occurs.
        let start = New_York.with_ymd_and_hms(2026, 3, 7, 2, 30, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            end: EndCondition::AfterOccurrences(3),
            matching_policy: MatchingPolicy::Strict,
            ..Default::default()
        };
        let out = rule
            .expand(
                start.with_timezone(&Utc),
                &calendar(New_York),
                start.with_timezone(&Utc),
                start.with_timezone(&Utc) + ChronoDuration::days(5),
            )
            .unwrap();
        // day 0 and day 2 resolve; the gap day is dropped, not snapped.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn spring_forward_gap_snaps_forward_under_next_valid_policy() {
        let start = New_York.with_ymd_and_hms(2026, 3, 7, 2, 30, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            end: EndCondition::AfterOccurrences(3),
            matching_policy: MatchingPolicy::NextValid,
            ..Default::default()
        };
        let out = rule
            .expand(
                start.with_timezone(&Utc),
                &calendar(New_York),
                start.with_timezone(&Utc),
                start.with_timezone(&Utc) + ChronoDuration::days(5),
            )
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn explicit_hour_constraint_shifts_occurrences_off_dtstart_time() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            end: EndCondition::AfterOccurrences(2),
            hours: vec![20],
            minutes: vec![15],
            ..Default::default()
        };
        let out = rule
            .expand(start, &calendar(chrono_tz::UTC), start, start + ChronoDuration::days(5))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Utc.with_ymd_and_hms(2026, 1, 1, 20, 15, 0).unwrap());
        assert_eq!(out[1], Utc.with_ymd_and_hms(2026, 1, 2, 20, 15, 0).unwrap());
    }

    #[test]
    fn hour_constraint_with_no_reachable_moment_fails_construction() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            end: EndCondition::AfterDate(start + ChronoDuration::hours(1)),
            hours: vec![20],
            ..Default::default()
        };
        let err = rule
            .expand(start, &calendar(chrono_tz::UTC), start, start + ChronoDuration::days(5))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleConfig(_)));
    }

    #[test]
    fn rejects_out_of_range_hour_constraint() {
        let rule = RecurrenceRule {
            interval: 1,
            hours: vec![24],
            ..Default::default()
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn weekday_term_round_trips_through_string_form() {
        assert_eq!("mon".parse::<RecurrenceWeekday>().unwrap(), RecurrenceWeekday::every(Weekday::Mon));
        assert_eq!(
            "-1fri".parse::<RecurrenceWeekday>().unwrap(),
            RecurrenceWeekday::nth(Weekday::Fri, -1).unwrap()
        );
        assert!("0mon".parse::<RecurrenceWeekday>().is_err());
    }
}
