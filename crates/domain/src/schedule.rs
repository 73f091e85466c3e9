use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SchedulerError},
    recurrence::{MatchingPolicy, RecurrenceRule, RepeatedTimePolicy},
    shared::calendar::{CalendarContext, CalendarIdentifier},
};

/// How long a single occurrence lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "seconds")]
pub enum ScheduleDuration {
    /// Spans the whole local day, regardless of the schedule's own
    /// time-of-day component.
    AllDay,
    /// A fixed-length span starting at the occurrence's start instant.
    Fixed(i64),
}

/// A start instant, a duration, and an optional recurrence, evaluated
/// against a calendar. Produces a bounded or lazy sequence of `Occurrence`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub start: DateTime<Utc>,
    pub duration: ScheduleDuration,
    pub recurrence: Option<RecurrenceRule>,
    pub calendar: CalendarContext,
}

/// A single materialized occurrence of a schedule. Does not carry a
/// back-reference to its owning `Schedule`; callers that need one already
/// hold the `Schedule` (or the `Task` wrapping it) in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        start: DateTime<Utc>,
        duration: ScheduleDuration,
        recurrence: Option<RecurrenceRule>,
        calendar: CalendarContext,
    ) -> Result<Self> {
        if calendar.identifier != CalendarIdentifier::Gregorian {
            return Err(SchedulerError::ScheduleConfig(
                "only the Gregorian calendar identifier is supported".into(),
            ));
        }
        if let Some(rule) = &recurrence {
            rule.validate()?;
        }
        if let ScheduleDuration::Fixed(seconds) = duration {
            if seconds < 0 {
                return Err(SchedulerError::ScheduleConfig(
                    "fixed duration cannot be negative".into(),
                ));
            }
        }

        let start = match duration {
            ScheduleDuration::AllDay => snap_to_local_midnight(start, &calendar),
            ScheduleDuration::Fixed(_) => start,
        };

        Ok(Self { start, duration, recurrence, calendar })
    }

    fn matching_policy(&self) -> MatchingPolicy {
        self.recurrence.as_ref().map(|r| r.matching_policy).unwrap_or_default()
    }

    fn repeated_time_policy(&self) -> RepeatedTimePolicy {
        self.recurrence.as_ref().map(|r| r.repeated_time_policy).unwrap_or_default()
    }

    fn occurrence_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self.duration {
            ScheduleDuration::Fixed(seconds) => start + ChronoDuration::seconds(seconds),
            ScheduleDuration::AllDay => {
                let tz = self.calendar.timezone;
                let local_date = start.with_timezone(&tz).date_naive();
                let next_midnight_naive = match local_date.succ_opt() {
                    Some(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default(),
                    None => return start + ChronoDuration::days(1),
                };
                let next_midnight = resolve_local_midnight(
                    tz,
                    next_midnight_naive,
                    self.matching_policy(),
                    self.repeated_time_policy(),
                );
                next_midnight - ChronoDuration::seconds(1)
            }
        }
    }

    fn single_occurrence(&self) -> Occurrence {
        Occurrence { start: self.start, end: self.occurrence_end(self.start) }
    }

    /// All occurrences with `start` in `[lo, hi)`.
    pub fn occurrences(&self, lo: DateTime<Utc>, hi: DateTime<Utc>) -> Result<Vec<Occurrence>> {
        match &self.recurrence {
            None => {
                let occ = self.single_occurrence();
                Ok(if occ.start >= lo && occ.start < hi { vec![occ] } else { vec![] })
            }
            Some(rule) => Ok(rule
                .expand(self.start, &self.calendar, lo, hi)?
                .into_iter()
                .map(|start| Occurrence { end: self.occurrence_end(start), start })
                .collect()),
        }
    }

    /// The occurrence whose `start` matches `at`, if the schedule produces
    /// one there.
    pub fn occurrence_for_start(&self, at: DateTime<Utc>) -> Result<Option<Occurrence>> {
        Ok(self
            .occurrences(at, at + ChronoDuration::milliseconds(1))?
            .into_iter()
            .find(|o| o.start == at))
    }

    /// All occurrences whose `start` falls on `day`, local to the schedule's
    /// calendar.
    pub fn occurrences_in_day(&self, day: NaiveDate) -> Result<Vec<Occurrence>> {
        let tz = self.calendar.timezone;
        let start_naive = day.and_hms_opt(0, 0, 0).unwrap_or_default();
        let end_naive = day
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(start_naive + ChronoDuration::days(1));
        let lo = resolve_local_midnight(tz, start_naive, self.matching_policy(), self.repeated_time_policy());
        let hi = resolve_local_midnight(tz, end_naive, self.matching_policy(), self.repeated_time_policy());
        self.occurrences(lo, hi)
    }

    /// The final occurrence, if the recurrence is bounded and its last
    /// occurrence falls within `range`.
    pub fn last_occurrence_in(
        &self,
        range: std::ops::Range<DateTime<Utc>>,
    ) -> Result<Option<Occurrence>> {
        match &self.recurrence {
            Some(rule) if rule.end != crate::recurrence::EndCondition::Never => {
                Ok(self.occurrences(range.start, range.end)?.into_iter().next_back())
            }
            None => {
                let occ = self.single_occurrence();
                Ok(if occ.start >= range.start && occ.start < range.end { Some(occ) } else { None })
            }
            Some(_) => Ok(None),
        }
    }

    /// A lazy, paginated walk of occurrences starting strictly after `from`.
    /// Pages through the underlying recurrence in small batches rather than
    /// materializing the whole sequence, so an unbounded recurrence can be
    /// consumed with a bounded prefix (`.take(n)`).
    pub fn iter_from(&self, from: DateTime<Utc>) -> OccurrenceIter {
        OccurrenceIter {
            schedule: self.clone(),
            cursor: from,
            buffer: VecDeque::new(),
            done: false,
            emitted_single: false,
        }
    }
}

const ITER_BATCH: u16 = 64;

/// Lazy occurrence iterator backing `Schedule::iter_from`.
pub struct OccurrenceIter {
    schedule: Schedule,
    cursor: DateTime<Utc>,
    buffer: VecDeque<Occurrence>,
    done: bool,
    emitted_single: bool,
}

impl Iterator for OccurrenceIter {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        if let Some(occ) = self.buffer.pop_front() {
            self.cursor = occ.start;
            return Some(occ);
        }
        if self.done {
            return None;
        }

        match &self.schedule.recurrence {
            None => {
                self.done = true;
                if self.emitted_single {
                    return None;
                }
                self.emitted_single = true;
                let occ = self.schedule.single_occurrence();
                if occ.start > self.cursor {
                    Some(occ)
                } else {
                    None
                }
            }
            Some(rule) => {
                let starts = rule
                    .expand_after(self.schedule.start, &self.schedule.calendar, self.cursor, ITER_BATCH)
                    .unwrap_or_default();
                if starts.is_empty() {
                    self.done = true;
                    return None;
                }
                if (starts.len() as u16) < ITER_BATCH {
                    self.done = true;
                }
                for start in starts {
                    self.buffer.push_back(Occurrence { end: self.schedule.occurrence_end(start), start });
                }
                self.buffer.pop_front().inspect(|occ| self.cursor = occ.start)
            }
        }
    }
}

fn snap_to_local_midnight(at: DateTime<Utc>, calendar: &CalendarContext) -> DateTime<Utc> {
    let tz = calendar.timezone;
    let local_date = at.with_timezone(&tz).date_naive();
    let naive_midnight = local_date.and_hms_opt(0, 0, 0).unwrap_or_default();
    resolve_local_midnight(tz, naive_midnight, MatchingPolicy::NextValid, RepeatedTimePolicy::First)
}

fn resolve_local_midnight(
    tz: chrono_tz::Tz,
    naive: chrono::NaiveDateTime,
    matching_policy: MatchingPolicy,
    repeated_time_policy: RepeatedTimePolicy,
) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(a, b) => match repeated_time_policy {
            RepeatedTimePolicy::First => a.with_timezone(&Utc),
            RepeatedTimePolicy::Second => b.with_timezone(&Utc),
        },
        chrono::LocalResult::None => {
            // Midnight essentially never falls in a DST gap in practice; walk
            // forward a few minutes as a conservative fallback regardless of
            // the configured matching policy so callers always get an
            // instant back for day-boundary computations.
            let mut candidate = naive;
            for _ in 0..180 {
                candidate += ChronoDuration::minutes(1);
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&candidate) {
                    return dt.with_timezone(&Utc);
                }
            }
            let _ = matching_policy;
            tz.from_utc_datetime(&naive).with_timezone(&Utc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{EndCondition, Frequency};

    fn calendar() -> CalendarContext {
        CalendarContext::new(chrono_tz::UTC)
    }

    #[test]
    fn non_recurring_schedule_yields_single_occurrence_in_range() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let schedule = Schedule::new(start, ScheduleDuration::Fixed(1800), None, calendar()).unwrap();
        let occs = schedule
            .occurrences(start - ChronoDuration::days(1), start + ChronoDuration::days(1))
            .unwrap();
        assert_eq!(occs.len(), 1);
        assert_eq!(occs[0].end, start + ChronoDuration::seconds(1800));
    }

    #[test]
    fn all_day_schedule_snaps_to_midnight_and_spans_the_day() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        let schedule = Schedule::new(start, ScheduleDuration::AllDay, None, calendar()).unwrap();
        assert_eq!(schedule.start, Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap());
        let occ = schedule.single_occurrence();
        assert_eq!(occ.end, Utc.with_ymd_and_hms(2026, 6, 1, 23, 59, 59).unwrap());
    }

    #[test]
    fn recurring_schedule_respects_bounded_end_condition() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let rule = RecurrenceRule {
            frequency: Frequency::Weekly,
            interval: 1,
            end: EndCondition::AfterOccurrences(3),
            ..Default::default()
        };
        let schedule =
            Schedule::new(start, ScheduleDuration::Fixed(3600), Some(rule), calendar()).unwrap();
        let occs = schedule.occurrences(start, start + ChronoDuration::days(60)).unwrap();
        assert_eq!(occs.len(), 3);
    }

    #[test]
    fn lazy_iterator_pages_through_an_unbounded_recurrence() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let rule = RecurrenceRule { frequency: Frequency::Daily, interval: 1, ..Default::default() };
        let schedule =
            Schedule::new(start, ScheduleDuration::Fixed(600), Some(rule), calendar()).unwrap();
        let first_five: Vec<_> = schedule.iter_from(start - ChronoDuration::seconds(1)).take(5).collect();
        assert_eq!(first_five.len(), 5);
        assert_eq!(first_five[4].start, start + ChronoDuration::days(4));
    }

    #[test]
    fn non_gregorian_calendar_is_rejected() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let mut calendar = calendar();
        calendar.identifier = CalendarIdentifier::Other;
        let result = Schedule::new(start, ScheduleDuration::Fixed(60), None, calendar);
        assert!(result.is_err());
    }
}
