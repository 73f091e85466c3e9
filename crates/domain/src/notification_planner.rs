use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::shared::entity::ID;

/// Compact calendar-trigger hint synthesized from a schedule, analogous to
/// `DateComponents` for an OS repeating-calendar notification trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationHint {
    pub hour: Option<u32>,
    pub minute: u32,
    pub second: u32,
    pub weekday: Option<Weekday>,
}

/// One task's notification-relevant state, precomputed by the caller
/// (`caretask_infra`, which has store + schedule access) so this module
/// stays a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct NotificationCandidate {
    pub task_id: ID,
    pub timezone: Tz,
    pub has_recurrence: bool,
    pub recurrence_interval: u16,
    pub recurrence_is_bounded: bool,
    pub matching_hint: Option<NotificationHint>,
    /// Ascending, not-yet-completed occurrence starts from `now` onward.
    pub upcoming_starts: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlannedNotification {
    /// One OS repeating-calendar trigger covering every remaining event for
    /// this task.
    RepeatingCalendar { task_id: ID, hint: NotificationHint },
    /// One OS one-shot trigger for a single occurrence.
    Interval { task_id: ID, occurrence_start: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPlan {
    pub requests: Vec<PlannedNotification>,
    /// The earliest occurrence left unscheduled once the limit was hit;
    /// drives the background-refresh target.
    pub earliest_non_scheduled: Option<DateTime<Utc>>,
}

/// `min(N, N + (M - otherPending - N))`, the effective per-pass ceiling once
/// foreign notification usage is accounted for.
pub fn current_limit(notification_limit: u32, global_cap: u32, other_pending: u32) -> u32 {
    let corrected = global_cap as i64 - other_pending as i64 - notification_limit as i64;
    let adjusted = notification_limit as i64 + corrected.min(0);
    adjusted.clamp(0, notification_limit as i64) as u32
}

/// Computes the desired notification request set per spec §4.6: round-robin
/// across tasks sorted by first occurrence, preferring one repeating-calendar
/// request over a task's whole remaining run when it qualifies, otherwise
/// emitting interval requests one occurrence at a time.
pub fn plan(
    candidates: &[NotificationCandidate],
    notification_limit: u32,
    global_cap: u32,
    other_pending: u32,
) -> NotificationPlan {
    let limit = current_limit(notification_limit, global_cap, other_pending);

    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| !candidates[i].upcoming_starts.is_empty())
        .collect();
    order.sort_by_key(|&i| candidates[i].upcoming_starts[0]);

    let mut cursor = vec![0usize; candidates.len()];
    let mut exhausted = vec![false; candidates.len()];
    let mut requests = Vec::new();

    'outer: loop {
        let mut progressed = false;
        for &i in &order {
            if requests.len() as u32 >= limit {
                break 'outer;
            }
            if exhausted[i] {
                continue;
            }
            let candidate = &candidates[i];
            let remaining = &candidate.upcoming_starts[cursor[i]..];
            if remaining.is_empty() {
                exhausted[i] = true;
                continue;
            }
            progressed = true;

            let qualifies_repeating = remaining.len() >= 2
                && candidate.has_recurrence
                && candidate.recurrence_interval == 1
                && candidate.matching_hint.is_some()
                && is_equidistant(remaining, candidate.timezone)
                && !(candidate.recurrence_is_bounded && remaining.len() < 2);

            if qualifies_repeating {
                requests.push(PlannedNotification::RepeatingCalendar {
                    task_id: candidate.task_id.clone(),
                    hint: candidate.matching_hint.clone().unwrap_or(NotificationHint {
                        hour: None,
                        minute: 0,
                        second: 0,
                        weekday: None,
                    }),
                });
                cursor[i] = candidate.upcoming_starts.len();
                exhausted[i] = true;
            } else {
                requests.push(PlannedNotification::Interval {
                    task_id: candidate.task_id.clone(),
                    occurrence_start: remaining[0],
                });
                cursor[i] += 1;
                if cursor[i] >= candidate.upcoming_starts.len() {
                    exhausted[i] = true;
                }
            }
        }
        if !progressed || exhausted.iter().all(|done| *done) {
            break;
        }
    }

    let earliest_non_scheduled = candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| !exhausted[*i])
        .filter_map(|(i, c)| c.upcoming_starts.get(cursor[i]).copied())
        .min();

    NotificationPlan { requests, earliest_non_scheduled }
}

/// Builds the hint for a schedule's time-of-day/weekday, or `None` when the
/// schedule doesn't resolve to a single stable calendar trigger (e.g. an
/// all-day task without a configured notification time).
pub fn matching_hint(local_time: NaiveTime, weekday: Option<Weekday>, is_all_day: bool) -> NotificationHint {
    NotificationHint {
        hour: if is_all_day { None } else { Some(local_time.hour()) },
        minute: local_time.minute(),
        second: local_time.second(),
        weekday,
    }
}

/// Successive starts are "equidistant" when each gap, expressed in local
/// calendar components rather than raw seconds, is the same: same local
/// time-of-day and the same whole-day offset between consecutive dates. This
/// is what keeps a DST transition or a leap day from falsely breaking (or
/// making) equidistance.
fn is_equidistant(starts: &[DateTime<Utc>], tz: Tz) -> bool {
    if starts.len() < 2 {
        return true;
    }
    let local: Vec<_> = starts.iter().map(|s| s.with_timezone(&tz)).collect();
    let first_time = local[0].time();
    if local.iter().any(|d| d.time() != first_time) {
        return false;
    }
    let first_gap = (local[1].date_naive() - local[0].date_naive()).num_days();
    local.windows(2).all(|w| (w[1].date_naive() - w[0].date_naive()).num_days() == first_gap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn hint() -> NotificationHint {
        NotificationHint { hour: Some(8), minute: 0, second: 0, weekday: None }
    }

    fn daily_candidate(id: ID, start: DateTime<Utc>, count: i64) -> NotificationCandidate {
        NotificationCandidate {
            task_id: id,
            timezone: chrono_tz::UTC,
            has_recurrence: true,
            recurrence_interval: 1,
            recurrence_is_bounded: false,
            matching_hint: Some(hint()),
            upcoming_starts: (0..count).map(|d| start + chrono::Duration::days(d)).collect(),
        }
    }

    #[test]
    fn equidistant_daily_task_collapses_to_one_repeating_request() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let t1 = daily_candidate(ID::new_v4(), start, 30);
        let out = plan(&[t1], 10, 64, 0);
        assert_eq!(out.requests.len(), 1);
        assert!(matches!(out.requests[0], PlannedNotification::RepeatingCalendar { .. }));
    }

    #[test]
    fn non_equidistant_task_emits_one_interval_request_per_occurrence() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let starts = vec![start, start + chrono::Duration::days(1), start + chrono::Duration::days(3)];
        let t1 = NotificationCandidate {
            task_id: ID::new_v4(),
            timezone: chrono_tz::UTC,
            has_recurrence: true,
            recurrence_interval: 1,
            recurrence_is_bounded: false,
            matching_hint: Some(hint()),
            upcoming_starts: starts,
        };
        let out = plan(&[t1], 10, 64, 0);
        assert_eq!(out.requests.len(), 3);
        assert!(out.requests.iter().all(|r| matches!(r, PlannedNotification::Interval { .. })));
    }

    #[test]
    fn partitions_across_two_tasks_per_scenario_four() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let daily = daily_candidate(ID::new_v4(), start, 60);
        let weekday_only = NotificationCandidate {
            task_id: ID::new_v4(),
            timezone: chrono_tz::UTC,
            has_recurrence: true,
            recurrence_interval: 1,
            recurrence_is_bounded: false,
            matching_hint: Some(hint()),
            upcoming_starts: (0..20)
                .map(|d| start + chrono::Duration::days(d))
                .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
                .collect(),
        };
        let out = plan(&[daily, weekday_only], 10, 64, 0);
        assert_eq!(out.requests.len(), 10);
        let repeating = out
            .requests
            .iter()
            .filter(|r| matches!(r, PlannedNotification::RepeatingCalendar { .. }))
            .count();
        assert_eq!(repeating, 1);
    }

    #[test]
    fn current_limit_shrinks_under_foreign_pressure() {
        assert_eq!(current_limit(10, 64, 0), 10);
        assert_eq!(current_limit(10, 15, 10), 5);
        assert_eq!(current_limit(10, 5, 10), 0);
    }
}
