use std::sync::Arc;

use caretask_domain::{
    notification_planner::{self, NotificationCandidate, PlannedNotification},
    NotificationThread, SchedulerError, TaskCategory,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio::sync::{watch, Semaphore};
use tracing::{info, instrument, warn};

use super::{AuthorizationStatus, BackgroundTaskScheduler, NotificationCenter, NotificationRequest, NotificationTrigger};
use crate::{error::Result, preferences::PreferencesStore, repos::ITaskStore, StoreError};

/// The reconciler's per-pass state, observable for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Idle,
    Planning,
    Diffing,
    Applying,
    RefreshScheduled,
    AbortAuthorization,
    Cancelled,
}

/// Orchestrates notification scheduling: computes the desired plan, diffs it
/// against what the OS already has pending, and applies the delta under a
/// single-flight lock, so concurrent callers collapse into one in-flight
/// pass instead of issuing duplicate OS calls.
pub struct NotificationReconciler {
    reverse_dns_prefix: String,
    notification_limit: u32,
    scheduling_interval_days: i64,
    automatically_request_provisional: bool,
    tasks: Arc<dyn ITaskStore>,
    center: Arc<dyn NotificationCenter>,
    background: Arc<dyn BackgroundTaskScheduler>,
    preferences: PreferencesStore,
    /// Gates concurrent passes; the state field below is for observability
    /// only and is never itself used for mutual exclusion.
    single_flight: Semaphore,
    state: std::sync::Mutex<ReconcileState>,
    cancel: watch::Receiver<bool>,
}

impl NotificationReconciler {
    pub fn new(
        reverse_dns_prefix: String,
        notification_limit: u32,
        scheduling_interval_days: i64,
        automatically_request_provisional: bool,
        tasks: Arc<dyn ITaskStore>,
        center: Arc<dyn NotificationCenter>,
        background: Arc<dyn BackgroundTaskScheduler>,
        preferences: PreferencesStore,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reverse_dns_prefix,
            notification_limit,
            scheduling_interval_days,
            automatically_request_provisional,
            tasks,
            center,
            background,
            preferences,
            single_flight: Semaphore::new(1),
            state: std::sync::Mutex::new(ReconcileState::Idle),
            cancel,
        }
    }

    pub fn state(&self) -> ReconcileState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ReconcileState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn base(&self) -> String {
        format!("{}.notification", self.reverse_dns_prefix)
    }

    fn task_identifier(&self, task_id: &str) -> String {
        format!("{}.task.{}", self.base(), task_id)
    }

    fn event_identifier(&self, task_id: &str, occurrence_start: DateTime<Utc>) -> String {
        format!("{}.event.{}.{}", self.base(), task_id, occurrence_start.to_rfc3339())
    }

    fn thread_identifier(&self, thread: &NotificationThread, task_id: &str) -> Option<String> {
        match thread {
            NotificationThread::Global => Some(self.base()),
            NotificationThread::PerTask => Some(format!("{}.taskId.{}", self.base(), task_id)),
            NotificationThread::Custom(x) => Some(x.clone()),
            NotificationThread::None => None,
        }
    }

    /// Runs one reconciliation pass: plan, diff, apply, schedule refresh.
    /// Returns early with `AbortAuthorization` if authorization is
    /// undetermined and provisional auto-request is refused or fails.
    #[instrument(skip(self), fields(prefix = %self.reverse_dns_prefix))]
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileState> {
        let Ok(_permit) = self.single_flight.try_acquire() else {
            // Another pass already owns the permit; coalesce into a no-op
            // rather than queue behind it.
            return Ok(ReconcileState::Idle);
        };

        self.set_state(ReconcileState::Planning);

        if matches!(self.center.authorization_status().await, AuthorizationStatus::NotDetermined) {
            if !self.automatically_request_provisional {
                self.set_state(ReconcileState::AbortAuthorization);
                return Ok(ReconcileState::AbortAuthorization);
            }
            match self.center.request_authorization().await {
                Ok(AuthorizationStatus::Denied) | Err(_) => {
                    self.preferences.set_authorization_disallowed_last_scheduling(true).await?;
                    self.set_state(ReconcileState::AbortAuthorization);
                    return Ok(ReconcileState::AbortAuthorization);
                }
                _ => {}
            }
        }

        let window_end = now + chrono::Duration::days(self.scheduling_interval_days);
        let versions = self.tasks.query_tasks(now..window_end).await?;
        let schedulable: Vec<_> = versions.into_iter().filter(|v| v.schedule_notifications).collect();

        if self.is_cancelled() {
            self.set_state(ReconcileState::Cancelled);
            return Ok(ReconcileState::Cancelled);
        }

        let mut candidates = Vec::with_capacity(schedulable.len());
        for version in &schedulable {
            let upcoming = version.schedule.occurrences(now, window_end)?;
            if upcoming.is_empty() {
                continue;
            }
            let tz = version.schedule.calendar.timezone;
            let local_start = upcoming[0].start.with_timezone(&tz);
            let is_all_day = matches!(version.schedule.duration, caretask_domain::ScheduleDuration::AllDay);
            let hint = notification_planner::matching_hint(local_start.time(), Some(local_start.weekday()), is_all_day);

            candidates.push(NotificationCandidate {
                task_id: version.task_id.clone(),
                timezone: tz,
                has_recurrence: version.schedule.recurrence.is_some(),
                recurrence_interval: version.schedule.recurrence.as_ref().map(|r| r.interval).unwrap_or(0),
                recurrence_is_bounded: version
                    .schedule
                    .recurrence
                    .as_ref()
                    .map(|r| !matches!(r.end, caretask_domain::EndCondition::Never))
                    .unwrap_or(true),
                matching_hint: Some(hint),
                upcoming_starts: upcoming.into_iter().map(|o| o.start).collect(),
            });
        }

        let pending = self.center.pending_requests().await;
        let other_pending = pending.iter().filter(|r| !r.identifier.starts_with(&self.base())).count() as u32;

        let plan = notification_planner::plan(&candidates, self.notification_limit, self.center.pending_notifications_limit(), other_pending);

        self.set_state(ReconcileState::Diffing);
        let ours_pending: Vec<_> = pending.into_iter().filter(|r| r.identifier.starts_with(&self.base())).collect();
        let desired = self.build_requests(&plan.requests, &schedulable);

        let to_add: Vec<_> = desired.iter().filter(|d| !ours_pending.iter().any(|p| p.identifier == d.identifier && p == *d)).cloned().collect();
        let to_remove: Vec<String> = ours_pending
            .iter()
            .filter(|p| !desired.iter().any(|d| d.identifier == p.identifier))
            .map(|p| p.identifier.clone())
            .collect();

        self.set_state(ReconcileState::Applying);
        if !to_remove.is_empty() {
            self.center.remove(&to_remove).await.map_err(StoreError::Other)?;
        }
        for request in to_add {
            if self.is_cancelled() {
                self.set_state(ReconcileState::Cancelled);
                return Ok(ReconcileState::Cancelled);
            }
            if let Err(e) = self.center.add(request.clone()).await {
                warn!(identifier = %request.identifier, error = %e, "notification add rejected");
                return Err(StoreError::Scheduler(SchedulerError::NotificationAdd {
                    identifier: request.identifier,
                    reason: e.to_string(),
                }));
            }
        }

        let next_week = now + chrono::Duration::days(7);
        let earliest_finite_last_occurrence_within_week = schedulable
            .iter()
            .filter_map(|v| v.schedule.last_occurrence_in(now..next_week).ok().flatten())
            .map(|o| o.start)
            .min();

        let refresh_target = [Some(next_week), plan.earliest_non_scheduled, earliest_finite_last_occurrence_within_week]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(next_week);

        self.background.submit(refresh_target).await.map_err(StoreError::Other)?;
        self.preferences.set_earliest_schedule_refresh_date(Some(refresh_target)).await?;

        info!(added = desired.len(), removed = to_remove.len(), "reconciliation pass complete");
        self.set_state(ReconcileState::RefreshScheduled);
        Ok(ReconcileState::RefreshScheduled)
    }

    fn build_requests(&self, planned: &[PlannedNotification], schedulable: &[caretask_domain::TaskVersion]) -> Vec<NotificationRequest> {
        planned
            .iter()
            .filter_map(|p| match p {
                PlannedNotification::RepeatingCalendar { task_id, hint } => {
                    let task = schedulable.iter().find(|v| &v.task_id == task_id)?;
                    Some(NotificationRequest {
                        identifier: self.task_identifier(&task_id.to_string()),
                        task_id: task_id.clone(),
                        title: task.title.clone(),
                        body: task.instructions.clone(),
                        thread_identifier: self.thread_identifier(&task.notification_thread, &task_id.to_string()),
                        category_identifier: task.category.as_ref().map(|TaskCategory(c)| format!("{}.category.{}", self.base(), c)),
                        time_sensitive: !matches!(task.schedule.duration, caretask_domain::ScheduleDuration::AllDay),
                        trigger: NotificationTrigger::RepeatingCalendar {
                            hour: hint.hour,
                            minute: hint.minute,
                            second: hint.second,
                            weekday: hint.weekday,
                        },
                    })
                }
                PlannedNotification::Interval { task_id, occurrence_start } => {
                    let task = schedulable.iter().find(|v| &v.task_id == task_id)?;
                    Some(NotificationRequest {
                        identifier: self.event_identifier(&task_id.to_string(), *occurrence_start),
                        task_id: task_id.clone(),
                        title: task.title.clone(),
                        body: task.instructions.clone(),
                        thread_identifier: self.thread_identifier(&task.notification_thread, &task_id.to_string()),
                        category_identifier: task.category.as_ref().map(|TaskCategory(c)| format!("{}.category.{}", self.base(), c)),
                        time_sensitive: !matches!(task.schedule.duration, caretask_domain::ScheduleDuration::AllDay),
                        trigger: NotificationTrigger::Once(*occurrence_start),
                    })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::{InMemoryBackgroundTaskScheduler, InMemoryNotificationCenter};
    use crate::repos::SqliteTaskStore;
    use sqlx::SqlitePool;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn abort_authorization_when_not_determined_and_auto_request_disabled() {
        let pool = setup().await;
        let tasks: Arc<dyn ITaskStore> = Arc::new(SqliteTaskStore::new(pool.clone()));
        let center: Arc<dyn NotificationCenter> = Arc::new(InMemoryNotificationCenter::new(64));
        let background: Arc<dyn BackgroundTaskScheduler> = Arc::new(InMemoryBackgroundTaskScheduler::new());
        let (_tx, rx) = watch::channel(false);

        let reconciler = NotificationReconciler::new(
            "com.example.caretask".into(),
            10,
            14,
            false,
            tasks,
            center,
            background,
            PreferencesStore::new(pool),
            rx,
        );

        let result = reconciler.reconcile(Utc::now()).await.unwrap();
        assert_eq!(result, ReconcileState::AbortAuthorization);
    }
}
