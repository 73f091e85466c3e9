//! End-to-end scenarios exercised against an in-memory `TaskScheduler`:
//! a `setup()` helper returning a ready context, one `#[tokio::test]` per
//! scenario.

use std::sync::Arc;

use caretask_api::TaskScheduler;
use caretask_domain::{
    CalendarContext, CompletionPolicy, EndCondition, Frequency, NotificationThread, RecurrenceRule, RecurrenceWeekday,
    Schedule, ScheduleDuration, SchedulerError, TaskVersionFields, UserInfo, ID,
};
use caretask_infra::services::notifications::{
    InMemoryBackgroundTaskScheduler, InMemoryNotificationCenter, NotificationCenter,
};
use caretask_infra::{SchedulerContext, StoreError};
use chrono::{TimeZone, Utc, Weekday};

async fn setup() -> TaskScheduler {
    setup_with_center().await.0
}

async fn setup_with_center() -> (TaskScheduler, Arc<InMemoryNotificationCenter>) {
    let ctx = SchedulerContext::connect_in_memory().await.unwrap();
    let center = Arc::new(InMemoryNotificationCenter::with_authorization(
        64,
        caretask_infra::services::notifications::AuthorizationStatus::Authorized,
    ));
    let background = Arc::new(InMemoryBackgroundTaskScheduler::new());
    let scheduler = TaskScheduler::new(ctx, "com.example.caretask".into(), 10, 14, false, center.clone(), background);
    (scheduler, center)
}

fn daily_fields(hour: u32, weekdays: Vec<Weekday>) -> (TaskVersionFields, chrono::DateTime<Utc>) {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap();
    let recurrence = RecurrenceRule {
        frequency: Frequency::Daily,
        interval: 1,
        end: EndCondition::Never,
        weekdays: weekdays.into_iter().map(RecurrenceWeekday::every).collect(),
        ..Default::default()
    };
    let schedule = Schedule::new(start, ScheduleDuration::Fixed(1800), Some(recurrence), CalendarContext::new(chrono_tz::UTC)).unwrap();
    let fields = TaskVersionFields {
        title: "Questionnaire".into(),
        instructions: "Fill it out".into(),
        category: None,
        schedule,
        completion_policy: CompletionPolicy::SameDay,
        schedule_notifications: true,
        notification_thread: NotificationThread::PerTask,
        tags: vec![],
    };
    (fields, start)
}

#[tokio::test]
async fn daily_questionnaire_seven_days_all_completed() {
    let scheduler = setup().await;
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
    let recurrence = RecurrenceRule { frequency: Frequency::Daily, interval: 1, end: EndCondition::AfterOccurrences(7), ..Default::default() };
    let schedule = Schedule::new(start, ScheduleDuration::Fixed(1800), Some(recurrence), CalendarContext::new(chrono_tz::UTC)).unwrap();
    let fields = TaskVersionFields {
        title: "Q".into(),
        instructions: "daily questionnaire".into(),
        category: None,
        schedule,
        completion_policy: CompletionPolicy::Anytime,
        schedule_notifications: false,
        notification_thread: NotificationThread::None,
        tags: vec![],
    };

    let task_id = ID::new_v4();
    scheduler.upsert_task(&task_id, fields, start, UserInfo::new()).await.unwrap();

    let range = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()..Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
    let mut events = scheduler.query_events(range.clone(), |_| true).await.unwrap();
    assert_eq!(events.len(), 7);

    for event in &mut events {
        scheduler.complete_event(event, event.occurrence.start, false, |_| {}).await.unwrap();
    }

    let completed = scheduler.query_events(range, |_| true).await.unwrap();
    assert_eq!(completed.len(), 7);
    assert!(completed.iter().all(|e| matches!(e.outcome_state, caretask_domain::OutcomeState::Present(_))));
}

#[tokio::test]
async fn shadowing_previous_outcomes_is_rejected() {
    let scheduler = setup().await;
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
    let recurrence = RecurrenceRule { frequency: Frequency::Daily, interval: 1, end: EndCondition::Never, ..Default::default() };
    let schedule = Schedule::new(start, ScheduleDuration::Fixed(1800), Some(recurrence), CalendarContext::new(chrono_tz::UTC)).unwrap();
    let fields = TaskVersionFields {
        title: "T".into(),
        instructions: "i".into(),
        category: None,
        schedule,
        completion_policy: CompletionPolicy::Anytime,
        schedule_notifications: false,
        notification_thread: NotificationThread::None,
        tags: vec![],
    };

    let task_id = ID::new_v4();
    scheduler.upsert_task(&task_id, fields.clone(), start, UserInfo::new()).await.unwrap();

    let outcome_day = Utc.with_ymd_and_hms(2025, 1, 3, 8, 0, 0).unwrap();
    let range = outcome_day..outcome_day + chrono::Duration::seconds(1);
    let mut events = scheduler.query_events(range, |_| true).await.unwrap();
    scheduler.complete_event(&mut events[0], outcome_day, false, |_| {}).await.unwrap();

    let new_effective_from = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
    let result = scheduler.upsert_task(&task_id, fields, new_effective_from, UserInfo::new()).await;

    assert!(matches!(result, Err(StoreError::Scheduler(SchedulerError::ShadowingPreviousOutcomes { .. }))));
}

#[tokio::test]
async fn version_split_produces_expected_occurrence_mix() {
    let scheduler = setup().await;
    let v1_start = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
    let recurrence = RecurrenceRule { frequency: Frequency::Daily, interval: 1, end: EndCondition::Never, ..Default::default() };
    let v1_schedule = Schedule::new(v1_start, ScheduleDuration::Fixed(1800), Some(recurrence.clone()), CalendarContext::new(chrono_tz::UTC)).unwrap();
    let v1_fields = TaskVersionFields {
        title: "T".into(),
        instructions: "i".into(),
        category: None,
        schedule: v1_schedule,
        completion_policy: CompletionPolicy::Anytime,
        schedule_notifications: false,
        notification_thread: NotificationThread::None,
        tags: vec![],
    };

    let task_id = ID::new_v4();
    scheduler.upsert_task(&task_id, v1_fields, v1_start, UserInfo::new()).await.unwrap();

    let v2_start = Utc.with_ymd_and_hms(2025, 1, 5, 10, 0, 0).unwrap();
    let v2_schedule = Schedule::new(v2_start, ScheduleDuration::Fixed(1800), Some(recurrence), CalendarContext::new(chrono_tz::UTC)).unwrap();
    let v2_fields = TaskVersionFields {
        title: "T".into(),
        instructions: "i".into(),
        category: None,
        schedule: v2_schedule,
        completion_policy: CompletionPolicy::Anytime,
        schedule_notifications: false,
        notification_thread: NotificationThread::None,
        tags: vec![],
    };
    scheduler.upsert_task(&task_id, v2_fields, v2_start, UserInfo::new()).await.unwrap();

    let range = Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap()..Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
    let events = scheduler.query_events(range, |_| true).await.unwrap();

    let starts: Vec<_> = events.iter().map(|e| e.occurrence.start).collect();
    assert_eq!(
        starts,
        vec![
            Utc.with_ymd_and_hms(2025, 1, 3, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 4, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 5, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 7, 10, 0, 0).unwrap(),
        ]
    );
}

#[tokio::test]
async fn notification_planner_partitions_across_two_tasks() {
    let scheduler = setup().await;

    let (t1_fields, t1_start) = daily_fields(8, vec![]);
    scheduler.upsert_task(&ID::new_v4(), t1_fields, t1_start, UserInfo::new()).await.unwrap();

    let (weekday_fields, weekday_start) =
        daily_fields(8, vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]);
    scheduler.upsert_task(&ID::new_v4(), weekday_fields, weekday_start, UserInfo::new()).await.unwrap();

    let result = scheduler.reconcile_notifications(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()).await.unwrap();
    assert_eq!(result, caretask_infra::services::notifications::reconciler::ReconcileState::RefreshScheduled);
}

#[tokio::test]
async fn completion_policy_gates_during_event() {
    let scheduler = setup().await;
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
    let schedule = Schedule::new(start, ScheduleDuration::Fixed(3600), None, CalendarContext::new(chrono_tz::UTC)).unwrap();
    let fields = TaskVersionFields {
        title: "T".into(),
        instructions: "i".into(),
        category: None,
        schedule,
        completion_policy: CompletionPolicy::DuringEvent,
        schedule_notifications: false,
        notification_thread: NotificationThread::None,
        tags: vec![],
    };

    let task_id = ID::new_v4();
    scheduler.upsert_task(&task_id, fields, start, UserInfo::new()).await.unwrap();

    let range = start - chrono::Duration::seconds(1)..start + chrono::Duration::seconds(3601);
    let mut events = scheduler.query_events(range, |_| true).await.unwrap();
    assert_eq!(events.len(), 1);

    let too_early = start - chrono::Duration::seconds(1);
    let result = scheduler.complete_event(&mut events[0], too_early, false, |_| {}).await;
    assert!(matches!(result, Err(StoreError::Scheduler(SchedulerError::PreventedByCompletionPolicy))));

    scheduler.complete_event(&mut events[0], start, false, |_| {}).await.unwrap();

    let reload_range = start - chrono::Duration::seconds(1)..start + chrono::Duration::seconds(1);
    let mut events_again = scheduler.query_events(reload_range, |_| true).await.unwrap();
    let too_late = start + chrono::Duration::seconds(3600);
    let result = scheduler.complete_event(&mut events_again[0], too_late, false, |_| {}).await;
    assert!(matches!(result, Err(StoreError::Scheduler(SchedulerError::PreventedByCompletionPolicy))));
}

#[tokio::test]
async fn reconciliation_is_idempotent_across_two_passes() {
    let (scheduler, center) = setup_with_center().await;
    let (fields, start) = daily_fields(8, vec![]);
    scheduler.upsert_task(&ID::new_v4(), fields, start, UserInfo::new()).await.unwrap();

    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let first = scheduler.reconcile_notifications(now).await.unwrap();
    let pending_after_first = center.pending_requests().await;
    assert!(!pending_after_first.is_empty());
    let adds_after_first = center.add_call_count();
    let removes_after_first = center.remove_call_count();

    let second = scheduler.reconcile_notifications(now).await.unwrap();

    assert_eq!(first, caretask_infra::services::notifications::reconciler::ReconcileState::RefreshScheduled);
    assert_eq!(second, caretask_infra::services::notifications::reconciler::ReconcileState::RefreshScheduled);

    // A no-op second pass must neither add nor remove anything, and the
    // pending set must come out byte-identical (order included, since it's
    // the diff-apply logic itself under test, not just the resulting set).
    assert_eq!(center.add_call_count(), adds_after_first);
    assert_eq!(center.remove_call_count(), removes_after_first);
    assert_eq!(center.pending_requests().await, pending_after_first);
}
