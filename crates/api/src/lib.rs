//! CareTask's public surface. `TaskScheduler` composes the persistence and
//! notification layers from `caretask_infra` into the handful of operations a
//! host application calls: upsert/delete/query tasks, query events, complete
//! an event, subscribe to save notifications, and drive one notification
//! reconciliation pass. No HTTP layer — this crate is a library facade
//! embedded directly in a host application, not a deployed service.

mod subscription;

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use caretask_domain::{Event, Outcome, OutcomeState, SchedulerError, TaskVersion, TaskVersionFields, UserInfo, ID};
use caretask_infra::services::notifications::reconciler::{NotificationReconciler, ReconcileState};
use caretask_infra::services::notifications::{BackgroundTaskScheduler, NotificationCenter};
use caretask_infra::{Result, SchedulerContext, StoreError};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::instrument;

pub use subscription::{SaveEvent, Subscription};

/// Side-effect hook run after a write completes. A synchronous closure
/// rather than an async callback, since a host-facing facade has no
/// request/response cycle to keep async.
type SaveSubscriber = Box<dyn Fn(&SaveEvent) + Send + Sync>;

struct Inner {
    ctx: SchedulerContext,
    reconciler: NotificationReconciler,
    subscribers: Mutex<Vec<(u64, SaveSubscriber)>>,
    next_subscriber_id: AtomicU64,
    cancel_tx: watch::Sender<bool>,
}

/// The public entry point a host application holds onto for the lifetime of
/// its scheduling needs. Cheap to clone: everything it owns is already
/// reference-counted.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    /// Wires a `SchedulerContext` together with host-supplied notification
    /// collaborators into a ready-to-use facade.
    pub fn new(
        ctx: SchedulerContext,
        reverse_dns_prefix: String,
        notification_limit: u32,
        scheduling_interval_days: i64,
        automatically_request_provisional: bool,
        center: Arc<dyn NotificationCenter>,
        background: Arc<dyn BackgroundTaskScheduler>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let reconciler = NotificationReconciler::new(
            reverse_dns_prefix,
            notification_limit,
            scheduling_interval_days,
            automatically_request_provisional,
            ctx.tasks.clone(),
            center,
            background,
            ctx.preferences.clone(),
            cancel_rx,
        );

        Self {
            inner: Arc::new(Inner {
                ctx,
                reconciler,
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(0),
                cancel_tx,
            }),
        }
    }

    /// `new`, reading the reconciler's tunables from
    /// `caretask_utils::config::APP_CONFIG` instead of taking them as
    /// parameters, mirroring `SchedulerContext::connect_from_config`.
    pub fn from_config(
        ctx: SchedulerContext,
        center: Arc<dyn NotificationCenter>,
        background: Arc<dyn BackgroundTaskScheduler>,
    ) -> Self {
        let config = &caretask_utils::config::APP_CONFIG;
        Self::new(
            ctx,
            config.reverse_dns_prefix.clone(),
            config.notification_limit,
            config.scheduling_interval_days,
            config.automatically_request_provisional,
            center,
            background,
        )
    }

    /// Inserts a new task, or creates a new version on the existing chain for
    /// `task_id` if `fields` differs from the current head. Notifies
    /// `didSave` subscribers after the write completes.
    #[instrument(skip(self, fields, user_info))]
    pub async fn upsert_task(
        &self,
        task_id: &ID,
        fields: TaskVersionFields,
        effective_from: DateTime<Utc>,
        user_info: UserInfo,
    ) -> Result<(TaskVersion, bool)> {
        let (head, did_change) = self.inner.ctx.tasks.upsert(task_id, fields, effective_from, user_info).await?;
        if did_change {
            self.notify(SaveEvent::TaskUpserted { task: head.clone(), did_change });
        }
        Ok((head, did_change))
    }

    /// Deletes each listed version and its outcomes. Does not repair
    /// surrounding chain links — callers that delete a mid-chain version are
    /// responsible for re-linking the chain themselves.
    #[instrument(skip(self))]
    pub async fn delete_tasks(&self, version_ids: &[ID]) -> Result<()> {
        for version_id in version_ids {
            self.inner.ctx.tasks.delete_task(version_id).await?;
            self.notify(SaveEvent::TaskDeleted { version_id: version_id.clone() });
        }
        Ok(())
    }

    /// Task versions whose effective window intersects `range`, filtered by
    /// `predicate` and ordered by `sort_by`, with a stable tie-break on
    /// `effective_from` ascending (the store's own query order). Predicate
    /// and sort are plain Rust closures rather than a query DSL, since the
    /// store traits only narrow by date range (`caretask_infra`'s grounding:
    /// arbitrary predicates are not object-safe across a trait boundary).
    pub async fn query_tasks(
        &self,
        range: Range<DateTime<Utc>>,
        predicate: impl Fn(&TaskVersion) -> bool,
        sort_by: impl Fn(&TaskVersion, &TaskVersion) -> std::cmp::Ordering,
    ) -> Result<Vec<TaskVersion>> {
        let mut versions: Vec<_> = self.inner.ctx.tasks.query_tasks(range).await?.into_iter().filter(|v| predicate(v)).collect();
        versions.sort_by(|a, b| sort_by(a, b));
        Ok(versions)
    }

    /// Events in `range` matching `predicate`, sorted by `occurrence.start`
    /// ascending.
    pub async fn query_events(&self, range: Range<DateTime<Utc>>, predicate: impl Fn(&Event) -> bool) -> Result<Vec<Event>> {
        Ok(self.inner.ctx.assembler.query_events(range).await?.into_iter().filter(|e| predicate(e)).collect())
    }

    /// Change-detection anchor for `query_events`: the set of task-version
    /// and outcome identifiers the equivalent `query_events` call would
    /// touch. Callers re-run `query_events` only when this set changes,
    /// avoiding a dependency on reactive storage to detect changes.
    pub async fn query_events_anchor(&self, range: Range<DateTime<Utc>>) -> Result<Vec<ID>> {
        self.inner.ctx.assembler.query_events_anchor(range).await
    }

    /// Registers a closure to run after every persisted write this facade
    /// performs. Returns a handle whose `cancel()` unregisters it.
    pub fn subscribe_did_save(&self, handler: impl Fn(&SaveEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Box::new(handler)));
        Subscription::new(id, Arc::downgrade(&self.inner))
    }

    fn notify(&self, event: SaveEvent) {
        let subscribers = self.inner.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, subscriber) in subscribers.iter() {
            subscriber(&event);
        }
    }

    /// Completes `event`: checks the completion policy unless
    /// `ignore_completion_policy`, then constructs-or-merges the outcome per
    /// `outcome_state`, persists it (except in `Mocked` mode), and flips
    /// `event.outcome_state` to `Present`.
    #[instrument(skip(self, event, mutate))]
    pub async fn complete_event(
        &self,
        event: &mut Event,
        now: DateTime<Utc>,
        ignore_completion_policy: bool,
        mutate: impl FnOnce(&mut Outcome),
    ) -> Result<()> {
        if !ignore_completion_policy && !event.can_complete(now) {
            return Err(StoreError::Scheduler(SchedulerError::PreventedByCompletionPolicy));
        }

        let (outcome, persisted) = match &event.outcome_state {
            OutcomeState::Present(existing) => {
                let mut updated = existing.clone();
                mutate(&mut updated);
                (self.inner.ctx.outcomes.add_outcome(updated).await?, true)
            }
            OutcomeState::CreateWith => {
                let mut outcome = Outcome::new(event.task.version_id.clone(), event.occurrence.start, now);
                mutate(&mut outcome);
                (self.inner.ctx.outcomes.add_outcome(outcome).await?, true)
            }
            OutcomeState::Mocked => {
                let mut outcome = Outcome::new(event.task.version_id.clone(), event.occurrence.start, now);
                mutate(&mut outcome);
                (outcome, false)
            }
            OutcomeState::PreventCreation => {
                return Err(StoreError::Scheduler(SchedulerError::CompletionCreationPrevented));
            }
        };

        event.outcome_state = OutcomeState::Present(outcome.clone());
        if persisted {
            self.notify(SaveEvent::OutcomeSaved(outcome));
        }
        Ok(())
    }

    /// Runs one notification reconciliation pass. A host typically calls
    /// this on app foreground/background transitions and after
    /// `upsert_task`/`delete_tasks`, debounced by its own timer.
    pub async fn reconcile_notifications(&self, now: DateTime<Utc>) -> Result<ReconcileState> {
        self.inner.reconciler.reconcile(now).await
    }

    /// Cancels any in-flight reconciliation pass at its next cooperative
    /// check point. Does not interrupt OS calls already issued.
    pub fn cancel_reconciliation(&self) {
        let _ = self.inner.cancel_tx.send(true);
    }
}
