pub mod reconciler;

use async_trait::async_trait;
use caretask_domain::ID;
use chrono::{DateTime, Utc};

/// A notification request as understood by the OS notification center: an
/// identifier, display content, and a trigger. Kept separate from domain
/// types (`TaskVersion`, `Event`) and converted at the service boundary, so
/// a platform adapter never has to reach back into the domain model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub identifier: String,
    pub task_id: ID,
    pub title: String,
    pub body: String,
    pub thread_identifier: Option<String>,
    pub category_identifier: Option<String>,
    pub time_sensitive: bool,
    pub trigger: NotificationTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTrigger {
    Once(DateTime<Utc>),
    RepeatingCalendar { hour: Option<u32>, minute: u32, second: u32, weekday: Option<chrono::Weekday> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
}

/// Facade over the OS notification center. A single in-process
/// implementation is provided for tests; a host application supplies its
/// own platform adapter.
#[async_trait]
pub trait NotificationCenter: Send + Sync {
    async fn pending_requests(&self) -> Vec<NotificationRequest>;
    async fn add(&self, request: NotificationRequest) -> anyhow::Result<()>;
    async fn remove(&self, identifiers: &[String]) -> anyhow::Result<()>;
    async fn authorization_status(&self) -> AuthorizationStatus;
    async fn request_authorization(&self) -> anyhow::Result<AuthorizationStatus>;
    /// OS-imposed ceiling on simultaneously pending requests, across every
    /// app/process sharing the notification center.
    fn pending_notifications_limit(&self) -> u32;
}

/// Facade over OS background app-refresh scheduling.
#[async_trait]
pub trait BackgroundTaskScheduler: Send + Sync {
    async fn submit(&self, earliest_begin_date: DateTime<Utc>) -> anyhow::Result<()>;
    async fn cancel_all(&self) -> anyhow::Result<()>;
}

/// In-memory `NotificationCenter` double. Used by tests and by hosts that
/// have not wired a platform adapter yet.
#[derive(Debug)]
pub struct InMemoryNotificationCenter {
    pending: std::sync::Mutex<Vec<NotificationRequest>>,
    authorization: std::sync::Mutex<AuthorizationStatus>,
    limit: u32,
    add_calls: std::sync::atomic::AtomicU64,
    remove_calls: std::sync::atomic::AtomicU64,
}

impl InMemoryNotificationCenter {
    pub fn new(limit: u32) -> Self {
        Self {
            pending: std::sync::Mutex::new(Vec::new()),
            authorization: std::sync::Mutex::new(AuthorizationStatus::NotDetermined),
            limit,
            add_calls: std::sync::atomic::AtomicU64::new(0),
            remove_calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_authorization(limit: u32, status: AuthorizationStatus) -> Self {
        let center = Self::new(limit);
        *center.authorization.lock().unwrap_or_else(|e| e.into_inner()) = status;
        center
    }

    /// Total `add` calls observed so far, for tests asserting a reconciliation
    /// pass issued (or did not issue) any OS writes.
    pub fn add_call_count(&self) -> u64 {
        self.add_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn remove_call_count(&self) -> u64 {
        self.remove_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationCenter for InMemoryNotificationCenter {
    async fn pending_requests(&self) -> Vec<NotificationRequest> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn add(&self, request: NotificationRequest) -> anyhow::Result<()> {
        self.add_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|r| r.identifier != request.identifier);
        pending.push(request);
        Ok(())
    }

    async fn remove(&self, identifiers: &[String]) -> anyhow::Result<()> {
        self.remove_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|r| !identifiers.contains(&r.identifier));
        Ok(())
    }

    async fn authorization_status(&self) -> AuthorizationStatus {
        *self.authorization.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_authorization(&self) -> anyhow::Result<AuthorizationStatus> {
        let mut status = self.authorization.lock().unwrap_or_else(|e| e.into_inner());
        *status = AuthorizationStatus::Authorized;
        Ok(*status)
    }

    fn pending_notifications_limit(&self) -> u32 {
        self.limit
    }
}

/// In-memory `BackgroundTaskScheduler` double, recording the most recent
/// submission for test assertions.
#[derive(Debug, Default)]
pub struct InMemoryBackgroundTaskScheduler {
    last_submitted: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl InMemoryBackgroundTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_submitted(&self) -> Option<DateTime<Utc>> {
        *self.last_submitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BackgroundTaskScheduler for InMemoryBackgroundTaskScheduler {
    async fn submit(&self, earliest_begin_date: DateTime<Utc>) -> anyhow::Result<()> {
        *self.last_submitted.lock().unwrap_or_else(|e| e.into_inner()) = Some(earliest_begin_date);
        Ok(())
    }

    async fn cancel_all(&self) -> anyhow::Result<()> {
        *self.last_submitted.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
