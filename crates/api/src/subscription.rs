use std::sync::Weak;

use caretask_domain::{Outcome, TaskVersion, ID};

use crate::Inner;

/// What changed, delivered to `didSave` subscribers after the write that
/// caused it has already been persisted.
#[derive(Debug, Clone)]
pub enum SaveEvent {
    TaskUpserted { task: TaskVersion, did_change: bool },
    TaskDeleted { version_id: ID },
    OutcomeSaved(Outcome),
}

/// A cancellable handle to a `subscribe_did_save` registration. Dropping it
/// without calling `cancel` leaves the subscription active; subscribers live
/// for the `TaskScheduler`'s lifetime unless explicitly torn down.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub(crate) fn new(id: u64, inner: Weak<Inner>) -> Self {
        Self { id, inner }
    }

    /// Unregisters the handler. A no-op if the owning `TaskScheduler` has
    /// already been dropped.
    pub fn cancel(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().unwrap_or_else(|e| e.into_inner()).retain(|(id, _)| *id != self.id);
        }
    }
}
