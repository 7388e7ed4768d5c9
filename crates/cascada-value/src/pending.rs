use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OnceCell};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct PendingCell {
    id: u64,
    result: OnceCell<Value>,
    notify: Notify,
}

/// A value that has not yet resolved.
///
/// `Pending` resolves exactly once; calling [`Pending::resolve`] a second time
/// is a no-op. Equality is by identity — two distinct `Pending`s that happen
/// to resolve to the same `Value` are never equal, and a `Pending` is always
/// equal to its own clones, because clones share the same underlying cell.
#[derive(Clone)]
pub struct Pending(Arc<PendingCell>);

impl Pending {
    /// Creates a new, unresolved `Pending`.
    pub fn new() -> Self {
        Pending(Arc::new(PendingCell {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            result: OnceCell::new(),
            notify: Notify::new(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Resolves this pending value. Idempotent: the first call wins, later
    /// calls are ignored.
    pub fn resolve(&self, value: Value) {
        if self.0.result.set(value).is_ok() {
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.0.result.initialized()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.0.result.get()
    }

    /// Awaits resolution, returning the resolved value (cloned out of the
    /// shared cell).
    pub async fn await_value(&self) -> Value {
        loop {
            if let Some(v) = self.0.result.get() {
                return v.clone();
            }
            let notified = self.0.notify.notified();
            // Re-check after subscribing to avoid missing a notification that
            // happened between the first `get` and now.
            if let Some(v) = self.0.result.get() {
                return v.clone();
            }
            notified.await;
        }
    }
}

impl Default for Pending {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("id", &self.0.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
