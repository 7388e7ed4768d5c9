//! Sequence lock table.
//!
//! Keyed by a resolved [`LockKey`] (a `cascada-expr::ir::LockKey` with any
//! dynamic path segments already evaluated down to strings), each key owns
//! a strict FIFO: whichever call reaches the head of the queue runs first,
//! full stop, regardless of how long its arguments or dependencies take to
//! resolve relative to calls queued after it. This is implemented as a
//! ticket lock (a `DashMap<LockKey, Arc<Ticket>>`, grounded in the teacher's
//! `dashmap` usage for concurrent keyed state in `core/src/idx`) rather than
//! a `VecDeque` of waiters: a ticket is drawn synchronously, in program
//! order, the instant a locked call is reached, so ordering is fixed before
//! any `.await` — the same moment a command is assigned its `seq` in
//! `cascada-expr::compile`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cascada_expr::ir::LockKey;
use dashmap::DashMap;
use tokio::sync::Notify;

struct Ticket {
    next: AtomicU64,
    now_serving: AtomicU64,
    notify: Notify,
}

impl Default for Ticket {
    fn default() -> Self {
        Ticket { next: AtomicU64::new(0), now_serving: AtomicU64::new(0), notify: Notify::new() }
    }
}

/// A handle to one acquired position in a sequence lock's FIFO. Dropping it
/// releases the lock for the next queued task — the spec requires the lock
/// to stay held until the task's own result (value or poison) has settled,
/// so callers should hold the guard across that `.await`, not just across
/// the dispatch call itself.
pub struct LockGuard {
    ticket: Arc<Ticket>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.ticket.now_serving.fetch_add(1, Ordering::SeqCst);
        self.ticket.notify.notify_waiters();
    }
}

/// The process-wide... no — per-render table of sequence locks. One table
/// per render.
#[derive(Default)]
pub struct SequenceLockTable {
    tickets: DashMap<LockKey, Arc<Ticket>>,
}

impl SequenceLockTable {
    pub fn new() -> SequenceLockTable {
        SequenceLockTable::default()
    }

    /// Draws a ticket for `key` and waits until it is this caller's turn.
    /// Must be called at the point in program order the locked call is
    /// reached — ticket numbers are assigned in the order `acquire` calls
    /// happen, which is why callers must not `.await` anything between
    /// deciding to lock and calling this.
    pub async fn acquire(&self, key: LockKey) -> LockGuard {
        let ticket = self.tickets.entry(key).or_default().clone();
        let my_number = ticket.next.fetch_add(1, Ordering::SeqCst);
        while ticket.now_serving.load(Ordering::SeqCst) != my_number {
            let notified = ticket.notify.notified();
            if ticket.now_serving.load(Ordering::SeqCst) == my_number {
                break;
            }
            notified.await;
        }
        LockGuard { ticket }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn key(path: &[&str], method: Option<&str>) -> LockKey {
        LockKey { path: path.iter().map(|s| s.to_string()).collect(), method: method.map(str::to_string) }
    }

    #[tokio::test]
    async fn same_path_lock_runs_calls_in_program_order_regardless_of_delay() {
        let table = Arc::new(SequenceLockTable::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let g_a = table.acquire(key(&["accounts", "balance"], None)).await;
        let table_b = table.clone();
        let log_b = log.clone();
        let b = tokio::spawn(async move {
            let guard = table_b.acquire(key(&["accounts", "balance"], None)).await;
            log_b.lock().unwrap().push("B");
            drop(guard);
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        log.lock().unwrap().push("A");
        drop(g_a);
        b.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn different_methods_on_same_path_do_not_share_a_queue() {
        let table = SequenceLockTable::new();
        let g1 = table.acquire(key(&["p"], Some("m"))).await;
        let g2 = table.acquire(key(&["p"], Some("n"))).await;
        drop(g1);
        drop(g2);
    }
}
