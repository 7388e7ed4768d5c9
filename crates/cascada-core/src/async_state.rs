//! Async closure accounting.
//!
//! A render tree needs to know when every outstanding async closure has
//! actually settled before it can assemble a result. Built the way shared
//! mutable counters are built elsewhere in this runtime: `Arc` + atomics for
//! the counter, a [`tokio::sync::Notify`] for wakeup, the same primitive
//! `core/src/dbs/distinct.rs`-style concurrent coordination reaches for.
//!
//! Every concurrent fan-out this runtime actually performs — `eval.rs`'s
//! `join_all` over independent subexpressions, `exec.rs`'s `Parallel`
//! `for`-loop strategy — is inline-awaited before the awaiting code goes on
//! to do anything else; nothing is ever spawned as a detached task that
//! could outlive its caller. [`AsyncState::enter_closure`]/[`leave_closure`]
//! are bracketed around the one place that's a true async *closure* in
//! §4.3's sense (a parallel `for` iteration's body, in `exec::exec_for`);
//! by the time `render.rs`'s `rt.async_state.wait_all()` runs, every
//! iteration has therefore already completed and the counter it reads is
//! already zero. `wait_all` is not dead weight — it is what a future
//! detached-spawn path (a host callback fired via `tokio::spawn` instead of
//! awaited in place) would need to synchronize on — but under the current
//! fully-inline-await execution model it is this module's `child`/`cancel`
//! that remain genuinely unused: no code path here ever needs a *separate*
//! node pinned to its own snapshot frame (every snapshot a parallel closure
//! needs is already captured by `Frame::child`/`Frame::snapshot`), and
//! nothing currently distinguishes a "runtime-fatal" abort from an ordinary
//! poison to call [`AsyncState::cancel`] from.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::frame::Frame;

struct AsyncStateNode {
    parent: Option<AsyncState>,
    active: AtomicU64,
    cancelled: AtomicBool,
    notify: Notify,
    /// Pins the frame this node's children branched off of, so a snapshot
    /// taken for a parallel sibling stays valid for as long as any sibling
    /// closure under this node might still run.
    snapshot_frame: Frame,
}

/// A node tracking outstanding asynchronous work under a pinned frame.
#[derive(Clone)]
pub struct AsyncState(Arc<AsyncStateNode>);

impl AsyncState {
    pub fn new_root(frame: Frame) -> AsyncState {
        AsyncState(Arc::new(AsyncStateNode {
            parent: None,
            active: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            snapshot_frame: frame,
        }))
    }

    /// Spawns a child node pinned to `frame` (typically a snapshot restored
    /// for a parallel closure). The parent's outstanding-work counter is not
    /// touched by creation alone — [`AsyncState::enter_closure`] is what
    /// actually marks work as outstanding.
    pub fn child(&self, frame: Frame) -> AsyncState {
        AsyncState(Arc::new(AsyncStateNode {
            parent: Some(self.clone()),
            active: AtomicU64::new(0),
            cancelled: AtomicBool::new(self.is_cancelled()),
            notify: Notify::new(),
            snapshot_frame: frame,
        }))
    }

    pub fn snapshot_frame(&self) -> &Frame {
        &self.0.snapshot_frame
    }

    /// Marks one more unit of outstanding work, propagating up the chain so
    /// ancestors know a descendant is still busy.
    pub fn enter_closure(&self) {
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            node.0.active.fetch_add(1, Ordering::SeqCst);
            cur = node.0.parent.clone();
        }
    }

    /// Marks one unit of outstanding work as finished. When a node's counter
    /// reaches zero its waiters are woken — `wait_all` on an ancestor only
    /// returns once every descendant chain has separately hit zero, because
    /// the decrement here propagates to ancestors too.
    pub fn leave_closure(&self) {
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            let prev = node.0.active.fetch_sub(1, Ordering::SeqCst);
            debug_assert!(prev > 0, "leave_closure called without a matching enter_closure");
            if prev == 1 {
                node.0.notify.notify_waiters();
            }
            cur = node.0.parent.clone();
        }
    }

    fn active_count(&self) -> u64 {
        self.0.active.load(Ordering::SeqCst)
    }

    /// Waits until every closure descending from this node has completed.
    /// Returns immediately if there is nothing outstanding; multiple callers
    /// waiting concurrently are all woken by the same notification.
    pub async fn wait_all(&self) {
        loop {
            if self.active_count() == 0 {
                return;
            }
            let notified = self.0.notify.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Flips this node and its descendants into the cancelled state — set
    /// once a non-poison fatal failure occurs. Already-running closures
    /// still run to completion (cooperative, no preemption) but their
    /// outputs should be discarded by the caller once observed.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;

    #[tokio::test]
    async fn wait_all_resolves_immediately_when_idle() {
        let state = AsyncState::new_root(Frame::root(FrameFlags::top_level()));
        state.wait_all().await;
    }

    #[tokio::test]
    async fn wait_all_blocks_until_leave_closure() {
        let state = AsyncState::new_root(Frame::root(FrameFlags::top_level()));
        state.enter_closure();
        let waiter = state.clone();
        let handle = tokio::spawn(async move { waiter.wait_all().await });
        tokio::task::yield_now().await;
        state.leave_closure();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn child_completion_propagates_to_parent_counter() {
        let root = AsyncState::new_root(Frame::root(FrameFlags::top_level()));
        let child = root.child(Frame::root(FrameFlags::top_level()));
        child.enter_closure();
        let parent_wait = root.clone();
        let handle = tokio::spawn(async move { parent_wait.wait_all().await });
        tokio::task::yield_now().await;
        child.leave_closure();
        handle.await.unwrap();
    }

    #[test]
    fn cancellation_is_visible_on_the_node_it_was_called_on() {
        let state = AsyncState::new_root(Frame::root(FrameFlags::top_level()));
        assert!(!state.is_cancelled());
        state.cancel();
        assert!(state.is_cancelled());
    }
}
