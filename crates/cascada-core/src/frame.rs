//! Frame / scope tree.
//!
//! A [`Frame`] is a node in a tree shared by every concurrently-running
//! closure descending from it — exactly the role `Context`/`MutableContext`
//! play in `core/src/ctx/context.rs`, generalized with the write-count and
//! read-set bookkeeping the spec's parallel-for analysis needs. Interior
//! mutability lives behind a [`parking_lot::Mutex`] (the teacher reaches for
//! `parking_lot` wherever a context needs cheap, uncontended locking) because
//! many sibling closures hold a clone of the same `Arc<Frame>` and read/write
//! it concurrently between `.await` points.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cascada_value::Value;
use parking_lot::Mutex;

/// Flags a frame is created with.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameFlags {
    /// May host new declarations reached via `set` when no ancestor already
    /// declares the name (block/macro/loop/top-level bodies; not `if`/`while`
    /// bodies, which merely shadow).
    pub create_scope: bool,
    /// Write propagation (see [`Frame::set`]) stops at this frame even if an
    /// ancestor already declares the name — used at `include` boundaries so
    /// an included template cannot reach back into its includer's scope.
    pub isolate_writes: bool,
    pub top_level: bool,
    pub is_included: bool,
    /// The frame sequence-lock-prefixed names are conceptually declared at —
    /// the render's top level, so a `!`-path resolves to the same lock no
    /// matter how deeply nested the call site is.
    pub sequence_lock_root: bool,
}

impl FrameFlags {
    pub fn top_level() -> FrameFlags {
        FrameFlags { create_scope: true, top_level: true, sequence_lock_root: true, ..Default::default() }
    }

    pub fn child_scope() -> FrameFlags {
        FrameFlags { create_scope: true, ..Default::default() }
    }

    pub fn transparent() -> FrameFlags {
        FrameFlags::default()
    }

    pub fn included() -> FrameFlags {
        FrameFlags { create_scope: true, isolate_writes: true, is_included: true, ..Default::default() }
    }
}

#[derive(Default)]
struct FrameInner {
    declared: HashSet<String>,
    vars: HashMap<String, Value>,
    write_counts: HashMap<String, u32>,
    read_vars: HashSet<String>,
}

/// A node in the scope tree. Cloning a `Frame` handle is cheap (it is an
/// `Arc` internally); every closure that needs to observe or mutate scope
/// state holds one of these clones.
#[derive(Clone)]
pub struct Frame(Arc<FrameNode>);

struct FrameNode {
    parent: Option<Frame>,
    flags: FrameFlags,
    inner: Mutex<FrameInner>,
}

/// A pinned copy of the variables a child closure is allowed to observe at
/// the moment it branched off — the union of names this frame (and its
/// ancestors, up to the first write) read or wrote before the branch.
/// Restoring pins a parallel sibling's view of the world so it cannot
/// observe another sibling's later write.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    values: HashMap<String, Value>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }
}

impl Frame {
    pub fn root(flags: FrameFlags) -> Frame {
        Frame(Arc::new(FrameNode { parent: None, flags, inner: Mutex::new(FrameInner::default()) }))
    }

    /// A fresh top-level frame — the root of a render's scope tree, or of a
    /// freshly-entered module/macro scope.
    pub fn top_level() -> Frame {
        Frame::root(FrameFlags::top_level())
    }

    pub fn child(&self, flags: FrameFlags) -> Frame {
        Frame(Arc::new(FrameNode { parent: Some(self.clone()), flags, inner: Mutex::new(FrameInner::default()) }))
    }

    pub fn flags(&self) -> FrameFlags {
        self.0.flags
    }

    fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Declares `name` in this frame directly, bound to `value` (used for
    /// macro parameters, loop variables, and `{% set %}` targets that create
    /// a fresh binding).
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut inner = self.0.inner.lock();
        inner.vars.insert(name.clone(), value);
        inner.declared.insert(name);
    }

    /// Walks up from `self` to find the frame that declares `name`, stopping
    /// at an `isolate_writes` boundary. Returns `None` if no frame up to (and
    /// including) that boundary declares it.
    fn find_declaring(&self, name: &str) -> Option<Frame> {
        let mut cur = self.clone();
        loop {
            if cur.0.inner.lock().declared.contains(name) {
                return Some(cur);
            }
            if cur.0.flags.isolate_writes {
                return None;
            }
            match &cur.0.parent {
                Some(p) => cur = p.clone(),
                None => return None,
            }
        }
    }

    fn nearest_create_scope(&self) -> Frame {
        let mut cur = self.clone();
        loop {
            if cur.0.flags.create_scope {
                return cur;
            }
            match &cur.0.parent {
                Some(p) => cur = p.clone(),
                None => return cur,
            }
        }
    }

    /// Reads `name`, recording the read against every intermediate frame
    /// between `self` and the declaring frame that has not already recorded
    /// either a read or a write of it this block. Undeclared names resolve to [`Value::Undef`].
    pub fn get(&self, name: &str) -> Value {
        let Some(declaring) = self.find_declaring(name) else {
            return Value::Undef;
        };
        let mut cur = self.clone();
        while !cur.ptr_eq(&declaring) {
            let mut inner = cur.0.inner.lock();
            if !inner.read_vars.contains(name) && !inner.write_counts.contains_key(name) {
                inner.read_vars.insert(name.to_string());
            }
            drop(inner);
            cur = cur.0.parent.clone().expect("declaring frame is an ancestor of self");
        }
        declaring.0.inner.lock().vars.get(name).cloned().unwrap_or(Value::Undef)
    }

    /// Binds `name` to `value`, creating the declaration in the nearest
    /// `create_scope` ancestor when no frame already declares it. Then
    /// records the write
    /// against every frame strictly between `self` and the declaring frame:
    /// the first write a frame performs this block is propagated to its
    /// parent, subsequent writes are not (step 2) — this is the "one write
    /// per async block is propagated" rule a parent needs to decide whether
    /// sibling closures require a snapshot.
    pub fn set(&self, name: &str, value: Value) {
        let declaring = match self.find_declaring(name) {
            Some(d) => d,
            None => {
                let target = self.nearest_create_scope();
                target.0.inner.lock().declared.insert(name.to_string());
                target
            }
        };
        declaring.0.inner.lock().vars.insert(name.to_string(), value);

        let mut cur = self.clone();
        while !cur.ptr_eq(&declaring) {
            let mut inner = cur.0.inner.lock();
            let count = inner.write_counts.entry(name.to_string()).or_insert(0);
            *count += 1;
            let is_first_write = *count == 1;
            drop(inner);
            if !is_first_write {
                break;
            }
            cur = match &cur.0.parent {
                Some(p) => p.clone(),
                None => break,
            };
        }
    }

    /// Names read or written-once-and-propagated in this frame — the inputs
    /// a child async closure branching off here needs pinned.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.0.inner.lock();
        let mut snap = Snapshot::default();
        for name in inner.read_vars.iter().chain(inner.write_counts.keys()) {
            let value = self.get_local_or_ancestor(name);
            snap.insert(name.clone(), value);
        }
        drop(inner);
        if let Some(parent) = &self.0.parent {
            let parent_snap = parent.snapshot();
            for (k, v) in parent_snap.values {
                snap.values.entry(k).or_insert(v);
            }
        }
        snap
    }

    fn get_local_or_ancestor(&self, name: &str) -> Value {
        let mut cur = self.clone();
        loop {
            if let Some(v) = cur.0.inner.lock().vars.get(name) {
                return v.clone();
            }
            match &cur.0.parent {
                Some(p) => cur = p.clone(),
                None => return Value::Undef,
            }
        }
    }

    /// Restores pinned bindings into this frame, declaring them locally so a
    /// parallel sibling's later write to the same name in a shared ancestor
    /// cannot leak in.
    pub fn restore(&self, snapshot: &Snapshot) {
        let mut inner = self.0.inner.lock();
        for (name, value) in &snapshot.values {
            inner.declared.insert(name.clone());
            inner.vars.insert(name.clone(), value.clone());
        }
    }

    /// `true` if this frame (not through an ancestor) already declares
    /// `name` — used by the guard compiler/engine boundary to validate that
    /// a guard variable is genuinely visible from an outer scope.
    pub fn declares_locally(&self, name: &str) -> bool {
        self.0.inner.lock().declared.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_then_get_round_trips_in_same_frame() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("x", Value::from(1));
        assert_eq!(root.get("x"), Value::from(1));
    }

    #[test]
    fn child_write_to_undeclared_name_creates_it_at_nearest_create_scope_ancestor() {
        let root = Frame::root(FrameFlags::top_level());
        let child = root.child(FrameFlags::transparent());
        child.set("x", Value::from(1));
        // `if`/`while` bodies (transparent, not create_scope) don't host new
        // declarations; the write lands on the nearest create_scope ancestor.
        assert_eq!(root.get("x"), Value::from(1));
    }

    #[test]
    fn loop_body_child_scope_shadows_instead_of_leaking_to_parent() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("x", Value::from(1));
        let child = root.child(FrameFlags::child_scope());
        child.declare("x", Value::Undef);
        child.set("x", Value::from(2));
        assert_eq!(child.get("x"), Value::from(2));
        assert_eq!(root.get("x"), Value::from(1));
    }

    #[test]
    fn isolated_frame_does_not_see_outer_declaration_for_writes() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("x", Value::from(1));
        let included = root.child(FrameFlags::included());
        included.set("x", Value::from(99));
        assert_eq!(root.get("x"), Value::from(1));
        assert_eq!(included.get("x"), Value::from(99));
    }

    #[test]
    fn get_records_a_read_on_every_intermediate_frame() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("x", Value::from(1));
        let mid = root.child(FrameFlags::transparent());
        let leaf = mid.child(FrameFlags::transparent());
        leaf.get("x");
        assert!(mid.0.inner.lock().read_vars.contains("x"));
    }

    #[test]
    fn snapshot_captures_reads_and_ancestor_first_writes() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("total", Value::from(0));
        let branch = root.child(FrameFlags::transparent());
        branch.get("total");
        let snap = branch.snapshot();
        assert_eq!(snap.get("total"), Some(&Value::from(0)));
    }

    #[test]
    fn restored_snapshot_is_immune_to_a_later_sibling_write() {
        let root = Frame::root(FrameFlags::top_level());
        root.set("total", Value::from(1));
        let sibling_a = root.child(FrameFlags::transparent());
        let snap = sibling_a.snapshot();
        let pinned = Frame::root(FrameFlags::top_level());
        pinned.restore(&snap);
        root.set("total", Value::from(2));
        assert_eq!(pinned.get("total"), Value::from(1));
    }
}
