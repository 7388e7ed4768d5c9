//! The command buffer and built-in handlers.
//!
//! Every `@handler.path.method(args)` reaching the executor becomes a
//! [`CommandRecord`] appended to a [`CommandBuffer`] in program order. The
//! buffer groups records by handler and, once a record's dependencies have
//! resolved, dispatches it to that handler's [`Handler`] impl — strictly in
//! `seq` order per handler, concurrently across handlers.

mod data;
mod text;

pub use data::DataHandler;
pub use text::TextHandler;

use std::collections::BTreeMap;
use std::sync::Arc;

use cascada_value::{Error as ValueError, Part, Value};
use parking_lot::Mutex;
use tracing::trace;

/// One resolved step of a command's path — by the time a record reaches the
/// buffer every `ExprIndex`/`LastIndex` has already been turned into either
/// a concrete field/index or left as [`PathStepResolved::LastIndex`], which
/// only the `data` handler (the owner of "most recently appended") can
/// finish resolving at dispatch time.
#[derive(Clone, Debug)]
pub enum PathStepResolved {
    Field(String),
    Index(usize),
    LastIndex,
}

impl PathStepResolved {
    fn into_part(self, last_index_target: Option<usize>) -> Option<Part> {
        match self {
            PathStepResolved::Field(f) => Some(Part::Field(f)),
            PathStepResolved::Index(i) => Some(Part::Index(i)),
            PathStepResolved::LastIndex => last_index_target.map(Part::Index),
        }
    }
}

/// A fully resolved command, ready for dispatch.
#[derive(Clone, Debug)]
pub struct CommandRecord {
    pub handler: String,
    pub path: Vec<PathStepResolved>,
    pub method: String,
    pub args: Vec<Value>,
    pub seq: u64,
}

/// A handler's contract: apply one resolved command against handler state
/// addressed by `path`, and hand back a value when the command was used in
/// expression position (`@text(...)` inline, for example).
pub trait Handler: Send + Sync {
    /// Applies `method` with `args` at `path` (already resolved down to
    /// plain field/index steps; [`PathStepResolved::LastIndex`] has been
    /// turned into a concrete index by the buffer before this is called).
    fn apply(&self, path: &[Part], method: &str, args: &[Value]) -> Result<Value, ValueError>;

    /// Current length of the list addressed by `path`, used to resolve a
    /// later command's `foo[]` (`LastIndex`) against this handler's state.
    /// Handlers with no notion of "the last list this command touched"
    /// (most custom handlers) can return `None`.
    fn list_len(&self, _path: &[Part]) -> Option<usize> {
        None
    }

    /// The handler's current value, read by the assembly step.
    fn snapshot(&self) -> Value;

    /// Replaces the handler's entire state — used by guard revert.
    fn restore(&self, snapshot: Value);

    /// A fresh instance of this handler in its initial state — used to seed
    /// an isolated command buffer (a parallel `for` iteration, a `capture`,
    /// a macro invocation) with every handler the render has registered,
    /// not just the two built-ins `CommandBuffer::default` installs.
    fn fresh(&self) -> Arc<dyn Handler>;
}

/// The buffer of every command emitted during a render, grouped by handler
/// and dispatched in `seq` order per handler.
pub struct CommandBuffer {
    handlers: Mutex<BTreeMap<String, Arc<dyn Handler>>>,
    /// Position each handler has dispatched up to — a guard snapshot is just
    /// "how many records has this handler's queue drained", recorded here so
    /// revert knows it cannot be about record counts once dispatch may be
    /// concurrent across handlers; the handler's own `restore`/`snapshot`
    /// carries the actual state.
    len: Mutex<usize>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        let mut handlers: BTreeMap<String, Arc<dyn Handler>> = BTreeMap::new();
        handlers.insert("data".to_string(), Arc::new(DataHandler::new()));
        handlers.insert("text".to_string(), Arc::new(TextHandler::new()));
        CommandBuffer { handlers: Mutex::new(handlers), len: Mutex::new(0) }
    }
}

impl CommandBuffer {
    pub fn new() -> CommandBuffer {
        CommandBuffer::default()
    }

    /// Builds an isolated buffer seeded with a fresh instance of every
    /// handler `parent` currently has registered — the two built-ins plus
    /// whatever custom handlers the render added — so a `@<custom>...`
    /// command reached from inside a parallel `for` iteration, a `capture`,
    /// or a macro body finds its handler instead of hitting `dispatch`'s
    /// "unknown command handler" path.
    pub fn fresh_for(parent: &CommandBuffer) -> CommandBuffer {
        let handlers: BTreeMap<String, Arc<dyn Handler>> =
            parent.handlers.lock().iter().map(|(name, handler)| (name.clone(), handler.fresh())).collect();
        CommandBuffer { handlers: Mutex::new(handlers), len: Mutex::new(0) }
    }

    /// Registers a handler under `name`, replacing the built-in `data`/
    /// `text` handler of the same name if present. Factory handlers get a
    /// fresh instance per render by being constructed right before this call.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.lock().insert(name.into(), handler);
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.lock().get(name).cloned()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.lock().keys().cloned().collect()
    }

    /// Dispatches one resolved record: resolves any trailing `LastIndex`
    /// against the handler's own notion of "the list this path currently
    /// points at", then applies `method`. A poisoned record (an argument
    /// that failed to resolve) is the caller's job to detect before calling
    /// this — `spec.md` §7 says a poisoned *statement-style* command aborts
    /// assembly of its handler, so the executor checks for poison in
    /// `record.args` before ever reaching dispatch.
    pub fn dispatch(&self, record: CommandRecord) -> Result<Value, ValueError> {
        let handler = self
            .handlers
            .lock()
            .get(&record.handler)
            .cloned()
            .ok_or_else(|| ValueError::custom(format!("unknown command handler {:?}", record.handler)))?;

        let mut resolved_path = Vec::with_capacity(record.path.len());
        for (i, step) in record.path.iter().enumerate() {
            let prefix_parts: Vec<Part> = resolved_path.clone();
            let last_target = if matches!(step, PathStepResolved::LastIndex) {
                handler.list_len(&prefix_parts).map(|len| len.saturating_sub(1))
            } else {
                None
            };
            if let Some(part) = step.clone().into_part(last_target) {
                resolved_path.push(part);
            } else {
                let _ = i;
            }
        }
        *self.len.lock() += 1;
        trace!(handler = %record.handler, method = %record.method, seq = record.seq, "dispatching command");
        handler.apply(&resolved_path, &record.method, &record.args)
    }

    pub fn dispatched_count(&self) -> usize {
        *self.len.lock()
    }
}
