//! The runtime handle threaded through the evaluator and statement executor.
//!
//! `Rt` bundles everything a render needs to look up while walking the
//! compiled [`cascada_expr::ir::Program`]: the current [`Frame`], the
//! [`AsyncState`] node for the closure currently running, the command
//! buffer, the sequence lock table, the global registries (values, filters,
//! tests, host functions) and, when composition is in play, a template
//! resolver for `include`/`extends`/`import`.

use std::collections::HashMap;
use std::sync::Arc;

use cascada_expr::ir;
use cascada_value::{Poison, Value};
use parking_lot::Mutex;

use crate::async_state::AsyncState;
use crate::cmd::CommandBuffer;
use crate::frame::Frame;
use crate::seqlock::SequenceLockTable;

/// Resolves a template name to its compiled form — implemented by the
/// `cascada` crate's `Loader`-backed cache; `cascada-core` only needs the
/// narrow "give me the compiled program for this name" contract.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<ir::Program>>;
}

/// An async-capable filter or test function.
pub trait HostFn: Send + Sync {
    fn call(&self, args: &[Value]) -> Value;
}

impl<F: Fn(&[Value]) -> Value + Send + Sync> HostFn for F {
    fn call(&self, args: &[Value]) -> Value {
        self(args)
    }
}

/// Environment flags that affect evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvalFlags {
    pub throw_on_undefined: bool,
    pub autoescape: bool,
    /// Verbose error traces — surfaced by the `cascada` crate's top-level
    /// error formatting, not consumed here.
    pub dev: bool,
    /// Whitespace adjustment around block tags, honored by the lexer
    /// alongside the explicit `{%-`/`-%}` markers already in the grammar.
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
}

/// The process-wide-at-setup, per-render-shared registries
///: configured once before any render
/// begins, read-only for the lifetime of every render that shares it.
#[derive(Default)]
pub struct Globals {
    pub values: HashMap<String, Value>,
    pub filters: HashMap<String, Arc<dyn HostFn>>,
    pub tests: HashMap<String, Arc<dyn HostFn>>,
    pub functions: HashMap<String, Arc<dyn HostFn>>,
}

/// A macro definition captured when a `{% macro %}` statement executes.
/// Macros are pure functions over a fresh frame — they do
/// not close over the defining frame's variables, only over the enclosing
/// program's other macro/globals visibility.
#[derive(Clone)]
pub struct MacroDef {
    pub params: Vec<ir::MacroParam>,
    pub focus: Option<String>,
    pub body: Arc<Vec<ir::Stmt>>,
    /// The registry the macro was defined against — calls to other macros
    /// from inside this macro's body resolve here, not against whatever
    /// registry happens to be live at the call site.
    pub macros: Arc<Mutex<HashMap<String, MacroDef>>>,
}

/// A `{% call %}` block's body, exposed to the invoked macro as the
/// zero-arg `caller()` function.
#[derive(Clone)]
pub struct CallerClosure {
    pub body: Arc<Vec<ir::Stmt>>,
    pub frame: Frame,
}

pub struct Rt {
    pub frame: Frame,
    pub async_state: AsyncState,
    pub cmd: Arc<CommandBuffer>,
    pub seqlocks: Arc<SequenceLockTable>,
    pub globals: Arc<Globals>,
    pub flags: EvalFlags,
    pub resolver: Option<Arc<dyn TemplateResolver>>,
    pub macros: Arc<Mutex<HashMap<String, MacroDef>>>,
    pub caller: Option<CallerClosure>,
    /// Named top-level blocks collected from the current template, used by
    /// `extends`'s single-level override + `super()` support.
    pub blocks: Arc<Mutex<HashMap<String, Arc<Vec<ir::Stmt>>>>>,
    /// The render's collected `Poison` errors, accumulated as statements consume poisoned values. Shared
    /// across every `Rt` clone for a render, never per-frame.
    pub errors: Arc<Mutex<Option<Poison>>>,
}

impl Rt {
    pub fn with_frame(&self, frame: Frame) -> Rt {
        Rt {
            frame,
            async_state: self.async_state.clone(),
            cmd: self.cmd.clone(),
            seqlocks: self.seqlocks.clone(),
            globals: self.globals.clone(),
            flags: self.flags,
            resolver: self.resolver.clone(),
            macros: self.macros.clone(),
            caller: self.caller.clone(),
            blocks: self.blocks.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Records a poisoned value's errors into the render-wide collection
    ///. Called whenever a statement consumes a `Poison`
    /// instead of propagating it further (an output tag, a command whose
    /// args poisoned, an uncaught `do` expression).
    pub fn record_poison(&self, p: Poison) {
        let mut guard = self.errors.lock();
        *guard = Some(match guard.take() {
            Some(existing) => existing.join(p),
            None => p,
        });
    }

    pub fn with_async_state(&self, async_state: AsyncState) -> Rt {
        Rt { async_state, ..self.with_frame(self.frame.clone()) }
    }

    pub fn with_caller(&self, caller: Option<CallerClosure>) -> Rt {
        Rt { caller, ..self.with_frame(self.frame.clone()) }
    }
}
