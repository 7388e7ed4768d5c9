//! Top-level render orchestration.
//!
//! Builds a fresh [`Rt`] for one render, runs the compiled program's body,
//! waits for every still-outstanding async closure to settle, and then
//! assembles the result: either a single handler's value (when the program
//! declared a `focus`) or a map of every handler's snapshot keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use cascada_expr::ir;
use cascada_value::{Poison, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::async_state::AsyncState;
use crate::cmd::CommandBuffer;
use crate::exec::exec_stmts;
use crate::frame::Frame;
use crate::globals::install_builtins;
use crate::rt::{EvalFlags, Globals, Rt, TemplateResolver};
use crate::seqlock::SequenceLockTable;

/// One render's outcome: either the single value a `focus` directive
/// selected, or every handler's current state keyed by name.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Focused(Value),
    Container(IndexMap<String, Value>),
}

impl RenderOutcome {
    /// The rendered text, regardless of whether the program focused on a
    /// different handler — `None` only if `text` itself was focused away
    /// from and the container has no `text` entry (custom-handler-only
    /// renders).
    pub fn text(&self) -> Option<String> {
        match self {
            RenderOutcome::Focused(Value::Str(s)) => Some(s.clone()),
            RenderOutcome::Focused(_) => None,
            RenderOutcome::Container(map) => map.get("text").map(|v| v.to_string()),
        }
    }
}

/// Inputs a render needs beyond the compiled program itself.
pub struct RenderRequest {
    pub globals: Arc<Globals>,
    pub flags: EvalFlags,
    pub resolver: Option<Arc<dyn TemplateResolver>>,
    /// Factory handlers registered for this render — built fresh per render
    /// so stateful custom handlers never leak state across renders.
    pub handlers: Vec<(String, Arc<dyn crate::cmd::Handler>)>,
}

/// Runs `program` to completion and assembles its result.
pub async fn render(program: &ir::Program, request: RenderRequest) -> Result<RenderOutcome, Poison> {
    let cmd = Arc::new(CommandBuffer::new());
    for (name, handler) in request.handlers {
        cmd.register(name, handler);
    }

    let mut globals = Globals {
        values: request.globals.values.clone(),
        filters: request.globals.filters.clone(),
        tests: request.globals.tests.clone(),
        functions: request.globals.functions.clone(),
    };
    install_builtins(&mut globals);

    let root_frame = Frame::top_level();
    let rt = Rt {
        frame: root_frame.clone(),
        async_state: AsyncState::new_root(root_frame),
        cmd,
        seqlocks: Arc::new(SequenceLockTable::new()),
        globals: Arc::new(globals),
        flags: request.flags,
        resolver: request.resolver,
        macros: Arc::new(Mutex::new(HashMap::new())),
        caller: None,
        blocks: Arc::new(Mutex::new(HashMap::new())),
        errors: Arc::new(Mutex::new(None)),
    };

    exec_stmts(&rt, &program.body).await;
    rt.async_state.wait_all().await;

    if let Some(poison) = rt.errors.lock().clone() {
        return Err(poison);
    }

    Ok(assemble(&rt, program.focus.as_deref()))
}

fn assemble(rt: &Rt, focus: Option<&str>) -> RenderOutcome {
    if let Some(name) = focus {
        let v = rt.cmd.handler(name).map(|h| h.snapshot()).unwrap_or(Value::Undef);
        return RenderOutcome::Focused(v);
    }
    let mut map = IndexMap::new();
    for name in rt.cmd.handler_names() {
        if let Some(handler) = rt.cmd.handler(&name) {
            map.insert(name, handler.snapshot());
        }
    }
    RenderOutcome::Container(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascada_expr::ir::{Expr, ExprKind, Stmt, StmtKind};
    use pretty_assertions::assert_eq;

    fn text_stmt(s: &str) -> Stmt {
        Stmt { is_async: false, kind: StmtKind::Text(s.to_string()) }
    }

    fn output_str(s: &str) -> Stmt {
        Stmt {
            is_async: false,
            kind: StmtKind::Output(Expr { is_async: false, kind: ExprKind::Str(s.to_string()) }),
        }
    }

    #[tokio::test]
    async fn renders_plain_text_and_output() {
        let program = ir::Program { focus: None, body: vec![text_stmt("hello "), output_str("world")] };
        let request = RenderRequest {
            globals: Arc::new(Globals::default()),
            flags: EvalFlags::default(),
            resolver: None,
            handlers: vec![],
        };
        let outcome = render(&program, request).await.unwrap();
        assert_eq!(outcome.text().as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn focus_selects_a_single_handler_value() {
        let program = ir::Program { focus: Some("text".to_string()), body: vec![output_str("hi")] };
        let request = RenderRequest {
            globals: Arc::new(Globals::default()),
            flags: EvalFlags::default(),
            resolver: None,
            handlers: vec![],
        };
        let outcome = render(&program, request).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Focused(Value::from("hi")));
    }
}
