//! Statement executor.
//!
//! Statements run strictly in program order. This is a deliberate
//! simplification: [`crate::cmd::CommandBuffer::dispatch`] applies a record
//! the instant it is called rather than queueing by `seq`, so the only way
//! to guarantee "a handler sees its commands in program order" is for the
//! caller to *reach* `dispatch` in program order. Expression evaluation
//! inside a single statement still runs its independent operands
//! concurrently (`crate::eval`); it is only the statement-to-statement edge
//! that is sequential.

use std::collections::HashMap;
use std::sync::Arc;

use cascada_expr::ir;
use cascada_value::{Poison, Value};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;

use crate::cmd::CommandBuffer;
use crate::eval::{self, eval_expr, settle};
use crate::frame::{Frame, FrameFlags};
use crate::guard::exec_guard;
use crate::rt::{CallerClosure, MacroDef, Rt};

/// Runs every statement in `stmts` against `rt`, in order.
pub fn exec_stmts<'a>(rt: &'a Rt, stmts: &'a [ir::Stmt]) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        for stmt in stmts {
            exec_stmt(rt, stmt).await;
        }
    })
}

fn text_call(rt: &Rt, v: Value) {
    if let Some(handler) = rt.cmd.handler("text") {
        let _ = handler.apply(&[], "_call", &[v]);
    }
}

fn output(rt: &Rt, v: Value) {
    match v {
        Value::Poison(p) => rt.record_poison(p),
        other => text_call(rt, other),
    }
}

pub(crate) fn exec_stmt<'a>(rt: &'a Rt, stmt: &'a ir::Stmt) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        match &stmt.kind {
            ir::StmtKind::Text(s) | ir::StmtKind::Raw(s) => text_call(rt, Value::from(s.clone())),
            ir::StmtKind::Output(expr) => {
                let v = settle(eval_expr(rt, expr).await).await.resolve_deep().await;
                output(rt, v);
            }
            ir::StmtKind::Do(expr) => {
                let v = settle(eval_expr(rt, expr).await).await;
                if let Value::Poison(p) = v {
                    rt.record_poison(p);
                }
            }
            ir::StmtKind::Set { name, value } => {
                let v = eval_expr(rt, value).await;
                rt.frame.set(name, v);
            }
            ir::StmtKind::Command(cmd) => {
                let v = eval::eval_command(rt, cmd).await;
                if let Value::Poison(p) = v {
                    rt.record_poison(p);
                }
            }
            ir::StmtKind::If { branches, else_branch } => {
                exec_if(rt, branches, else_branch.as_deref()).await;
            }
            ir::StmtKind::For { key, value, iterable, body, else_branch, plan } => {
                exec_for(rt, key.as_deref(), value, iterable, body, else_branch.as_deref(), plan).await;
            }
            ir::StmtKind::While { cond, body } => {
                loop {
                    let c = settle(eval_expr(rt, cond).await).await;
                    if let Value::Poison(p) = c {
                        rt.record_poison(p);
                        break;
                    }
                    if !c.is_truthy() {
                        break;
                    }
                    let child = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
                    exec_stmts(&child, body).await;
                }
            }
            ir::StmtKind::Macro { name, params, focus, body } => {
                let def = MacroDef {
                    params: params.clone(),
                    focus: focus.clone(),
                    body: Arc::new(body.clone()),
                    macros: rt.macros.clone(),
                };
                rt.macros.lock().insert(name.clone(), def);
            }
            ir::StmtKind::Call { macro_name, args, body } => {
                exec_call(rt, macro_name, args, body).await;
            }
            ir::StmtKind::Block { name, body } => {
                let resolved = rt.blocks.lock().get(name).cloned();
                let to_run = resolved.unwrap_or_else(|| Arc::new(body.clone()));
                let child = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
                exec_stmts(&child, &to_run).await;
            }
            ir::StmtKind::Include { name, ignore_missing } => {
                exec_include(rt, name, *ignore_missing).await;
            }
            ir::StmtKind::Extends { name } => {
                exec_extends(rt, name).await;
            }
            ir::StmtKind::Import { name, alias } => {
                exec_import(rt, name, alias).await;
            }
            ir::StmtKind::FromImport { name, items } => {
                exec_from_import(rt, name, items).await;
            }
            ir::StmtKind::Guard { selectors, vars, body } => {
                exec_guard(rt, selectors, vars, body).await;
            }
            ir::StmtKind::Capture { focus, var, body } => {
                let v = capture(rt, body, focus.as_deref()).await;
                rt.frame.set(var, v);
            }
            ir::StmtKind::Try { body, except, resume } => {
                exec_try(rt, body, except, *resume).await;
            }
        }
    })
}

async fn exec_if(rt: &Rt, branches: &[(ir::Expr, Vec<ir::Stmt>)], else_branch: Option<&[ir::Stmt]>) {
    for (cond, body) in branches {
        let c = settle(eval_expr(rt, cond).await).await;
        match c {
            Value::Poison(p) => {
                rt.record_poison(p);
                return;
            }
            other if other.is_truthy() => {
                let child = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
                exec_stmts(&child, body).await;
                return;
            }
            _ => continue,
        }
    }
    if let Some(else_branch) = else_branch {
        let child = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
        exec_stmts(&child, else_branch).await;
    }
}

/// Pre-declares the loop variable(s) on a child frame for one iteration.
fn declare_iteration(rt: &Rt, key_name: Option<&str>, value_name: &str, key: Value, value: Value) -> Rt {
    let iter_rt = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
    if let Some(key_name) = key_name {
        iter_rt.frame.declare(key_name, key);
    }
    iter_rt.frame.declare(value_name, value);
    iter_rt
}

/// Runs a `for` loop. Parallel iterations each get their own isolated
/// command buffer so a slow iteration's commands can't interleave with a
/// fast iteration's; results are merged back into the real buffer afterward
/// in iteration order, which is what actually gives the loop its "as if
/// sequential" output despite running concurrently. Sequential iterations (those that write an outer-scope
/// variable another iteration reads) just run one after another against the
/// real buffer — merging would be both unnecessary and wrong, since later
/// iterations must see earlier writes.
#[allow(clippy::too_many_arguments)]
async fn exec_for(
    rt: &Rt,
    key_name: Option<&str>,
    value_name: &str,
    iterable: &ir::Expr,
    body: &[ir::Stmt],
    else_branch: Option<&[ir::Stmt]>,
    plan: &ir::ForPlan,
) {
    let iterable_v = settle(eval_expr(rt, iterable).await).await.resolve_deep().await;
    let pairs: Vec<(Value, Value)> = match iterable_v {
        Value::Poison(p) => {
            rt.record_poison(p);
            return;
        }
        Value::List(items) => {
            items.into_iter().enumerate().map(|(i, v)| (Value::Num(cascada_value::Number::Int(i as i64)), v)).collect()
        }
        Value::Dict(d) => d.into_iter().map(|(k, v)| (Value::from(k), v)).collect(),
        other => {
            rt.record_poison(Poison::from_errors(vec![cascada_value::Error::TypeMismatch {
                expected: "iterable",
                found: crate::eval::type_tag(&other),
            }]));
            return;
        }
    };

    if pairs.is_empty() {
        if let Some(else_branch) = else_branch {
            let child = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
            exec_stmts(&child, else_branch).await;
        }
        return;
    }

    match &plan.strategy {
        ir::ForStrategy::Sequential { .. } => {
            for (k, v) in pairs {
                let iter_rt = declare_iteration(rt, key_name, value_name, k, v);
                exec_stmts(&iter_rt, body).await;
            }
        }
        ir::ForStrategy::Parallel => {
            let iter_rts: Vec<Rt> = pairs
                .into_iter()
                .map(|(k, v)| {
                    let mut iter_rt = declare_iteration(rt, key_name, value_name, k, v);
                    iter_rt.cmd = Arc::new(CommandBuffer::fresh_for(&rt.cmd));
                    iter_rt
                })
                .collect();
            join_all(iter_rts.iter().map(|iter_rt| async move {
                rt.async_state.enter_closure();
                exec_stmts(iter_rt, body).await;
                rt.async_state.leave_closure();
            }))
            .await;
            for iter_rt in &iter_rts {
                merge_buffer(rt, &iter_rt.cmd);
            }
        }
    }
}

/// Merges an isolated per-iteration buffer into `rt`'s real buffer: `text`
/// is concatenated, `Dict`-shaped handler state is deep-merged, everything
/// else is overwritten wholesale via `set`.
fn merge_buffer(rt: &Rt, iter_buf: &CommandBuffer) {
    for name in iter_buf.handler_names() {
        let Some(iter_handler) = iter_buf.handler(&name) else { continue };
        let Some(real_handler) = rt.cmd.handler(&name) else { continue };
        let snapshot = iter_handler.snapshot();
        if name == "text" {
            let appended = snapshot.to_string();
            if !appended.is_empty() {
                let _ = real_handler.apply(&[], "append", &[Value::from(appended)]);
            }
            continue;
        }
        match snapshot {
            Value::Dict(_) => {
                let _ = real_handler.apply(&[], "deepMerge", &[snapshot]);
            }
            other => {
                let _ = real_handler.apply(&[], "set", &[other]);
            }
        }
    }
}

/// The macro-registry key a call expression names, shared between
/// expression-position calls (`eval::eval_call`) and `{% call %}` statements.
pub(crate) async fn call_macro(rt: &Rt, key: &str, args: &[Value]) -> Value {
    let def = {
        let defs = rt.macros.lock();
        match defs.get(key) {
            Some(d) => d.clone(),
            None => return Value::from(cascada_value::Error::custom(format!("macro {key:?} is not defined"))),
        }
    };
    call_macro_with_def(rt, &def, args, None).await
}

async fn exec_call(rt: &Rt, macro_name: &str, args: &[ir::Arg], body: &[ir::Stmt]) {
    let arg_values = join_all(args.iter().map(|a| async { settle(eval_expr(rt, &a.value).await).await })).await;
    let def = { rt.macros.lock().get(macro_name).cloned() };
    let result = match def {
        Some(def) => {
            let caller = CallerClosure { body: Arc::new(body.to_vec()), frame: rt.frame.clone() };
            call_macro_with_def(rt, &def, &arg_values, Some(caller)).await
        }
        None => Value::from(cascada_value::Error::custom(format!("macro {macro_name:?} is not defined"))),
    };
    output(rt, result);
}

/// Invokes an already-resolved [`MacroDef`] — used both by [`call_macro`]
/// and by `{% call %}` statements, which also install a [`CallerClosure`].
/// Arguments bind to parameters positionally; a missing trailing argument
/// falls back to the parameter's default expression (evaluated against the
/// *caller's* frame, matching where the default was written), then
/// `Value::Undef`.
pub(crate) async fn call_macro_with_def(
    rt: &Rt,
    def: &MacroDef,
    args: &[Value],
    caller: Option<CallerClosure>,
) -> Value {
    let mut macro_frame = Frame::top_level();
    for (i, param) in def.params.iter().enumerate() {
        let v = match args.get(i) {
            Some(v) => v.clone(),
            None => match &param.default {
                Some(default_expr) => settle(eval_expr(rt, default_expr).await).await,
                None => Value::Undef,
            },
        };
        macro_frame.declare(&param.name, v);
    }

    let macro_rt = Rt {
        frame: macro_frame,
        async_state: rt.async_state.clone(),
        cmd: Arc::new(CommandBuffer::fresh_for(&rt.cmd)),
        seqlocks: rt.seqlocks.clone(),
        globals: rt.globals.clone(),
        flags: rt.flags,
        resolver: rt.resolver.clone(),
        macros: def.macros.clone(),
        caller,
        blocks: Arc::new(Mutex::new(HashMap::new())),
        errors: rt.errors.clone(),
    };

    capture(&macro_rt, &def.body, def.focus.as_deref()).await
}

/// Runs `body` against an isolated command buffer and returns the result a
/// `{% capture %}`, `caller()`, or macro invocation sees: the named `focus`
/// handler's snapshot, or the `text` handler's snapshot when no focus is
/// given.
pub(crate) async fn capture(rt: &Rt, body: &[ir::Stmt], focus: Option<&str>) -> Value {
    let mut capture_rt = rt.with_frame(rt.frame.child(FrameFlags::transparent()));
    capture_rt.cmd = Arc::new(CommandBuffer::fresh_for(&rt.cmd));
    exec_stmts(&capture_rt, body).await;
    let handler_name = focus.unwrap_or("text");
    match capture_rt.cmd.handler(handler_name) {
        Some(h) => h.snapshot(),
        None => Value::Undef,
    }
}

fn missing_template_poison(name: &str) -> Poison {
    Poison::from_errors(vec![cascada_value::Error::custom(format!("template {name:?} not found"))])
}

async fn resolve_name(rt: &Rt, name_expr: &ir::Expr) -> Result<String, Poison> {
    let v = settle(eval_expr(rt, name_expr).await).await;
    match v {
        Value::Poison(p) => Err(p),
        other => Ok(other.to_string()),
    }
}

async fn resolve_template(rt: &Rt, name: &str) -> Option<Arc<ir::Program>> {
    rt.resolver.as_ref().and_then(|r| r.resolve(name))
}

async fn exec_include(rt: &Rt, name_expr: &ir::Expr, ignore_missing: bool) {
    let name = match resolve_name(rt, name_expr).await {
        Ok(n) => n,
        Err(p) => {
            rt.record_poison(p);
            return;
        }
    };
    match resolve_template(rt, &name).await {
        Some(program) => {
            let child = rt.with_frame(rt.frame.child(FrameFlags::included()));
            exec_stmts(&child, &program.body).await;
        }
        None if ignore_missing => {}
        None => rt.record_poison(missing_template_poison(&name)),
    }
}

/// `extends` is implemented single-level only: the child template's own
/// `{% block %}` statements have already populated `rt.blocks` by the time
/// this runs (the compiler hoists them ahead of the `extends` statement), so
/// switching to the parent's body and letting its `Block` statements look
/// themselves up in `rt.blocks` before falling back to their own content is
/// enough to get overriding right. There is no `super()` — the IR has no
/// node for it, so a parent block's original content is unrecoverable once
/// overridden. A multi-level extends chain (parent itself extending a
/// grandparent) is not supported.
async fn exec_extends(rt: &Rt, name_expr: &ir::Expr) {
    let name = match resolve_name(rt, name_expr).await {
        Ok(n) => n,
        Err(p) => {
            rt.record_poison(p);
            return;
        }
    };
    match resolve_template(rt, &name).await {
        Some(program) => exec_stmts(rt, &program.body).await,
        None => rt.record_poison(missing_template_poison(&name)),
    }
}

async fn exec_import(rt: &Rt, name_expr: &ir::Expr, alias: &str) {
    let name = match resolve_name(rt, name_expr).await {
        Ok(n) => n,
        Err(p) => {
            rt.record_poison(p);
            return;
        }
    };
    match resolve_template(rt, &name).await {
        Some(program) => {
            let module_rt = fresh_module_rt(rt);
            exec_stmts(&module_rt, &program.body).await;
            let module_macros = module_rt.macros.lock();
            let mut target = rt.macros.lock();
            for (macro_name, def) in module_macros.iter() {
                target.insert(format!("{alias}.{macro_name}"), def.clone());
            }
        }
        None => rt.record_poison(missing_template_poison(&name)),
    }
}

async fn exec_from_import(rt: &Rt, name_expr: &ir::Expr, items: &[(String, Option<String>)]) {
    let name = match resolve_name(rt, name_expr).await {
        Ok(n) => n,
        Err(p) => {
            rt.record_poison(p);
            return;
        }
    };
    match resolve_template(rt, &name).await {
        Some(program) => {
            let module_rt = fresh_module_rt(rt);
            exec_stmts(&module_rt, &program.body).await;
            let module_macros = module_rt.macros.lock();
            let mut target = rt.macros.lock();
            for (macro_name, local_alias) in items {
                if let Some(def) = module_macros.get(macro_name) {
                    let key = local_alias.clone().unwrap_or_else(|| macro_name.clone());
                    target.insert(key, def.clone());
                }
            }
        }
        None => rt.record_poison(missing_template_poison(&name)),
    }
}

fn fresh_module_rt(rt: &Rt) -> Rt {
    Rt {
        frame: Frame::top_level(),
        async_state: rt.async_state.clone(),
        cmd: Arc::new(CommandBuffer::fresh_for(&rt.cmd)),
        seqlocks: rt.seqlocks.clone(),
        globals: rt.globals.clone(),
        flags: rt.flags,
        resolver: rt.resolver.clone(),
        macros: Arc::new(Mutex::new(HashMap::new())),
        caller: None,
        blocks: Arc::new(Mutex::new(HashMap::new())),
        errors: rt.errors.clone(),
    }
}

/// Approximates `try`/`except`/`resume` as statement-by-statement
/// poison absorption: run each statement in `body`, and if it introduced a
/// new poison, clear it and either stop (no `resume`) or continue to the
/// next statement (`resume`). `except` runs once, after the body, only if
/// any absorption happened.
async fn exec_try(rt: &Rt, body: &[ir::Stmt], except: &[ir::Stmt], resume: bool) {
    let mut absorbed = false;
    for stmt in body {
        // Compared by error *count*, not presence — `rt.errors` is a
        // render-wide accumulator, so a poison recorded before this `try`
        // was ever reached must not be mistaken for one this statement
        // introduced (nor get wiped out when absorbing this one).
        let before_count = rt.errors.lock().as_ref().map_or(0, |p| p.errors().len());
        exec_stmt(rt, stmt).await;
        let mut guard = rt.errors.lock();
        let after_count = guard.as_ref().map_or(0, |p| p.errors().len());
        if after_count > before_count {
            if before_count == 0 {
                *guard = None;
            } else if let Some(p) = guard.take() {
                let kept = p.errors()[..before_count].to_vec();
                *guard = Some(Poison::from_errors(kept));
            }
            drop(guard);
            absorbed = true;
            if !resume {
                break;
            }
        }
    }
    if absorbed && !except.is_empty() {
        exec_stmts(rt, except).await;
    }
}
