//! Expression evaluator.
//!
//! Every node lowers to an `async fn` of the current [`Rt`] — literally,
//! since [`eval_expr`] is a plain recursive async function. Recursion is
//! made possible the same way `cascada_value::Value::resolve_deep` manages
//! it: each call returns a boxed, pinned future rather than relying on
//! `async fn` self-recursion, which the compiler can't size.

use std::sync::Arc;

use cascada_expr::ir::{self, BinaryOp, CompareOp, LogicalOp, UnaryOp};
use cascada_value::{op, Error as ValueError, Part, Value};
use futures::future::{join_all, BoxFuture};
use indexmap::IndexMap;

use crate::cmd::{CommandRecord, PathStepResolved};
use crate::exec;
use crate::rt::Rt;

/// Awaits a single layer of `Pending`, collapsing `Pending(Pending(v))` down
/// to `v` — but does *not* walk into `List`/`Dict` leaves; that is
/// `resolve_deep`'s job, reserved for contexts that actually need it.
pub async fn settle(mut v: Value) -> Value {
    while let Value::Pending(p) = v {
        v = p.await_value().await;
    }
    v
}

fn poison_pair(a: &Value, b: &Value) -> Option<Value> {
    match (a.as_poison(), b.as_poison()) {
        (Some(pa), Some(pb)) => Some(Value::Poison(pa.clone().join(pb.clone()))),
        (Some(p), None) | (None, Some(p)) => Some(Value::Poison(p.clone())),
        (None, None) => None,
    }
}

/// Evaluates an expression against the current frame/globals, returning the
/// raw (possibly `Pending`, possibly poisoned, possibly leaf-`Pending`-
/// carrying) [`Value`]. Never panics and never returns `Err` — runtime
/// failures are poison values
pub fn eval_expr<'a>(rt: &'a Rt, expr: &'a ir::Expr) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        match &expr.kind {
            ir::ExprKind::Str(s) => Value::from(s.clone()),
            ir::ExprKind::Num(n) => Value::Num(*n),
            ir::ExprKind::Bool(b) => Value::Bool(*b),
            ir::ExprKind::Null => Value::Null,
            ir::ExprKind::Undefined => Value::Undef,
            // Regex literals are only meaningful to the built-in test/filter
            // catalogs (matching, splitting) which `spec.md` §1 places out
            // of scope; the literal itself still evaluates to a value a
            // host-registered filter can interpret by convention as a
            // string-tagged pattern.
            ir::ExprKind::Regex { pattern, flags } => Value::from(format!("r/{pattern}/{flags}")),
            ir::ExprKind::Ident(name) => lookup_ident(rt, name),
            ir::ExprKind::List(items) => {
                let values = join_all(items.iter().map(|e| eval_expr(rt, e))).await;
                Value::List(values)
            }
            ir::ExprKind::Dict(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    let key = match key {
                        ir::DictKey::Ident(s) | ir::DictKey::Str(s) => s.clone(),
                        ir::DictKey::Computed(e) => settle(eval_expr(rt, e).await).await.to_string(),
                    };
                    out.insert(key, eval_expr(rt, value_expr).await);
                }
                Value::Dict(out)
            }
            ir::ExprKind::Unary { op: unary_op, expr: inner } => {
                let v = settle(eval_expr(rt, inner).await).await;
                match unary_op {
                    UnaryOp::Neg => op::neg(v),
                    UnaryOp::Not => op::not(&v),
                }
            }
            ir::ExprKind::Binary { op: bin_op, lhs, rhs } => {
                let (a, b) = futures::join!(
                    async { settle(eval_expr(rt, lhs).await).await },
                    async { settle(eval_expr(rt, rhs).await).await }
                );
                match bin_op {
                    BinaryOp::Add | BinaryOp::Concat => op::add(a, b),
                    BinaryOp::Sub => op::sub(a, b),
                    BinaryOp::Mul => op::mul(a, b),
                    BinaryOp::Div => op::div(a, b),
                    BinaryOp::Rem => op::rem(a, b),
                }
            }
            ir::ExprKind::Logical { op: logical_op, lhs, rhs } => {
                // Short-circuits like any host language's `&&`/`||`: the rhs
                // is never evaluated (let alone awaited) unless needed, so
                // it cannot contribute a poison the source program never
                // actually depended on.
                let a = settle(eval_expr(rt, lhs).await).await;
                if a.is_poison() {
                    return a;
                }
                match logical_op {
                    LogicalOp::And if !a.is_truthy() => a,
                    LogicalOp::Or if a.is_truthy() => a,
                    _ => settle(eval_expr(rt, rhs).await).await,
                }
            }
            ir::ExprKind::Compare { op: cmp_op, lhs, rhs } => {
                let (a, b) = futures::join!(
                    async { settle(eval_expr(rt, lhs).await).await },
                    async { settle(eval_expr(rt, rhs).await).await }
                );
                match cmp_op {
                    CompareOp::Eq => op::eq(&a, &b),
                    CompareOp::Ne => op::ne(&a, &b),
                    CompareOp::Lt => op::lt(&a, &b),
                    CompareOp::Le => op::le(&a, &b),
                    CompareOp::Gt => op::gt(&a, &b),
                    CompareOp::Ge => op::ge(&a, &b),
                    CompareOp::In => contains(&b, &a),
                    CompareOp::NotIn => op::not(&contains(&b, &a)),
                }
            }
            ir::ExprKind::Member { target, name } => {
                let t = settle(eval_expr(rt, target).await).await;
                member_access(rt, t, name)
            }
            ir::ExprKind::Index { target, index } => {
                let (t, idx) = futures::join!(
                    async { settle(eval_expr(rt, target).await).await },
                    async { settle(eval_expr(rt, index).await).await }
                );
                index_access(rt, t, idx)
            }
            ir::ExprKind::LastIndex { target } => {
                let t = settle(eval_expr(rt, target).await).await;
                match t {
                    Value::List(l) => l.last().cloned().unwrap_or(Value::Undef),
                    Value::Poison(p) => Value::Poison(p),
                    other => mismatch("array", &other),
                }
            }
            ir::ExprKind::Call { callee, args } => eval_call(rt, callee, args).await,
            ir::ExprKind::LockedCall { callee, args, lock } => {
                let guard = rt.seqlocks.acquire(lock.clone()).await;
                // Must settle before dropping the guard: `eval_call` can
                // return an unresolved `Pending` (a host method's async
                // result), and releasing the lock at that point would let
                // the next queued call start before this one's side effect
                // has actually happened.
                let result = settle(eval_call(rt, callee, args).await).await;
                drop(guard);
                result
            }
            ir::ExprKind::Filter { target, name, args } => {
                let t = settle(eval_expr(rt, target).await).await;
                let arg_values = join_all(args.iter().map(|a| async { settle(eval_expr(rt, &a.value).await).await }))
                    .await;
                if let Some(p) = t.as_poison() {
                    return Value::Poison(p.clone());
                }
                match rt.globals.filters.get(name) {
                    Some(f) => {
                        let mut call_args = vec![t];
                        call_args.extend(arg_values);
                        settle(f.call(&call_args)).await
                    }
                    None => Value::from(ValueError::custom(format!("unknown filter {name:?}"))),
                }
            }
            ir::ExprKind::Ternary { cond, then_branch, else_branch } => {
                let c = settle(eval_expr(rt, cond).await).await;
                if let Some(p) = c.as_poison() {
                    return Value::Poison(p.clone());
                }
                if c.is_truthy() {
                    eval_expr(rt, then_branch).await
                } else {
                    eval_expr(rt, else_branch).await
                }
            }
            ir::ExprKind::Caller => match &rt.caller {
                Some(caller) => {
                    let caller_rt = rt.with_frame(caller.frame.child(crate::frame::FrameFlags::child_scope()));
                    exec::capture(&caller_rt, &caller.body, None).await
                }
                None => Value::from(ValueError::custom("caller() used outside a {% call %} body")),
            },
            ir::ExprKind::Command(cmd) => eval_command(rt, cmd).await,
        }
    })
}

fn lookup_ident(rt: &Rt, name: &str) -> Value {
    let v = rt.frame.get(name);
    if !matches!(v, Value::Undef) {
        return v;
    }
    if let Some(g) = rt.globals.values.get(name) {
        return g.clone();
    }
    if rt.flags.throw_on_undefined {
        return Value::from(ValueError::custom(format!("'{name}' is undefined")));
    }
    Value::Undef
}

fn mismatch(expected: &'static str, found: &Value) -> Value {
    Value::from(ValueError::TypeMismatch { expected, found: type_tag(found) })
}

pub(crate) fn type_tag(v: &Value) -> &'static str {
    match v {
        Value::Str(_) => "string",
        Value::Num(_) => "number",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Undef => "undefined",
        Value::List(_) => "array",
        Value::Dict(_) => "object",
        Value::Func(_) => "function",
        Value::Obj(_) => "object",
        Value::Pending(_) => "pending",
        Value::Poison(_) => "poison",
    }
}

fn member_access(rt: &Rt, target: Value, name: &str) -> Value {
    match target {
        Value::Poison(p) => Value::Poison(p),
        Value::Dict(_) | Value::List(_) => target.get_path(&[Part::field(name)]),
        Value::Obj(handle) => handle.0.get(name).unwrap_or(if rt.flags.throw_on_undefined {
            Value::from(ValueError::custom(format!("'{name}' is undefined on host object")))
        } else {
            Value::Undef
        }),
        Value::Null | Value::Undef => {
            if rt.flags.throw_on_undefined {
                Value::from(ValueError::custom(format!("cannot read '{name}' of {target}")))
            } else {
                Value::Undef
            }
        }
        other => mismatch("object", &other),
    }
}

fn index_access(rt: &Rt, target: Value, index: Value) -> Value {
    if let Some(p) = poison_pair(&target, &index) {
        return p;
    }
    match &target {
        Value::Dict(_) => {
            if let Value::Str(s) = &index {
                return member_access(rt, target, s);
            }
            Value::Undef
        }
        Value::List(_) => match &index {
            Value::Num(n) => match n.as_usize() {
                Some(i) => target.get_path(&[Part::Index(i)]),
                None => Value::Undef,
            },
            _ => Value::Undef,
        },
        Value::Obj(handle) => {
            if let Value::Str(s) = &index {
                return handle.0.get(s).unwrap_or(Value::Undef);
            }
            Value::Undef
        }
        Value::Str(s) => match &index {
            Value::Num(n) => n
                .as_usize()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .unwrap_or(Value::Undef),
            _ => Value::Undef,
        },
        Value::Null | Value::Undef => Value::Undef,
        other => mismatch("array or object", other),
    }
}

fn contains(container: &Value, needle: &Value) -> Value {
    if let Some(p) = poison_pair(container, needle) {
        return p;
    }
    match container {
        Value::List(items) => Value::Bool(items.iter().any(|v| op::eq(v, needle) == Value::Bool(true))),
        Value::Dict(map) => match needle {
            Value::Str(s) => Value::Bool(map.contains_key(s)),
            _ => Value::Bool(false),
        },
        Value::Str(s) => match needle {
            Value::Str(n) => Value::Bool(s.contains(n.as_str())),
            _ => Value::Bool(false),
        },
        other => mismatch("array, object or string", other),
    }
}

async fn eval_call<'a>(rt: &'a Rt, callee: &'a ir::Expr, args: &'a [ir::Arg]) -> Value {
    // A bare identifier naming a macro, or `alias.macroName` naming one
    // imported under `alias`, is dispatched through the statement executor's
    // macro-invocation machinery rather than treated as an ordinary value
    // call — macros are not first-class `Func` values.
    if let Some(key) = macro_call_key(rt, callee) {
        let arg_values = join_all(args.iter().map(|a| async { settle(eval_expr(rt, &a.value).await).await }))
            .await;
        return exec::call_macro(rt, &key, &arg_values).await;
    }
    // A bare identifier naming a registered global function (built-ins like
    // `range`/`length`/`keys`, or anything an `Environment` added via
    // `with_function`) is dispatched here rather than through ordinary
    // value lookup: host functions live in `globals.functions`, a separate
    // registry from `globals.values`, so they are never reachable as a
    // `Value::Func` an identifier could resolve to.
    if let ir::ExprKind::Ident(name) = &callee.kind {
        if matches!(rt.frame.get(name), Value::Undef) && !rt.globals.values.contains_key(name) {
            if let Some(f) = rt.globals.functions.get(name) {
                let arg_values = join_all(
                    args.iter().map(|a| async { settle(eval_expr(rt, &a.value).await).await }),
                )
                .await;
                for v in &arg_values {
                    if let Some(p) = v.as_poison() {
                        return Value::Poison(p.clone());
                    }
                }
                return settle(f.call(&arg_values)).await;
            }
        }
    }
    let callee_value = settle(eval_expr(rt, callee).await).await;
    if let Some(p) = callee_value.as_poison() {
        return Value::Poison(p.clone());
    }
    let arg_values =
        join_all(args.iter().map(|a| async { settle(eval_expr(rt, &a.value).await).await })).await;
    match callee_value {
        Value::Func(f) => f.call(&arg_values),
        other => Value::from(ValueError::TypeMismatch { expected: "function", found: type_tag(&other) }),
    }
}

/// The macro-registry key a call expression names, if any: a bare
/// identifier for a locally-defined macro, or `alias.name` for one pulled in
/// through `import ... as alias`.
fn macro_call_key(rt: &Rt, callee: &ir::Expr) -> Option<String> {
    match &callee.kind {
        ir::ExprKind::Ident(name) => {
            if matches!(rt.frame.get(name), Value::Undef) && rt.macros.lock().contains_key(name) {
                Some(name.clone())
            } else {
                None
            }
        }
        ir::ExprKind::Member { target, name } => {
            if let ir::ExprKind::Ident(alias) = &target.kind {
                let key = format!("{alias}.{name}");
                if rt.macros.lock().contains_key(&key) {
                    return Some(key);
                }
            }
            None
        }
        _ => None,
    }
}

/// Resolves a command's path/args and dispatches it through the command
/// buffer — shared by both expression-position commands (`@text(expr)`
/// lowered output tags) and `Command` statements (`cascada-core::exec`).
pub async fn eval_command(rt: &Rt, cmd: &ir::Command) -> Value {
    let _guard = match &cmd.lock {
        Some(key) => Some(rt.seqlocks.acquire(key.clone()).await),
        None => None,
    };
    let mut path = Vec::with_capacity(cmd.path.len());
    let mut poison: Option<cascada_value::Poison> = None;
    for step in &cmd.path {
        match step {
            ir::PathStep::Field(name) => path.push(PathStepResolved::Field(name.clone())),
            ir::PathStep::LastIndex => path.push(PathStepResolved::LastIndex),
            ir::PathStep::Index(e) => {
                let v = settle(eval_expr(rt, e).await).await.resolve_deep().await;
                match v {
                    Value::Poison(p) => poison = Some(merge_poison(poison, p)),
                    Value::Num(n) => {
                        if let Some(i) = n.as_usize() {
                            path.push(PathStepResolved::Index(i));
                        } else {
                            path.push(PathStepResolved::Field(n.to_string()));
                        }
                    }
                    Value::Str(s) => path.push(PathStepResolved::Field(s)),
                    other => path.push(PathStepResolved::Field(other.to_string())),
                }
            }
        }
    }
    let arg_values = join_all(cmd.args.iter().map(|a| async { eval_expr(rt, a).await.resolve_deep().await })).await;
    for v in &arg_values {
        if let Value::Poison(p) = v {
            poison = Some(merge_poison(poison, p.clone()));
        }
    }
    if let Some(p) = poison {
        return Value::Poison(p);
    }
    let record = CommandRecord { handler: cmd.handler.clone(), path, method: cmd.method.clone(), args: arg_values, seq: cmd.seq };
    match rt.cmd.dispatch(record) {
        Ok(v) => v,
        Err(e) => Value::from(cascada_value::Error::Host { message: e.to_string(), source: None }),
    }
}

fn merge_poison(existing: Option<cascada_value::Poison>, new: cascada_value::Poison) -> cascada_value::Poison {
    match existing {
        Some(e) => e.join(new),
        None => new,
    }
}

#[allow(dead_code)]
fn arc_eq<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b)
}
