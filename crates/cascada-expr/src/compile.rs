//! Lowers a parsed [`cascada_ast::ast::Template`] into an executable
//! [`crate::ir::Program`].
//!
//! Three passes happen in one recursive descent over the tree:
//!
//! - `isAsync` tagging (§4.9.1): an expression is async if it is one of the
//!   inherently-async kinds (a variable lookup, a call, a filter, a command)
//!   or contains one; the tag propagates up to every statement that embeds
//!   it.
//! - `@`-command lowering (§4.9.3): sugar (`= expr`, `+= expr`, `++`, bare
//!   `.method(args)`) collapses to a canonical `(method, args)` pair, a
//!   program-order `seq` is assigned, and a `!` mark is resolved into a
//!   [`crate::ir::LockKey`] or rejected if the addressed path isn't static.
//! - `for`-loop parallelism (§4.9.2, §4.2): a scope stack tracks which
//!   names are declared at each nesting level; a loop body that writes a
//!   name from an outer frame is marked [`crate::ir::ForStrategy::Sequential`].

use std::collections::HashSet;

use cascada_ast::ast;
use cascada_ast::token::Span;

use crate::error::{CompileError, CompileResult};
use crate::ir;

/// Lowers a parsed template into its executable form.
pub fn compile(template: ast::Template) -> CompileResult<ir::Program> {
    let mut compiler = Compiler { next_seq: 0 };
    let mut scopes = vec![HashSet::new()];
    let body = compiler.compile_stmts(&template.body, &mut scopes)?;
    Ok(ir::Program { focus: template.focus, body })
}

struct Compiler {
    next_seq: u64,
}

impl Compiler {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    // -- statements -----------------------------------------------------

    fn compile_stmts(&mut self, stmts: &[ast::Stmt], scopes: &mut Vec<HashSet<String>>) -> CompileResult<Vec<ir::Stmt>> {
        stmts.iter().map(|s| self.compile_stmt(s, scopes)).collect()
    }

    fn compile_stmt(&mut self, stmt: &ast::Stmt, scopes: &mut Vec<HashSet<String>>) -> CompileResult<ir::Stmt> {
        let kind = match &stmt.kind {
            ast::StmtKind::Text(s) => ir::StmtKind::Text(s.clone()),
            ast::StmtKind::Raw(s) => ir::StmtKind::Raw(s.clone()),
            ast::StmtKind::Focus(_) => {
                // Only legal at the very top of a template body; the parser
                // already strips it into `Template::focus`, so one surviving
                // here means it was nested. Treat it as inert text-less noise
                // rather than a hard error — nothing downstream reads it.
                ir::StmtKind::Text(String::new())
            }
            ast::StmtKind::Output(e) => ir::StmtKind::Output(self.compile_expr(e)?),
            ast::StmtKind::Set { name, value } => {
                declare(scopes, name);
                ir::StmtKind::Set { name: name.clone(), value: self.compile_expr(value)? }
            }
            ast::StmtKind::Do(e) => ir::StmtKind::Do(self.compile_expr(e)?),
            ast::StmtKind::Command(cp) => ir::StmtKind::Command(self.compile_command(cp)?),
            ast::StmtKind::If { branches, else_branch } => {
                let branches = branches
                    .iter()
                    .map(|(cond, body)| {
                        let cond = self.compile_expr(cond)?;
                        scopes.push(HashSet::new());
                        let body = self.compile_stmts(body, scopes)?;
                        scopes.pop();
                        Ok((cond, body))
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                let else_branch = else_branch
                    .as_ref()
                    .map(|body| {
                        scopes.push(HashSet::new());
                        let body = self.compile_stmts(body, scopes)?;
                        scopes.pop();
                        Ok(body)
                    })
                    .transpose()?;
                ir::StmtKind::If { branches, else_branch }
            }
            ast::StmtKind::For { key, value, iterable, body, else_branch } => {
                let iterable = self.compile_expr(iterable)?;
                let mut written = HashSet::new();
                collect_written_names(body, &mut written);
                let outer: HashSet<&String> = scopes.iter().flatten().collect();
                let written_outer_names: Vec<String> =
                    written.into_iter().filter(|n| outer.contains(n)).collect();
                let strategy = if written_outer_names.is_empty() {
                    ir::ForStrategy::Parallel
                } else {
                    ir::ForStrategy::Sequential { written_outer_names }
                };
                scopes.push(HashSet::new());
                if let Some(k) = key {
                    declare(scopes, k);
                }
                declare(scopes, value);
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                let else_branch = else_branch
                    .as_ref()
                    .map(|b| {
                        scopes.push(HashSet::new());
                        let b = self.compile_stmts(b, scopes)?;
                        scopes.pop();
                        Ok(b)
                    })
                    .transpose()?;
                ir::StmtKind::For {
                    key: key.clone(),
                    value: value.clone(),
                    iterable,
                    body,
                    else_branch,
                    plan: ir::ForPlan { strategy },
                }
            }
            ast::StmtKind::While { cond, body } => {
                let cond = self.compile_expr(cond)?;
                scopes.push(HashSet::new());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                ir::StmtKind::While { cond, body }
            }
            ast::StmtKind::Macro { name, params, focus, body } => {
                let params = params
                    .iter()
                    .map(|p| {
                        Ok(ir::MacroParam {
                            name: p.name.clone(),
                            default: p.default.as_ref().map(|d| self.compile_expr(d)).transpose()?,
                        })
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                scopes.push(params.iter().map(|p| p.name.clone()).collect());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                ir::StmtKind::Macro { name: name.clone(), params, focus: focus.clone(), body }
            }
            ast::StmtKind::Call { macro_name, args, body } => {
                let args = self.compile_args(args)?;
                scopes.push(HashSet::new());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                ir::StmtKind::Call { macro_name: macro_name.clone(), args, body }
            }
            ast::StmtKind::Block { name, body } => {
                scopes.push(HashSet::new());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                ir::StmtKind::Block { name: name.clone(), body }
            }
            ast::StmtKind::Include { name, ignore_missing } => {
                ir::StmtKind::Include { name: self.compile_expr(name)?, ignore_missing: *ignore_missing }
            }
            ast::StmtKind::Extends { name } => ir::StmtKind::Extends { name: self.compile_expr(name)? },
            ast::StmtKind::Import { name, alias } => {
                ir::StmtKind::Import { name: self.compile_expr(name)?, alias: alias.clone() }
            }
            ast::StmtKind::FromImport { name, items } => {
                ir::StmtKind::FromImport { name: self.compile_expr(name)?, items: items.clone() }
            }
            ast::StmtKind::Guard { selectors, vars, body } => {
                self.compile_guard(selectors, vars, body, scopes)?
            }
            ast::StmtKind::Capture { focus, var, body } => {
                declare(scopes, var);
                scopes.push(HashSet::new());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                ir::StmtKind::Capture { focus: focus.clone(), var: var.clone(), body }
            }
            ast::StmtKind::Try { body, except, resume } => {
                scopes.push(HashSet::new());
                let body = self.compile_stmts(body, scopes)?;
                scopes.pop();
                scopes.push(HashSet::new());
                let except = self.compile_stmts(except, scopes)?;
                scopes.pop();
                ir::StmtKind::Try { body, except, resume: *resume }
            }
        };
        let is_async = stmt_is_async(&kind);
        Ok(ir::Stmt { is_async, kind })
    }

    fn compile_guard(
        &mut self,
        selectors: &[ast::GuardSelector],
        vars: &[String],
        body: &[ast::GuardStmt],
        scopes: &mut Vec<HashSet<String>>,
    ) -> CompileResult<ir::StmtKind> {
        let mut seen_handlers: HashSet<&str> = HashSet::new();
        let mut has_all = false;
        for sel in selectors {
            match sel {
                ast::GuardSelector::All => {
                    if has_all {
                        return Err(CompileError::DuplicateGuardSelector("@".to_string()));
                    }
                    has_all = true;
                }
                ast::GuardSelector::Handler(name) => {
                    if !seen_handlers.insert(name.as_str()) {
                        return Err(CompileError::DuplicateGuardSelector(name.clone()));
                    }
                }
            }
        }
        if has_all && !seen_handlers.is_empty() {
            return Err(CompileError::BareGuardSelectorCombined);
        }

        let outer: HashSet<&String> = scopes.iter().flatten().collect();
        for v in vars {
            if !outer.contains(v) {
                return Err(CompileError::UndeclaredGuardVariable(v.clone()));
            }
        }

        scopes.push(HashSet::new());
        let mut written = HashSet::new();
        let plain: Vec<ast::Stmt> = body
            .iter()
            .filter_map(|g| match g {
                ast::GuardStmt::Stmt(s) => Some(s.clone()),
                ast::GuardStmt::Revert => None,
            })
            .collect();
        collect_written_names(&plain, &mut written);
        for v in vars {
            if !written.contains(v) {
                scopes.pop();
                return Err(CompileError::UnmodifiedGuardVariable(v.clone()));
            }
        }

        let lowered = body
            .iter()
            .map(|g| {
                Ok(match g {
                    ast::GuardStmt::Stmt(s) => ir::GuardStmt::Stmt(self.compile_stmt(s, scopes)?),
                    // `GuardStmt::Revert` only parses directly inside a
                    // guard body, so reaching here is always legal — the
                    // grammar itself is what enforces `RevertOutsideGuard`.
                    ast::GuardStmt::Revert => ir::GuardStmt::Revert,
                })
            })
            .collect::<CompileResult<Vec<_>>>();
        scopes.pop();
        let body = lowered?;
        Ok(ir::StmtKind::Guard { selectors: selectors.to_vec(), vars: vars.to_vec(), body })
    }

    // -- expressions ------------------------------------------------------

    fn compile_args(&mut self, args: &[ast::Arg]) -> CompileResult<Vec<ir::Arg>> {
        args.iter()
            .map(|a| Ok(ir::Arg { name: a.name.clone(), value: self.compile_expr(&a.value)? }))
            .collect()
    }

    fn compile_expr(&mut self, expr: &ast::Expr) -> CompileResult<ir::Expr> {
        let (kind, inherent) = match &expr.kind {
            ast::ExprKind::Str(s) => (ir::ExprKind::Str(s.clone()), false),
            ast::ExprKind::Num(n) => (ir::ExprKind::Num(*n), false),
            ast::ExprKind::Bool(b) => (ir::ExprKind::Bool(*b), false),
            ast::ExprKind::Null => (ir::ExprKind::Null, false),
            ast::ExprKind::Undefined => (ir::ExprKind::Undefined, false),
            ast::ExprKind::Regex { pattern, flags } => {
                (ir::ExprKind::Regex { pattern: pattern.clone(), flags: flags.clone() }, false)
            }
            ast::ExprKind::Ident(name) => (ir::ExprKind::Ident(name.clone()), true),
            ast::ExprKind::List(items) => {
                let items = items.iter().map(|e| self.compile_expr(e)).collect::<CompileResult<Vec<_>>>()?;
                (ir::ExprKind::List(items), false)
            }
            ast::ExprKind::Dict(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.compile_expr(v)?)))
                    .collect::<CompileResult<Vec<_>>>()?;
                (ir::ExprKind::Dict(entries), false)
            }
            ast::ExprKind::Unary { op, expr: inner } => {
                (ir::ExprKind::Unary { op: *op, expr: Box::new(self.compile_expr(inner)?) }, false)
            }
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let lhs = Box::new(self.compile_expr(lhs)?);
                let rhs = Box::new(self.compile_expr(rhs)?);
                (ir::ExprKind::Binary { op: *op, lhs, rhs }, false)
            }
            ast::ExprKind::Logical { op, lhs, rhs } => {
                let lhs = Box::new(self.compile_expr(lhs)?);
                let rhs = Box::new(self.compile_expr(rhs)?);
                (ir::ExprKind::Logical { op: *op, lhs, rhs }, false)
            }
            ast::ExprKind::Compare { op, lhs, rhs } => {
                let lhs = Box::new(self.compile_expr(lhs)?);
                let rhs = Box::new(self.compile_expr(rhs)?);
                (ir::ExprKind::Compare { op: *op, lhs, rhs }, false)
            }
            ast::ExprKind::Member { target, name } => {
                let target = Box::new(self.compile_expr(target)?);
                (ir::ExprKind::Member { target, name: name.clone() }, false)
            }
            ast::ExprKind::Index { target, index } => {
                let target = Box::new(self.compile_expr(target)?);
                let index = Box::new(self.compile_expr(index)?);
                (ir::ExprKind::Index { target, index }, false)
            }
            ast::ExprKind::LastIndex { target } => {
                (ir::ExprKind::LastIndex { target: Box::new(self.compile_expr(target)?) }, false)
            }
            ast::ExprKind::Call { callee, args } => {
                // `!` right after the method name: `obj.path.method!(args)`.
                if let ast::ExprKind::Locked { target: member } = &callee.kind {
                    let lock = self.lock_from_method_member(expr.span, member)?;
                    let callee = Box::new(self.compile_expr(member)?);
                    let args = self.compile_args(args)?;
                    return Ok(ir::Expr { is_async: true, kind: ir::ExprKind::LockedCall { callee, args, lock } });
                }
                // `!` earlier in the chain: `obj.path!.method(args)` or
                // `sequencer!.runOp(args)` — path-keyed, method-agnostic.
                let (lock, stripped) = self.strip_lock(callee)?;
                let callee = Box::new(self.compile_expr(&stripped)?);
                let args = self.compile_args(args)?;
                match lock {
                    Some(path) => {
                        return Ok(ir::Expr {
                            is_async: true,
                            kind: ir::ExprKind::LockedCall { callee, args, lock: ir::LockKey { path, method: None } },
                        });
                    }
                    None => (ir::ExprKind::Call { callee, args }, true),
                }
            }
            ast::ExprKind::Locked { target } => match &target.kind {
                // `!` right after the call's closing paren:
                // `obj.path.method()!` — same semantics as a bang right
                // after the method name.
                ast::ExprKind::Call { callee, args } => {
                    let lock = self.lock_from_method_member(expr.span, callee)?;
                    let callee = Box::new(self.compile_expr(callee)?);
                    let args = self.compile_args(args)?;
                    return Ok(ir::Expr { is_async: true, kind: ir::ExprKind::LockedCall { callee, args, lock } });
                }
                // A bare `!` never consumed by an enclosing call reads a
                // property instead of locking one — not legal.
                _ => return Err(CompileError::SequenceLockOnPropertyRead(expr.span)),
            },
            ast::ExprKind::Filter { target, name, args } => {
                let target = Box::new(self.compile_expr(target)?);
                let args = self.compile_args(args)?;
                (ir::ExprKind::Filter { target, name: name.clone(), args }, true)
            }
            ast::ExprKind::Ternary { cond, then_branch, else_branch } => {
                let cond = Box::new(self.compile_expr(cond)?);
                let then_branch = Box::new(self.compile_expr(then_branch)?);
                let else_branch = Box::new(self.compile_expr(else_branch)?);
                (ir::ExprKind::Ternary { cond, then_branch, else_branch }, false)
            }
            ast::ExprKind::Caller => (ir::ExprKind::Caller, true),
            ast::ExprKind::Command(cp) => {
                let command = self.compile_command(cp)?;
                (ir::ExprKind::Command(command), true)
            }
        };
        let children_async = expr_children_async(&kind);
        Ok(ir::Expr { is_async: inherent || children_async, kind })
    }

    /// Resolves the method-keyed lock for a call whose callee *is* (or, for
    /// the trailing-paren spelling, wraps) the member access naming the
    /// method itself: `obj.path.method!(args)` / `obj.path.method()!`. A
    /// bare identifier callee (`foo!()`) locks under an empty path.
    fn lock_from_method_member(&self, span: Span, member: &ast::Expr) -> CompileResult<ir::LockKey> {
        match &member.kind {
            ast::ExprKind::Member { target, name } => {
                let path = self.static_expr_path(target).ok_or(CompileError::DynamicSequenceLockPath(span))?;
                Ok(ir::LockKey { path, method: Some(name.clone()) })
            }
            ast::ExprKind::Ident(name) => Ok(ir::LockKey { path: vec![], method: Some(name.clone()) }),
            _ => Err(CompileError::DynamicSequenceLockPath(span)),
        }
    }

    /// Walks a call's callee chain looking for a `!` mark that sits
    /// somewhere *before* the final member (`obj.path!.method(args)`,
    /// `sequencer!.runOp(args)`) rather than on the method name itself.
    /// Returns the static path up to the mark, and a copy of the chain with
    /// the `Locked` wrapper removed so it compiles like any other access.
    fn strip_lock(&self, expr: &ast::Expr) -> CompileResult<(Option<Vec<String>>, ast::Expr)> {
        match &expr.kind {
            ast::ExprKind::Locked { target } => {
                let path = self.static_expr_path(target).ok_or(CompileError::DynamicSequenceLockPath(expr.span))?;
                Ok((Some(path), (**target).clone()))
            }
            ast::ExprKind::Member { target, name } => {
                let (lock, stripped_target) = self.strip_lock(target)?;
                let rebuilt = ast::Expr {
                    span: expr.span,
                    kind: ast::ExprKind::Member { target: Box::new(stripped_target), name: name.clone() },
                };
                Ok((lock, rebuilt))
            }
            ast::ExprKind::Index { target, index } => {
                let (lock, stripped_target) = self.strip_lock(target)?;
                let rebuilt = ast::Expr {
                    span: expr.span,
                    kind: ast::ExprKind::Index { target: Box::new(stripped_target), index: index.clone() },
                };
                Ok((lock, rebuilt))
            }
            _ => Ok((None, expr.clone())),
        }
    }

    /// Walks a member/index chain down to its root identifier, returning
    /// the dotted field path if every step is static (field names and
    /// literal indices only — no dynamic index, no nested call, no further
    /// `!`).
    fn static_expr_path(&self, expr: &ast::Expr) -> Option<Vec<String>> {
        match &expr.kind {
            ast::ExprKind::Ident(_) => Some(vec![]),
            ast::ExprKind::Member { target, name } => {
                let mut path = self.static_expr_path(target)?;
                path.push(name.clone());
                Some(path)
            }
            ast::ExprKind::Index { target, index } => {
                let mut path = self.static_expr_path(target)?;
                match &index.kind {
                    ast::ExprKind::Num(n) => path.push(n.to_string()),
                    ast::ExprKind::Str(s) => path.push(s.clone()),
                    _ => return None,
                }
                Some(path)
            }
            _ => None,
        }
    }

    fn compile_command(&mut self, cp: &ast::CommandPath) -> CompileResult<ir::Command> {
        let path = self.compile_path_steps(&cp.path)?;
        let (method, args) = match (&cp.method, &cp.assign) {
            (Some(_), Some(_)) => return Err(CompileError::InvalidCommandAssign),
            (Some(m), None) => (m.name.clone(), self.compile_command_args(&m.args)?),
            (None, Some(ast::Assign::Set(value))) => ("set".to_string(), vec![self.compile_expr(value)?]),
            (None, Some(ast::Assign::Compound(op, value))) => {
                let name = match op {
                    ast::CompoundOp::Add => "add",
                    ast::CompoundOp::Sub => "sub",
                    ast::CompoundOp::Mul => "mul",
                    ast::CompoundOp::Div => "div",
                };
                (name.to_string(), vec![self.compile_expr(value)?])
            }
            (None, Some(ast::Assign::Increment)) => ("inc".to_string(), vec![]),
            (None, Some(ast::Assign::Decrement)) => ("dec".to_string(), vec![]),
            (None, None) => ("set".to_string(), vec![]),
        };
        let lock = match cp.sequence_lock {
            ast::SequenceLockMark::None => None,
            ast::SequenceLockMark::Path => {
                let path = self.static_path_segments(&cp.path, cp.span)?;
                Some(ir::LockKey { path, method: None })
            }
            ast::SequenceLockMark::Method => {
                let path = self.static_path_segments(&cp.path, cp.span)?;
                let method_name = cp.method.as_ref().map(|m| m.name.clone()).unwrap_or_default();
                Some(ir::LockKey { path, method: Some(method_name) })
            }
        };
        let seq = self.next_seq();
        Ok(ir::Command { handler: cp.handler.clone(), path, method, args, lock, seq })
    }

    fn compile_command_args(&mut self, args: &[ast::Arg]) -> CompileResult<Vec<ir::Expr>> {
        args.iter().map(|a| self.compile_expr(&a.value)).collect()
    }

    fn compile_path_steps(&mut self, path: &[ast::PathSegment]) -> CompileResult<Vec<ir::PathStep>> {
        path.iter()
            .map(|seg| {
                Ok(match seg {
                    ast::PathSegment::Field(name) => ir::PathStep::Field(name.clone()),
                    ast::PathSegment::Index(expr) => ir::PathStep::Index(Box::new(self.compile_expr(expr)?)),
                    ast::PathSegment::LastIndex => ir::PathStep::LastIndex,
                })
            })
            .collect()
    }

    fn static_path_segments(&self, path: &[ast::PathSegment], span: Span) -> CompileResult<Vec<String>> {
        path.iter()
            .map(|seg| match seg {
                ast::PathSegment::Field(name) => Ok(name.clone()),
                ast::PathSegment::Index(expr) => match &expr.kind {
                    ast::ExprKind::Num(n) => Ok(n.to_string()),
                    ast::ExprKind::Str(s) => Ok(s.clone()),
                    _ => Err(CompileError::DynamicSequenceLockPath(span)),
                },
                ast::PathSegment::LastIndex => Err(CompileError::DynamicSequenceLockPath(span)),
            })
            .collect()
    }
}

fn declare(scopes: &mut [HashSet<String>], name: &str) {
    if let Some(top) = scopes.last_mut() {
        top.insert(name.to_string());
    }
}

/// Collects every name a `set` statement or compound-assignment writes,
/// recursing into `if`/`while`/`try` bodies (their writes are still visible
/// to the enclosing loop iteration) but not into nested `for`/`macro`/
/// `block`/`capture` (those introduce their own fresh scope, analyzed
/// independently). Conservative by construction: a write the analysis
/// cannot see through is never silently treated as parallel-safe, because
/// nested loop bodies get their own independent, equally conservative pass.
fn collect_written_names(stmts: &[ast::Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            ast::StmtKind::Set { name, .. } => {
                out.insert(name.clone());
            }
            ast::StmtKind::If { branches, else_branch } => {
                for (_, body) in branches {
                    collect_written_names(body, out);
                }
                if let Some(body) = else_branch {
                    collect_written_names(body, out);
                }
            }
            ast::StmtKind::While { body, .. } => collect_written_names(body, out),
            ast::StmtKind::Try { body, except, .. } => {
                collect_written_names(body, out);
                collect_written_names(except, out);
            }
            ast::StmtKind::Guard { body, .. } => {
                let plain: Vec<ast::Stmt> = body
                    .iter()
                    .filter_map(|g| match g {
                        ast::GuardStmt::Stmt(s) => Some(s.clone()),
                        ast::GuardStmt::Revert => None,
                    })
                    .collect();
                collect_written_names(&plain, out);
            }
            _ => {}
        }
    }
}

fn expr_children_async(kind: &ir::ExprKind) -> bool {
    match kind {
        ir::ExprKind::Str(_)
        | ir::ExprKind::Num(_)
        | ir::ExprKind::Bool(_)
        | ir::ExprKind::Null
        | ir::ExprKind::Undefined
        | ir::ExprKind::Regex { .. }
        | ir::ExprKind::Ident(_)
        | ir::ExprKind::Caller => false,
        ir::ExprKind::List(items) => items.iter().any(|e| e.is_async),
        ir::ExprKind::Dict(entries) => entries.iter().any(|(_, v)| v.is_async),
        ir::ExprKind::Unary { expr, .. } => expr.is_async,
        ir::ExprKind::Binary { lhs, rhs, .. }
        | ir::ExprKind::Logical { lhs, rhs, .. }
        | ir::ExprKind::Compare { lhs, rhs, .. } => lhs.is_async || rhs.is_async,
        ir::ExprKind::Member { target, .. } | ir::ExprKind::LastIndex { target } => target.is_async,
        ir::ExprKind::Index { target, index } => target.is_async || index.is_async,
        ir::ExprKind::Call { callee, args } => callee.is_async || args.iter().any(|a| a.value.is_async),
        ir::ExprKind::LockedCall { callee, args, .. } => callee.is_async || args.iter().any(|a| a.value.is_async),
        ir::ExprKind::Filter { target, args, .. } => target.is_async || args.iter().any(|a| a.value.is_async),
        ir::ExprKind::Ternary { cond, then_branch, else_branch } => {
            cond.is_async || then_branch.is_async || else_branch.is_async
        }
        ir::ExprKind::Command(cmd) => cmd.args.iter().any(|a| a.is_async),
    }
}

fn stmt_is_async(kind: &ir::StmtKind) -> bool {
    match kind {
        ir::StmtKind::Text(_) | ir::StmtKind::Raw(_) => false,
        ir::StmtKind::Output(e) | ir::StmtKind::Do(e) => e.is_async,
        ir::StmtKind::Set { value, .. } => value.is_async,
        ir::StmtKind::Command(_) => true,
        ir::StmtKind::If { branches, else_branch } => {
            branches.iter().any(|(cond, body)| cond.is_async || body.iter().any(|s| s.is_async))
                || else_branch.as_ref().is_some_and(|b| b.iter().any(|s| s.is_async))
        }
        ir::StmtKind::For { iterable, body, else_branch, .. } => {
            iterable.is_async
                || body.iter().any(|s| s.is_async)
                || else_branch.as_ref().is_some_and(|b| b.iter().any(|s| s.is_async))
        }
        ir::StmtKind::While { cond, body } => cond.is_async || body.iter().any(|s| s.is_async),
        ir::StmtKind::Macro { body, .. } | ir::StmtKind::Block { body, .. } => body.iter().any(|s| s.is_async),
        ir::StmtKind::Call { args, body, .. } => {
            args.iter().any(|a| a.value.is_async) || body.iter().any(|s| s.is_async)
        }
        ir::StmtKind::Include { .. } | ir::StmtKind::Extends { .. } | ir::StmtKind::Import { .. } | ir::StmtKind::FromImport { .. } => true,
        ir::StmtKind::Guard { body, .. } => body.iter().any(|g| match g {
            ir::GuardStmt::Stmt(s) => s.is_async,
            ir::GuardStmt::Revert => false,
        }),
        ir::StmtKind::Capture { body, .. } => body.iter().any(|s| s.is_async),
        ir::StmtKind::Try { body, except, .. } => body.iter().any(|s| s.is_async) || except.iter().any(|s| s.is_async),
    }
}
