//! Compiles and caches templates by name.
//!
//! `cascada-core` only needs a synchronous "do you already have the compiled
//! program for this name" lookup (`cascada_core::rt::TemplateResolver`) —
//! fetching source and compiling it both happen here, ahead of the render
//! they serve, the same separation the teacher draws between a `Datastore`
//! (owns IO) and the `Transaction`/`Context` it hands to a running query
//! (`core/src/kvs/ds.rs`, `core/src/kvs/tx.rs`).
//!
//! Statically named `{% include/extends/import %}` targets are discovered
//! and compiled transitively before a render starts; a dynamically computed
//! name (`{% include someVar %}`) can only resolve if it was reached by an
//! earlier static walk or pre-registered explicitly — `resolve` itself never
//! blocks on IO, so there is no way for it to honor an unseen name conjured
//! up mid-render.

use std::sync::Arc;

use cascada_ast::parse_template;
use cascada_core::rt::TemplateResolver;
use cascada_core::Error;
use cascada_expr::{compile, ir};
use dashmap::DashMap;

use crate::loader::Loader;

/// Compiles and caches templates on demand, backed by a [`Loader`].
pub struct CachingResolver {
    loader: Arc<dyn Loader>,
    cache: DashMap<String, Arc<ir::Program>>,
}

impl CachingResolver {
    pub fn new(loader: Arc<dyn Loader>) -> CachingResolver {
        CachingResolver { loader, cache: DashMap::new() }
    }

    /// Drops every cached compiled template, forcing the next reference to
    /// each name to reload and recompile it — the loader-side analogue of
    /// the `update` event's loader contract.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.remove(name);
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Compiles `name` (if not already cached) and every template it
    /// statically includes/extends/imports, transitively, so a render can
    /// resolve them all through the synchronous [`TemplateResolver`]
    /// interface without ever needing to await mid-render.
    pub async fn preload(&self, name: &str) -> Result<Arc<ir::Program>, Error> {
        self.preload_from(None, name).await
    }

    /// Like [`preload`](Self::preload), but for a program that was parsed
    /// and compiled directly from source rather than fetched by name
    /// (`renderString`/`renderScript`) — only its static dependencies go
    /// through the loader, the program itself is never cached by name.
    pub async fn preload_program(&self, program: &ir::Program) -> Result<(), Error> {
        for dep in static_dependencies(&program.body) {
            self.preload_from(None, &dep).await?;
        }
        Ok(())
    }

    async fn preload_from(&self, from: Option<&str>, name: &str) -> Result<Arc<ir::Program>, Error> {
        let resolved = self.loader.resolve(from, name);
        if let Some(program) = self.cache.get(&resolved) {
            return Ok(program.value().clone());
        }

        let source = self
            .loader
            .get_source(&resolved)
            .await
            .ok_or_else(|| Error::TemplateNotFound(resolved.clone()))?;

        let template = parse_template(&source.src).map_err(Error::Syntax)?;
        let program = Arc::new(compile(template).map_err(Error::Compile)?);

        if !source.no_cache {
            self.cache.insert(resolved.clone(), program.clone());
        }

        for dep in static_dependencies(&program.body) {
            Box::pin(self.preload_from(Some(&resolved), &dep)).await?;
        }

        Ok(program)
    }
}

impl TemplateResolver for CachingResolver {
    fn resolve(&self, name: &str) -> Option<Arc<ir::Program>> {
        self.cache.get(name).map(|entry| entry.value().clone())
    }
}

/// Collects every statically-named (`ExprKind::Str`) include/extends/import
/// target reachable from `body`, without descending into nested templates
/// themselves (those are walked in their own `preload_from` call once
/// fetched, so a cycle in the include graph can't blow the stack here).
fn static_dependencies(body: &[ir::Stmt]) -> Vec<String> {
    let mut names = Vec::new();
    walk_stmts(body, &mut names);
    names
}

fn static_name(expr: &ir::Expr) -> Option<&str> {
    match &expr.kind {
        ir::ExprKind::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

fn walk_stmts(body: &[ir::Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            ir::StmtKind::Include { name, .. } | ir::StmtKind::Extends { name } => {
                if let Some(n) = static_name(name) {
                    out.push(n.to_string());
                }
            }
            ir::StmtKind::Import { name, .. } | ir::StmtKind::FromImport { name, .. } => {
                if let Some(n) = static_name(name) {
                    out.push(n.to_string());
                }
            }
            ir::StmtKind::If { branches, else_branch } => {
                for (_, b) in branches {
                    walk_stmts(b, out);
                }
                if let Some(b) = else_branch {
                    walk_stmts(b, out);
                }
            }
            ir::StmtKind::For { body, else_branch, .. } => {
                walk_stmts(body, out);
                if let Some(b) = else_branch {
                    walk_stmts(b, out);
                }
            }
            ir::StmtKind::While { body, .. } => walk_stmts(body, out),
            ir::StmtKind::Macro { body, .. } => walk_stmts(body, out),
            ir::StmtKind::Call { body, .. } => walk_stmts(body, out),
            ir::StmtKind::Block { body, .. } => walk_stmts(body, out),
            ir::StmtKind::Capture { body, .. } => walk_stmts(body, out),
            ir::StmtKind::Try { body, except, .. } => {
                walk_stmts(body, out);
                walk_stmts(except, out);
            }
            ir::StmtKind::Guard { body, .. } => {
                for guard_stmt in body {
                    if let ir::GuardStmt::Stmt(s) = guard_stmt {
                        walk_stmts(std::slice::from_ref(s), out);
                    }
                }
            }
            ir::StmtKind::Text(_)
            | ir::StmtKind::Output(_)
            | ir::StmtKind::Set { .. }
            | ir::StmtKind::Do(_)
            | ir::StmtKind::Command(_)
            | ir::StmtKind::Raw(_) => {}
        }
    }
}
