//! Guard blocks.
//!
//! A `{% guard %}` block snapshots the handlers named by its selectors (or
//! every handler, for `all`) plus a set of named frame variables before
//! running its body. If the body finishes without introducing a new
//! poison, the snapshot is discarded and whatever state the body produced
//! stands. If it does poison, every selected handler and variable is rolled
//! back to its pre-block snapshot — a `{% revert %}` marker reached along
//! the way only ever pre-empts that same rollback for the *text* buffer, so
//! output already flushed earlier in the block doesn't linger if the block
//! goes on to fail outright.

use cascada_expr::ir;
use cascada_value::Value;

use crate::cmd::Handler;
use crate::exec::exec_stmt;
use crate::rt::Rt;

/// Runs a guard block's body, rolling back on failure.
pub async fn exec_guard(rt: &Rt, selectors: &[ir::GuardSelector], vars: &[String], body: &[ir::GuardStmt]) {
    let handler_names = selected_handlers(rt, selectors);
    let handler_snapshots: Vec<(String, Value)> = handler_names
        .iter()
        .filter_map(|name| rt.cmd.handler(name).map(|h| (name.clone(), h.snapshot())))
        .collect();
    let var_snapshots: Vec<(String, Value)> = vars.iter().map(|v| (v.clone(), rt.frame.get(v))).collect();

    let text_len_at_start = rt.cmd.handler("text").map(|h| h.snapshot().to_string().len()).unwrap_or(0);
    // Compared by error *count*, not presence: a render that already
    // accumulated poison before this guard was reached (from an earlier,
    // unguarded statement) must not make this guard blind to poison its own
    // body introduces.
    let before_count = rt.errors.lock().as_ref().map_or(0, |p| p.errors().len());

    for guard_stmt in body {
        match guard_stmt {
            ir::GuardStmt::Stmt(stmt) => exec_stmt(rt, stmt).await,
            ir::GuardStmt::Revert => {
                if let Some(handler) = rt.cmd.handler("text") {
                    let current = handler.snapshot().to_string();
                    let truncated: String = current.chars().take(text_len_at_start).collect();
                    handler.restore(Value::from(truncated));
                }
            }
        }
    }

    let after_count = rt.errors.lock().as_ref().map_or(0, |p| p.errors().len());
    if after_count > before_count {
        for (name, snapshot) in handler_snapshots {
            if let Some(handler) = rt.cmd.handler(&name) {
                handler.restore(snapshot);
            }
        }
        for (name, snapshot) in var_snapshots {
            rt.frame.set(&name, snapshot);
        }
        // The block's own poison is absorbed here, not surfaced to the
        // render: a guard that fails reverts state and lets execution carry
        // on past `endguard` as if the block had never run. Errors that were
        // already present before the guard started are left untouched.
        let mut guard = rt.errors.lock();
        if before_count == 0 {
            *guard = None;
        } else if let Some(p) = guard.take() {
            let kept = p.errors()[..before_count].to_vec();
            *guard = Some(cascada_value::Poison::from_errors(kept));
        }
    }
}

fn selected_handlers(rt: &Rt, selectors: &[ir::GuardSelector]) -> Vec<String> {
    // No selector at all (plain `{% guard %}`) defaults to `text` and
    // `data`; a bare `@` (`GuardSelector::All`) reverts every handler;
    // anything else is the explicit list of named handlers.
    if selectors.is_empty() {
        return vec!["text".to_string(), "data".to_string()];
    }
    let mut names = Vec::new();
    for selector in selectors {
        match selector {
            ir::GuardSelector::All => return rt.cmd.handler_names(),
            ir::GuardSelector::Handler(name) => names.push(name.clone()),
        }
    }
    names
}
