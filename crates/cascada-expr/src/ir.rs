//! The executable form produced by [`crate::compile::compile`].
//!
//! This mirrors `cascada-ast::ast` node-for-node but adds the annotations
//! `cascada-core`'s runtime actually consumes: an `is_async` tag per
//! expression, a canonical, already-numbered
//! [`Command`] in place of every sugared `@`-path, and a
//! [`ForPlan`]/[`ForStrategy`] recording whether a loop's iterations are
//! free to run concurrently.

use cascada_ast::ast::{CompareOp, LogicalOp, UnaryOp};
pub use cascada_ast::ast::{BinaryOp, DictKey};
use cascada_value::Number;

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub focus: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub is_async: bool,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Str(String),
    Num(Number),
    Bool(bool),
    Null,
    Undefined,
    Regex { pattern: String, flags: String },
    Ident(String),
    List(Vec<Expr>),
    Dict(Vec<(DictKey, Expr)>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Compare { op: CompareOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Member { target: Box<Expr>, name: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    LastIndex { target: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Arg> },
    /// A `!`-marked method call (`obj.path.m!(...)`) or call immediately
    /// followed by `!`. Lowered into a handle on [`crate::compile::LockKey`]
    /// at compile time rather than re-derived at every dispatch.
    LockedCall { callee: Box<Expr>, args: Vec<Arg>, lock: LockKey },
    Filter { target: Box<Expr>, name: String, args: Vec<Arg> },
    Ternary { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    Caller,
    Command(Command),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// The static key a sequence lock is filed under — a fully static dotted
/// path, optionally narrowed to one method name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub path: Vec<String>,
    pub method: Option<String>,
}

/// A lowered `@handler.path.method(args)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub handler: String,
    pub path: Vec<PathStep>,
    pub method: String,
    pub args: Vec<Expr>,
    pub lock: Option<LockKey>,
    /// Program-order position, assigned once per command at compile time;
    /// the command buffer dispatches strictly in this order per handler.
    pub seq: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    Field(String),
    Index(Box<Expr>),
    LastIndex,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub is_async: bool,
    pub kind: StmtKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    Text(String),
    Output(Expr),
    Set { name: String, value: Expr },
    Do(Expr),
    Command(Command),
    If { branches: Vec<(Expr, Vec<Stmt>)>, else_branch: Option<Vec<Stmt>> },
    For { key: Option<String>, value: String, iterable: Expr, body: Vec<Stmt>, else_branch: Option<Vec<Stmt>>, plan: ForPlan },
    While { cond: Expr, body: Vec<Stmt> },
    Macro { name: String, params: Vec<MacroParam>, focus: Option<String>, body: Vec<Stmt> },
    Call { macro_name: String, args: Vec<Arg>, body: Vec<Stmt> },
    Block { name: String, body: Vec<Stmt> },
    Include { name: Expr, ignore_missing: bool },
    Extends { name: Expr },
    Import { name: Expr, alias: String },
    FromImport { name: Expr, items: Vec<(String, Option<String>)> },
    Guard { selectors: Vec<GuardSelector>, vars: Vec<String>, body: Vec<GuardStmt> },
    Capture { focus: Option<String>, var: String, body: Vec<Stmt> },
    Try { body: Vec<Stmt>, except: Vec<Stmt>, resume: bool },
    Raw(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum GuardStmt {
    Stmt(Stmt),
    Revert,
}

pub use cascada_ast::ast::GuardSelector;

#[derive(Clone, Debug, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

/// Whether a `for` loop's iterations can run concurrently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForStrategy {
    /// No statement in the body writes a name declared outside the loop;
    /// every iteration's output can be produced concurrently and
    /// concatenated in iteration order afterwards.
    Parallel,
    /// At least one statement writes a name declared in an enclosing
    /// scope (the classic running-total accumulator) — iterations run one
    /// at a time, in order, so each sees the previous iteration's write.
    Sequential { written_outer_names: Vec<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForPlan {
    pub strategy: ForStrategy,
}
