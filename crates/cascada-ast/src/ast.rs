//! AST node types produced by [`crate::parser::Parser`].
//!
//! Every node carries a [`Span`] for error reporting; `cascada-expr`'s
//! compiler is the next stage that annotates these nodes with `isAsync`,
//! write/read sets and lowered command forms — nothing here knows about
//! that yet, mirroring how `core/src/sql` keeps parse trees free of planner
//! metadata.

use crate::token::Span;
use cascada_value::Number;

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
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
    /// `target[]` — references the most recently appended element; only
    /// meaningful as (part of) a command path, rejected elsewhere later.
    LastIndex { target: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Arg> },
    /// A `!` immediately following a bare identifier, a member access, or a
    /// call's closing paren — wraps whatever came before it so a
    /// sequence-lock mark can sit anywhere in a postfix chain
    /// (`sequencer!.runOp(...)`, `obj.a.b!.method(...)`,
    /// `obj.a.b.method!(...)`). The compiler (`cascada-expr`), not the
    /// parser, decides whether the wrapped chain is static enough to be a
    /// legal lock key.
    Locked { target: Box<Expr> },
    Filter { target: Box<Expr>, name: String, args: Vec<Arg> },
    Ternary { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    /// `caller()` inside a `{% call %}`-invoked macro body.
    Caller,
    /// `@handler.path.method(args)` used as an expression (its yielded
    /// value, if any, participates in ordinary expression composition);
    /// most commands appear as statements instead, see [`StmtKind::Command`].
    Command(CommandPath),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictKey {
    Ident(String),
    Str(String),
    Computed(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// A command target: `handler.step.step....method`. Every `PathSegment`
/// still holds an `Expr` at parse time — resolving which ones are static
/// enough for a `!` lock, and which must wait for runtime values, is the
/// compiler's job.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandPath {
    pub span: Span,
    pub handler: String,
    pub path: Vec<PathSegment>,
    pub method: Option<MethodCall>,
    /// `!` immediately after the last path segment (path-keyed lock) or
    /// after the method name (method-keyed lock).
    pub sequence_lock: SequenceLockMark,
    /// `@h.path = expr` / `@h.path += expr` / `@h.path++` sugar; the
    /// compiler lowers each to the matching built-in method (`set`, `add`,
    /// `inc`, ...) but the parser keeps the literal operator so diagnostics
    /// can quote it back.
    pub assign: Option<Assign>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Assign {
    Set(Box<Expr>),
    Compound(CompoundOp, Box<Expr>),
    Increment,
    Decrement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompoundOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceLockMark {
    None,
    Path,
    Method,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    Field(String),
    Index(Box<Expr>),
    LastIndex,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    Text(String),
    Output(Expr),
    Set { name: String, value: Expr },
    Do(Expr),
    Command(CommandPath),
    If { branches: Vec<(Expr, Vec<Stmt>)>, else_branch: Option<Vec<Stmt>> },
    For {
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
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
    /// `{% focus name %}` — the template-syntax spelling of the focus
    /// directive a script expresses as a leading `:name` line. Only legal
    /// at the top of a template/script body; the compiler validates that
    /// placement.
    Focus(String),
}

/// A statement inside a guard block: either an ordinary statement or the
/// `revert` marker, which is only legal directly inside a guard.
#[derive(Clone, Debug, PartialEq)]
pub enum GuardStmt {
    Stmt(Stmt),
    Revert,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardSelector {
    All,
    Handler(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

/// A fully parsed template, possibly preceded by a focus directive.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub focus: Option<String>,
    pub body: Vec<Stmt>,
}
