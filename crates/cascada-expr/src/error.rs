use cascada_ast::token::Span;
use thiserror::Error;

/// Compile-time failures — invalid
/// trees the parser's grammar can't reject on its own: a `!` on a dynamic
/// path, a duplicate guard selector, a guard variable that is never
/// written, or similar whole-tree violations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("`!` sequence lock requires a fully static path with no dynamic index or call")]
    DynamicSequenceLockPath(Span),
    #[error("`!` sequence lock cannot be applied to a property read, only to a command path or method call")]
    SequenceLockOnPropertyRead(Span),
    #[error("a call site may carry at most one `!` sequence lock")]
    MultipleSequenceLocks(Span),
    #[error("guard selector `@{0}` is specified more than once")]
    DuplicateGuardSelector(String),
    #[error("a bare `@` guard selector cannot be combined with specific handler selectors")]
    BareGuardSelectorCombined,
    #[error("guard variable `{0}` is not declared in an outer scope")]
    UndeclaredGuardVariable(String),
    #[error("guard variable `{0}` is declared but never modified inside the guard block")]
    UnmodifiedGuardVariable(String),
    #[error("`revert` may only appear directly inside a `guard` block")]
    RevertOutsideGuard,
    #[error("unknown compound assignment target in command path")]
    InvalidCommandAssign,
}

pub type CompileResult<T> = Result<T, CompileError>;
