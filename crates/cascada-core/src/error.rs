use cascada_ast::SyntaxError;
use cascada_expr::CompileError;
use thiserror::Error;

/// The runtime's own `Result::Err` surface — everything
/// *except* the "Runtime-local" kind, which never reaches here: a failed
/// host call, a division by zero in expression context, a failed filter
/// all become [`cascada_value::Poison`] values instead, and guards may
/// absorb them. What lands in `Error` is Syntax/Compile/Load, plus a
/// `RuntimeFatal` variant for the invariant violations §7 says must abort
/// the render outright rather than being captured as poison.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("failed to load template {name:?}: {message}")]
    Load { name: String, message: String },
    #[error("render aborted: {0}")]
    RuntimeFatal(String),
    #[error("unknown template {0:?}")]
    TemplateNotFound(String),
    #[error("unknown block {0:?}")]
    BlockNotFound(String),
    #[error("unknown macro {0:?}")]
    MacroNotFound(String),
    #[error("unknown command handler {0:?}")]
    UnknownHandler(String),
}

pub type Result<T> = std::result::Result<T, Error>;
