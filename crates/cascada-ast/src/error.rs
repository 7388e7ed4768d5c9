use crate::token::Span;
use thiserror::Error;

/// Lexing failures. Mirrors the shape of `core/src/syn/lexer`'s `Error`: one
/// variant per malformed-input case, each carrying enough to point at the
/// offending byte.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("invalid escape character {0:?}")]
    InvalidEscapeCharacter(char),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("source is not valid utf8")]
    InvalidUtf8,
    #[error("expected closing {0:?}")]
    ExpectedEnd(char),
    #[error("unterminated regex literal")]
    UnterminatedRegex,
}

/// A syntax error with a source position, returned from parsing (and
/// wrapping a [`LexError`] when the failure originated in the lexer).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at {span:?}")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> SyntaxError {
        SyntaxError { message: message.into(), span }
    }

    pub fn from_lex(err: LexError, span: Span) -> SyntaxError {
        SyntaxError { message: err.to_string(), span }
    }
}

pub type ParseResult<T> = Result<T, SyntaxError>;
