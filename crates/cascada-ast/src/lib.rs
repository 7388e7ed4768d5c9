//! Lexer, parser, AST and script-to-template transpiler for Cascada.
//!
//! Parses either template source directly, or a line-oriented script
//! that is first transpiled to template source and then
//! parsed by the same [`parser::Parser`]. Neither this crate nor the lexer
//! underneath it knows anything about async scheduling, write/read sets or
//! command lowering — that is `cascada-expr`'s job.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod script;
pub mod token;

pub use ast::*;
pub use error::{LexError, ParseResult, SyntaxError};
pub use parser::Parser;

/// Parses template source directly into a [`Template`].
pub fn parse_template(src: &str) -> ParseResult<Template> {
    Parser::new(src).parse_template()
}

/// Transpiles line-oriented script source to template source, then parses
/// it. The returned [`Template`]'s `focus` is populated from a leading
/// `:name` directive line, if present.
pub fn parse_script(src: &str) -> ParseResult<Template> {
    let (transpiled, focus) = script::transpile(src)?;
    let mut template = Parser::new(&transpiled).parse_template()?;
    template.focus = focus;
    Ok(template)
}
