//! Line-oriented script syntax → template source.
//!
//! A script is transpiled to template source one *logical* line at a time,
//! then handed to [`crate::parser::Parser`] unchanged — block-structure
//! validation (matching `if`/`endif`, `for`/`endfor`, rejecting a stray
//! `else` outside its parent) therefore falls out of the template parser for
//! free: a misplaced middle keyword becomes an ordinary "unexpected tag
//! keyword" [`crate::error::SyntaxError`] there, exactly as it would if a
//! template author had typed `{% else %}` in the wrong place.
//!
//! A logical line is one or more physical lines joined when the line ends
//! mid-expression: an open bracket not yet closed, a trailing binary
//! operator, or (symmetrically) a following line that opens with one.

use crate::error::{ParseResult, SyntaxError};
use crate::token::Span;

const BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "endif", "for", "endfor", "while", "endwhile", "macro", "endmacro", "block", "endblock",
    "call", "endcall", "include", "extends", "import", "from", "set", "do", "guard", "revert", "endguard", "capture",
    "endcapture", "try", "except", "resume", "endtry", "raw", "endraw", "verbatim", "endverbatim", "focus",
];

/// Transpiles `src` to template source, returning it alongside the focus
/// directive extracted from a leading `:name` line, if any.
pub fn transpile(src: &str) -> ParseResult<(String, Option<String>)> {
    let logical_lines = join_continuations(src)?;
    let mut out = String::new();
    let mut focus = None;
    let mut seen_code = false;
    for (line, _offset) in logical_lines {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if !seen_code {
            seen_code = true;
            if let Some(name) = trimmed.strip_prefix(':') {
                focus = Some(name.trim().to_string());
                continue;
            }
        }
        emit_line(&mut out, trimmed);
    }
    Ok((out, focus))
}

fn first_word(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

fn emit_line(out: &mut String, line: &str) {
    let word = first_word(line);
    if word == "print" {
        let rest = line[word.len()..].trim();
        out.push_str("{{ ");
        out.push_str(rest);
        out.push_str(" }}\n");
        return;
    }
    // `var name = expr` is script sugar for `set name = expr`.
    if word == "var" {
        out.push_str("{% set");
        out.push_str(&line[word.len()..]);
        out.push_str(" %}\n");
        return;
    }
    if BLOCK_KEYWORDS.contains(&word) {
        out.push_str("{% ");
        out.push_str(line);
        out.push_str(" %}\n");
        return;
    }
    if line.starts_with('@') {
        out.push_str("{% do ");
        out.push_str(line);
        out.push_str(" %}\n");
        return;
    }
    if is_bare_assignment(line) {
        out.push_str("{% set ");
        out.push_str(line);
        out.push_str(" %}\n");
        return;
    }
    // Any other non-empty, non-comment, non-`@` line is an implicit `do`.
    out.push_str("{% do ");
    out.push_str(line);
    out.push_str(" %}\n");
}

/// `name = expr` with no leading `var`/`set` — script sugar for
/// re-assignment of an already-declared variable. Rejects `==`, `!=`,
/// `<=`, `>=` and compound-assignment forms, which stay implicit `do`/`@`
/// expressions instead.
fn is_bare_assignment(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut i = 0;
    if i >= bytes.len() || !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return false;
    }
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return false;
    }
    !matches!(bytes.get(i + 1), Some(b'='))
}

fn ends_with_continuation(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if let Some(last_word) = s.rsplit(char::is_whitespace).next() {
        if matches!(last_word, "and" | "or" | "not" | "in" | "is") {
            return true;
        }
    }
    matches!(s.chars().last(), Some('+' | '-' | '*' | '/' | '%' | '~' | ',' | '.' | '?' | ':' | '|' | '='))
}

/// Deliberately excludes a leading `-`: a line starting with `-` is far more
/// often a new statement beginning with a negative literal than a
/// continuation of the previous one.
fn starts_with_continuation(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if let Some(first) = s.split_whitespace().next() {
        if matches!(first, "and" | "or") {
            return true;
        }
    }
    matches!(s.chars().next(), Some('.' | ')' | ']' | '}' | '+' | '*' | '/' | '%' | '~' | ',' | '?' | ':' | '|'))
}

/// Bracket-depth delta for one physical line, skipping characters inside
/// string literals and `#`-comments. Errs if the line ends with an
/// unterminated string — this grammar has no multi-line strings.
fn bracket_delta(line: &str) -> Result<i32, ()> {
    let mut depth = 0i32;
    let mut chars = line.chars();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '#' => break,
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(());
    }
    Ok(depth)
}

fn join_continuations(src: &str) -> ParseResult<Vec<(String, u32)>> {
    let mut physical: Vec<(&str, u32)> = Vec::new();
    let mut offset = 0u32;
    for raw in src.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        physical.push((line, offset));
        offset += raw.len() as u32 + 1;
    }

    let mut logical = Vec::new();
    let mut i = 0;
    let mut depth = 0i32;
    while i < physical.len() {
        let (first_line, start_offset) = physical[i];
        let mut buf = String::from(first_line.trim());
        depth += bracket_delta(first_line)
            .map_err(|_| unterminated_string(first_line, start_offset))?;
        i += 1;
        loop {
            let next_starts_continuation =
                physical.get(i).map(|(l, _)| starts_with_continuation(l.trim_start())).unwrap_or(false);
            if depth <= 0 && !ends_with_continuation(buf.trim_end()) && !next_starts_continuation {
                break;
            }
            let Some((next_line, next_offset)) = physical.get(i).copied() else { break };
            buf.push(' ');
            buf.push_str(next_line.trim());
            depth += bracket_delta(next_line).map_err(|_| unterminated_string(next_line, next_offset))?;
            i += 1;
        }
        logical.push((buf, start_offset));
    }
    Ok(logical)
}

fn unterminated_string(line: &str, offset: u32) -> SyntaxError {
    SyntaxError::new("unterminated string literal in script line", Span::new(offset, line.len() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_focus_directive() {
        let (_, focus) = transpile(":data\nvar x = 1\n").unwrap();
        assert_eq!(focus.as_deref(), Some("data"));
    }

    #[test]
    fn var_becomes_set() {
        let (out, _) = transpile("var u = fetchData('users')\n").unwrap();
        assert_eq!(out.trim(), "{% set u = fetchData('users') %}");
    }

    #[test]
    fn command_line_becomes_do() {
        let (out, _) = transpile("@data.result.users.set(u)\n").unwrap();
        assert_eq!(out.trim(), "{% do @data.result.users.set(u) %}");
    }

    #[test]
    fn bare_reassignment_becomes_set() {
        let (out, _) = transpile("total = total + i\n").unwrap();
        assert_eq!(out.trim(), "{% set total = total + i %}");
    }

    #[test]
    fn for_else_endfor_pass_through_as_block_tags() {
        let (out, _) = transpile("for i in items\ntotal = total + i\nelse\ntotal = 100\nendfor\n").unwrap();
        assert!(out.contains("{% for i in items %}"));
        assert!(out.contains("{% else %}"));
        assert!(out.contains("{% endfor %}"));
    }

    #[test]
    fn joins_line_ending_in_trailing_operator() {
        let (out, _) = transpile("var x = 1 +\n  2\n").unwrap();
        assert_eq!(out.trim(), "{% set x = 1 + 2 %}");
    }

    #[test]
    fn joins_unclosed_bracket_across_lines() {
        let (out, _) = transpile("var x = [1,\n  2,\n  3]\n").unwrap();
        assert_eq!(out.trim(), "{% set x = [1, 2, 3] %}");
    }

    #[test]
    fn skips_comment_lines() {
        let (out, _) = transpile("# a comment\nvar x = 1\n").unwrap();
        assert_eq!(out.trim(), "{% set x = 1 %}");
    }

    #[test]
    fn print_line_becomes_output_tag() {
        let (out, _) = transpile("print x\n").unwrap();
        assert_eq!(out.trim(), "{{ x }}");
    }

    #[test]
    fn full_scenario_one_transpiles_and_parses() {
        let script = ":data\nvar u = fetchData('users')\nvar c = fetchData('config')\n@data.result.users.set(u)\n@data.result.config.merge(c)\n@data.result.config.loaded.set(true)\n";
        let template = crate::parse_script(script).unwrap();
        assert_eq!(template.focus.as_deref(), Some("data"));
        assert_eq!(template.body.len(), 5);
    }
}
