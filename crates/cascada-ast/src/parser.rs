//! Recursive-descent parser over the token stream.
//!
//! Shaped after `core/src/syn/parser/mod.rs`'s `Parser` (a `next`/`peek`
//! cursor over buffered tokens, `ParseResult<T>` everywhere, dedicated
//! `expect_closing_delimiter` bookkeeping) but plain-recursive rather than
//! `reblessive`-driven: template nesting depth is bounded by source size,
//! not by runtime data, so there is no unbounded-depth concern the way there
//! is for `cascada-value::Value::resolve_deep` walking host-supplied
//! structures.

use crate::ast::*;
use crate::error::{ParseResult, SyntaxError};
use crate::lexer::Lexer;
use crate::token::{Delim, Keyword, Operator, Span, Token, TokenKind};
use cascada_value::Number;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    buf: Vec<Token>,
    last_span: Span,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Parser { lexer: Lexer::new(src), buf: Vec::new(), last_span: Span::empty() }
    }

    fn fill(&mut self, n: usize) {
        while self.buf.len() <= n {
            let tok = self.lexer.next_token();
            self.buf.push(tok);
        }
    }

    fn peek(&mut self) -> &Token {
        self.fill(0);
        &self.buf[0]
    }

    fn peek_at(&mut self, n: usize) -> &Token {
        self.fill(n);
        &self.buf[n]
    }

    fn next(&mut self) -> Token {
        self.fill(0);
        let tok = self.buf.remove(0);
        self.last_span = tok.span;
        tok
    }

    fn text(&self, span: Span) -> &'a str {
        self.lexer.text(span)
    }

    fn error(&mut self, message: impl Into<String>) -> SyntaxError {
        let span = self.peek().span;
        SyntaxError::new(message, span)
    }

    fn expect_operator(&mut self, op: Operator) -> ParseResult<Span> {
        if let TokenKind::Operator(found) = self.peek().kind {
            if found == op {
                return Ok(self.next().span);
            }
        }
        Err(self.error(format!("expected `{}`", op.as_str())))
    }

    fn eat_operator(&mut self, op: Operator) -> bool {
        if let TokenKind::Operator(found) = self.peek().kind {
            if found == op {
                self.next();
                return true;
            }
        }
        false
    }

    fn expect_open(&mut self, d: Delim) -> ParseResult<Span> {
        if self.peek().kind == TokenKind::Open(d) {
            return Ok(self.next().span);
        }
        Err(self.error("expected opening delimiter"))
    }

    fn expect_close(&mut self, d: Delim) -> ParseResult<Span> {
        if self.peek().kind == TokenKind::Close(d) {
            return Ok(self.next().span);
        }
        Err(self.error("expected closing delimiter"))
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if self.peek().kind.can_be_identifier() {
            let tok = self.next();
            Ok(self.text(tok.span).to_owned())
        } else {
            Err(self.error("expected identifier"))
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.peek().kind == TokenKind::Keyword(kw) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> ParseResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", kw.as_str())))
        }
    }

    fn peek_is_keyword(&mut self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    // -- top level ---------------------------------------------------------

    pub fn parse_template(&mut self) -> ParseResult<Template> {
        let body = self.parse_stmts_until(&[])?;
        let focus = body.first().and_then(|s| match &s.kind {
            StmtKind::Focus(name) => Some(name.clone()),
            _ => None,
        });
        let body = if focus.is_some() { body[1..].to_vec() } else { body };
        Ok(Template { focus, body })
    }

    /// Parses statements until EOF or a tag matching one of `stoppers` is
    /// peeked (that tag is left unconsumed for the caller to match).
    fn parse_stmts_until(&mut self, stoppers: &[Keyword]) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            match &self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Text => {
                    let tok = self.next();
                    stmts.push(Stmt { span: tok.span, kind: StmtKind::Text(self.text(tok.span).to_owned()) });
                }
                TokenKind::Comment => {
                    self.next();
                }
                TokenKind::ExprOpen { .. } => {
                    let start = self.next().span;
                    let expr = self.parse_expr()?;
                    let end = self.expect_expr_close()?;
                    stmts.push(Stmt { span: start.covers(end), kind: StmtKind::Output(expr) });
                }
                TokenKind::TagOpen { .. } => {
                    if self.tag_matches_any(stoppers) {
                        break;
                    }
                    let stmt = self.parse_tag()?;
                    if let Some(stmt) = stmt {
                        stmts.push(stmt);
                    }
                }
                _ => return Err(self.error("expected text, expression or tag")),
            }
        }
        Ok(stmts)
    }

    /// Looks ahead past `{%[-]` to the keyword that follows, without
    /// consuming anything, to decide whether the current tag is one of the
    /// stop keywords the caller is waiting for (`endif`, `elif`, ...).
    fn tag_matches_any(&mut self, stoppers: &[Keyword]) -> bool {
        if stoppers.is_empty() {
            return false;
        }
        if let TokenKind::Keyword(kw) = self.peek_at(1).kind {
            return stoppers.contains(&kw);
        }
        false
    }

    fn expect_tag_close(&mut self) -> ParseResult<Span> {
        match self.peek().kind {
            TokenKind::TagClose { .. } => Ok(self.next().span),
            _ => Err(self.error("expected `%}`")),
        }
    }

    fn expect_expr_close(&mut self) -> ParseResult<Span> {
        match self.peek().kind {
            TokenKind::ExprClose { .. } => Ok(self.next().span),
            _ => Err(self.error("expected `}}`")),
        }
    }

    fn parse_tag(&mut self) -> ParseResult<Option<Stmt>> {
        let start = self.next().span; // TagOpen
        let Token { kind: TokenKind::Keyword(kw), .. } = self.peek().clone() else {
            // A tag with no leading keyword is a bare expression statement,
            // used for `{% expr %}`-style implicit `do`.
            let expr = self.parse_expr()?;
            let end = self.expect_tag_close()?;
            return Ok(Some(Stmt { span: start.covers(end), kind: StmtKind::Do(expr) }));
        };
        self.next();
        let stmt = match kw {
            Keyword::If => self.parse_if(start)?,
            Keyword::For => self.parse_for(start)?,
            Keyword::While => self.parse_while(start)?,
            Keyword::Macro => self.parse_macro(start)?,
            Keyword::Call => self.parse_call(start)?,
            Keyword::Block => self.parse_block(start)?,
            Keyword::Include => self.parse_include(start)?,
            Keyword::Extends => self.parse_extends(start)?,
            Keyword::Import => self.parse_import(start)?,
            Keyword::From => self.parse_from_import(start)?,
            Keyword::Set => self.parse_set(start)?,
            Keyword::Do => self.parse_do(start)?,
            Keyword::Print => self.parse_print(start)?,
            Keyword::Guard => self.parse_guard(start)?,
            Keyword::Capture => self.parse_capture(start)?,
            Keyword::Try => self.parse_try(start)?,
            Keyword::Raw => return self.parse_raw(start, Keyword::Endraw).map(Some),
            Keyword::Verbatim => return self.parse_raw(start, Keyword::Endverbatim).map(Some),
            Keyword::Focus => {
                let name = self.expect_identifier()?;
                let end = self.expect_tag_close()?;
                return Ok(Some(Stmt { span: start.covers(end), kind: StmtKind::Focus(name) }));
            }
            other => return Err(self.error(format!("unexpected tag keyword `{}`", other.as_str()))),
        };
        Ok(Some(stmt))
    }

    fn parse_if(&mut self, start: Span) -> ParseResult<Stmt> {
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Elif, Keyword::Else, Keyword::Endif])?;
        branches.push((cond, body));
        loop {
            if self.eat_tag_keyword(Keyword::Elif)? {
                let cond = self.parse_expr()?;
                self.expect_tag_close()?;
                let body = self.parse_stmts_until(&[Keyword::Elif, Keyword::Else, Keyword::Endif])?;
                branches.push((cond, body));
                continue;
            }
            break;
        }
        let else_branch = if self.eat_tag_keyword(Keyword::Else)? {
            self.expect_tag_close()?;
            Some(self.parse_stmts_until(&[Keyword::Endif])?)
        } else {
            None
        };
        self.expect_tag_keyword(Keyword::Endif)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::If { branches, else_branch } })
    }

    /// Consumes `{% <kw>` if the next tag's keyword is `kw`, leaving the
    /// cursor right after the keyword. Used for middle/closing keywords that
    /// were only peeked by [`Parser::tag_matches_any`].
    fn eat_tag_keyword(&mut self, kw: Keyword) -> ParseResult<bool> {
        if !matches!(self.peek().kind, TokenKind::TagOpen { .. }) {
            return Ok(false);
        }
        if self.peek_at(1).kind != TokenKind::Keyword(kw) {
            return Ok(false);
        }
        self.next();
        self.next();
        Ok(true)
    }

    fn expect_tag_keyword(&mut self, kw: Keyword) -> ParseResult<()> {
        if self.eat_tag_keyword(kw)? {
            Ok(())
        } else {
            Err(self.error(format!("expected `{{% {} %}}`", kw.as_str())))
        }
    }

    fn parse_for(&mut self, start: Span) -> ParseResult<Stmt> {
        let first = self.expect_identifier()?;
        let (key, value) = if self.eat_operator(Operator::Comma) {
            (Some(first), self.expect_identifier()?)
        } else {
            (None, first)
        };
        self.expect_keyword(Keyword::In)?;
        let iterable = self.parse_expr()?;
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Else, Keyword::Endfor])?;
        let else_branch = if self.eat_tag_keyword(Keyword::Else)? {
            self.expect_tag_close()?;
            Some(self.parse_stmts_until(&[Keyword::Endfor])?)
        } else {
            None
        };
        self.expect_tag_keyword(Keyword::Endfor)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::For { key, value, iterable, body, else_branch } })
    }

    fn parse_while(&mut self, start: Span) -> ParseResult<Stmt> {
        let cond = self.parse_expr()?;
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Endwhile])?;
        self.expect_tag_keyword(Keyword::Endwhile)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::While { cond, body } })
    }

    fn parse_macro(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.expect_identifier()?;
        self.expect_open(Delim::Paren)?;
        let mut params = Vec::new();
        while self.peek().kind != TokenKind::Close(Delim::Paren) {
            let pname = self.expect_identifier()?;
            let default = if self.eat_operator(Operator::Eq) { Some(self.parse_expr()?) } else { None };
            params.push(MacroParam { name: pname, default });
            if !self.eat_operator(Operator::Comma) {
                break;
            }
        }
        self.expect_close(Delim::Paren)?;
        let focus = if self.eat_operator(Operator::Colon) { Some(self.expect_identifier()?) } else { None };
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Endmacro])?;
        self.expect_tag_keyword(Keyword::Endmacro)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Macro { name, params, focus, body } })
    }

    fn parse_call(&mut self, start: Span) -> ParseResult<Stmt> {
        let macro_name = self.expect_identifier()?;
        let args = if self.peek().kind == TokenKind::Open(Delim::Paren) { self.parse_call_args()? } else { Vec::new() };
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Endcall])?;
        self.expect_tag_keyword(Keyword::Endcall)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Call { macro_name, args, body } })
    }

    fn parse_block(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.expect_identifier()?;
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Endblock])?;
        self.expect_tag_keyword(Keyword::Endblock)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Block { name, body } })
    }

    fn parse_include(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.parse_expr()?;
        let mut ignore_missing = false;
        if self.eat_keyword(Keyword::Ignore) {
            self.expect_keyword(Keyword::Missing)?;
            ignore_missing = true;
        }
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Include { name, ignore_missing } })
    }

    fn parse_extends(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.parse_expr()?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Extends { name } })
    }

    fn parse_import(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.parse_expr()?;
        self.expect_keyword(Keyword::As)?;
        let alias = self.expect_identifier()?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Import { name, alias } })
    }

    fn parse_from_import(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.parse_expr()?;
        self.expect_keyword(Keyword::Import)?;
        let mut items = Vec::new();
        loop {
            let item = self.expect_identifier()?;
            let alias = if self.eat_keyword(Keyword::As) { Some(self.expect_identifier()?) } else { None };
            items.push((item, alias));
            if !self.eat_operator(Operator::Comma) {
                break;
            }
        }
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::FromImport { name, items } })
    }

    fn parse_set(&mut self, start: Span) -> ParseResult<Stmt> {
        let name = self.expect_identifier()?;
        self.expect_operator(Operator::Eq)?;
        let value = self.parse_expr()?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Set { name, value } })
    }

    fn parse_do(&mut self, start: Span) -> ParseResult<Stmt> {
        if matches!(self.peek().kind, TokenKind::At) {
            let path = self.parse_command_path()?;
            let end = self.expect_tag_close()?;
            return Ok(Stmt { span: start.covers(end), kind: StmtKind::Command(path) });
        }
        let expr = self.parse_expr()?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Do(expr) })
    }

    fn parse_print(&mut self, start: Span) -> ParseResult<Stmt> {
        let expr = self.parse_expr()?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Output(expr) })
    }

    fn parse_guard(&mut self, start: Span) -> ParseResult<Stmt> {
        let mut selectors = Vec::new();
        let mut vars = Vec::new();
        loop {
            if matches!(self.peek().kind, TokenKind::At) {
                self.next();
                if matches!(self.peek().kind, TokenKind::Identifier) {
                    let name = self.expect_identifier()?;
                    selectors.push(GuardSelector::Handler(name));
                } else {
                    selectors.push(GuardSelector::All);
                }
                continue;
            }
            if matches!(self.peek().kind, TokenKind::Identifier) {
                vars.push(self.expect_identifier()?);
                if self.eat_operator(Operator::Comma) {
                    continue;
                }
            }
            break;
        }
        self.expect_tag_close()?;
        let mut body = Vec::new();
        loop {
            match &self.peek().kind {
                TokenKind::TagOpen { .. } if self.tag_matches_any(&[Keyword::Revert, Keyword::Endguard]) => {
                    if self.eat_tag_keyword(Keyword::Revert)? {
                        let end = self.expect_tag_close()?;
                        body.push(GuardStmt::Revert);
                        let _ = end;
                        continue;
                    }
                    break;
                }
                TokenKind::Eof => break,
                _ => {
                    let stmts = self.parse_stmts_until(&[Keyword::Revert, Keyword::Endguard])?;
                    body.extend(stmts.into_iter().map(GuardStmt::Stmt));
                }
            }
        }
        self.expect_tag_keyword(Keyword::Endguard)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Guard { selectors, vars, body } })
    }

    fn parse_capture(&mut self, start: Span) -> ParseResult<Stmt> {
        let var = self.expect_identifier()?;
        let focus = if self.eat_operator(Operator::Colon) { Some(self.expect_identifier()?) } else { None };
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Endcapture])?;
        self.expect_tag_keyword(Keyword::Endcapture)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Capture { focus, var, body } })
    }

    fn parse_try(&mut self, start: Span) -> ParseResult<Stmt> {
        self.expect_tag_close()?;
        let body = self.parse_stmts_until(&[Keyword::Except, Keyword::Endtry])?;
        let mut except = Vec::new();
        let mut resume = false;
        if self.eat_tag_keyword(Keyword::Except)? {
            self.expect_tag_close()?;
            except = self.parse_stmts_until(&[Keyword::Resume, Keyword::Endtry])?;
            if self.eat_tag_keyword(Keyword::Resume)? {
                resume = true;
                self.expect_tag_close()?;
            }
        }
        self.expect_tag_keyword(Keyword::Endtry)?;
        let end = self.expect_tag_close()?;
        Ok(Stmt { span: start.covers(end), kind: StmtKind::Try { body, except, resume } })
    }

    fn parse_raw(&mut self, start: Span, closing: Keyword) -> ParseResult<Stmt> {
        self.expect_tag_close()?;
        let text_start = self.last_span.end();
        loop {
            if matches!(self.peek().kind, TokenKind::Eof) {
                return Err(self.error("unterminated raw block"));
            }
            if matches!(self.peek().kind, TokenKind::TagOpen { .. }) && self.peek_at(1).kind == TokenKind::Keyword(closing)
            {
                break;
            }
            self.next();
        }
        let text_end = self.peek().span.offset;
        let text = self.lexer.text(Span::new(text_start, text_end - text_start)).to_owned();
        self.next(); // TagOpen
        self.next(); // closing keyword
        let end = self.expect_tag_close()?;
        let _ = start;
        Ok(Stmt { span: Span::new(text_start, end.end() - text_start), kind: StmtKind::Raw(text) })
    }

    // -- command paths -------------------------------------------------------

    fn parse_command_path(&mut self) -> ParseResult<CommandPath> {
        let start = self.next().span; // `@`
        let handler = self.expect_identifier()?;
        let mut path = Vec::new();
        let mut sequence_lock = SequenceLockMark::None;
        loop {
            if self.eat_operator(Operator::Dot) {
                if self.eat_operator(Operator::Dot) {
                    // unreachable, kept defensive
                }
                let name = self.expect_identifier()?;
                path.push(PathSegment::Field(name));
                continue;
            }
            if self.peek().kind == TokenKind::Open(Delim::Bracket) {
                self.next();
                if self.peek().kind == TokenKind::Close(Delim::Bracket) {
                    self.next();
                    path.push(PathSegment::LastIndex);
                } else {
                    let idx = self.parse_expr()?;
                    self.expect_close(Delim::Bracket)?;
                    path.push(PathSegment::Index(Box::new(idx)));
                }
                continue;
            }
            break;
        }
        if matches!(self.peek().kind, TokenKind::SequenceLock) {
            self.next();
            sequence_lock = SequenceLockMark::Path;
        }
        let mut method = None;
        if self.eat_operator(Operator::Dot) {
            let name = self.expect_identifier()?;
            if matches!(self.peek().kind, TokenKind::SequenceLock) {
                self.next();
                sequence_lock = SequenceLockMark::Method;
            }
            let args = if self.peek().kind == TokenKind::Open(Delim::Paren) { self.parse_call_args()? } else { Vec::new() };
            method = Some(MethodCall { name, args });
        } else if self.peek().kind == TokenKind::Open(Delim::Paren) {
            // `@handler(args)` / `@handler.path(args)` with no explicit
            // method name calls the handler directly, i.e. its `_call`
            // fallback.
            let args = self.parse_call_args()?;
            method = Some(MethodCall { name: "_call".to_string(), args });
        }
        let assign = self.parse_optional_assign()?;
        let end = self.last_span;
        Ok(CommandPath { span: start.covers(end), handler, path, method, sequence_lock, assign })
    }

    /// `= expr`, `+= expr` / `-= expr` / `*= expr` / `/= expr`, or bare
    /// `++` / `--`, attached to a command path's addressed location.
    fn parse_optional_assign(&mut self) -> ParseResult<Option<Assign>> {
        let op = match self.peek().kind {
            TokenKind::Operator(Operator::Eq) => {
                self.next();
                return Ok(Some(Assign::Set(Box::new(self.parse_expr()?))));
            }
            TokenKind::Operator(Operator::PlusEq) => CompoundOp::Add,
            TokenKind::Operator(Operator::MinusEq) => CompoundOp::Sub,
            TokenKind::Operator(Operator::StarEq) => CompoundOp::Mul,
            TokenKind::Operator(Operator::SlashEq) => CompoundOp::Div,
            TokenKind::Operator(Operator::PlusPlus) => {
                self.next();
                return Ok(Some(Assign::Increment));
            }
            TokenKind::Operator(Operator::MinusMinus) => {
                self.next();
                return Ok(Some(Assign::Decrement));
            }
            _ => return Ok(None),
        };
        self.next();
        Ok(Some(Assign::Compound(op, Box::new(self.parse_expr()?))))
    }

    // -- expressions ---------------------------------------------------------

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.parse_or()?;
        if self.eat_operator(Operator::Question) {
            let then_branch = self.parse_expr()?;
            self.expect_operator(Operator::Colon)?;
            let else_branch = self.parse_expr()?;
            let span = cond.span.covers(else_branch.span);
            return Ok(Expr {
                span,
                kind: ExprKind::Ternary {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_and()?;
        while let TokenKind::Operator(Operator::Or) = self.peek().kind {
            self.next();
            let rhs = self.parse_and()?;
            let span = lhs.span.covers(rhs.span);
            lhs = Expr { span, kind: ExprKind::Logical { op: LogicalOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) } };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_not()?;
        while let TokenKind::Operator(Operator::And) = self.peek().kind {
            self.next();
            let rhs = self.parse_not()?;
            let span = lhs.span.covers(rhs.span);
            lhs = Expr { span, kind: ExprKind::Logical { op: LogicalOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) } };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if let TokenKind::Operator(Operator::Not) = self.peek().kind {
            let start = self.next().span;
            let expr = self.parse_not()?;
            let span = start.covers(expr.span);
            return Ok(Expr { span, kind: ExprKind::Unary { op: UnaryOp::Not, expr: Box::new(expr) } });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_concat()?;
        let op = match self.peek().kind {
            TokenKind::Operator(Operator::EqEq) => Some(CompareOp::Eq),
            TokenKind::Operator(Operator::NotEq) => Some(CompareOp::Ne),
            TokenKind::Operator(Operator::Less) => Some(CompareOp::Lt),
            TokenKind::Operator(Operator::LessEq) => Some(CompareOp::Le),
            TokenKind::Operator(Operator::Greater) => Some(CompareOp::Gt),
            TokenKind::Operator(Operator::GreaterEq) => Some(CompareOp::Ge),
            TokenKind::Operator(Operator::In) => Some(CompareOp::In),
            TokenKind::Keyword(Keyword::Is) => None,
            _ => None,
        };
        if self.peek_is_keyword(Keyword::Not) && self.peek_at(1).kind == TokenKind::Operator(Operator::In) {
            self.next();
            self.next();
            let rhs = self.parse_concat()?;
            let span = lhs.span.covers(rhs.span);
            return Ok(Expr { span, kind: ExprKind::Compare { op: CompareOp::NotIn, lhs: Box::new(lhs), rhs: Box::new(rhs) } });
        }
        if let Some(op) = op {
            self.next();
            let rhs = self.parse_concat()?;
            let span = lhs.span.covers(rhs.span);
            return Ok(Expr { span, kind: ExprKind::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) } });
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_additive()?;
        while self.eat_operator(Operator::Tilde) {
            let rhs = self.parse_additive()?;
            let span = lhs.span.covers(rhs.span);
            lhs = Expr { span, kind: ExprKind::Binary { op: BinaryOp::Concat, lhs: Box::new(lhs), rhs: Box::new(rhs) } };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Operator(Operator::Plus) => BinaryOp::Add,
                TokenKind::Operator(Operator::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_multiplicative()?;
            let span = lhs.span.covers(rhs.span);
            lhs = Expr { span, kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) } };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Operator(Operator::Star) => BinaryOp::Mul,
                TokenKind::Operator(Operator::Slash) => BinaryOp::Div,
                TokenKind::Operator(Operator::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            let span = lhs.span.covers(rhs.span);
            lhs = Expr { span, kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) } };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if let TokenKind::Operator(Operator::Minus) = self.peek().kind {
            let start = self.next().span;
            let expr = self.parse_unary()?;
            let span = start.covers(expr.span);
            return Ok(Expr { span, kind: ExprKind::Unary { op: UnaryOp::Neg, expr: Box::new(expr) } });
        }
        self.parse_filter()
    }

    fn parse_filter(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.parse_postfix()?;
        while self.eat_operator(Operator::Pipe) {
            let name = self.expect_identifier()?;
            let args = if self.peek().kind == TokenKind::Open(Delim::Paren) { self.parse_call_args()? } else { Vec::new() };
            let span = lhs.span;
            lhs = Expr { span, kind: ExprKind::Filter { target: Box::new(lhs), name, args } };
        }
        Ok(lhs)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        expr = self.wrap_sequence_lock(expr);
        loop {
            if self.eat_operator(Operator::Dot) {
                let name = self.expect_identifier()?;
                let span = expr.span;
                expr = Expr { span, kind: ExprKind::Member { target: Box::new(expr), name } };
                expr = self.wrap_sequence_lock(expr);
                continue;
            }
            if self.peek().kind == TokenKind::Open(Delim::Bracket) {
                self.next();
                if self.peek().kind == TokenKind::Close(Delim::Bracket) {
                    self.next();
                    let span = expr.span;
                    expr = Expr { span, kind: ExprKind::LastIndex { target: Box::new(expr) } };
                    continue;
                }
                let index = self.parse_expr()?;
                self.expect_close(Delim::Bracket)?;
                let span = expr.span;
                expr = Expr { span, kind: ExprKind::Index { target: Box::new(expr), index: Box::new(index) } };
                continue;
            }
            if self.peek().kind == TokenKind::Open(Delim::Paren) {
                let args = self.parse_call_args()?;
                let span = expr.span;
                expr = Expr { span, kind: ExprKind::Call { callee: Box::new(expr), args } };
                expr = self.wrap_sequence_lock(expr);
                continue;
            }
            break;
        }
        Ok(expr)
    }

    /// Consumes a trailing `!`, if present, wrapping `expr` in
    /// `ExprKind::Locked` so a lock mark can sit after a bare identifier
    /// (`sequencer!.runOp(...)`), after a member access
    /// (`obj.a.b!.method(...)`), after a method name
    /// (`obj.a.b.method!(...)`), or after a call's closing paren
    /// (`obj.a.b.method()!`). Whether the wrapped chain is actually static
    /// enough to be a legal lock key is `cascada-expr`'s job, not the
    /// parser's.
    fn wrap_sequence_lock(&mut self, expr: Expr) -> Expr {
        if matches!(self.peek().kind, TokenKind::SequenceLock) {
            self.next();
            let span = expr.span;
            Expr { span, kind: ExprKind::Locked { target: Box::new(expr) } }
        } else {
            expr
        }
    }

    fn parse_call_args(&mut self) -> ParseResult<Vec<Arg>> {
        self.expect_open(Delim::Paren)?;
        let mut args = Vec::new();
        while self.peek().kind != TokenKind::Close(Delim::Paren) {
            if matches!(self.peek().kind, TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::Operator(Operator::Eq)
            {
                let name = self.expect_identifier()?;
                self.next();
                let value = self.parse_expr()?;
                args.push(Arg { name: Some(name), value });
            } else {
                args.push(Arg { name: None, value: self.parse_expr()? });
            }
            if !self.eat_operator(Operator::Comma) {
                break;
            }
        }
        self.expect_close(Delim::Paren)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Num(parse_number(self.text(tok.span))) })
            }
            TokenKind::Str => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Str(unescape_string(self.text(tok.span))) })
            }
            TokenKind::Regex => {
                self.next();
                let (pattern, flags) = split_regex(self.text(tok.span));
                Ok(Expr { span: tok.span, kind: ExprKind::Regex { pattern, flags } })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Bool(true) })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Bool(false) })
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Null })
            }
            TokenKind::Keyword(Keyword::Undefined) => {
                self.next();
                Ok(Expr { span: tok.span, kind: ExprKind::Undefined })
            }
            TokenKind::Identifier | TokenKind::Keyword(_) if tok.kind.can_be_identifier() => {
                self.next();
                let name = self.text(tok.span).to_owned();
                if name == "caller" && self.peek().kind == TokenKind::Open(Delim::Paren) {
                    if self.peek_at(1).kind == TokenKind::Close(Delim::Paren) {
                        self.next();
                        let end = self.next().span;
                        return Ok(Expr { span: tok.span.covers(end), kind: ExprKind::Caller });
                    }
                }
                Ok(Expr { span: tok.span, kind: ExprKind::Ident(name) })
            }
            TokenKind::Open(Delim::Paren) => {
                self.next();
                let expr = self.parse_expr()?;
                self.expect_close(Delim::Paren)?;
                Ok(expr)
            }
            TokenKind::Open(Delim::Bracket) => self.parse_list(tok.span),
            TokenKind::Open(Delim::Brace) => self.parse_dict(tok.span),
            TokenKind::At => {
                let path = self.parse_command_path()?;
                Ok(Expr { span: path.span, kind: ExprKind::Command(path) })
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_list(&mut self, start: Span) -> ParseResult<Expr> {
        self.next();
        let mut items = Vec::new();
        while self.peek().kind != TokenKind::Close(Delim::Bracket) {
            items.push(self.parse_expr()?);
            if !self.eat_operator(Operator::Comma) {
                break;
            }
        }
        let end = self.expect_close(Delim::Bracket)?;
        Ok(Expr { span: start.covers(end), kind: ExprKind::List(items) })
    }

    fn parse_dict(&mut self, start: Span) -> ParseResult<Expr> {
        self.next();
        let mut items = Vec::new();
        while self.peek().kind != TokenKind::Close(Delim::Brace) {
            let key = match self.peek().kind.clone() {
                TokenKind::Str => {
                    let t = self.next();
                    DictKey::Str(unescape_string(self.text(t.span)))
                }
                TokenKind::Open(Delim::Bracket) => {
                    self.next();
                    let expr = self.parse_expr()?;
                    self.expect_close(Delim::Bracket)?;
                    DictKey::Computed(Box::new(expr))
                }
                _ => DictKey::Ident(self.expect_identifier()?),
            };
            self.expect_operator(Operator::Colon)?;
            let value = self.parse_expr()?;
            items.push((key, value));
            if !self.eat_operator(Operator::Comma) {
                break;
            }
        }
        let end = self.expect_close(Delim::Brace)?;
        Ok(Expr { span: start.covers(end), kind: ExprKind::Dict(items) })
    }
}

fn parse_number(text: &str) -> Number {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if cleaned.contains('.') || cleaned.contains(['e', 'E']) {
        Number::from(cleaned.parse::<f64>().unwrap_or(0.0))
    } else {
        match cleaned.parse::<i64>() {
            Ok(v) => Number::from(v),
            Err(_) => Number::from(cleaned.parse::<f64>().unwrap_or(0.0)),
        }
    }
}

fn unescape_string(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn split_regex(text: &str) -> (String, String) {
    let without_leading = &text[1..];
    let end = without_leading.rfind('/').unwrap_or(without_leading.len());
    (without_leading[..end].to_owned(), without_leading[end + 1..].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_expression_output() {
        let mut p = Parser::new("{{ 1 + 2 }}");
        let t = p.parse_template().unwrap();
        assert_eq!(t.body.len(), 1);
        assert!(matches!(t.body[0].kind, StmtKind::Output(_)));
    }

    #[test]
    fn parses_if_elif_else() {
        let src = "{% if a %}A{% elif b %}B{% else %}C{% endif %}";
        let mut p = Parser::new(src);
        let t = p.parse_template().unwrap();
        let StmtKind::If { branches, else_branch } = &t.body[0].kind else { panic!() };
        assert_eq!(branches.len(), 2);
        assert!(else_branch.is_some());
    }

    #[test]
    fn parses_for_else() {
        let src = "{% for x in items %}{{ x }}{% else %}empty{% endfor %}";
        let mut p = Parser::new(src);
        let t = p.parse_template().unwrap();
        assert!(matches!(t.body[0].kind, StmtKind::For { .. }));
    }

    #[test]
    fn parses_command_statement_with_sequence_lock() {
        let src = "{% do @data.counter! += 1 %}";
        let mut p = Parser::new(src);
        let t = p.parse_template().unwrap();
        let StmtKind::Command(cmd) = &t.body[0].kind else { panic!("expected command") };
        assert_eq!(cmd.handler, "data");
        assert_eq!(cmd.sequence_lock, SequenceLockMark::Path);
    }

    #[test]
    fn parses_guard_with_selector_and_revert() {
        let src = "{% guard @data x %}{% revert %}{% endguard %}";
        let mut p = Parser::new(src);
        let t = p.parse_template().unwrap();
        let StmtKind::Guard { selectors, vars, body } = &t.body[0].kind else { panic!() };
        assert_eq!(selectors, &vec![GuardSelector::Handler("data".into())]);
        assert_eq!(vars, &vec!["x".to_string()]);
        assert!(matches!(body[0], GuardStmt::Revert));
    }
}
