//! Token types produced by the [`crate::lexer::Lexer`].
//!
//! Shaped after `core/src/syn/token/mod.rs`: a byte-offset [`Span`] kept
//! separate from the token payload, a flat [`TokenKind`] enum, and an
//! [`Operator`] enum carrying everything that can appear between operands.

use std::fmt;

/// A byte range into the source text being lexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub offset: u32,
    pub len: u32,
}

impl Span {
    pub fn new(offset: u32, len: u32) -> Span {
        Span { offset, len }
    }

    pub fn empty() -> Span {
        Span { offset: 0, len: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> u32 {
        self.offset + self.len
    }

    /// A span that covers both `self` and `other`.
    pub fn covers(&self, other: Span) -> Span {
        let start = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        Span { offset: start, len: end - start }
    }

    /// The zero-length span immediately after this one; used to report
    /// "expected X here" errors at an exact point.
    pub fn after(&self) -> Span {
        Span { offset: self.end(), len: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delim {
    Paren,
    Bracket,
    Brace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Eq,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    PlusPlus,
    MinusMinus,
    Dot,
    Comma,
    Colon,
    Pipe,
    Question,
    QuestionQuestion,
    And,
    Or,
    Not,
    In,
    Is,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Tilde => "~",
            Operator::Eq => "=",
            Operator::EqEq => "==",
            Operator::NotEq => "!=",
            Operator::Less => "<",
            Operator::LessEq => "<=",
            Operator::Greater => ">",
            Operator::GreaterEq => ">=",
            Operator::PlusEq => "+=",
            Operator::MinusEq => "-=",
            Operator::StarEq => "*=",
            Operator::SlashEq => "/=",
            Operator::PercentEq => "%=",
            Operator::PlusPlus => "++",
            Operator::MinusMinus => "--",
            Operator::Dot => ".",
            Operator::Comma => ",",
            Operator::Colon => ":",
            Operator::Pipe => "|",
            Operator::Question => "?",
            Operator::QuestionQuestion => "??",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Not => "not",
            Operator::In => "in",
            Operator::Is => "is",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// `{%` / `{%-`
    TagOpen { strip: bool },
    /// `%}` / `-%}`
    TagClose { strip: bool },
    /// `{{` / `{{-`
    ExprOpen { strip: bool },
    /// `}}` / `-}}`
    ExprClose { strip: bool },
    /// `{#` ... `#}`
    Comment,
    /// Raw template text outside any tag/expression delimiter.
    Text,
    Identifier,
    Keyword(Keyword),
    Str,
    Number,
    /// `r/pattern/flags`
    Regex,
    Operator(Operator),
    Open(Delim),
    Close(Delim),
    /// Sequence-lock postfix, lexed distinctly from `Operator::Bang`
    /// because it only ever appears directly after an identifier or a
    /// method-call's closing paren, never as a prefix.
    SequenceLock,
    /// `@`, introducing a command path (`@handler.path.method(...)`).
    At,
    Eof,
    Invalid,
}

impl TokenKind {
    pub fn has_data(&self) -> bool {
        matches!(
            self,
            TokenKind::Text | TokenKind::Identifier | TokenKind::Str | TokenKind::Number | TokenKind::Regex
        )
    }

    pub fn can_be_identifier(&self) -> bool {
        matches!(self, TokenKind::Identifier) || matches!(self, TokenKind::Keyword(k) if k.can_be_identifier())
    }
}

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum Keyword {
            $($variant),*
        }

        impl Keyword {
            pub fn from_str(s: &str) -> Option<Keyword> {
                match s {
                    $($text => Some(Keyword::$variant),)*
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text),*
                }
            }
        }
    };
}

keywords! {
    If => "if", Elif => "elif", Else => "else", Endif => "endif",
    For => "for", Endfor => "endfor",
    While => "while", Endwhile => "endwhile",
    Macro => "macro", Endmacro => "endmacro",
    Block => "block", Endblock => "endblock", Super => "super",
    Call => "call", Endcall => "endcall",
    Include => "include", Ignore => "ignore", Missing => "missing",
    Extends => "extends", Import => "import", From => "from", As => "as",
    Set => "set", Do => "do", Print => "print",
    Guard => "guard", Revert => "revert", Endguard => "endguard",
    Capture => "capture", Endcapture => "endcapture", Focus => "focus",
    Try => "try", Except => "except", Resume => "resume", Endtry => "endtry",
    Raw => "raw", Endraw => "endraw",
    Verbatim => "verbatim", Endverbatim => "endverbatim",
    True => "true", False => "false", Null => "null", Undefined => "undefined",
    And => "and", Or => "or", Not => "not", In => "in", Is => "is",
}

impl Keyword {
    /// Soft keywords that are also valid bare identifiers outside their
    /// introducing position (e.g. `focus` as a variable name).
    pub fn can_be_identifier(&self) -> bool {
        matches!(self, Keyword::Focus | Keyword::As | Keyword::Ignore | Keyword::Missing)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn invalid(span: Span) -> Token {
        Token { kind: TokenKind::Invalid, span }
    }

    pub fn eof(span: Span) -> Token {
        Token { kind: TokenKind::Eof, span }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.kind, TokenKind::Invalid)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
