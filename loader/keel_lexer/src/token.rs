//! Token definitions.

use logos::Logos;

/// Byte range of a token in its source file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn from_range(range: std::ops::Range<usize>) -> Self {
        Span {
            start: u32::try_from(range.start).unwrap_or(u32::MAX),
            end: u32::try_from(range.end).unwrap_or(u32::MAX),
        }
    }

    pub const fn point(offset: u32) -> Self {
        Span {
            start: offset,
            end: offset,
        }
    }

    pub fn to_range(self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }

    #[must_use]
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Raw token from logos, before comment filtering.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
pub(crate) enum RawToken {
    #[regex(r"//[^\n]*")]
    LineComment,
    #[regex(r"/\*([^*]|\*[^/])*\*/")]
    BlockComment,
    #[token("\n")]
    Newline,

    #[token("import")]
    Import,
    #[token("as")]
    As,
    #[token("property")]
    Property,
    #[token("var")]
    Var,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,
    #[token("typeof")]
    Typeof,
    #[token("new")]
    New,
    #[token("throw")]
    Throw,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*")]
    Ident,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#)]
    String,
    #[regex(r"0[xX][0-9a-fA-F]+")]
    HexNumber,
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    FloatNumber,
    #[regex(r"[0-9]+")]
    IntNumber,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,

    #[token("===")]
    StrictEq,
    #[token("!==")]
    StrictNotEq,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LessEq,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
}

/// Public token kind; comments never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Newline,
    Import,
    As,
    Property,
    Var,
    Function,
    Return,
    If,
    Else,
    True,
    False,
    Null,
    Undefined,
    Typeof,
    New,
    Throw,
    Ident,
    String,
    HexNumber,
    FloatNumber,
    IntNumber,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Semicolon,
    Comma,
    Dot,
    Colon,
    Question,
    StrictEq,
    StrictNotEq,
    Eq,
    NotEq,
    LessEq,
    GreaterEq,
    Less,
    Greater,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eof,
}

/// Filters comments and maps raw tokens to public kinds.
pub(crate) fn cook(raw: RawToken) -> Option<TokenKind> {
    Some(match raw {
        RawToken::LineComment | RawToken::BlockComment => return None,
        RawToken::Newline => TokenKind::Newline,
        RawToken::Import => TokenKind::Import,
        RawToken::As => TokenKind::As,
        RawToken::Property => TokenKind::Property,
        RawToken::Var => TokenKind::Var,
        RawToken::Function => TokenKind::Function,
        RawToken::Return => TokenKind::Return,
        RawToken::If => TokenKind::If,
        RawToken::Else => TokenKind::Else,
        RawToken::True => TokenKind::True,
        RawToken::False => TokenKind::False,
        RawToken::Null => TokenKind::Null,
        RawToken::Undefined => TokenKind::Undefined,
        RawToken::Typeof => TokenKind::Typeof,
        RawToken::New => TokenKind::New,
        RawToken::Throw => TokenKind::Throw,
        RawToken::Ident => TokenKind::Ident,
        RawToken::String => TokenKind::String,
        RawToken::HexNumber => TokenKind::HexNumber,
        RawToken::FloatNumber => TokenKind::FloatNumber,
        RawToken::IntNumber => TokenKind::IntNumber,
        RawToken::LBrace => TokenKind::LBrace,
        RawToken::RBrace => TokenKind::RBrace,
        RawToken::LBracket => TokenKind::LBracket,
        RawToken::RBracket => TokenKind::RBracket,
        RawToken::LParen => TokenKind::LParen,
        RawToken::RParen => TokenKind::RParen,
        RawToken::Semicolon => TokenKind::Semicolon,
        RawToken::Comma => TokenKind::Comma,
        RawToken::Dot => TokenKind::Dot,
        RawToken::Colon => TokenKind::Colon,
        RawToken::Question => TokenKind::Question,
        RawToken::StrictEq => TokenKind::StrictEq,
        RawToken::StrictNotEq => TokenKind::StrictNotEq,
        RawToken::Eq => TokenKind::Eq,
        RawToken::NotEq => TokenKind::NotEq,
        RawToken::LessEq => TokenKind::LessEq,
        RawToken::GreaterEq => TokenKind::GreaterEq,
        RawToken::Less => TokenKind::Less,
        RawToken::Greater => TokenKind::Greater,
        RawToken::AndAnd => TokenKind::AndAnd,
        RawToken::OrOr => TokenKind::OrOr,
        RawToken::Bang => TokenKind::Bang,
        RawToken::Assign => TokenKind::Assign,
        RawToken::Plus => TokenKind::Plus,
        RawToken::Minus => TokenKind::Minus,
        RawToken::Star => TokenKind::Star,
        RawToken::Slash => TokenKind::Slash,
        RawToken::Percent => TokenKind::Percent,
    })
}

/// A token: kind plus source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
