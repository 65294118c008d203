//! Lexer for keel description files.
//!
//! One token set serves both grammars: the declarative item structure and
//! the embedded script expressions on the right-hand side of property
//! assignments. Newlines are kept as tokens because the declarative grammar
//! treats them as binding terminators.

mod line_map;
mod token;

pub use line_map::LineMap;
pub use token::{Span, Token, TokenKind};

use keel_diagnostic::ErrorInfo;
use keel_ir::CodeLocation;
use logos::Logos;

/// Tokenizes `source`. The returned list never contains comment tokens.
///
/// `file_path` is only used for error locations.
pub fn tokenize(source: &str, file_path: &str) -> Result<Vec<Token>, ErrorInfo> {
    let line_map = LineMap::new(source);
    let mut tokens = Vec::with_capacity(source.len() / 4);
    let mut lexer = token::RawToken::lexer(source);
    while let Some(result) = lexer.next() {
        let span = Span::from_range(lexer.span());
        match result {
            Ok(raw) => {
                if let Some(kind) = token::cook(raw) {
                    tokens.push(Token { kind, span });
                }
            }
            Err(()) => {
                let (line, column) = line_map.position(span.start);
                return Err(ErrorInfo::parse(
                    format!("unexpected character `{}`", &source[span.to_range()]),
                    CodeLocation::new(file_path, line, column),
                ));
            }
        }
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::point(u32::try_from(source.len()).unwrap_or(u32::MAX)),
    });
    Ok(tokens)
}

/// Decodes the escapes of a quoted string literal body (without quotes).
pub fn cook_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "/t.keel")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_item_structure() {
        assert_eq!(
            kinds("Product {\n name: \"app\"\n}"),
            vec![
                TokenKind::Ident,
                TokenKind::LBrace,
                TokenKind::Newline,
                TokenKind::Ident,
                TokenKind::Colon,
                TokenKind::String,
                TokenKind::Newline,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n/* block\nstill */ b"),
            vec![
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords_and_operators() {
        assert_eq!(
            kinds("import as property var true !== >="),
            vec![
                TokenKind::Import,
                TokenKind::As,
                TokenKind::Property,
                TokenKind::Var,
                TokenKind::True,
                TokenKind::StrictNotEq,
                TokenKind::GreaterEq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        let error = tokenize("name: #", "/t.keel").unwrap_err();
        assert!(error.to_string().contains("unexpected character"));
        assert!(error.to_string().contains("/t.keel:1:7"));
    }

    #[test]
    fn string_cooking() {
        assert_eq!(cook_string(r"a\nb\\c\'d"), "a\nb\\c'd");
    }

    #[test]
    fn spans_slice_the_source() {
        let source = "files: [\"main.c\"]";
        let tokens = tokenize(source, "/t.keel").unwrap();
        let string_token = tokens
            .iter()
            .find(|t| t.kind == TokenKind::String)
            .unwrap();
        assert_eq!(&source[string_token.span.to_range()], "\"main.c\"");
    }
}
