//! Recursive descent parser for keel description files.
//!
//! Produces an untyped [`AstFile`]; the item reader turns it into typed
//! items with inheritance applied. Right-hand sides are captured as raw
//! source so the evaluator can run them lazily with `base`/`outer` bound.

mod ast;
mod script_scan;

#[cfg(test)]
mod tests;

pub use ast::{AstAssignment, AstDeclaration, AstFile, AstImport, AstItem, AstMember};
pub use script_scan::top_level_declarations;

use keel_diagnostic::ErrorInfo;
use keel_ir::CodeLocation;
use keel_lexer::{cook_string, tokenize, LineMap, Span, Token, TokenKind};
use tracing::debug;

/// Parses one description file.
pub fn parse_file(source: &str, file_path: &str) -> Result<AstFile, ErrorInfo> {
    debug!(file = file_path, "parsing description file");
    let tokens = tokenize(source, file_path)?;
    let mut parser = Parser {
        source,
        file_path,
        line_map: LineMap::new(source),
        tokens,
        pos: 0,
    };
    parser.parse_file()
}

struct Parser<'a> {
    source: &'a str,
    file_path: &'a str,
    line_map: LineMap,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn text(&self, token: Token) -> &'a str {
        &self.source[token.span.to_range()]
    }

    fn location(&self, span: Span) -> CodeLocation {
        let (line, column) = self.line_map.position(span.start);
        CodeLocation::new(self.file_path, line, column)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> ErrorInfo {
        ErrorInfo::parse(message, self.location(span))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ErrorInfo> {
        let token = self.peek();
        if token.kind != kind {
            return Err(self.error(
                format!("expected {what}, found `{}`", self.describe(token)),
                token.span,
            ));
        }
        Ok(self.advance())
    }

    fn describe(&self, token: Token) -> String {
        match token.kind {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            _ => self.text(token).to_string(),
        }
    }

    fn parse_file(&mut self) -> Result<AstFile, ErrorInfo> {
        let mut imports = Vec::new();
        self.skip_newlines();
        while self.peek_kind() == TokenKind::Import {
            imports.push(self.parse_import()?);
            self.skip_newlines();
        }
        let root = self.parse_item()?;
        self.skip_newlines();
        let trailing = self.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(self.error(
                format!("unexpected `{}` after root item", self.describe(trailing)),
                trailing.span,
            ));
        }
        Ok(AstFile { imports, root })
    }

    fn parse_import(&mut self) -> Result<AstImport, ErrorInfo> {
        let import_token = self.expect(TokenKind::Import, "`import`")?;
        let location = self.location(import_token.span);
        match self.peek_kind() {
            TokenKind::Ident => {
                // import keel.Extension
                let head = self.advance();
                let head_text = self.text(head);
                if head_text != "keel" {
                    return Err(self.error(
                        format!("unknown import namespace `{head_text}`"),
                        head.span,
                    ));
                }
                self.expect(TokenKind::Dot, "`.`")?;
                let name = self.expect(TokenKind::Ident, "extension name")?;
                Ok(AstImport::Extension {
                    name: self.text(name).to_string(),
                    location,
                })
            }
            TokenKind::String => {
                // import "file.js" as Name
                let path_token = self.advance();
                let raw = self.text(path_token);
                let path = cook_string(&raw[1..raw.len() - 1]);
                self.expect(TokenKind::As, "`as`")?;
                let alias = self.expect(TokenKind::Ident, "import alias")?;
                Ok(AstImport::File {
                    path,
                    alias: self.text(alias).to_string(),
                    location,
                })
            }
            _ => {
                let token = self.peek();
                Err(self.error(
                    format!("expected import target, found `{}`", self.describe(token)),
                    token.span,
                ))
            }
        }
    }

    fn parse_item(&mut self) -> Result<AstItem, ErrorInfo> {
        let name = self.expect(TokenKind::Ident, "item type name")?;
        let type_name = self.text(name).to_string();
        let location = self.location(name.span);
        if !type_name.starts_with(char::is_uppercase) {
            return Err(self.error(
                format!("item type name `{type_name}` must start with an uppercase letter"),
                name.span,
            ));
        }
        self.skip_newlines();
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut members = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    return Err(self.error(
                        format!("unclosed item `{type_name}`"),
                        self.peek().span,
                    ));
                }
                TokenKind::Property => members.push(self.parse_declaration()?),
                TokenKind::Ident => members.push(self.parse_binding_or_child()?),
                _ => {
                    let token = self.peek();
                    return Err(self.error(
                        format!(
                            "expected property binding or item, found `{}`",
                            self.describe(token)
                        ),
                        token.span,
                    ));
                }
            }
        }
        Ok(AstItem {
            type_name,
            location,
            members,
        })
    }

    fn parse_declaration(&mut self) -> Result<AstMember, ErrorInfo> {
        let property_token = self.expect(TokenKind::Property, "`property`")?;
        let location = self.location(property_token.span);
        let type_token = self.peek();
        let type_name = match type_token.kind {
            TokenKind::Ident => {
                self.advance();
                self.text(type_token).to_string()
            }
            // `var` is a keyword but also a declarable property type.
            TokenKind::Var => {
                self.advance();
                "var".to_string()
            }
            _ => {
                return Err(self.error(
                    format!("expected property type, found `{}`", self.describe(type_token)),
                    type_token.span,
                ))
            }
        };
        let name = self.expect(TokenKind::Ident, "property name")?;
        let name_text = self.text(name).to_string();
        if self.peek_kind() == TokenKind::Colon {
            self.advance();
            let (source, source_location, _) = self.capture_expression()?;
            Ok(AstMember::Declaration(AstDeclaration {
                name: name_text,
                type_name,
                location,
                source: Some(source),
                source_location,
            }))
        } else {
            let source_location = self.location(name.span);
            Ok(AstMember::Declaration(AstDeclaration {
                name: name_text,
                type_name,
                location,
                source: None,
                source_location,
            }))
        }
    }

    fn parse_binding_or_child(&mut self) -> Result<AstMember, ErrorInfo> {
        let first = self.expect(TokenKind::Ident, "name")?;
        let mut name_parts = vec![self.text(first).to_string()];
        let name_location = self.location(first.span);
        while self.peek_kind() == TokenKind::Dot {
            self.advance();
            let part = self.expect(TokenKind::Ident, "name")?;
            name_parts.push(self.text(part).to_string());
        }
        match self.peek_kind() {
            TokenKind::Colon => {
                self.advance();
                if name_parts.len() == 1 && name_parts[0] == "id" {
                    let id = self.expect(TokenKind::Ident, "item id")?;
                    return Ok(AstMember::Id {
                        name: self.text(id).to_string(),
                        location: name_location,
                    });
                }
                let (source, source_location, has_function_form) = self.capture_expression()?;
                Ok(AstMember::Assignment(AstAssignment {
                    name_parts,
                    name_location,
                    source,
                    source_location,
                    has_function_form,
                }))
            }
            TokenKind::LBrace | TokenKind::Newline if name_parts.len() == 1 => {
                // A child item; rewind to reuse parse_item on the name.
                self.pos -= 1;
                Ok(AstMember::Child(self.parse_item()?))
            }
            _ => {
                let token = self.peek();
                Err(self.error(
                    format!("expected `:` or `{{`, found `{}`", self.describe(token)),
                    token.span,
                ))
            }
        }
    }

    /// Captures a right-hand side as raw source.
    ///
    /// A `{` opener captures a balanced script block (function form).
    /// Otherwise tokens are consumed until a newline/semicolon at bracket
    /// depth zero; newlines inside brackets or after a continuation token
    /// (operator, comma, dot) do not terminate.
    fn capture_expression(&mut self) -> Result<(String, CodeLocation, bool), ErrorInfo> {
        self.skip_only_newlines_before_value()?;
        let start_token = self.peek();
        let start_location = self.location(start_token.span);
        if start_token.kind == TokenKind::LBrace {
            let span = self.capture_balanced_block()?;
            let source = self.source[span.to_range()].to_string();
            return Ok((source, start_location, true));
        }
        let start_span = start_token.span;
        let mut end_span = start_span;
        let mut depth: i32 = 0;
        let mut previous: Option<TokenKind> = None;
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    if depth > 0 {
                        self.advance();
                        continue;
                    }
                    if previous.is_some_and(continues_expression) {
                        self.advance();
                        continue;
                    }
                    // Lookahead: `.member` and `? :` continuations may
                    // start on the next line.
                    let mut probe = self.pos + 1;
                    while probe < self.tokens.len()
                        && self.tokens[probe].kind == TokenKind::Newline
                    {
                        probe += 1;
                    }
                    if matches!(
                        self.tokens[probe].kind,
                        TokenKind::Dot | TokenKind::Question | TokenKind::Colon
                    ) {
                        self.advance();
                        continue;
                    }
                    break;
                }
                TokenKind::Semicolon if depth == 0 => break,
                TokenKind::RBrace if depth == 0 => break,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1;
                    end_span = token.span;
                    previous = Some(token.kind);
                    self.advance();
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(self.error("unbalanced closing bracket", token.span));
                    }
                    end_span = token.span;
                    previous = Some(token.kind);
                    self.advance();
                }
                _ => {
                    end_span = token.span;
                    previous = Some(token.kind);
                    self.advance();
                }
            }
        }
        if previous.is_none() {
            return Err(self.error("expected expression", start_token.span));
        }
        let span = start_span.merge(end_span);
        Ok((
            self.source[span.to_range()].trim().to_string(),
            start_location,
            false,
        ))
    }

    fn skip_only_newlines_before_value(&mut self) -> Result<(), ErrorInfo> {
        // A value may start on the following line after the colon.
        while self.peek_kind() == TokenKind::Newline {
            self.advance();
        }
        Ok(())
    }

    fn capture_balanced_block(&mut self) -> Result<Span, ErrorInfo> {
        let open = self.expect(TokenKind::LBrace, "`{`")?;
        let mut depth = 1;
        let mut end = open.span;
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        end = token.span;
                        break;
                    }
                }
                TokenKind::Eof => {
                    return Err(self.error("unclosed script block", token.span));
                }
                _ => {}
            }
        }
        Ok(open.span.merge(end))
    }
}

/// Whether an expression clearly continues after a newline following this
/// token.
fn continues_expression(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Comma
            | TokenKind::Dot
            | TokenKind::Colon
            | TokenKind::Question
            | TokenKind::AndAnd
            | TokenKind::OrOr
            | TokenKind::Assign
            | TokenKind::Eq
            | TokenKind::NotEq
            | TokenKind::StrictEq
            | TokenKind::StrictNotEq
            | TokenKind::Less
            | TokenKind::LessEq
            | TokenKind::Greater
            | TokenKind::GreaterEq
            | TokenKind::Bang
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
    )
}
