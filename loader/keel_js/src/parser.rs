//! Recursive descent parser for the script subset.

use std::rc::Rc;

use keel_lexer::{cook_string, tokenize, LineMap, Token, TokenKind};

use crate::ast::{BinaryOp, Expr, Function, Literal, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::JsError;

/// Parses a script. `first_line` is the 1-based line the source starts at in
/// its original file, so reported lines match the description file.
pub fn parse_program(source: &str, file_path: &str, first_line: u32) -> Result<Program, JsError> {
    let tokens = tokenize(source, file_path)
        .map_err(|e| JsError::new(e.to_string()).with_frame("<parse>", file_path, first_line))?;
    let mut parser = ScriptParser {
        source,
        file_path,
        line_map: LineMap::new(source),
        first_line,
        tokens,
        pos: 0,
    };
    let mut program = Vec::new();
    parser.skip_separators();
    while parser.peek_kind() != TokenKind::Eof {
        program.push(parser.parse_statement()?);
        parser.skip_separators();
    }
    Ok(program)
}

struct ScriptParser<'a> {
    source: &'a str,
    file_path: &'a str,
    line_map: LineMap,
    first_line: u32,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> ScriptParser<'a> {
    fn peek(&self) -> Token {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// Next non-newline token kind, for lookahead across line breaks.
    fn peek_kind_skipping_newlines(&self) -> TokenKind {
        let mut idx = self.pos;
        while idx < self.tokens.len() && self.tokens[idx].kind == TokenKind::Newline {
            idx += 1;
        }
        self.tokens[idx.min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_kind() == TokenKind::Newline {
            self.advance();
        }
    }

    fn text(&self, token: Token) -> &'a str {
        &self.source[token.span.to_range()]
    }

    fn line_of(&self, token: Token) -> u32 {
        let (line, _) = self.line_map.position(token.span.start);
        self.first_line + line - 1
    }

    fn error(&self, message: impl Into<String>, token: Token) -> JsError {
        JsError::new(message).with_frame("<parse>", self.file_path, self.line_of(token))
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, JsError> {
        let token = self.peek();
        if token.kind != kind {
            let found = match token.kind {
                TokenKind::Eof => "end of input".to_string(),
                TokenKind::Newline => "end of line".to_string(),
                _ => format!("`{}`", self.text(token)),
            };
            return Err(self.error(format!("expected {what}, found {found}"), token));
        }
        Ok(self.advance())
    }

    // Statements

    fn parse_statement(&mut self) -> Result<Stmt, JsError> {
        match self.peek_kind() {
            TokenKind::Var => self.parse_var_decl(),
            TokenKind::Function => {
                let function = self.parse_function(true)?;
                Ok(Stmt::FunctionDecl(function))
            }
            TokenKind::Return => {
                let token = self.advance();
                let line = self.line_of(token);
                let value = if matches!(
                    self.peek_kind(),
                    TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Return { value, line })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Throw => {
                let token = self.advance();
                let line = self.line_of(token);
                let value = self.parse_expression()?;
                Ok(Stmt::Throw { value, line })
            }
            _ => Ok(Stmt::Expr(self.parse_expression()?)),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, JsError> {
        let var_token = self.expect(TokenKind::Var, "`var`")?;
        let line = self.line_of(var_token);
        let mut bindings = Vec::new();
        loop {
            let name = self.expect(TokenKind::Ident, "variable name")?;
            let name_text = self.text(name).to_string();
            let initializer = if self.peek_kind() == TokenKind::Assign {
                self.advance();
                self.skip_newlines();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            bindings.push((name_text, initializer));
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        Ok(Stmt::VarDecl { bindings, line })
    }

    fn parse_if(&mut self) -> Result<Stmt, JsError> {
        self.expect(TokenKind::If, "`if`")?;
        self.expect(TokenKind::LParen, "`(`")?;
        self.skip_newlines();
        let condition = self.parse_expression()?;
        self.skip_newlines();
        self.expect(TokenKind::RParen, "`)`")?;
        let then = self.parse_statement_or_block()?;
        self.skip_separators();
        let otherwise = if self.peek_kind() == TokenKind::Else {
            self.advance();
            self.skip_newlines();
            if self.peek_kind() == TokenKind::If {
                vec![self.parse_if()?]
            } else {
                self.parse_statement_or_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            condition,
            then,
            otherwise,
        })
    }

    fn parse_statement_or_block(&mut self) -> Result<Vec<Stmt>, JsError> {
        self.skip_newlines();
        if self.peek_kind() == TokenKind::LBrace {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, JsError> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.peek_kind() == TokenKind::RBrace {
                self.advance();
                break;
            }
            if self.peek_kind() == TokenKind::Eof {
                return Err(self.error("unclosed block", self.peek()));
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    // Expressions, lowest precedence first.

    fn parse_expression(&mut self) -> Result<Expr, JsError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, JsError> {
        let left = self.parse_conditional()?;
        if self.peek_kind() == TokenKind::Assign {
            let token = self.advance();
            let line = self.line_of(token);
            if !matches!(left, Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. }) {
                return Err(self.error("invalid assignment target", token));
            }
            self.skip_newlines();
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(left),
                value: Box::new(value),
                line,
            });
        }
        Ok(left)
    }

    fn parse_conditional(&mut self) -> Result<Expr, JsError> {
        let condition = self.parse_logical_or()?;
        if self.peek_kind_skipping_newlines() == TokenKind::Question {
            self.skip_newlines();
            self.advance();
            self.skip_newlines();
            let then = self.parse_assignment()?;
            self.skip_newlines();
            self.expect(TokenKind::Colon, "`:`")?;
            self.skip_newlines();
            let otherwise = self.parse_assignment()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_logical_and()?;
        while self.peek_kind_skipping_newlines() == TokenKind::OrOr {
            self.skip_newlines();
            self.advance();
            self.skip_newlines();
            let right = self.parse_logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_equality()?;
        while self.peek_kind_skipping_newlines() == TokenKind::AndAnd {
            self.skip_newlines();
            self.advance();
            self.skip_newlines();
            let right = self.parse_equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek_kind_skipping_newlines() {
                TokenKind::Eq => BinaryOp::Equal,
                TokenKind::NotEq => BinaryOp::NotEqual,
                TokenKind::StrictEq => BinaryOp::StrictEqual,
                TokenKind::StrictNotEq => BinaryOp::StrictNotEqual,
                _ => break,
            };
            self.skip_newlines();
            let token = self.advance();
            let line = self.line_of(token);
            self.skip_newlines();
            let right = self.parse_relational()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind_skipping_newlines() {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.skip_newlines();
            let token = self.advance();
            let line = self.line_of(token);
            self.skip_newlines();
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind_skipping_newlines() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.skip_newlines();
            let token = self.advance();
            let line = self.line_of(token);
            self.skip_newlines();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, JsError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind_skipping_newlines() {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.skip_newlines();
            let token = self.advance();
            let line = self.line_of(token);
            self.skip_newlines();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, JsError> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Typeof => UnaryOp::Typeof,
            _ => return self.parse_postfix(),
        };
        let token = self.advance();
        let line = self.line_of(token);
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            line,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, JsError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    self.skip_newlines();
                    let name = self.expect(TokenKind::Ident, "property name")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        name: self.text(name).to_string(),
                        line: self.line_of(name),
                    };
                }
                TokenKind::LBracket => {
                    let token = self.advance();
                    self.skip_newlines();
                    let index = self.parse_expression()?;
                    self.skip_newlines();
                    self.expect(TokenKind::RBracket, "`]`")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        line: self.line_of(token),
                    };
                }
                TokenKind::LParen => {
                    let token = self.advance();
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line: self.line_of(token),
                    };
                }
                TokenKind::Newline => {
                    // `.member` chains may continue on the next line.
                    if self.peek_kind_skipping_newlines() == TokenKind::Dot {
                        self.skip_newlines();
                        continue;
                    }
                    break;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, JsError> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.peek_kind() == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                    self.skip_newlines();
                }
                TokenKind::RParen => {
                    self.advance();
                    break;
                }
                _ => {
                    let token = self.peek();
                    return Err(self.error("expected `,` or `)`", token));
                }
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, JsError> {
        let token = self.peek();
        match token.kind {
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::Undefined => {
                self.advance();
                Ok(Expr::Literal(Literal::Undefined))
            }
            TokenKind::IntNumber => {
                self.advance();
                let text = self.text(token);
                text.parse::<i64>().map(|n| Expr::Literal(Literal::Int(n))).or_else(|_| {
                    text.parse::<f64>()
                        .map(|d| Expr::Literal(Literal::Double(d)))
                        .map_err(|_| self.error("invalid number literal", token))
                })
            }
            TokenKind::HexNumber => {
                self.advance();
                let text = self.text(token);
                i64::from_str_radix(&text[2..], 16)
                    .map(|n| Expr::Literal(Literal::Int(n)))
                    .map_err(|_| self.error("invalid hex literal", token))
            }
            TokenKind::FloatNumber => {
                self.advance();
                let text = self.text(token);
                text.parse::<f64>()
                    .map(|d| Expr::Literal(Literal::Double(d)))
                    .map_err(|_| self.error("invalid number literal", token))
            }
            TokenKind::String => {
                self.advance();
                let raw = self.text(token);
                Ok(Expr::Literal(Literal::String(cook_string(
                    &raw[1..raw.len() - 1],
                ))))
            }
            TokenKind::Ident => {
                self.advance();
                Ok(Expr::Ident {
                    name: self.text(token).to_string(),
                    line: self.line_of(token),
                })
            }
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::Function => Ok(Expr::Function(self.parse_function(false)?)),
            TokenKind::New => {
                // `new X(...)` behaves like a plain call of `X`.
                self.advance();
                self.parse_postfix()
            }
            _ => {
                let found = match token.kind {
                    TokenKind::Eof => "end of input".to_string(),
                    TokenKind::Newline => "end of line".to_string(),
                    _ => format!("`{}`", self.text(token)),
                };
                Err(self.error(format!("expected expression, found {found}"), token))
            }
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, JsError> {
        self.expect(TokenKind::LBracket, "`[`")?;
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek_kind() == TokenKind::RBracket {
                self.advance();
                break;
            }
            items.push(self.parse_assignment()?);
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBracket => {
                    self.advance();
                    break;
                }
                _ => {
                    let token = self.peek();
                    return Err(self.error("expected `,` or `]`", token));
                }
            }
        }
        Ok(Expr::Array(items))
    }

    fn parse_object_literal(&mut self) -> Result<Expr, JsError> {
        self.expect(TokenKind::LBrace, "`{`")?;
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek_kind() == TokenKind::RBrace {
                self.advance();
                break;
            }
            let key_token = self.peek();
            let key = match key_token.kind {
                TokenKind::Ident => {
                    self.advance();
                    self.text(key_token).to_string()
                }
                TokenKind::String => {
                    self.advance();
                    let raw = self.text(key_token);
                    cook_string(&raw[1..raw.len() - 1])
                }
                _ => return Err(self.error("expected property key", key_token)),
            };
            self.skip_newlines();
            self.expect(TokenKind::Colon, "`:`")?;
            self.skip_newlines();
            let value = self.parse_assignment()?;
            entries.push((key, value));
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                _ => {
                    let token = self.peek();
                    return Err(self.error("expected `,` or `}`", token));
                }
            }
        }
        Ok(Expr::Object(entries))
    }

    fn parse_function(&mut self, is_declaration: bool) -> Result<Rc<Function>, JsError> {
        let function_token = self.expect(TokenKind::Function, "`function`")?;
        let line = self.line_of(function_token);
        let name = if self.peek_kind() == TokenKind::Ident {
            let token = self.advance();
            Some(self.text(token).to_string())
        } else {
            if is_declaration {
                return Err(self.error("function declarations need a name", self.peek()));
            }
            None
        };
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        self.skip_newlines();
        if self.peek_kind() != TokenKind::RParen {
            loop {
                let param = self.expect(TokenKind::Ident, "parameter name")?;
                params.push(self.text(param).to_string());
                self.skip_newlines();
                if self.peek_kind() == TokenKind::Comma {
                    self.advance();
                    self.skip_newlines();
                } else {
                    break;
                }
            }
        }
        self.skip_newlines();
        self.expect(TokenKind::RParen, "`)`")?;
        self.skip_newlines();
        let body = self.parse_block()?;
        Ok(Rc::new(Function {
            name,
            params,
            body,
            line,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_expression() {
        let program = parse_program("1 + 2 * 3", "/s.js", 1).unwrap();
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn parses_member_chain_call() {
        let program = parse_program("outer.concat([\"B\"])", "/s.js", 1).unwrap();
        assert!(matches!(&program[0], Stmt::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_statements() {
        let source = "var cmds = [];\nif (x > 1) { cmds.push(x); } else cmds = [x]\nreturn cmds;";
        let program = parse_program(source, "/s.js", 1).unwrap();
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn line_numbers_are_offset() {
        let error = parse_program("1 +", "/s.js", 10).unwrap_err();
        assert_eq!(error.position(), Some(("/s.js", 10)));
    }

    #[test]
    fn parses_function_expression_iife() {
        let program = parse_program("(function(){ return 1; })()", "/s.js", 1).unwrap();
        assert!(matches!(&program[0], Stmt::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_object_and_array_literals() {
        let program = parse_program("({a: [1, 2], \"b\": {c: true}})", "/s.js", 1).unwrap();
        assert!(matches!(&program[0], Stmt::Expr(Expr::Object(_))));
    }
}
