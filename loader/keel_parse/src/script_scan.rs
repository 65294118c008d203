//! Top-level declaration scanning for imported script files.
//!
//! The script importer wraps an imported file into a function returning an
//! object of its top-level bindings; this module supplies the binding names.
//! Only the top level is considered, so nested declarations stay private.

use keel_diagnostic::ErrorInfo;
use keel_lexer::{tokenize, TokenKind};

/// Names of the top-level `function` and `var` declarations of a script.
pub fn top_level_declarations(source: &str, file_path: &str) -> Result<Vec<String>, ErrorInfo> {
    let tokens = tokenize(source, file_path)?;
    let mut names = Vec::new();
    let mut depth: i32 = 0;
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        match token.kind {
            TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
            TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => depth -= 1,
            TokenKind::Function if depth == 0 => {
                if let Some(name_token) = tokens.get(i + 1) {
                    if name_token.kind == TokenKind::Ident {
                        names.push(source[name_token.span.to_range()].to_string());
                    }
                }
            }
            TokenKind::Var if depth == 0 => {
                // `var a = ..., b = ...;` — collect the names, skipping
                // initializer expressions at this depth.
                let mut j = i + 1;
                let mut expect_name = true;
                let mut inner_depth: i32 = 0;
                while j < tokens.len() {
                    let t = tokens[j];
                    match t.kind {
                        TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => {
                            inner_depth += 1;
                        }
                        TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                            inner_depth -= 1;
                            if inner_depth < 0 {
                                break;
                            }
                        }
                        TokenKind::Ident if expect_name && inner_depth == 0 => {
                            names.push(source[t.span.to_range()].to_string());
                            expect_name = false;
                        }
                        TokenKind::Comma if inner_depth == 0 => expect_name = true,
                        TokenKind::Semicolon | TokenKind::Newline if inner_depth == 0 => break,
                        _ => {}
                    }
                    j += 1;
                }
                i = j;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_functions_and_vars() {
        let source = "var limit = 3;\nfunction helper(x) { return x; }\nvar a = 1, b = 2";
        let names = top_level_declarations(source, "/u.js").unwrap();
        assert_eq!(names, vec!["limit", "helper", "a", "b"]);
    }

    #[test]
    fn nested_declarations_are_not_exposed() {
        let source = "function outer() { var hidden = 1; function inner() {} }";
        let names = top_level_declarations(source, "/u.js").unwrap();
        assert_eq!(names, vec!["outer"]);
    }

    #[test]
    fn var_initializer_identifiers_are_not_names() {
        let source = "var x = someCall(other, 2)";
        let names = top_level_declarations(source, "/u.js").unwrap();
        assert_eq!(names, vec!["x"]);
    }
}
