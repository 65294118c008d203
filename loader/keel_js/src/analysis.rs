//! Free-variable analysis of script sources.
//!
//! The evaluator binds only the names an expression actually references.
//! This module reports them as member paths (`cpp.defines` → `["cpp",
//! "defines"]`), so nested module instances can be materialized just deep
//! enough. Names bound inside the script (parameters, `var`, function
//! declarations) are excluded.

use std::collections::BTreeSet;

use crate::ast::{Expr, Stmt};
use crate::error::JsError;
use crate::parser::parse_program;

/// Collects the free identifier paths of a script source.
///
/// Paths are ordered and deduplicated; a bare use of a root name (e.g.
/// passing `cpp` to a function) yields a single-segment path.
pub fn free_paths(source: &str, file_path: &str, first_line: u32) -> Result<Vec<Vec<String>>, JsError> {
    let program = parse_program(source, file_path, first_line)?;
    let mut collector = Collector {
        paths: BTreeSet::new(),
        bound: Vec::new(),
    };
    collector.collect_block(&program);
    Ok(collector.paths.into_iter().collect())
}

struct Collector {
    paths: BTreeSet<Vec<String>>,
    /// Stack of locally-bound name sets, one per function scope.
    bound: Vec<BTreeSet<String>>,
}

impl Collector {
    fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|scope| scope.contains(name))
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.bound.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn collect_block(&mut self, statements: &[Stmt]) {
        // Hoisting: function and var names are visible before their
        // statements.
        if self.bound.is_empty() {
            self.bound.push(BTreeSet::new());
        }
        for stmt in statements {
            match stmt {
                Stmt::VarDecl { bindings, .. } => {
                    for (name, _) in bindings {
                        self.bind(name);
                    }
                }
                Stmt::FunctionDecl(function) => {
                    if let Some(name) = &function.name {
                        self.bind(name);
                    }
                }
                _ => {}
            }
        }
        for stmt in statements {
            self.collect_stmt(stmt);
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => self.collect_expr(expr),
            Stmt::VarDecl { bindings, .. } => {
                for (_, initializer) in bindings {
                    if let Some(expr) = initializer {
                        self.collect_expr(expr);
                    }
                }
            }
            Stmt::FunctionDecl(function) => self.collect_function(&function.params, &function.body),
            Stmt::Return { value, .. } => {
                if let Some(expr) = value {
                    self.collect_expr(expr);
                }
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                self.collect_expr(condition);
                for stmt in then {
                    self.collect_stmt(stmt);
                }
                for stmt in otherwise {
                    self.collect_stmt(stmt);
                }
            }
            Stmt::Throw { value, .. } => self.collect_expr(value),
        }
    }

    fn collect_function(&mut self, params: &[String], body: &[Stmt]) {
        let mut scope = BTreeSet::new();
        for param in params {
            scope.insert(param.clone());
        }
        for stmt in body {
            match stmt {
                Stmt::VarDecl { bindings, .. } => {
                    for (name, _) in bindings {
                        scope.insert(name.clone());
                    }
                }
                Stmt::FunctionDecl(function) => {
                    if let Some(name) = &function.name {
                        scope.insert(name.clone());
                    }
                }
                _ => {}
            }
        }
        self.bound.push(scope);
        for stmt in body {
            self.collect_stmt(stmt);
        }
        self.bound.pop();
    }

    fn collect_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Ident { name, .. } => {
                if !self.is_bound(name) {
                    self.paths.insert(vec![name.clone()]);
                }
            }
            Expr::Member { .. } => {
                if let Some(path) = self.static_path(expr) {
                    if !self.is_bound(&path[0]) {
                        self.paths.insert(path);
                    }
                } else if let Expr::Member { object, .. } = expr {
                    self.collect_expr(object);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    self.collect_expr(item);
                }
            }
            Expr::Object(entries) => {
                for (_, value) in entries {
                    self.collect_expr(value);
                }
            }
            Expr::Index { object, index, .. } => {
                self.collect_expr(object);
                self.collect_expr(index);
            }
            Expr::Call { callee, args, .. } => {
                // A call through a member path keeps the path up to the
                // method so `cpp.defines.concat(x)` binds `cpp.defines`.
                match &**callee {
                    Expr::Member { object, .. } => self.collect_expr(object),
                    other => self.collect_expr(other),
                }
                for arg in args {
                    self.collect_expr(arg);
                }
            }
            Expr::Unary { operand, .. } => self.collect_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.collect_expr(left);
                self.collect_expr(right);
            }
            Expr::Logical { left, right, .. } => {
                self.collect_expr(left);
                self.collect_expr(right);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.collect_expr(condition);
                self.collect_expr(then);
                self.collect_expr(otherwise);
            }
            Expr::Assign { target, value, .. } => {
                // Assignment roots count as references so configure
                // results can overwrite pre-bound probe properties.
                self.collect_expr(target);
                self.collect_expr(value);
            }
            Expr::Function(function) => self.collect_function(&function.params, &function.body),
        }
    }

    /// `a.b.c` chains of plain members rooted at an identifier.
    fn static_path(&self, expr: &Expr) -> Option<Vec<String>> {
        match expr {
            Expr::Ident { name, .. } => Some(vec![name.clone()]),
            Expr::Member { object, name, .. } => {
                let mut path = self.static_path(object)?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(source: &str) -> Vec<String> {
        free_paths(source, "/t.keel", 1)
            .unwrap()
            .into_iter()
            .map(|p| p.join("."))
            .collect()
    }

    #[test]
    fn member_chains_are_paths() {
        assert_eq!(paths("cpp.defines"), vec!["cpp.defines"]);
        assert_eq!(paths("keel.targetOS.contains(\"linux\")"), vec!["keel.targetOS"]);
    }

    #[test]
    fn bound_names_are_excluded() {
        assert_eq!(
            paths("(function(x){ return x + factor; })(3)"),
            vec!["factor"]
        );
        assert_eq!(
            paths("(function(){ var local = outer; return local; })()"),
            vec!["outer"]
        );
    }

    #[test]
    fn var_statement_names_are_bound() {
        assert_eq!(paths("var a = b; a + c"), vec!["b", "c"]);
    }

    #[test]
    fn assignment_targets_count() {
        assert_eq!(paths("found = other"), vec!["found", "other"]);
    }

    #[test]
    fn mixed_expression() {
        assert_eq!(
            paths("condition ? base.concat([name]) : []"),
            vec!["base", "condition", "name"]
        );
    }
}
