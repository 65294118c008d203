//! Tree-walking execution of the script subset.
//!
//! Identifier resolution walks the engine's scope stack top-down; the engine
//! never relies on implicit `with`-like semantics, so every name a script can
//! see was explicitly pushed by the caller.

use std::rc::Rc;

use crate::ast::{BinaryOp, Expr, Literal, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::{
    self, cannot_read_property, invalid_operand, not_a_function, undefined_variable, JsError,
};
use crate::methods::dispatch_method;
use crate::value::{JsFunction, JsValue};
use crate::ScriptEngine;

/// Statement completion: either fall through or return out of the current
/// function.
pub(crate) enum Completion {
    Normal(JsValue),
    Return(JsValue),
}

/// Runs a program in the engine's current scope stack; the result is the
/// value of the last expression statement (or of a top-level `return`).
pub(crate) fn exec_program(engine: &mut ScriptEngine, program: &Program) -> Result<JsValue, JsError> {
    let mut last = JsValue::Undefined;
    for stmt in program {
        match exec_stmt(engine, stmt)? {
            Completion::Normal(value) => last = value,
            Completion::Return(value) => return Ok(value),
        }
    }
    Ok(last)
}

fn exec_block(engine: &mut ScriptEngine, statements: &[Stmt]) -> Result<Completion, JsError> {
    for stmt in statements {
        if let Completion::Return(value) = exec_stmt(engine, stmt)? {
            return Ok(Completion::Return(value));
        }
    }
    Ok(Completion::Normal(JsValue::Undefined))
}

fn exec_stmt(engine: &mut ScriptEngine, stmt: &Stmt) -> Result<Completion, JsError> {
    match stmt {
        Stmt::Expr(expr) => Ok(Completion::Normal(eval_expr(engine, expr)?)),
        Stmt::VarDecl { bindings, .. } => {
            for (name, initializer) in bindings {
                let value = match initializer {
                    Some(expr) => eval_expr(engine, expr)?,
                    None => JsValue::Undefined,
                };
                engine.define(name, value);
            }
            Ok(Completion::Normal(JsValue::Undefined))
        }
        Stmt::FunctionDecl(function) => {
            let name = function.name.clone().unwrap_or_default();
            let value = JsValue::Function(JsFunction {
                function: Rc::clone(function),
                captured_scopes: engine.scopes().to_vec(),
            });
            engine.define(&name, value);
            Ok(Completion::Normal(JsValue::Undefined))
        }
        Stmt::Return { value, .. } => {
            let value = match value {
                Some(expr) => eval_expr(engine, expr)?,
                None => JsValue::Undefined,
            };
            Ok(Completion::Return(value))
        }
        Stmt::If {
            condition,
            then,
            otherwise,
        } => {
            if eval_expr(engine, condition)?.is_truthy() {
                exec_block(engine, then)
            } else {
                exec_block(engine, otherwise)
            }
        }
        Stmt::Throw { value, line } => {
            let value = eval_expr(engine, value)?;
            Err(JsError::new(value.to_js_string()).with_frame(
                "<script>",
                engine.current_file(),
                *line,
            ))
        }
    }
}

pub(crate) fn eval_expr(engine: &mut ScriptEngine, expr: &Expr) -> Result<JsValue, JsError> {
    match expr {
        Expr::Literal(literal) => Ok(eval_literal(literal)),
        Expr::Ident { name, line } => engine.lookup(name).ok_or_else(|| {
            undefined_variable(name).with_frame("<script>", engine.current_file(), *line)
        }),
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(engine, item)?);
            }
            Ok(JsValue::array(values))
        }
        Expr::Object(entries) => {
            let object = JsValue::object();
            if let JsValue::Object(obj) = &object {
                for (key, value_expr) in entries {
                    let value = eval_expr(engine, value_expr)?;
                    obj.borrow_mut().set(key.clone(), value);
                }
            }
            Ok(object)
        }
        Expr::Member { object, name, line } => {
            let object = eval_expr(engine, object)?;
            member_value(engine, &object, name, *line)
        }
        Expr::Index {
            object,
            index,
            line,
        } => {
            let object = eval_expr(engine, object)?;
            let index = eval_expr(engine, index)?;
            index_value(engine, &object, &index, *line)
        }
        Expr::Call { callee, args, line } => eval_call(engine, callee, args, *line),
        Expr::Unary { op, operand, line } => {
            let value = eval_expr(engine, operand)?;
            eval_unary(engine, *op, &value, *line)
        }
        Expr::Binary {
            op,
            left,
            right,
            line,
        } => {
            let left = eval_expr(engine, left)?;
            let right = eval_expr(engine, right)?;
            eval_binary(engine, *op, &left, &right, *line)
        }
        Expr::Logical { op, left, right } => {
            let left_value = eval_expr(engine, left)?;
            match op {
                LogicalOp::And => {
                    if left_value.is_truthy() {
                        eval_expr(engine, right)
                    } else {
                        Ok(left_value)
                    }
                }
                LogicalOp::Or => {
                    if left_value.is_truthy() {
                        Ok(left_value)
                    } else {
                        eval_expr(engine, right)
                    }
                }
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if eval_expr(engine, condition)?.is_truthy() {
                eval_expr(engine, then)
            } else {
                eval_expr(engine, otherwise)
            }
        }
        Expr::Assign {
            target,
            value,
            line,
        } => {
            let value = eval_expr(engine, value)?;
            assign(engine, target, value.clone(), *line)?;
            Ok(value)
        }
        Expr::Function(function) => Ok(JsValue::Function(JsFunction {
            function: Rc::clone(function),
            captured_scopes: engine.scopes().to_vec(),
        })),
    }
}

fn eval_literal(literal: &Literal) -> JsValue {
    match literal {
        Literal::Undefined => JsValue::Undefined,
        Literal::Null => JsValue::Null,
        Literal::Bool(b) => JsValue::Bool(*b),
        Literal::Int(n) => JsValue::Int(*n),
        Literal::Double(d) => JsValue::Double(*d),
        Literal::String(s) => JsValue::string(s.as_str()),
    }
}

/// Reads a member. Missing object properties yield `undefined`; reads on
/// `undefined`/`null` are errors.
fn member_value(
    engine: &mut ScriptEngine,
    object: &JsValue,
    name: &str,
    line: u32,
) -> Result<JsValue, JsError> {
    match object {
        JsValue::Undefined | JsValue::Null => Err(cannot_read_property(name, object.type_name())
            .with_frame("<script>", engine.current_file(), line)),
        JsValue::Object(obj) => Ok(obj.borrow().get(name).unwrap_or(JsValue::Undefined)),
        JsValue::Array(items) if name == "length" => {
            Ok(JsValue::Int(items.borrow().len() as i64))
        }
        JsValue::String(s) if name == "length" => Ok(JsValue::Int(s.chars().count() as i64)),
        // Builtin method names resolve at call time; reading them yields a
        // bound-method marker is not supported, so return undefined.
        _ => Ok(JsValue::Undefined),
    }
}

fn index_value(
    engine: &mut ScriptEngine,
    object: &JsValue,
    index: &JsValue,
    line: u32,
) -> Result<JsValue, JsError> {
    match object {
        JsValue::Array(items) => {
            let idx = index.as_number().unwrap_or(f64::NAN);
            if idx.is_nan() || idx < 0.0 {
                return Ok(JsValue::Undefined);
            }
            Ok(items
                .borrow()
                .get(idx as usize)
                .cloned()
                .unwrap_or(JsValue::Undefined))
        }
        JsValue::Object(obj) => Ok(obj
            .borrow()
            .get(&index.to_js_string())
            .unwrap_or(JsValue::Undefined)),
        JsValue::String(s) => {
            let idx = index.as_number().unwrap_or(f64::NAN);
            if idx.is_nan() || idx < 0.0 {
                return Ok(JsValue::Undefined);
            }
            Ok(s.chars()
                .nth(idx as usize)
                .map_or(JsValue::Undefined, |c| JsValue::string(c.to_string())))
        }
        other => Err(invalid_operand("[]", other.type_name()).with_frame(
            "<script>",
            engine.current_file(),
            line,
        )),
    }
}

fn eval_call(
    engine: &mut ScriptEngine,
    callee: &Expr,
    args: &[Expr],
    line: u32,
) -> Result<JsValue, JsError> {
    let mut arg_values = Vec::with_capacity(args.len());
    // Method calls need the receiver, so member callees are special-cased.
    if let Expr::Member { object, name, .. } = callee {
        let receiver = eval_expr(engine, object)?;
        for arg in args {
            arg_values.push(eval_expr(engine, arg)?);
        }
        // Object properties holding functions win over builtin methods.
        if let JsValue::Object(obj) = &receiver {
            let member = obj.borrow().get(name);
            if let Some(function) = member {
                if function.is_function() {
                    return call_function(engine, &function, &arg_values, name, line);
                }
                if !function.is_undefined() {
                    return Err(not_a_function(&format!("`{name}`")).with_frame(
                        "<script>",
                        engine.current_file(),
                        line,
                    ));
                }
            }
        }
        return dispatch_method(engine, &receiver, name, &arg_values, line);
    }
    let callee_value = eval_expr(engine, callee)?;
    for arg in args {
        arg_values.push(eval_expr(engine, arg)?);
    }
    call_function(engine, &callee_value, &arg_values, "<anonymous>", line)
}

pub(crate) fn call_function(
    engine: &mut ScriptEngine,
    function: &JsValue,
    args: &[JsValue],
    name: &str,
    line: u32,
) -> Result<JsValue, JsError> {
    match function {
        JsValue::Native(native, _) => native(engine, args),
        JsValue::Function(f) => {
            let args_scope = JsValue::object();
            if let JsValue::Object(scope) = &args_scope {
                let mut scope = scope.borrow_mut();
                for (i, param) in f.function.params.iter().enumerate() {
                    scope.set(param.clone(), args.get(i).cloned().unwrap_or(JsValue::Undefined));
                }
            }
            let saved = engine.replace_scopes(f.captured_scopes.clone());
            engine.push_scope(&args_scope);
            let result = exec_block(engine, &f.function.body);
            engine.restore_scopes(saved);
            match result {
                Ok(Completion::Return(value)) => Ok(value),
                Ok(Completion::Normal(_)) => Ok(JsValue::Undefined),
                Err(error) => {
                    let function_name =
                        f.function.name.clone().unwrap_or_else(|| name.to_string());
                    Err(error.with_frame(function_name, engine.current_file(), line))
                }
            }
        }
        other => Err(not_a_function(other.type_name()).with_frame(
            "<script>",
            engine.current_file(),
            line,
        )),
    }
}

fn assign(
    engine: &mut ScriptEngine,
    target: &Expr,
    value: JsValue,
    line: u32,
) -> Result<(), JsError> {
    match target {
        Expr::Ident { name, .. } => {
            engine.assign(name, value);
            Ok(())
        }
        Expr::Member { object, name, .. } => {
            let object = eval_expr(engine, object)?;
            match object {
                JsValue::Object(obj) => {
                    obj.borrow_mut().set(name.clone(), value);
                    Ok(())
                }
                other => Err(invalid_operand("assignment", other.type_name()).with_frame(
                    "<script>",
                    engine.current_file(),
                    line,
                )),
            }
        }
        Expr::Index { object, index, .. } => {
            let object = eval_expr(engine, object)?;
            let index = eval_expr(engine, index)?;
            match object {
                JsValue::Array(items) => {
                    let idx = index.as_number().unwrap_or(f64::NAN);
                    if idx.is_nan() || idx < 0.0 {
                        return Err(invalid_operand("index", "negative").with_frame(
                            "<script>",
                            engine.current_file(),
                            line,
                        ));
                    }
                    let idx = idx as usize;
                    let mut items = items.borrow_mut();
                    if idx >= items.len() {
                        items.resize(idx + 1, JsValue::Undefined);
                    }
                    items[idx] = value;
                    Ok(())
                }
                JsValue::Object(obj) => {
                    obj.borrow_mut().set(index.to_js_string(), value);
                    Ok(())
                }
                other => Err(invalid_operand("assignment", other.type_name()).with_frame(
                    "<script>",
                    engine.current_file(),
                    line,
                )),
            }
        }
        _ => Err(JsError::new("invalid assignment target").with_frame(
            "<script>",
            engine.current_file(),
            line,
        )),
    }
}

fn eval_unary(
    engine: &ScriptEngine,
    op: UnaryOp,
    value: &JsValue,
    line: u32,
) -> Result<JsValue, JsError> {
    match op {
        UnaryOp::Not => Ok(JsValue::Bool(!value.is_truthy())),
        UnaryOp::Typeof => Ok(JsValue::string(value.type_name())),
        UnaryOp::Negate => match value {
            JsValue::Int(n) => Ok(JsValue::Int(-n)),
            other => other.as_number().map(|d| JsValue::Double(-d)).ok_or_else(|| {
                invalid_operand("-", other.type_name()).with_frame(
                    "<script>",
                    engine.current_file(),
                    line,
                )
            }),
        },
        UnaryOp::Plus => value.as_number().map(JsValue::Double).ok_or_else(|| {
            invalid_operand("+", value.type_name()).with_frame(
                "<script>",
                engine.current_file(),
                line,
            )
        }),
    }
}

fn eval_binary(
    engine: &ScriptEngine,
    op: BinaryOp,
    left: &JsValue,
    right: &JsValue,
    line: u32,
) -> Result<JsValue, JsError> {
    let numeric = |error_op: &str| -> Result<(f64, f64), JsError> {
        match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(error::invalid_operand(
                error_op,
                if left.as_number().is_none() {
                    left.type_name()
                } else {
                    right.type_name()
                },
            )
            .with_frame("<script>", engine.current_file(), line)),
        }
    };
    match op {
        BinaryOp::Add => match (left, right) {
            (JsValue::String(_) | JsValue::Array(_), _) | (_, JsValue::String(_) | JsValue::Array(_)) => {
                Ok(JsValue::string(format!(
                    "{}{}",
                    left.to_js_string(),
                    right.to_js_string()
                )))
            }
            (JsValue::Int(a), JsValue::Int(b)) => a
                .checked_add(*b)
                .map(JsValue::Int)
                .map_or_else(|| Ok(JsValue::Double(*a as f64 + *b as f64)), Ok),
            _ => numeric("+").map(|(a, b)| JsValue::Double(a + b)),
        },
        BinaryOp::Subtract => match (left, right) {
            (JsValue::Int(a), JsValue::Int(b)) => a
                .checked_sub(*b)
                .map(JsValue::Int)
                .map_or_else(|| Ok(JsValue::Double(*a as f64 - *b as f64)), Ok),
            _ => numeric("-").map(|(a, b)| JsValue::Double(a - b)),
        },
        BinaryOp::Multiply => match (left, right) {
            (JsValue::Int(a), JsValue::Int(b)) => a
                .checked_mul(*b)
                .map(JsValue::Int)
                .map_or_else(|| Ok(JsValue::Double(*a as f64 * *b as f64)), Ok),
            _ => numeric("*").map(|(a, b)| JsValue::Double(a * b)),
        },
        BinaryOp::Divide => match (left, right) {
            (JsValue::Int(a), JsValue::Int(b)) if *b != 0 && a % b == 0 => {
                Ok(JsValue::Int(a / b))
            }
            _ => numeric("/").map(|(a, b)| JsValue::Double(a / b)),
        },
        BinaryOp::Modulo => match (left, right) {
            (JsValue::Int(a), JsValue::Int(b)) if *b != 0 => Ok(JsValue::Int(a % b)),
            _ => numeric("%").map(|(a, b)| JsValue::Double(a % b)),
        },
        BinaryOp::Equal => Ok(JsValue::Bool(left.loose_equals(right))),
        BinaryOp::NotEqual => Ok(JsValue::Bool(!left.loose_equals(right))),
        BinaryOp::StrictEqual => Ok(JsValue::Bool(left.strict_equals(right))),
        BinaryOp::StrictNotEqual => Ok(JsValue::Bool(!left.strict_equals(right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (left, right) {
                (JsValue::String(a), JsValue::String(b)) => a.cmp(b),
                _ => {
                    let (a, b) = numeric("comparison")?;
                    match a.partial_cmp(&b) {
                        Some(ordering) => ordering,
                        None => return Ok(JsValue::Bool(false)),
                    }
                }
            };
            Ok(JsValue::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}
