//! Script errors.

use std::fmt;

/// An exception raised during script execution, with a synthesized stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsError {
    pub message: String,
    /// Innermost frame first: `(function, file, line)` rendered as
    /// `name@file:line` stack lines.
    pub stack: Vec<(String, String, u32)>,
}

impl JsError {
    pub fn new(message: impl Into<String>) -> Self {
        JsError {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Appends a frame to the stack (outermost last).
    #[must_use]
    pub fn with_frame(mut self, function: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        self.stack.push((function.into(), file.into(), line));
        self
    }

    /// The innermost recorded position, if any.
    pub fn position(&self) -> Option<(&str, u32)> {
        self.stack
            .first()
            .map(|(_, file, line)| (file.as_str(), *line))
    }

    /// Renders the stack in `name@file:line` form, one frame per line.
    pub fn stack_trace(&self) -> String {
        self.stack
            .iter()
            .map(|(function, file, line)| format!("{function}@{file}:{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JsError {}

#[cold]
pub fn undefined_variable(name: &str) -> JsError {
    JsError::new(format!("`{name}` is not defined"))
}

#[cold]
pub fn not_a_function(what: &str) -> JsError {
    JsError::new(format!("{what} is not a function"))
}

#[cold]
pub fn no_such_method(method: &str, type_name: &str) -> JsError {
    JsError::new(format!("no method `{method}` on {type_name}"))
}

#[cold]
pub fn cannot_read_property(name: &str, type_name: &str) -> JsError {
    JsError::new(format!("cannot read property `{name}` of {type_name}"))
}

#[cold]
pub fn wrong_argument_count(function: &str, expected: usize, got: usize) -> JsError {
    JsError::new(format!(
        "`{function}` expects {expected} argument(s), got {got}"
    ))
}

#[cold]
pub fn invalid_operand(op: &str, type_name: &str) -> JsError {
    JsError::new(format!("invalid operand for `{op}`: {type_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_rendering() {
        let error = JsError::new("boom")
            .with_frame("configure", "/p/probe.keel", 12)
            .with_frame("<eval>", "/p/project.keel", 3);
        assert_eq!(
            error.stack_trace(),
            "configure@/p/probe.keel:12\n<eval>@/p/project.keel:3"
        );
        assert_eq!(error.position(), Some(("/p/probe.keel", 12)));
    }
}
