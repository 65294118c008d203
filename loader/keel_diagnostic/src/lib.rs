//! Structured errors for the keel loader.
//!
//! Errors carry one or more [`ErrorItem`]s, each a message plus an optional
//! source location; appending lets a single error describe a chain of causes
//! ("Duplicate product name" / "First product defined here." / ...). The
//! [`ErrorKind`] taxonomy distinguishes how callers must react: cancellation
//! unwinds, relaxed mode downgrades resolve errors, restore handles
//! `NotFound`.

mod backtrace;
mod error;

pub use backtrace::{parse_stack_line, StackFrame};
pub use error::{ErrorInfo, ErrorItem, ErrorKind};

/// Loader-wide result type.
pub type Result<T> = std::result::Result<T, ErrorInfo>;
