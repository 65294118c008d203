//! Progress reporting and cancellation.

use keel_diagnostic::{ErrorInfo, Result};

/// Observer polled at every coarse-grained loader step.
///
/// `canceled` returning true makes the loader raise a cancellation error
/// that unwinds without persisting partial state.
pub trait ProgressObserver {
    fn initialize(&self, task: &str, maximum: usize);
    fn set_progress_value(&self, value: usize);
    fn increment_progress_value(&self);
    fn canceled(&self) -> bool;
}

/// Raises the cancellation error if the observer reports cancel.
pub fn check_cancelation(
    observer: Option<&dyn ProgressObserver>,
    configuration: &str,
) -> Result<()> {
    if observer.is_some_and(|observer| observer.canceled()) {
        return Err(ErrorInfo::cancelled(format!(
            "Project resolving canceled for configuration '{configuration}'."
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct TestObserver {
        cancel: Cell<bool>,
        progress: Cell<usize>,
    }

    impl ProgressObserver for TestObserver {
        fn initialize(&self, _task: &str, _maximum: usize) {}
        fn set_progress_value(&self, value: usize) {
            self.progress.set(value);
        }
        fn increment_progress_value(&self) {
            self.progress.set(self.progress.get() + 1);
        }
        fn canceled(&self) -> bool {
            self.cancel.get()
        }
    }

    #[test]
    fn cancellation_raises_distinct_error() {
        let observer = TestObserver {
            cancel: Cell::new(false),
            progress: Cell::new(0),
        };
        assert!(check_cancelation(Some(&observer), "default").is_ok());
        observer.cancel.set(true);
        let error = check_cancelation(Some(&observer), "default").unwrap_err();
        assert!(error.is_cancellation());
        assert!(error.to_string().contains("'default'"));
    }

    #[test]
    fn no_observer_never_cancels() {
        assert!(check_cancelation(None, "default").is_ok());
    }
}
