//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A cooperation point was reached after the scheduler was closed, or
    /// `close` was called twice.
    #[error("scheduler is closed")]
    Closed,
    /// The context carries no task handle. `yield_now` and `wait` only work
    /// inside a body started through `Scheduler::spawn`.
    #[error("no task bound to this context")]
    MissingTask,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SchedulerError::Closed), "scheduler is closed");
        assert_eq!(
            format!("{}", SchedulerError::MissingTask),
            "no task bound to this context"
        );
        assert_eq!(
            format!(
                "{}",
                SchedulerError::InvalidConfig("tick_ms must be > 0".into())
            ),
            "invalid configuration: tick_ms must be > 0"
        );
    }
}
