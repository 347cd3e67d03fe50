//! What a single task execution hands back to the scheduler.

use crate::errors::RunError;
use crate::vars::Value;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// The outcome of one task execution: a value or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    outcome: Result<Value, RunError>,
}

impl TaskResult {
    /// Creates a successful result.
    #[must_use]
    pub fn ok(value: impl Into<Value>) -> Self {
        Self {
            outcome: Ok(value.into()),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn err(error: RunError) -> Self {
        Self { outcome: Err(error) }
    }

    /// Returns the value, if the task succeeded.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    /// Returns the error, if the task failed.
    #[must_use]
    pub fn error(&self) -> Option<&RunError> {
        self.outcome.as_ref().err()
    }

    /// Returns true if the task failed.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.outcome.is_err()
    }

    /// Borrows the outcome as a standard result.
    pub fn as_result(&self) -> Result<&Value, &RunError> {
        self.outcome.as_ref()
    }

    /// Converts into the value stored in the variable table.
    ///
    /// Errors become [`Value::Error`] so downstream tasks can inspect them.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self.outcome {
            Ok(v) => v,
            Err(e) => Value::Error(e),
        }
    }
}

impl From<Result<Value, RunError>> for TaskResult {
    fn from(outcome: Result<Value, RunError>) -> Self {
        Self { outcome }
    }
}

impl Serialize for TaskResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TaskResult", 2)?;
        match &self.outcome {
            Ok(v) => {
                state.serialize_field("value", v)?;
                state.serialize_field("error", &Option::<String>::None)?;
            }
            Err(e) => {
                state.serialize_field("value", &Value::Null)?;
                state.serialize_field("error", &Some(e.to_string()))?;
            }
        }
        state.end()
    }
}

/// Out-of-band signals accompanying a [`TaskResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    /// The task completes out of band; the result is not final.
    pub is_pending: bool,
    /// The error is transient and should consume a retry attempt.
    pub is_retryable: bool,
}

impl RunInfo {
    /// A retryable outcome.
    #[must_use]
    pub fn retryable() -> Self {
        Self {
            is_pending: false,
            is_retryable: true,
        }
    }

    /// A pending outcome.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            is_pending: true,
            is_retryable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_becomes_error_value() {
        let result = TaskResult::err(RunError::DivisionByZero);
        assert!(result.is_err());
        assert_eq!(result.into_value(), Value::Error(RunError::DivisionByZero));
    }

    #[test]
    fn test_serialize_shape() {
        let ok = serde_json::to_value(TaskResult::ok("x")).unwrap();
        assert_eq!(ok, serde_json::json!({"value": "x", "error": null}));

        let err = serde_json::to_value(TaskResult::err(RunError::Timeout)).unwrap();
        assert_eq!(err, serde_json::json!({"value": null, "error": "task run timed out"}));
    }
}
