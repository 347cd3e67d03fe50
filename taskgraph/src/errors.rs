//! Error types for the taskgraph runtime.
//!
//! Errors fall into three families:
//!
//! - [`PipelineError`]: structural problems found while compiling a graph.
//!   These are always fatal to compilation; no partial pipeline is returned.
//! - [`RunError`]: problems scoped to a single task attempt (parameter
//!   resolution, task failures, timeouts, cancellation). These are values:
//!   they are cloned into results and written into the run's variables.
//! - [`ReaderError`]: failures of the external reader cache.

use thiserror::Error;

/// Errors raised while compiling a graph definition into a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The graph text could not be parsed.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The graph contains a directed cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A task used a reserved name.
    #[error("'{0}' is a reserved keyword that cannot be used as a task's name")]
    ReservedName(String),

    /// A task declared a type that no task kind is registered for.
    #[error("task '{dot_id}': unknown task type '{task_type}'")]
    UnknownTaskType {
        /// The task's name.
        dot_id: String,
        /// The unrecognised type.
        task_type: String,
    },

    /// A task attribute was unknown or could not be decoded.
    #[error("task '{dot_id}': invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        /// The task's name.
        dot_id: String,
        /// The attribute name.
        attribute: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl PipelineError {
    /// Creates an unknown task type error.
    #[must_use]
    pub fn unknown_task_type(dot_id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::UnknownTaskType {
            dot_id: dot_id.into(),
            task_type: task_type.into(),
        }
    }

    /// Creates an invalid attribute error.
    #[must_use]
    pub fn invalid_attribute(
        dot_id: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            dot_id: dot_id.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when the graph text is syntactically malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    /// 1-based line of the offending token.
    pub line: usize,
    /// 1-based column of the offending token.
    pub column: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Error raised when a cycle is detected in the task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to topologically sort the graph, cycle detected: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The tasks forming the cycle, in traversal order.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors produced while running a single task attempt.
///
/// Every variant is cheap to clone so the error can be stored as a task
/// result, copied into downstream inputs and written into the variable table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// No getter produced a value for a required parameter.
    #[error("parameter is empty")]
    ParameterEmpty,

    /// A value could not be coerced into the requested parameter type.
    #[error("bad input for task: {0}")]
    BadInput(String),

    /// A keypath did not resolve to a value.
    #[error("keypath not found: {0}")]
    KeypathNotFound(String),

    /// A keypath had more than two segments.
    #[error("keypath too deep (maximum 2 parts): {0}")]
    KeypathTooDeep(String),

    /// A list index or input index was out of range.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// A variable name could not be written.
    #[error("invalid variable name: {0}")]
    InvalidVariable(String),

    /// More upstream inputs errored than the task tolerates.
    #[error("too many errors: {0}")]
    TooManyErrors(String),

    /// The task received an unusable number of inputs.
    #[error("wrong number of task inputs: {0}")]
    WrongInputCardinality(String),

    /// A division by zero was requested.
    #[error("division by zero")]
    DivisionByZero,

    /// The task ran and failed.
    #[error("task run failed: {0}")]
    TaskRunFailed(String),

    /// The task did not finish within its timeout.
    #[error("task run timed out")]
    Timeout,

    /// The task never ran, or stopped retrying, because a fail-early task failed.
    #[error("task run cancelled (fail early)")]
    Cancelled,

    /// An error annotated with the parameter or operation it came from.
    #[error("{context}: {source}")]
    Context {
        /// The annotation.
        context: String,
        /// The wrapped error.
        source: Box<RunError>,
    },
}

impl RunError {
    /// Wraps this error with a context annotation.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any context annotations.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if this error (or its root) is the fail-early cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Returns true if this error (or its root) means "no value resolved".
    #[must_use]
    pub fn is_parameter_empty(&self) -> bool {
        matches!(self.root(), Self::ParameterEmpty)
    }
}

/// Extension for annotating `Result<T, RunError>` values.
pub trait RunErrorContext<T> {
    /// Wraps the error, if any, with the given annotation.
    fn context(self, context: impl Into<String>) -> Result<T, RunError>;
}

impl<T> RunErrorContext<T> for Result<T, RunError> {
    fn context(self, context: impl Into<String>) -> Result<T, RunError> {
        self.map_err(|e| e.context(context))
    }
}

/// Errors returned by the external reader cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    /// A component of the reader identity was empty.
    #[error("reader key component '{0}' must not be empty")]
    EmptyKeyComponent(&'static str),

    /// A component of the reader identity contained the key separator.
    #[error("reader key component '{0}' must not contain '/'")]
    InvalidKeyComponent(&'static str),

    /// No relayer is registered for the requested network and chain.
    #[error("relayer not found for network '{network}' and chain '{chain_id}'")]
    RelayerNotFound {
        /// The relay network.
        network: String,
        /// The chain identifier.
        chain_id: String,
    },

    /// `create` was called for an identity that is already cached.
    #[error("reader already exists for key '{0}'")]
    AlreadyExists(String),

    /// `get` was called for an identity that is not cached.
    #[error("reader not found for key '{0}'")]
    NotFound(String),

    /// The reader or relayer reported a failure.
    #[error("reader error: {0}")]
    Reader(String),
}

/// Result alias for graph compilation.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_detected_error_message() {
        let err = CycleDetectedError::new(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_reserved_name_message() {
        let err = PipelineError::ReservedName("input".to_string());
        assert_eq!(
            err.to_string(),
            "'input' is a reserved keyword that cannot be used as a task's name"
        );
    }

    #[test]
    fn test_run_error_context_root() {
        let err = RunError::Cancelled.context("retry").context("task b");
        assert!(err.is_cancelled());
        assert_eq!(err.root(), &RunError::Cancelled);
        assert_eq!(err.to_string(), "task b: retry: task run cancelled (fail early)");
    }

    #[test]
    fn test_result_context_extension() {
        let res: Result<(), RunError> = Err(RunError::ParameterEmpty);
        let err = res.context("values").unwrap_err();
        assert!(err.is_parameter_empty());
        assert!(err.to_string().starts_with("values: "));
    }

    #[test]
    fn test_parse_error_position() {
        let err = ParseError::new(3, 7, "unexpected '}'");
        assert_eq!(err.to_string(), "parse error at line 3, column 7: unexpected '}'");
    }

    #[test]
    fn test_reader_errors_are_distinct() {
        assert_ne!(
            ReaderError::AlreadyExists("k".to_string()),
            ReaderError::NotFound("k".to_string())
        );
        assert!(ReaderError::EmptyKeyComponent("network").to_string().contains("network"));
    }
}
