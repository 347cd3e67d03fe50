//! Observable results of a pipeline run.

use crate::errors::RunError;
use crate::tasks::{Task, TaskResult, TaskType};
use crate::utils::{generate_id, now, Timestamp};
use crate::vars::{Value, Vars};
use serde::Serialize;
use uuid::Uuid;

/// The terminal (or pending) outcome of one task within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunResult {
    /// Unique id of this record.
    pub id: Uuid,
    /// The task's id within the pipeline.
    pub task_id: usize,
    /// The task's node name.
    pub dot_id: String,
    /// The task's kind.
    pub task_type: TaskType,
    /// What the task produced.
    pub result: TaskResult,
    /// Executions of the task that ended in an error.
    pub attempts: u32,
    /// When the task was first dispatched.
    pub created_at: Timestamp,
    /// When the outcome became final; `None` while pending.
    pub finished_at: Option<Timestamp>,
}

impl TaskRunResult {
    /// Records a final outcome.
    #[must_use]
    pub fn finished(task: &Task, result: TaskResult, attempts: u32, created_at: Timestamp) -> Self {
        Self {
            id: generate_id(),
            task_id: task.id(),
            dot_id: task.dot_id().to_string(),
            task_type: task.task_type(),
            result,
            attempts,
            created_at,
            finished_at: Some(now()),
        }
    }

    /// Records an outcome that will complete out of band.
    #[must_use]
    pub fn pending(task: &Task, result: TaskResult, attempts: u32, created_at: Timestamp) -> Self {
        Self {
            finished_at: None,
            ..Self::finished(task, result, attempts, created_at)
        }
    }

    /// Returns true if the outcome is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Returns true if the task was cancelled by a fail-early failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.result.error().is_some_and(RunError::is_cancelled)
    }
}

/// Results of the terminal tasks, ordered by `index` then id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalResult {
    /// One entry per terminal task; errors appear as [`Value::Error`].
    pub values: Vec<Value>,
    /// The error of each terminal task, if it failed.
    pub errors: Vec<Option<RunError>>,
}

impl FinalResult {
    pub(crate) fn from_results<'a>(results: impl IntoIterator<Item = &'a TaskResult>) -> Self {
        let mut out = Self::default();
        for result in results {
            out.errors.push(result.error().cloned());
            out.values.push(result.clone().into_value());
        }
        out
    }

    /// Returns true if any terminal task failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }

    /// Returns the only result.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::WrongInputCardinality`] unless there is exactly one
    /// terminal task, or that task's error.
    pub fn singular_result(&self) -> Result<Value, RunError> {
        match (self.values.as_slice(), self.errors.as_slice()) {
            ([_], [Some(err)]) => Err(err.clone()),
            ([value], [None]) => Ok(value.clone()),
            _ => Err(RunError::WrongInputCardinality(format!(
                "expected 1 final result, got {}",
                self.values.len()
            ))),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// The run's id, also recorded on its tracing span.
    pub run_id: Uuid,
    /// One record per task that reached a terminal or pending state, by task id.
    pub task_results: Vec<TaskRunResult>,
    /// The variable table after the run.
    pub vars: Vars,
    /// True if some task is still completing out of band.
    pub is_pending: bool,
    /// Results of the terminal tasks; `None` while the run is pending.
    pub final_result: Option<FinalResult>,
}

impl RunOutcome {
    /// Returns the record of a task by node name.
    #[must_use]
    pub fn task_result(&self, dot_id: &str) -> Option<&TaskRunResult> {
        self.task_results.iter().find(|r| r.dot_id == dot_id)
    }

    /// Returns true if any task ended in an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.task_results.iter().any(|r| r.result.is_err())
    }
}
