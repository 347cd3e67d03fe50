//! Task abstraction and the built-in task kinds.
//!
//! Every node of a compiled pipeline is a [`Task`]: a [`BaseTask`] carrying
//! identity, links and retry policy, plus a [`TaskKind`] that knows how to
//! execute. Kinds are a closed set selected by the node's `type` attribute
//! through [`TaskType`].

mod aggregate;
mod arith;
mod control;
mod result;
mod transform;

pub use aggregate::{AnyTask, MeanTask, MedianTask, SumTask};
pub use arith::{DivideTask, LessThanTask, MultiplyTask};
pub use control::{ConditionalTask, FailTask};
pub use result::{RunInfo, TaskResult};
pub use transform::{JsonParseTask, LengthTask, LowercaseTask, MemoTask, MergeTask, UppercaseTask};

use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, PipelineResult};
use crate::utils::parse_duration;
use crate::vars::Vars;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default lower bound between retry attempts.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(5);
/// Default upper bound between retry attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Per-execution context handed to a task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// The run this execution belongs to.
    pub run_id: Uuid,
    /// 1-based execution number of this node within the run.
    pub attempt: u32,
    /// Fires when a fail-early task has failed.
    pub cancel: Arc<CancellationToken>,
}

impl TaskContext {
    /// Creates a context for a first attempt with a fresh token.
    #[must_use]
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            attempt: 1,
            cancel: Arc::new(CancellationToken::new()),
        }
    }
}

/// The single execution entry point every task kind implements.
#[async_trait]
pub trait Runnable: Send + Sync + fmt::Debug {
    /// Returns the registry type of this kind.
    fn task_type(&self) -> TaskType;

    /// Executes the task against a snapshot of the run's variables and the
    /// results of its propagating predecessors.
    async fn run(
        &self,
        ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo);
}

/// A link from a consumer task to one of its producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskDependency {
    /// Whether the producer's result is passed to the consumer as an input.
    /// Implicit dependencies (variable references) only order execution.
    pub propagate_result: bool,
    /// Producer task id.
    pub input_task: usize,
}

/// Identity, links and scheduling policy shared by every task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTask {
    /// Position in topological order.
    pub id: usize,
    /// Node name, also the variable the task's output is written to.
    pub dot_id: String,
    /// Orders this task's result among its consumer's inputs and in the
    /// final result.
    pub index: i32,
    /// Per-attempt execution timeout.
    pub timeout: Option<Duration>,
    /// Cancel the rest of the run when this task fails terminally.
    pub fail_early: bool,
    /// Additional attempts after the first.
    pub retries: u32,
    /// Lower bound between attempts.
    pub min_backoff: Duration,
    /// Upper bound between attempts.
    pub max_backoff: Duration,
    /// Producers, sorted by producer id.
    pub inputs: Vec<TaskDependency>,
    /// Consumers, sorted by consumer id.
    pub outputs: Vec<usize>,
}

impl BaseTask {
    const ATTRIBUTES: [&'static str; 7] = [
        "type",
        "index",
        "timeout",
        "failEarly",
        "retries",
        "minBackoff",
        "maxBackoff",
    ];

    /// Creates a task with default policy and no links.
    #[must_use]
    pub fn new(id: usize, dot_id: impl Into<String>) -> Self {
        Self {
            id,
            dot_id: dot_id.into(),
            index: 0,
            timeout: None,
            fail_early: false,
            retries: 0,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn from_attributes(
        id: usize,
        dot_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> PipelineResult<Self> {
        let mut base = Self::new(id, dot_id);
        let invalid =
            |attr: &str, reason: String| PipelineError::invalid_attribute(dot_id, attr, reason);

        if let Some(v) = attrs.get("index") {
            base.index = v.trim().parse().map_err(|e| invalid("index", format!("{e}")))?;
        }
        if let Some(v) = attrs.get("timeout") {
            base.timeout = Some(parse_duration(v).map_err(|e| invalid("timeout", e))?);
        }
        if let Some(v) = attrs.get("failEarly") {
            base.fail_early = v.trim().parse().map_err(|e| invalid("failEarly", format!("{e}")))?;
        }
        if let Some(v) = attrs.get("retries") {
            base.retries = v.trim().parse().map_err(|e| invalid("retries", format!("{e}")))?;
        }
        if let Some(v) = attrs.get("minBackoff") {
            base.min_backoff = parse_duration(v).map_err(|e| invalid("minBackoff", e))?;
        }
        if let Some(v) = attrs.get("maxBackoff") {
            base.max_backoff = parse_duration(v).map_err(|e| invalid("maxBackoff", e))?;
        }
        if base.min_backoff > base.max_backoff {
            return Err(invalid(
                "minBackoff",
                format!(
                    "{:?} is greater than maxBackoff {:?}",
                    base.min_backoff, base.max_backoff
                ),
            ));
        }

        Ok(base)
    }
}

/// Registry of task kinds, keyed by the `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Median of decimal inputs.
    Median,
    /// Mean of decimal inputs.
    Mean,
    /// Sum of decimal inputs.
    Sum,
    /// A random successful input.
    Any,
    /// Decimal multiplication.
    Multiply,
    /// Decimal division.
    Divide,
    /// Decimal comparison.
    LessThan,
    /// Echo of a literal.
    Memo,
    /// Unconditional failure.
    Fail,
    /// JSON extraction.
    JsonParse,
    /// Map merge.
    Merge,
    /// Lowercase a string.
    Lowercase,
    /// Uppercase a string.
    Uppercase,
    /// Byte length.
    Length,
    /// Gate on a boolean.
    Conditional,
}

impl TaskType {
    /// Every registered kind.
    pub const ALL: [Self; 15] = [
        Self::Median,
        Self::Mean,
        Self::Sum,
        Self::Any,
        Self::Multiply,
        Self::Divide,
        Self::LessThan,
        Self::Memo,
        Self::Fail,
        Self::JsonParse,
        Self::Merge,
        Self::Lowercase,
        Self::Uppercase,
        Self::Length,
        Self::Conditional,
    ];

    /// Returns the `type` attribute value for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Any => "any",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::LessThan => "lessthan",
            Self::Memo => "memo",
            Self::Fail => "fail",
            Self::JsonParse => "jsonparse",
            Self::Merge => "merge",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
            Self::Length => "length",
            Self::Conditional => "conditional",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| s.to_string())
    }
}

/// The closed set of task bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// See [`MedianTask`].
    Median(MedianTask),
    /// See [`MeanTask`].
    Mean(MeanTask),
    /// See [`SumTask`].
    Sum(SumTask),
    /// See [`AnyTask`].
    Any(AnyTask),
    /// See [`MultiplyTask`].
    Multiply(MultiplyTask),
    /// See [`DivideTask`].
    Divide(DivideTask),
    /// See [`LessThanTask`].
    LessThan(LessThanTask),
    /// See [`MemoTask`].
    Memo(MemoTask),
    /// See [`FailTask`].
    Fail(FailTask),
    /// See [`JsonParseTask`].
    JsonParse(JsonParseTask),
    /// See [`MergeTask`].
    Merge(MergeTask),
    /// See [`LowercaseTask`].
    Lowercase(LowercaseTask),
    /// See [`UppercaseTask`].
    Uppercase(UppercaseTask),
    /// See [`LengthTask`].
    Length(LengthTask),
    /// See [`ConditionalTask`].
    Conditional(ConditionalTask),
}

impl TaskKind {
    /// Constructs the kind registered for `task_type` from its attributes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidAttribute`] for unknown or malformed
    /// attributes.
    pub fn decode(
        task_type: TaskType,
        dot_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> PipelineResult<Self> {
        Ok(match task_type {
            TaskType::Median => Self::Median(decode_attributes(dot_id, attrs)?),
            TaskType::Mean => Self::Mean(decode_attributes(dot_id, attrs)?),
            TaskType::Sum => Self::Sum(decode_attributes(dot_id, attrs)?),
            TaskType::Any => Self::Any(decode_attributes(dot_id, attrs)?),
            TaskType::Multiply => Self::Multiply(decode_attributes(dot_id, attrs)?),
            TaskType::Divide => Self::Divide(decode_attributes(dot_id, attrs)?),
            TaskType::LessThan => Self::LessThan(decode_attributes(dot_id, attrs)?),
            TaskType::Memo => Self::Memo(decode_attributes(dot_id, attrs)?),
            TaskType::Fail => Self::Fail(decode_attributes(dot_id, attrs)?),
            TaskType::JsonParse => Self::JsonParse(decode_attributes(dot_id, attrs)?),
            TaskType::Merge => Self::Merge(decode_attributes(dot_id, attrs)?),
            TaskType::Lowercase => Self::Lowercase(decode_attributes(dot_id, attrs)?),
            TaskType::Uppercase => Self::Uppercase(decode_attributes(dot_id, attrs)?),
            TaskType::Length => Self::Length(decode_attributes(dot_id, attrs)?),
            TaskType::Conditional => Self::Conditional(decode_attributes(dot_id, attrs)?),
        })
    }

    fn runnable(&self) -> &dyn Runnable {
        match self {
            Self::Median(t) => t,
            Self::Mean(t) => t,
            Self::Sum(t) => t,
            Self::Any(t) => t,
            Self::Multiply(t) => t,
            Self::Divide(t) => t,
            Self::LessThan(t) => t,
            Self::Memo(t) => t,
            Self::Fail(t) => t,
            Self::JsonParse(t) => t,
            Self::Merge(t) => t,
            Self::Lowercase(t) => t,
            Self::Uppercase(t) => t,
            Self::Length(t) => t,
            Self::Conditional(t) => t,
        }
    }
}

/// Decodes the type-specific attributes (everything but the base ones).
fn decode_attributes<T: DeserializeOwned>(
    dot_id: &str,
    attrs: &BTreeMap<String, String>,
) -> PipelineResult<T> {
    let object: serde_json::Map<String, serde_json::Value> = attrs
        .iter()
        .filter(|(k, _)| !BaseTask::ATTRIBUTES.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        let reason = e.to_string();
        let attribute = reason
            .split('`')
            .nth(1)
            .map_or_else(|| "*".to_string(), str::to_string);
        PipelineError::invalid_attribute(dot_id, attribute, reason)
    })
}

/// One node of a compiled pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    base: BaseTask,
    kind: TaskKind,
}

impl Task {
    /// Builds a task from a node's attribute map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownTaskType`] if `type` is missing or not
    /// registered, and [`PipelineError::InvalidAttribute`] for malformed
    /// attributes.
    pub fn from_attributes(
        id: usize,
        dot_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> PipelineResult<Self> {
        let type_name = attrs.get("type").map(String::as_str).unwrap_or_default();
        let task_type: TaskType = type_name
            .parse()
            .map_err(|t: String| PipelineError::unknown_task_type(dot_id, t))?;

        let base = BaseTask::from_attributes(id, dot_id, attrs)?;
        let kind = TaskKind::decode(task_type, dot_id, attrs)?;
        Ok(Self { base, kind })
    }

    /// Creates a task from parts.
    #[must_use]
    pub fn new(base: BaseTask, kind: TaskKind) -> Self {
        Self { base, kind }
    }

    /// Position in topological order.
    #[must_use]
    pub fn id(&self) -> usize {
        self.base.id
    }

    /// Node name.
    #[must_use]
    pub fn dot_id(&self) -> &str {
        &self.base.dot_id
    }

    /// Identity, links and policy.
    #[must_use]
    pub fn base(&self) -> &BaseTask {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut BaseTask {
        &mut self.base
    }

    /// The task body.
    #[must_use]
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// The registry type.
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        self.kind.runnable().task_type()
    }

    /// Producers of this task.
    #[must_use]
    pub fn inputs(&self) -> &[TaskDependency] {
        &self.base.inputs
    }

    /// Consumers of this task.
    #[must_use]
    pub fn outputs(&self) -> &[usize] {
        &self.base.outputs
    }

    /// Executes the task body.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        self.kind.runnable().run(ctx, vars, inputs).await
    }
}
