//! Worker-side execution of a single task attempt.

use crate::config::RunnerConfig;
use crate::errors::RunError;
use crate::tasks::{RunInfo, Task, TaskContext, TaskResult};
use crate::vars::Vars;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Executes one attempt of a task on a worker.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` once against a snapshot of the run's variables and its
    /// gathered inputs.
    async fn execute(
        &self,
        task: &Task,
        ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo);
}

/// Runs the task body under its timeout.
///
/// A task without its own timeout uses the configured default; expiry is a
/// retryable [`RunError::Timeout`].
#[derive(Debug, Clone, Default)]
pub struct DefaultTaskExecutor {
    default_timeout: Option<Duration>,
}

impl DefaultTaskExecutor {
    /// Creates an executor without a default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor from runner configuration.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            default_timeout: config.default_task_timeout(),
        }
    }

    /// Sets the timeout for tasks that do not configure one.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// The timeout applied to `task`.
    #[must_use]
    pub fn timeout_for(&self, task: &Task) -> Option<Duration> {
        task.base().timeout.or(self.default_timeout)
    }
}

#[async_trait]
impl TaskExecutor for DefaultTaskExecutor {
    async fn execute(
        &self,
        task: &Task,
        ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        with_timeout(task, self.timeout_for(task), task.run(ctx, vars, inputs)).await
    }
}

/// Bounds one attempt of `task`; expiry is a retryable [`RunError::Timeout`].
pub(crate) async fn with_timeout<F>(
    task: &Task,
    timeout: Option<Duration>,
    attempt: F,
) -> (TaskResult, RunInfo)
where
    F: Future<Output = (TaskResult, RunInfo)>,
{
    let Some(timeout) = timeout else {
        return attempt.await;
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(
                task = task.dot_id(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "task timed out"
            );
            (TaskResult::err(RunError::Timeout), RunInfo::retryable())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{BaseTask, MemoTask, TaskKind};
    use crate::vars::Value;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn memo(timeout: Option<Duration>) -> Task {
        let mut base = BaseTask::new(0, "m");
        base.timeout = timeout;
        Task::new(
            base,
            TaskKind::Memo(MemoTask {
                value: r#""hi""#.to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn test_executes_task() {
        let ctx = TaskContext::new(Uuid::nil());
        let (result, info) = DefaultTaskExecutor::new()
            .execute(&memo(None), &ctx, &Vars::new(), &[])
            .await;
        assert_eq!(result.value(), Some(&Value::from("hi")));
        assert_eq!(info, RunInfo::default());

        let (result, _) = DefaultTaskExecutor::new()
            .with_default_timeout(Duration::from_secs(5))
            .execute(&memo(Some(Duration::from_secs(5))), &ctx, &Vars::new(), &[])
            .await;
        assert!(!result.is_err());
    }

    #[test]
    fn test_from_config() {
        let executor = DefaultTaskExecutor::from_config(
            &RunnerConfig::new().with_default_task_timeout(Duration::from_millis(20)),
        );
        assert_eq!(executor.default_timeout, Some(Duration::from_millis(20)));
        assert_eq!(
            DefaultTaskExecutor::from_config(&RunnerConfig::default()).default_timeout,
            None
        );
    }

    #[tokio::test]
    async fn test_expired_attempt_is_retryable_timeout() {
        let task = memo(None);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            (TaskResult::ok("late"), RunInfo::default())
        };
        let (result, info) = with_timeout(&task, Some(Duration::from_millis(10)), slow).await;
        assert_eq!(result.error(), Some(&RunError::Timeout));
        assert_eq!(info, RunInfo::retryable());
    }

    #[test]
    fn test_task_timeout_overrides_default() {
        let executor = DefaultTaskExecutor::new().with_default_timeout(Duration::from_secs(1));
        assert_eq!(executor.timeout_for(&memo(None)), Some(Duration::from_secs(1)));
        assert_eq!(
            executor.timeout_for(&memo(Some(Duration::from_millis(3)))),
            Some(Duration::from_millis(3))
        );
        assert_eq!(DefaultTaskExecutor::new().timeout_for(&memo(None)), None);
    }
}
