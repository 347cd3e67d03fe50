//! Control-flow tasks.

use super::{RunInfo, Runnable, TaskContext, TaskResult, TaskType};
use crate::errors::{RunError, RunErrorContext};
use crate::getters;
use crate::params::{input, non_empty_string, resolve_param, var_expr, MaybeBoolParam, StringParam};
use crate::vars::{Value, Vars};
use async_trait::async_trait;
use serde::Deserialize;

/// Always fails with `msg`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct FailTask {
    /// The failure message.
    pub msg: String,
}

#[async_trait]
impl Runnable for FailTask {
    fn task_type(&self) -> TaskType {
        TaskType::Fail
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        _inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let msg = resolve_param::<StringParam>(&getters![
            var_expr(&self.msg, vars),
            non_empty_string(&self.msg),
            "fail task",
        ])
        .map_or_else(|e| e.to_string(), |StringParam(s)| s);
        (TaskResult::err(RunError::TaskRunFailed(msg)), RunInfo::default())
    }
}

/// Succeeds with `true` when `data` is true; fails otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ConditionalTask {
    /// The condition; defaults to the first input.
    pub data: String,
}

#[async_trait]
impl Runnable for ConditionalTask {
    fn task_type(&self) -> TaskType {
        TaskType::Conditional
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = resolve_param::<MaybeBoolParam>(&getters![
            var_expr(&self.data, vars),
            non_empty_string(&self.data),
            input(inputs, 0),
            Value::Null,
        ])
        .context("data")
        .and_then(|cond| match cond.as_bool() {
            Some(true) => Ok(Value::Bool(true)),
            _ => Err(RunError::TaskRunFailed(
                "conditional was not satisfied".to_string(),
            )),
        });
        (result.into(), RunInfo::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn ctx() -> TaskContext {
        TaskContext::new(Uuid::nil())
    }

    #[tokio::test]
    async fn test_fail_task() {
        let task = FailTask {
            msg: "boom".to_string(),
        };
        let (result, info) = task.run(&ctx(), &Vars::new(), &[]).await;
        assert_eq!(result.error(), Some(&RunError::TaskRunFailed("boom".to_string())));
        assert!(!info.is_retryable);

        let (result, _) = FailTask::default().run(&ctx(), &Vars::new(), &[]).await;
        assert_eq!(
            result.error(),
            Some(&RunError::TaskRunFailed("fail task".to_string()))
        );
    }

    #[tokio::test]
    async fn test_conditional() {
        let mut vars = Vars::new();
        vars.set("ok", true).unwrap();
        let task = ConditionalTask {
            data: "$(ok)".to_string(),
        };
        let (result, _) = task.run(&ctx(), &vars, &[]).await;
        assert_eq!(result.value(), Some(&Value::Bool(true)));

        let (result, _) = ConditionalTask::default()
            .run(&ctx(), &vars, &[TaskResult::ok(false)])
            .await;
        assert!(matches!(result.error(), Some(RunError::TaskRunFailed(_))));

        let (result, _) = ConditionalTask::default().run(&ctx(), &vars, &[]).await;
        assert!(result.is_err());
    }
}
