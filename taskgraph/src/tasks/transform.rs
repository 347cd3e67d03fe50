//! Value transformations: memo, jsonparse, merge, case mapping and length.

use super::{RunInfo, Runnable, TaskContext, TaskResult, TaskType};
use crate::errors::{RunError, RunErrorContext};
use crate::getters;
use crate::params::{
    input, json_with_var_exprs, non_empty_string, resolve_param, var_expr, BytesParam,
    JsonPathParam, MapParam, MaybeBoolParam, ObjectParam, StringParam,
};
use crate::vars::{Value, Vars};
use async_trait::async_trait;
use serde::Deserialize;

/// Echoes `value`, a JSON literal that may reference variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoTask {
    /// JSON literal; defaults to the first input.
    pub value: String,
}

#[async_trait]
impl Runnable for MemoTask {
    fn task_type(&self) -> TaskType {
        TaskType::Memo
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = resolve_param::<ObjectParam>(&getters![
            json_with_var_exprs(&self.value, vars, false),
            input(inputs, 0),
        ])
        .context("value")
        .map(Value::from);
        (result.into(), RunInfo::default())
    }
}

/// Parses JSON `data` and extracts the value at `path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct JsonParseTask {
    /// JSON text; defaults to the first input.
    pub data: String,
    /// Comma-separated keys and list indices.
    pub path: String,
    /// Yield null instead of failing when the path is missing.
    pub lax: String,
}

impl JsonParseTask {
    fn parse(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let BytesParam(data) = resolve_param(&getters![
            var_expr(&self.data, vars),
            non_empty_string(&self.data),
            input(inputs, 0),
        ])
        .context("data")?;
        let JsonPathParam(path) =
            resolve_param(&getters![var_expr(&self.path, vars), self.path.as_str()])
                .context("path")?;
        let lax = resolve_param::<MaybeBoolParam>(&getters![self.lax.as_str()])
            .context("lax")?
            .as_bool()
            .unwrap_or(false);

        let text = String::from_utf8(data)
            .map_err(|e| RunError::BadInput(format!("data is not UTF-8: {e}")))?;
        let mut current = Value::from_json_str(&text).context("data")?;

        for segment in &path {
            let next = match &current {
                Value::Map(map) => map.get(segment).cloned().ok_or_else(|| {
                    RunError::KeypathNotFound(format!("key '{segment}' in {}", path.join(",")))
                }),
                Value::List(list) => list_index(list, segment),
                other => Err(RunError::KeypathNotFound(format!(
                    "cannot index {} with '{segment}'",
                    other.type_name()
                ))),
            };
            current = match next {
                Ok(v) => v,
                Err(_) if lax => return Ok(Value::Null),
                Err(e) => return Err(e),
            };
        }

        Ok(current)
    }
}

fn list_index(list: &[Value], segment: &str) -> Result<Value, RunError> {
    let index: i64 = segment
        .trim()
        .parse()
        .map_err(|_| RunError::KeypathNotFound(format!("'{segment}' is not a list index")))?;
    let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
    let resolved = if index < 0 { len + index } else { index };
    usize::try_from(resolved)
        .ok()
        .and_then(|i| list.get(i))
        .cloned()
        .ok_or_else(|| RunError::IndexOutOfRange(format!("index {index} of {len}")))
}

#[async_trait]
impl Runnable for JsonParseTask {
    fn task_type(&self) -> TaskType {
        TaskType::JsonParse
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.parse(vars, inputs).into(), RunInfo::default())
    }
}

/// Merges two maps; keys in `right` win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MergeTask {
    /// Base map; defaults to the first input.
    pub left: String,
    /// Overrides.
    pub right: String,
}

impl MergeTask {
    fn merge(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let MapParam(mut left) = resolve_param(&getters![
            var_expr(&self.left, vars),
            json_with_var_exprs(&self.left, vars, false),
            input(inputs, 0),
        ])
        .context("left")?;
        let MapParam(right) = resolve_param(&getters![
            var_expr(&self.right, vars),
            json_with_var_exprs(&self.right, vars, false),
        ])
        .context("right")?;

        left.extend(right);
        Ok(Value::Map(left))
    }
}

#[async_trait]
impl Runnable for MergeTask {
    fn task_type(&self) -> TaskType {
        TaskType::Merge
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.merge(vars, inputs).into(), RunInfo::default())
    }
}

fn string_input(attr: &str, vars: &Vars, inputs: &[TaskResult]) -> Result<String, RunError> {
    resolve_param::<StringParam>(&getters![
        var_expr(attr, vars),
        non_empty_string(attr),
        input(inputs, 0),
    ])
    .map(|StringParam(s)| s)
    .context("input")
}

/// Lowercases a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LowercaseTask {
    /// The string; defaults to the first input.
    pub input: String,
}

#[async_trait]
impl Runnable for LowercaseTask {
    fn task_type(&self) -> TaskType {
        TaskType::Lowercase
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = string_input(&self.input, vars, inputs).map(|s| Value::String(s.to_lowercase()));
        (result.into(), RunInfo::default())
    }
}

/// Uppercases a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct UppercaseTask {
    /// The string; defaults to the first input.
    pub input: String,
}

#[async_trait]
impl Runnable for UppercaseTask {
    fn task_type(&self) -> TaskType {
        TaskType::Uppercase
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = string_input(&self.input, vars, inputs).map(|s| Value::String(s.to_uppercase()));
        (result.into(), RunInfo::default())
    }
}

/// Byte length of a string or byte value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LengthTask {
    /// The value; defaults to the first input.
    pub input: String,
}

#[async_trait]
impl Runnable for LengthTask {
    fn task_type(&self) -> TaskType {
        TaskType::Length
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = resolve_param::<BytesParam>(&getters![
            var_expr(&self.input, vars),
            non_empty_string(&self.input),
            input(inputs, 0),
        ])
        .context("input")
        .map(|BytesParam(b)| Value::from(b.len()));
        (result.into(), RunInfo::default())
    }
}
