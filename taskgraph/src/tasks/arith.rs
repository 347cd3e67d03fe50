//! Decimal arithmetic and comparison.

use super::aggregate::round;
use super::{RunInfo, Runnable, TaskContext, TaskResult, TaskType};
use crate::errors::{RunError, RunErrorContext};
use crate::getters;
use crate::params::{input, non_empty_string, resolve_param, var_expr, DecimalParam, MaybeUint64Param};
use crate::vars::{Value, Vars};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

/// `input` falls back to the first upstream result.
fn operand(attr: &str, vars: &Vars, inputs: &[TaskResult], name: &str) -> Result<Decimal, RunError> {
    resolve_param::<DecimalParam>(&getters![
        var_expr(attr, vars),
        non_empty_string(attr),
        input(inputs, 0),
    ])
    .map(DecimalParam::decimal)
    .context(name.to_string())
}

fn literal_operand(attr: &str, vars: &Vars, name: &str) -> Result<Decimal, RunError> {
    resolve_param::<DecimalParam>(&getters![var_expr(attr, vars), non_empty_string(attr)])
        .map(DecimalParam::decimal)
        .context(name.to_string())
}

fn precision(attr: &str, vars: &Vars) -> Result<Option<u64>, RunError> {
    resolve_param::<MaybeUint64Param>(&getters![var_expr(attr, vars), attr])
        .map(|MaybeUint64Param(p)| p)
        .context("precision")
}

/// `input * times`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MultiplyTask {
    /// Multiplicand; defaults to the first input.
    pub input: String,
    /// Multiplier.
    pub times: String,
    /// Decimal places to round to.
    pub precision: String,
}

impl MultiplyTask {
    fn multiply(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let value = operand(&self.input, vars, inputs, "input")?;
        let times = literal_operand(&self.times, vars, "times")?;
        let precision = precision(&self.precision, vars)?;
        let product = value
            .checked_mul(times)
            .ok_or_else(|| RunError::BadInput(format!("{value} * {times} overflows")))?;
        Ok(Value::Decimal(round(product, precision)))
    }
}

#[async_trait]
impl Runnable for MultiplyTask {
    fn task_type(&self) -> TaskType {
        TaskType::Multiply
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.multiply(vars, inputs).into(), RunInfo::default())
    }
}

/// `input / divisor`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct DivideTask {
    /// Dividend; defaults to the first input.
    pub input: String,
    /// Divisor.
    pub divisor: String,
    /// Decimal places to round to.
    pub precision: String,
}

impl DivideTask {
    fn divide(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let value = operand(&self.input, vars, inputs, "input")?;
        let divisor = literal_operand(&self.divisor, vars, "divisor")?;
        let precision = precision(&self.precision, vars)?;
        if divisor.is_zero() {
            return Err(RunError::DivisionByZero);
        }
        let quotient = value
            .checked_div(divisor)
            .ok_or_else(|| RunError::BadInput(format!("{value} / {divisor} overflows")))?;
        Ok(Value::Decimal(round(quotient, precision)))
    }
}

#[async_trait]
impl Runnable for DivideTask {
    fn task_type(&self) -> TaskType {
        TaskType::Divide
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.divide(vars, inputs).into(), RunInfo::default())
    }
}

/// `left < right`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct LessThanTask {
    /// Left operand; defaults to the first input.
    pub left: String,
    /// Right operand.
    pub right: String,
}

#[async_trait]
impl Runnable for LessThanTask {
    fn task_type(&self) -> TaskType {
        TaskType::LessThan
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = operand(&self.left, vars, inputs, "left").and_then(|left| {
            literal_operand(&self.right, vars, "right").map(|right| Value::Bool(left < right))
        });
        (result.into(), RunInfo::default())
    }
}
