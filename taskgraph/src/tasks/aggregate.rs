//! Aggregation over upstream results: median, mean, sum and any.

use super::{RunInfo, Runnable, TaskContext, TaskResult, TaskType};
use crate::errors::{RunError, RunErrorContext};
use crate::getters;
use crate::params::{
    inputs as all_inputs, json_with_var_exprs, resolve_param, var_expr, DecimalSliceParam,
    MaybeUint64Param, PipelineParam, SliceParam,
};
use crate::vars::{Value, Vars};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Resolves `values` (a variable, a JSON list, or all inputs), drops errored
/// entries and checks the fault budget.
fn fault_tolerant_decimals(
    values: &str,
    allowed_faults: &str,
    vars: &Vars,
    inputs: &[TaskResult],
) -> Result<Vec<Decimal>, RunError> {
    let MaybeUint64Param(allowed) =
        resolve_param(&getters![allowed_faults]).context("allowedFaults")?;
    let with_errors: SliceParam = resolve_param(&getters![
        var_expr(values, vars),
        json_with_var_exprs(values, vars, true),
        all_inputs(inputs),
    ])
    .context("values")?;

    let total = with_errors.len();
    let (ok_values, faults) = with_errors.filter_errors();
    let allowed = allowed.map_or_else(
        || total.saturating_sub(1),
        |a| usize::try_from(a).unwrap_or(usize::MAX),
    );
    if faults > allowed {
        return Err(RunError::TooManyErrors(format!(
            "{faults} faulty inputs exceed the {allowed} allowed"
        )));
    }
    if ok_values.is_empty() {
        return Err(RunError::WrongInputCardinality("no values to aggregate".to_string()));
    }

    let DecimalSliceParam(decimals) =
        DecimalSliceParam::unmarshal_param(Value::List(ok_values.0)).context("values")?;
    Ok(decimals)
}

/// Median of the decimal inputs; even counts average the middle pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MedianTask {
    /// Variable expression or JSON list; defaults to all inputs.
    pub values: String,
    /// Tolerated number of errored inputs; defaults to all but one.
    pub allowed_faults: String,
}

impl MedianTask {
    fn median(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let mut decimals = fault_tolerant_decimals(&self.values, &self.allowed_faults, vars, inputs)?;
        decimals.sort();
        let k = decimals.len() / 2;
        if decimals.len() % 2 == 1 {
            return Ok(Value::Decimal(decimals[k]));
        }
        let sum = decimals[k - 1]
            .checked_add(decimals[k])
            .ok_or_else(|| RunError::BadInput("median overflows".to_string()))?;
        Ok(Value::Decimal(sum / Decimal::TWO))
    }
}

#[async_trait]
impl Runnable for MedianTask {
    fn task_type(&self) -> TaskType {
        TaskType::Median
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.median(vars, inputs).into(), RunInfo::default())
    }
}

/// Arithmetic mean of the decimal inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MeanTask {
    /// Variable expression or JSON list; defaults to all inputs.
    pub values: String,
    /// Tolerated number of errored inputs; defaults to all but one.
    pub allowed_faults: String,
    /// Decimal places to round the mean to.
    pub precision: String,
}

impl MeanTask {
    fn mean(&self, vars: &Vars, inputs: &[TaskResult]) -> Result<Value, RunError> {
        let MaybeUint64Param(precision) =
            resolve_param(&getters![var_expr(&self.precision, vars), self.precision.as_str()])
                .context("precision")?;
        let decimals = fault_tolerant_decimals(&self.values, &self.allowed_faults, vars, inputs)?;

        let sum = checked_sum(&decimals)?;
        let count = Decimal::from(decimals.len());
        let mean = sum
            .checked_div(count)
            .ok_or_else(|| RunError::BadInput("mean overflows".to_string()))?;
        Ok(Value::Decimal(round(mean, precision)))
    }
}

#[async_trait]
impl Runnable for MeanTask {
    fn task_type(&self) -> TaskType {
        TaskType::Mean
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        (self.mean(vars, inputs).into(), RunInfo::default())
    }
}

/// Sum of the decimal inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SumTask {
    /// Variable expression or JSON list; defaults to all inputs.
    pub values: String,
    /// Tolerated number of errored inputs; defaults to all but one.
    pub allowed_faults: String,
}

#[async_trait]
impl Runnable for SumTask {
    fn task_type(&self) -> TaskType {
        TaskType::Sum
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let result = fault_tolerant_decimals(&self.values, &self.allowed_faults, vars, inputs)
            .and_then(|d| checked_sum(&d))
            .map(Value::Decimal);
        (result.into(), RunInfo::default())
    }
}

/// Picks one successful input at random.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnyTask {}

#[async_trait]
impl Runnable for AnyTask {
    fn task_type(&self) -> TaskType {
        TaskType::Any
    }

    async fn run(
        &self,
        _ctx: &TaskContext,
        _vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        let candidates: Vec<&Value> = inputs.iter().filter_map(TaskResult::value).collect();
        let result = match candidates.choose(&mut rand::thread_rng()) {
            Some(v) => TaskResult::ok((*v).clone()),
            None => TaskResult::err(RunError::WrongInputCardinality(
                "no successful inputs to choose from".to_string(),
            )),
        };
        (result, RunInfo::default())
    }
}

fn checked_sum(decimals: &[Decimal]) -> Result<Decimal, RunError> {
    decimals
        .iter()
        .try_fold(Decimal::ZERO, |acc, d| acc.checked_add(*d))
        .ok_or_else(|| RunError::BadInput("sum overflows".to_string()))
}

pub(super) fn round(d: Decimal, precision: Option<u64>) -> Decimal {
    match precision {
        Some(p) => d.round_dp(u32::try_from(p).unwrap_or(u32::MAX)),
        None => d.normalize(),
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

    fn decimal_inputs(values: &[i64]) -> Vec<TaskResult> {
        values.iter().map(|v| TaskResult::ok(Value::Decimal(Decimal::from(*v)))).collect()
    }

    #[tokio::test]
    async fn test_median_odd_and_even() {
        let task = MedianTask::default();
        let (result, _) = task.run(&ctx(), &Vars::new(), &decimal_inputs(&[3, 1, 2])).await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::from(2))));

        let (result, _) = task.run(&ctx(), &Vars::new(), &decimal_inputs(&[4, 1, 2, 3])).await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::new(25, 1))));
    }

    #[tokio::test]
    async fn test_median_tolerates_faults_by_default() {
        let mut inputs = decimal_inputs(&[5, 7]);
        inputs.push(TaskResult::err(RunError::Timeout));
        let (result, _) = MedianTask::default().run(&ctx(), &Vars::new(), &inputs).await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::from(6))));
    }

    #[tokio::test]
    async fn test_too_many_faults() {
        let task = MedianTask {
            allowed_faults: "0".to_string(),
            ..MedianTask::default()
        };
        let inputs = vec![TaskResult::ok(1i64), TaskResult::err(RunError::Timeout)];
        let (result, _) = task.run(&ctx(), &Vars::new(), &inputs).await;
        assert!(matches!(result.error().map(RunError::root), Some(RunError::TooManyErrors(_))));
    }

    #[tokio::test]
    async fn test_median_of_nothing() {
        let (result, _) = MedianTask::default().run(&ctx(), &Vars::new(), &[]).await;
        assert!(matches!(
            result.error().map(RunError::root),
            Some(RunError::WrongInputCardinality(_))
        ));
    }

    #[tokio::test]
    async fn test_values_from_variables() {
        let mut vars = Vars::new();
        vars.set("a", 10i64).unwrap();
        vars.set("b", "20").unwrap();
        let task = MeanTask {
            values: "[$(a), $(b), 30]".to_string(),
            precision: "2".to_string(),
            ..MeanTask::default()
        };
        let (result, _) = task.run(&ctx(), &vars, &[]).await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::from(20))));
    }

    #[tokio::test]
    async fn test_mean_rounds_to_precision() {
        let task = MeanTask {
            precision: "2".to_string(),
            ..MeanTask::default()
        };
        let (result, _) = task.run(&ctx(), &Vars::new(), &decimal_inputs(&[1, 1, 2])).await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::new(133, 2))));
    }

    #[tokio::test]
    async fn test_sum() {
        let (result, _) = SumTask::default()
            .run(&ctx(), &Vars::new(), &decimal_inputs(&[1, 2, 3]))
            .await;
        assert_eq!(result.value(), Some(&Value::Decimal(Decimal::from(6))));
    }

    #[tokio::test]
    async fn test_any_skips_errors() {
        let inputs = vec![TaskResult::err(RunError::Timeout), TaskResult::ok("only")];
        let (result, _) = AnyTask::default().run(&ctx(), &Vars::new(), &inputs).await;
        assert_eq!(result.value(), Some(&Value::from("only")));

        let (result, _) = AnyTask::default()
            .run(&ctx(), &Vars::new(), &[TaskResult::err(RunError::Timeout)])
            .await;
        assert!(result.is_err());
    }
}
