//! End-to-end tests: graph text in, run outcome out.

use crate::config::{ReaderManagerConfig, RunnerConfig};
use crate::errors::{PipelineError, ReaderError, RunError};
use crate::graph::Pipeline;
use crate::resources::{ReaderKey, ReaderManager, ReaderSpec};
use crate::runner::{Runner, TaskRunResult};
use crate::tasks::{RunInfo, TaskResult};
use crate::testing::{MockRelayer, MockRelayerGetter, ScriptedExecutor};
use crate::utils::now;
use crate::vars::{Value, Vars};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pipeline(text: &str) -> Arc<Pipeline> {
    Arc::new(Pipeline::parse(text).unwrap())
}

fn decimal(n: i64) -> Value {
    Value::Decimal(Decimal::from(n))
}

#[tokio::test]
async fn test_values_flow_along_edges() {
    let p = pipeline(
        r#"
        a [type=memo value="5"];
        b [type=multiply times=3];
        a -> b;
        "#,
    );
    let outcome = Runner::default().run(p, Vars::new()).await;

    assert!(!outcome.is_pending);
    assert!(!outcome.has_errors());
    assert_eq!(outcome.task_results.len(), 2);
    let final_result = outcome.final_result.unwrap();
    assert_eq!(final_result.singular_result().unwrap(), decimal(15));
    assert_eq!(outcome.vars.get("b").unwrap(), decimal(15));
}

#[tokio::test]
async fn test_variable_reference_implies_order() {
    let p = pipeline(
        r#"
        b [type=multiply input="$(a)" times=4];
        a [type=memo value="2"];
        "#,
    );
    assert_eq!(p.task_by_dot_id("a").unwrap().id(), 0);

    let outcome = Runner::default().run(p, Vars::new()).await;
    assert_eq!(outcome.vars.get("b").unwrap(), decimal(8));
}

#[tokio::test]
async fn test_input_is_readable_by_keypath() {
    let p = pipeline(r#"scale [type=multiply input="$(input.price)" times=100]"#);
    let mut input = BTreeMap::new();
    input.insert("price".to_string(), Value::Decimal(Decimal::new(125, 2)));

    let outcome = Runner::default().run(p, Vars::with_input(input)).await;
    assert_eq!(
        outcome.final_result.unwrap().singular_result().unwrap(),
        decimal(125)
    );
}

#[tokio::test]
async fn test_median_of_parallel_sources() {
    let p = pipeline(
        r#"
        s1 [type=memo value="3"];
        s2 [type=memo value="1"];
        s3 [type=memo value="2"];
        m  [type=median];
        s1 -> m; s2 -> m; s3 -> m;
        "#,
    );
    let runner = Runner::new(RunnerConfig::new().with_max_concurrent_tasks(1));
    let outcome = runner.run(p, Vars::new()).await;

    assert_eq!(
        outcome.final_result.unwrap().singular_result().unwrap(),
        decimal(2)
    );
}

#[tokio::test]
async fn test_errors_are_recorded_not_raised() {
    let p = pipeline(
        r#"
        a [type=memo value="1"];
        d [type=divide divisor=0];
        a -> d;
        "#,
    );
    let outcome = Runner::default().run(p, Vars::new()).await;

    let d = outcome.task_result("d").unwrap();
    assert_eq!(d.result.error(), Some(&RunError::DivisionByZero));
    assert_eq!(d.attempts, 1);
    assert_eq!(
        outcome.vars.get("d").unwrap(),
        Value::Error(RunError::DivisionByZero)
    );
    let final_result = outcome.final_result.unwrap();
    assert!(final_result.has_errors());
    assert_eq!(final_result.singular_result(), Err(RunError::DivisionByZero));
}

#[tokio::test]
async fn test_fail_early_cancels_downstream() {
    let p = pipeline(
        r#"
        a [type=median failEarly=true];
        b [type=memo value="1"];
        a -> b;
        "#,
    );
    let outcome = Runner::default().run(p, Vars::new()).await;

    let a = outcome.task_result("a").unwrap();
    assert!(a.result.is_err());
    assert!(!a.is_cancelled());
    assert_eq!(a.attempts, 1);

    let b = outcome.task_result("b").unwrap();
    assert!(b.is_cancelled());
    assert_eq!(b.attempts, 0);
}

#[tokio::test]
async fn test_fail_early_cancels_unrelated_retry_backoff() {
    let p = pipeline(
        r#"
        a [type=fail msg="boom" failEarly=true];
        c [type=memo value="1" retries=5 minBackoff="10s" maxBackoff="10s"];
        "#,
    );
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delay("a", Duration::from_millis(20))
            .with_retryable_error("c", "flaky"),
    );
    let started = Instant::now();
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .run(p, Vars::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!outcome.task_result("a").unwrap().is_cancelled());
    let c = outcome.task_result("c").unwrap();
    assert!(c.is_cancelled());
    assert_eq!(c.attempts, 1);
    assert_eq!(executor.call_count("c"), 1);
}

#[tokio::test]
async fn test_fail_early_cancels_in_flight_sibling() {
    let p = pipeline(
        r#"
        a [type=fail msg="boom" failEarly=true];
        c [type=memo value="1"];
        "#,
    );
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delay("a", Duration::from_millis(20))
            .with_delay("c", Duration::from_secs(10)),
    );
    let started = Instant::now();
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .run(p, Vars::new())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    let c = outcome.task_result("c").unwrap();
    assert!(c.is_cancelled());
    assert_eq!(c.attempts, 0);
    assert_eq!(executor.call_count("c"), 1);
}

#[tokio::test]
async fn test_retryable_errors_are_retried() {
    let p = pipeline(
        r#"
        a [type=memo value="5" retries=3 minBackoff="1us" maxBackoff="1us"];
        b [type=multiply times=2];
        a -> b;
        "#,
    );
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_retryable_error("a", "flaky")
            .with_retryable_error("a", "flaky"),
    );
    let runner = Runner::default().with_executor(executor.clone());
    let outcome = runner.run(p, Vars::new()).await;

    let a = outcome.task_result("a").unwrap();
    assert!(!a.result.is_err());
    assert_eq!(a.attempts, 2);
    assert_eq!(executor.call_count("a"), 3);
    assert_eq!(executor.call_count("b"), 1);
    assert_eq!(outcome.vars.get("b").unwrap(), decimal(10));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let p = pipeline(r#"a [type=memo value="5" retries=1 minBackoff="1us" maxBackoff="1us"]"#);
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_retryable_error("a", "one")
            .with_retryable_error("a", "two")
            .with_retryable_error("a", "three"),
    );
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .run(p, Vars::new())
        .await;

    let a = outcome.task_result("a").unwrap();
    assert_eq!(
        a.result.error(),
        Some(&RunError::TaskRunFailed("two".to_string()))
    );
    assert_eq!(a.attempts, 2);
    assert_eq!(executor.call_count("a"), 2);
}

#[tokio::test]
async fn test_empty_pipeline_finishes_immediately() {
    let outcome = Runner::default().run(pipeline(""), Vars::new()).await;
    assert!(outcome.task_results.is_empty());
    assert!(!outcome.is_pending);
    assert_eq!(outcome.final_result.unwrap().values, Vec::<Value>::new());
}

#[test]
fn test_invalid_graphs_are_rejected() {
    assert!(matches!(
        Pipeline::parse("input [type=sum]"),
        Err(PipelineError::ReservedName(_))
    ));
    assert!(matches!(
        Pipeline::parse("a [type=sum]; b [type=sum]; a -> b; b -> a"),
        Err(PipelineError::CycleDetected(_))
    ));
    assert!(matches!(
        Pipeline::parse("a [type=teleport]"),
        Err(PipelineError::UnknownTaskType { .. })
    ));
}

#[test]
fn test_pipeline_source_round_trips() {
    let text = "a [type=memo value=\"1\"];\nb [type=sum];\na -> b;\n";
    let p = Pipeline::parse(text).unwrap();
    assert_eq!(p.to_string(), text);

    let json = serde_json::to_string(&p).unwrap();
    let back: Pipeline = serde_json::from_str(&json).unwrap();
    assert_eq!(back.source(), text);
    assert_eq!(back.len(), 2);
}

#[tokio::test]
async fn test_resume_skips_recorded_tasks() {
    let p = pipeline(
        r#"
        a [type=memo value="5"];
        b [type=multiply times=3];
        a -> b;
        "#,
    );
    let a = p.task_by_dot_id("a").unwrap();
    let prior = vec![TaskRunResult::finished(a, TaskResult::ok(decimal(7)), 0, now())];

    let executor = Arc::new(ScriptedExecutor::new());
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .resume(Arc::clone(&p), Vars::new(), prior)
        .await;

    assert_eq!(executor.calls(), vec!["b".to_string()]);
    assert_eq!(outcome.vars.get("b").unwrap(), decimal(21));
}

#[tokio::test]
async fn test_pending_task_defers_downstream_until_resumed() {
    let p = pipeline(
        r#"
        a [type=memo value="5"];
        b [type=multiply times=3];
        a -> b;
        "#,
    );
    let executor = Arc::new(ScriptedExecutor::new().with_outcome(
        "a",
        TaskResult::ok(Value::Null),
        RunInfo::pending(),
    ));
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .run(Arc::clone(&p), Vars::new())
        .await;

    assert!(outcome.is_pending);
    assert!(outcome.final_result.is_none());
    assert!(!outcome.task_result("a").unwrap().is_terminal());
    assert!(outcome.task_result("b").is_none());
    assert_eq!(executor.call_count("b"), 0);

    // The out-of-band completion arrives.
    let a = p.task_by_dot_id("a").unwrap();
    let prior = vec![TaskRunResult::finished(a, TaskResult::ok(decimal(2)), 0, now())];
    let resumed = Runner::default().resume(p, Vars::new(), prior).await;

    assert!(!resumed.is_pending);
    assert_eq!(
        resumed.final_result.unwrap().singular_result().unwrap(),
        decimal(6)
    );
}

#[tokio::test]
async fn test_slow_tasks_time_out() {
    let p = pipeline(
        r#"
        a [type=memo value="1" timeout="10ms" retries=1 minBackoff="1us" maxBackoff="1us"];
        b [type=memo value="2"];
        "#,
    );
    let executor = Arc::new(ScriptedExecutor::new().with_delay("a", Duration::from_millis(500)));
    let outcome = Runner::default()
        .with_executor(executor.clone())
        .run(p, Vars::new())
        .await;

    let a = outcome.task_result("a").unwrap();
    assert_eq!(a.result.error(), Some(&RunError::Timeout));
    assert_eq!(a.attempts, 2);
    assert_eq!(executor.call_count("a"), 2);
    assert!(!outcome.task_result("b").unwrap().result.is_err());
}

#[tokio::test]
async fn test_reader_cache_end_to_end() {
    let relayer = Arc::new(MockRelayer::new());
    let getter = MockRelayerGetter::new().with_relayer("evm", "1", Arc::clone(&relayer) as _);
    let manager = ReaderManager::new(
        Arc::new(getter),
        ReaderManagerConfig::default()
            .with_check_interval(Duration::from_millis(10))
            .with_eviction_timeout(Duration::from_millis(30)),
    );
    assert!(manager.start());

    let key = ReaderKey::new("evm", "1", "0xfeed", "latestAnswer").unwrap();
    let spec = ReaderSpec::new(key.clone(), "Aggregator", b"{}".to_vec());

    let first = manager.get_or_create(&spec).await.unwrap();
    let second = manager.get_or_create(&spec).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(relayer.readers_built(), 1);
    assert!(matches!(
        manager.create(&spec).await.err().unwrap(),
        ReaderError::AlreadyExists(_)
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(
        manager.get(&key).err().unwrap(),
        ReaderError::NotFound(_)
    ));
    assert!(relayer.last_reader().unwrap().is_closed());
    manager.close().await;
}
