//! The run loop.
//!
//! A single aggregation loop owns every piece of mutable run state: the
//! unmet-dependency counters, the canonical [`Vars`], attempt counts and
//! recorded results. Ready tasks are sent over a work queue to a worker pool
//! that executes them concurrently and reports back over a result queue.
//! Retry backoffs are timers polled by the same loop and raced against the
//! run's cancellation token.

use super::backoff::{should_retry, RetryDecision};
use super::executor::{DefaultTaskExecutor, TaskExecutor};
use super::result::{FinalResult, RunOutcome, TaskRunResult};
use crate::cancellation::CancellationToken;
use crate::config::RunnerConfig;
use crate::errors::RunError;
use crate::graph::Pipeline;
use crate::tasks::{RunInfo, TaskContext, TaskResult};
use crate::utils::{generate_id, now, Timestamp};
use crate::vars::Vars;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

/// Runs compiled pipelines.
#[derive(Clone)]
pub struct Runner {
    config: RunnerConfig,
    executor: Arc<dyn TaskExecutor>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl Runner {
    /// Creates a runner that executes tasks with [`DefaultTaskExecutor`].
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let executor = Arc::new(DefaultTaskExecutor::from_config(&config));
        Self { config, executor }
    }

    /// Replaces the worker-side executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// The runner's configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs every task of `pipeline` to a terminal state.
    ///
    /// `vars` seeds the variable table, typically via [`Vars::with_input`].
    /// Task failures never abort the run; they are recorded as results.
    pub async fn run(&self, pipeline: Arc<Pipeline>, vars: Vars) -> RunOutcome {
        self.resume(pipeline, vars, Vec::new()).await
    }

    /// Continues a run from previously recorded results.
    ///
    /// Terminal records in `prior` are taken as final: their values are written
    /// into the variables, their consumers are released and they are not
    /// executed again. Pending or unknown records are ignored.
    pub async fn resume(
        &self,
        pipeline: Arc<Pipeline>,
        vars: Vars,
        prior: Vec<TaskRunResult>,
    ) -> RunOutcome {
        let run_id = generate_id();
        let span = tracing::info_span!("pipeline_run", %run_id, tasks = pipeline.len());
        self.execute(run_id, pipeline, vars, prior)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        pipeline: Arc<Pipeline>,
        vars: Vars,
        prior: Vec<TaskRunResult>,
    ) -> RunOutcome {
        let cancel = Arc::new(CancellationToken::new());
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool {
            run_id,
            pipeline: Arc::clone(&pipeline),
            executor: Arc::clone(&self.executor),
            cancel: Arc::clone(&cancel),
            max_concurrent: self.config.max_concurrent_tasks.max(1),
        };
        let pool = tokio::spawn(pool.run(work_rx, result_tx).in_current_span());

        let mut scheduler = Scheduler::new(&pipeline, cancel, work_tx, vars);
        scheduler.seed(prior);
        scheduler.start();
        scheduler.drive(&mut result_rx).await;
        let outcome = scheduler.finish(run_id);

        if let Err(e) = pool.await {
            tracing::error!(error = %e, "worker pool terminated abnormally");
        }

        tracing::info!(
            pending = outcome.is_pending,
            errors = outcome.has_errors(),
            "pipeline run finished"
        );
        outcome
    }
}

/// One task attempt on its way to a worker.
struct Dispatch {
    task_id: usize,
    attempt: u32,
    vars: Vars,
    inputs: Vec<TaskResult>,
}

/// A worker's report; `None` means the attempt was cancelled.
struct Report {
    task_id: usize,
    outcome: Option<(TaskResult, RunInfo)>,
}

struct WorkerPool {
    run_id: Uuid,
    pipeline: Arc<Pipeline>,
    executor: Arc<dyn TaskExecutor>,
    cancel: Arc<CancellationToken>,
    max_concurrent: usize,
}

impl WorkerPool {
    async fn run(
        self,
        mut work_rx: mpsc::UnboundedReceiver<Dispatch>,
        result_tx: mpsc::UnboundedSender<Report>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        while let Some(dispatch) = work_rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            let executor = Arc::clone(&self.executor);
            let cancel = Arc::clone(&self.cancel);
            let result_tx = result_tx.clone();
            let run_id = self.run_id;

            tokio::spawn(
                async move {
                    let task_id = dispatch.task_id;
                    let outcome =
                        execute_attempt(&pipeline, executor.as_ref(), cancel, run_id, dispatch)
                            .await;
                    drop(permit);
                    if result_tx.send(Report { task_id, outcome }).is_err() {
                        tracing::debug!(task_id, "run finished before report was delivered");
                    }
                }
                .in_current_span(),
            );
        }
    }
}

async fn execute_attempt(
    pipeline: &Pipeline,
    executor: &dyn TaskExecutor,
    cancel: Arc<CancellationToken>,
    run_id: Uuid,
    dispatch: Dispatch,
) -> Option<(TaskResult, RunInfo)> {
    if cancel.is_cancelled() {
        return None;
    }
    let Some(task) = pipeline.task(dispatch.task_id) else {
        return Some((
            TaskResult::err(RunError::TaskRunFailed(format!(
                "unknown task id {}",
                dispatch.task_id
            ))),
            RunInfo::default(),
        ));
    };

    let ctx = TaskContext {
        run_id,
        attempt: dispatch.attempt,
        cancel: Arc::clone(&cancel),
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        outcome = executor.execute(task, &ctx, &dispatch.vars, &dispatch.inputs) => Some(outcome),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Retrying,
    Done,
    /// Behind a pending task; left for a later resume.
    Deferred,
}

struct Scheduler<'p> {
    pipeline: &'p Pipeline,
    cancel: Arc<CancellationToken>,
    work_tx: mpsc::UnboundedSender<Dispatch>,
    vars: Vars,
    unmet: Vec<usize>,
    states: Vec<NodeState>,
    attempts: Vec<u32>,
    created_at: Vec<Option<Timestamp>>,
    records: Vec<Option<TaskRunResult>>,
    outstanding: usize,
    in_flight: usize,
    pending: bool,
    timers: FuturesUnordered<BoxFuture<'static, (usize, bool)>>,
}

impl<'p> Scheduler<'p> {
    fn new(
        pipeline: &'p Pipeline,
        cancel: Arc<CancellationToken>,
        work_tx: mpsc::UnboundedSender<Dispatch>,
        vars: Vars,
    ) -> Self {
        let n = pipeline.len();
        Self {
            pipeline,
            cancel,
            work_tx,
            vars,
            unmet: pipeline.tasks().iter().map(|t| t.inputs().len()).collect(),
            states: vec![NodeState::Waiting; n],
            attempts: vec![0; n],
            created_at: vec![None; n],
            records: vec![None; n],
            outstanding: n,
            in_flight: 0,
            pending: false,
            timers: FuturesUnordered::new(),
        }
    }

    fn seed(&mut self, prior: Vec<TaskRunResult>) {
        for record in prior {
            let id = record.task_id;
            let matches = self
                .pipeline
                .task(id)
                .is_some_and(|t| t.dot_id() == record.dot_id);
            if !record.is_terminal() || !matches || self.states[id] != NodeState::Waiting {
                continue;
            }

            self.states[id] = NodeState::Done;
            self.outstanding -= 1;
            self.attempts[id] = record.attempts;
            self.created_at[id] = Some(record.created_at);
            self.write_var(id, &record.result);
            for &out in self.pipeline.tasks()[id].outputs() {
                self.unmet[out] = self.unmet[out].saturating_sub(1);
            }
            self.records[id] = Some(record);
        }
    }

    fn start(&mut self) {
        for id in 0..self.pipeline.len() {
            if self.states[id] == NodeState::Waiting && self.unmet[id] == 0 {
                self.ready(id);
            }
        }
    }

    async fn drive(&mut self, result_rx: &mut mpsc::UnboundedReceiver<Report>) {
        while self.outstanding > 0 {
            if self.in_flight == 0 && self.timers.is_empty() {
                let stuck: Vec<&str> = self
                    .pipeline
                    .tasks()
                    .iter()
                    .filter(|t| self.states[t.id()] == NodeState::Waiting)
                    .map(|t| t.dot_id())
                    .collect();
                tracing::error!(?stuck, "scheduler stalled with outstanding tasks");
                return;
            }

            tokio::select! {
                Some(report) = result_rx.recv() => self.on_report(report),
                Some((id, elapsed)) = self.timers.next(), if !self.timers.is_empty() => {
                    self.on_timer(id, elapsed);
                }
                else => return,
            }
        }
    }

    fn ready(&mut self, id: usize) {
        if self.cancel.is_cancelled() {
            self.finalize(id, TaskResult::err(RunError::Cancelled));
        } else {
            self.dispatch(id);
        }
    }

    fn dispatch(&mut self, id: usize) {
        let task = &self.pipeline.tasks()[id];

        let mut producers: Vec<usize> = task
            .inputs()
            .iter()
            .filter(|dep| dep.propagate_result)
            .map(|dep| dep.input_task)
            .collect();
        producers.sort_by_key(|&p| (self.pipeline.tasks()[p].base().index, p));
        let inputs = producers
            .into_iter()
            .map(|p| {
                self.records[p].as_ref().map_or_else(
                    || TaskResult::err(RunError::TaskRunFailed("missing input".to_string())),
                    |r| r.result.clone(),
                )
            })
            .collect();

        let attempt = self.attempts[id] + 1;
        tracing::debug!(task = task.dot_id(), attempt, "dispatching task");

        let dispatch = Dispatch {
            task_id: id,
            attempt,
            vars: self.vars.copy(),
            inputs,
        };
        self.states[id] = NodeState::Running;
        self.created_at[id].get_or_insert_with(now);
        self.in_flight += 1;

        if self.work_tx.send(dispatch).is_err() {
            self.in_flight -= 1;
            self.finalize(
                id,
                TaskResult::err(RunError::TaskRunFailed("worker pool stopped".to_string())),
            );
        }
    }

    fn on_report(&mut self, report: Report) {
        self.in_flight -= 1;
        let id = report.task_id;
        if self.states.get(id) != Some(&NodeState::Running) {
            return;
        }

        let Some((result, info)) = report.outcome else {
            self.finalize(id, TaskResult::err(RunError::Cancelled));
            return;
        };
        let task = &self.pipeline.tasks()[id];

        if info.is_pending {
            tracing::info!(task = task.dot_id(), "task is pending");
            self.pending = true;
            self.defer(id, result);
            return;
        }
        if !result.is_err() {
            self.finalize(id, result);
            return;
        }

        self.attempts[id] += 1;
        match should_retry(task.base(), self.attempts[id], &info) {
            RetryDecision::Retry(_) if self.cancel.is_cancelled() => {
                self.finalize(id, TaskResult::err(RunError::Cancelled));
            }
            RetryDecision::Retry(delay) => {
                tracing::warn!(
                    task = task.dot_id(),
                    attempts = self.attempts[id],
                    delay_us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
                    error = ?result.error(),
                    "retrying task after error"
                );
                self.states[id] = NodeState::Retrying;
                let cancel = Arc::clone(&self.cancel);
                self.timers.push(Box::pin(async move {
                    tokio::select! {
                        () = cancel.cancelled() => (id, false),
                        () = tokio::time::sleep(delay) => (id, true),
                    }
                }));
            }
            RetryDecision::GiveUp | RetryDecision::NotRetryable if task.base().fail_early => {
                tracing::warn!(
                    task = task.dot_id(),
                    error = ?result.error(),
                    "fail-early task failed, cancelling run"
                );
                self.cancel
                    .cancel(format!("fail-early task '{}' failed", task.dot_id()));
                self.finalize(id, result);
                self.cancel_descendants(id);
            }
            RetryDecision::GiveUp | RetryDecision::NotRetryable => self.finalize(id, result),
        }
    }

    fn on_timer(&mut self, id: usize, elapsed: bool) {
        if self.states[id] != NodeState::Retrying {
            return;
        }
        if elapsed && !self.cancel.is_cancelled() {
            self.dispatch(id);
        } else {
            tracing::debug!(task = self.pipeline.tasks()[id].dot_id(), "retry cancelled");
            self.finalize(id, TaskResult::err(RunError::Cancelled));
        }
    }

    /// Records a terminal result and releases the task's consumers.
    fn finalize(&mut self, id: usize, result: TaskResult) {
        if matches!(self.states[id], NodeState::Done | NodeState::Deferred) {
            return;
        }
        let task = &self.pipeline.tasks()[id];
        self.states[id] = NodeState::Done;
        self.outstanding -= 1;

        self.write_var(id, &result);
        let created_at = self.created_at[id].unwrap_or_else(now);
        self.records[id] = Some(TaskRunResult::finished(
            task,
            result,
            self.attempts[id],
            created_at,
        ));

        for &out in task.outputs() {
            self.unmet[out] = self.unmet[out].saturating_sub(1);
            if self.unmet[out] == 0 && self.states[out] == NodeState::Waiting {
                self.ready(out);
            }
        }
    }

    fn cancel_descendants(&mut self, id: usize) {
        for desc in self.descendants(id) {
            if self.states[desc] == NodeState::Waiting {
                self.finalize(desc, TaskResult::err(RunError::Cancelled));
            }
        }
    }

    /// Records a pending result; the task and everything downstream of it is
    /// left for a later resume.
    fn defer(&mut self, id: usize, result: TaskResult) {
        let task = &self.pipeline.tasks()[id];
        let created_at = self.created_at[id].unwrap_or_else(now);
        self.records[id] = Some(TaskRunResult::pending(
            task,
            result,
            self.attempts[id],
            created_at,
        ));
        self.states[id] = NodeState::Deferred;
        self.outstanding -= 1;

        for desc in self.descendants(id) {
            if self.states[desc] == NodeState::Waiting {
                self.states[desc] = NodeState::Deferred;
                self.outstanding -= 1;
            }
        }
    }

    fn descendants(&self, id: usize) -> Vec<usize> {
        let mut seen = vec![false; self.pipeline.len()];
        let mut queue: VecDeque<usize> = self.pipeline.tasks()[id].outputs().iter().copied().collect();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            out.push(next);
            queue.extend(self.pipeline.tasks()[next].outputs().iter().copied());
        }
        out
    }

    fn write_var(&mut self, id: usize, result: &TaskResult) {
        let dot_id = self.pipeline.tasks()[id].dot_id();
        if let Err(e) = self.vars.set(dot_id, result.clone().into_value()) {
            tracing::warn!(task = dot_id, error = %e, "could not record task output");
        }
    }

    fn finish(self, run_id: Uuid) -> RunOutcome {
        let final_result = (!self.pending).then(|| {
            let mut terminal: Vec<_> = self.pipeline.terminal_tasks().collect();
            terminal.sort_by_key(|t| (t.base().index, t.id()));
            FinalResult::from_results(
                terminal
                    .into_iter()
                    .filter_map(|t| self.records[t.id()].as_ref().map(|r| &r.result)),
            )
        });

        RunOutcome {
            run_id,
            task_results: self.records.into_iter().flatten().collect(),
            vars: self.vars,
            is_pending: self.pending,
            final_result,
        }
    }
}
