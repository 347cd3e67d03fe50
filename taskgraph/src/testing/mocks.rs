//! Mock executors, relayers and readers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ReaderError;
use crate::resources::{
    BoundContract, Confidence, ContractReader, ReaderResult, RelayId, Relayer, RelayerGetter,
};
use crate::runner::{with_timeout, DefaultTaskExecutor, TaskExecutor};
use crate::tasks::{RunInfo, Task, TaskContext, TaskResult};
use crate::vars::{Value, Vars};

/// An executor that replays scripted outcomes per task and records calls.
///
/// A task with no scripted outcome left runs normally. Delays count against
/// the task's timeout.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<(TaskResult, RunInfo)>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    inner: DefaultTaskExecutor,
}

impl ScriptedExecutor {
    /// Creates an executor with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an outcome for the next execution of `dot_id`.
    #[must_use]
    pub fn with_outcome(self, dot_id: impl Into<String>, result: TaskResult, info: RunInfo) -> Self {
        self.scripts
            .lock()
            .entry(dot_id.into())
            .or_default()
            .push_back((result, info));
        self
    }

    /// Queues a retryable error for the next execution of `dot_id`.
    #[must_use]
    pub fn with_retryable_error(self, dot_id: impl Into<String>, message: &str) -> Self {
        self.with_outcome(
            dot_id,
            TaskResult::err(crate::errors::RunError::TaskRunFailed(message.to_string())),
            RunInfo::retryable(),
        )
    }

    /// Makes every execution of `dot_id` sleep first.
    #[must_use]
    pub fn with_delay(mut self, dot_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(dot_id.into(), delay);
        self
    }

    /// Number of executions of `dot_id`.
    #[must_use]
    pub fn call_count(&self, dot_id: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == dot_id).count()
    }

    /// Every execution in start order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        task: &Task,
        ctx: &TaskContext,
        vars: &Vars,
        inputs: &[TaskResult],
    ) -> (TaskResult, RunInfo) {
        self.calls.lock().push(task.dot_id().to_string());
        let scripted = self
            .scripts
            .lock()
            .get_mut(task.dot_id())
            .and_then(VecDeque::pop_front);
        let delay = self.delays.get(task.dot_id()).copied();

        let attempt = async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match scripted {
                Some(outcome) => outcome,
                None => task.run(ctx, vars, inputs).await,
            }
        };
        with_timeout(task, self.inner.timeout_for(task), attempt).await
    }
}

/// A contract reader that records its lifecycle.
#[derive(Debug, Default)]
pub struct MockReader {
    started: AtomicBool,
    closed: AtomicBool,
    fail_bind: bool,
    bindings: Mutex<Vec<BoundContract>>,
    values: Mutex<HashMap<String, Value>>,
}

impl MockReader {
    /// Creates a reader with no values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reader whose `bind` always fails.
    #[must_use]
    pub fn failing_bind() -> Self {
        Self {
            fail_bind: true,
            ..Self::default()
        }
    }

    /// Sets the value returned for `read_identifier`.
    pub fn set_value(&self, read_identifier: impl Into<String>, value: impl Into<Value>) {
        self.values.lock().insert(read_identifier.into(), value.into());
    }

    /// Returns true once started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Contracts the reader was bound to.
    #[must_use]
    pub fn bindings(&self) -> Vec<BoundContract> {
        self.bindings.lock().clone()
    }
}

#[async_trait]
impl ContractReader for MockReader {
    async fn start(&self) -> ReaderResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> ReaderResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn bind(&self, contracts: &[BoundContract]) -> ReaderResult<()> {
        if self.fail_bind {
            return Err(ReaderError::Reader("bind rejected".to_string()));
        }
        self.bindings.lock().extend_from_slice(contracts);
        Ok(())
    }

    async fn get_latest_value(
        &self,
        read_identifier: &str,
        _confidence: Confidence,
        _params: &Value,
    ) -> ReaderResult<Value> {
        self.values
            .lock()
            .get(read_identifier)
            .cloned()
            .ok_or_else(|| ReaderError::Reader(format!("no value for '{read_identifier}'")))
    }
}

/// A relayer that builds [`MockReader`]s and keeps them.
#[derive(Debug, Default)]
pub struct MockRelayer {
    built: AtomicUsize,
    readers: Mutex<Vec<Arc<MockReader>>>,
    build_delay: Option<Duration>,
    fail_bind: bool,
}

impl MockRelayer {
    /// Creates a relayer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every reader construction sleep first.
    #[must_use]
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Builds readers whose `bind` fails.
    #[must_use]
    pub fn with_failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    /// Number of readers built so far.
    #[must_use]
    pub fn readers_built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    /// The most recently built reader.
    #[must_use]
    pub fn last_reader(&self) -> Option<Arc<MockReader>> {
        self.readers.lock().last().cloned()
    }

    /// Every reader built, oldest first.
    #[must_use]
    pub fn readers(&self) -> Vec<Arc<MockReader>> {
        self.readers.lock().clone()
    }
}

#[async_trait]
impl Relayer for MockRelayer {
    async fn new_contract_reader(&self, _config: &[u8]) -> ReaderResult<Arc<dyn ContractReader>> {
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        self.built.fetch_add(1, Ordering::SeqCst);
        let reader = Arc::new(if self.fail_bind {
            MockReader::failing_bind()
        } else {
            MockReader::new()
        });
        self.readers.lock().push(Arc::clone(&reader));
        Ok(reader)
    }
}

/// A relayer registry backed by a map.
#[derive(Default)]
pub struct MockRelayerGetter {
    relayers: HashMap<RelayId, Arc<dyn Relayer>>,
}

impl MockRelayerGetter {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a relayer for a network and chain.
    #[must_use]
    pub fn with_relayer(
        mut self,
        network: impl Into<String>,
        chain_id: impl Into<String>,
        relayer: Arc<dyn Relayer>,
    ) -> Self {
        self.relayers.insert(RelayId::new(network, chain_id), relayer);
        self
    }
}

impl RelayerGetter for MockRelayerGetter {
    fn get(&self, relay_id: &RelayId) -> ReaderResult<Arc<dyn Relayer>> {
        self.relayers
            .get(relay_id)
            .cloned()
            .ok_or_else(|| ReaderError::RelayerNotFound {
                network: relay_id.network.clone(),
                chain_id: relay_id.chain_id.clone(),
            })
    }
}
