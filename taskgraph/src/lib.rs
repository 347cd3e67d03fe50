//! # Taskgraph
//!
//! A task-graph runtime for oracle observation pipelines.
//!
//! A pipeline is written as a directed graph whose nodes are typed tasks
//! (`median`, `multiply`, `jsonparse`, ...) and whose attributes may refer to
//! the outputs of other tasks through `$(name.path)` expressions. Taskgraph
//! provides:
//!
//! - **Graph compilation**: parsing, cycle detection and a stable topological
//!   numbering of tasks
//! - **Typed parameters**: ordered getters with permissive coercion
//! - **Concurrent execution**: bounded worker pool, retries with backoff,
//!   per-task timeouts and fail-early cancellation
//! - **Reader caching**: shared contract readers with idle eviction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskgraph::prelude::*;
//!
//! let pipeline = Arc::new(Pipeline::parse(r#"
//!     parse    [type=jsonparse data="$(input)" path="price"];
//!     multiply [type=multiply times=100];
//!     parse -> multiply;
//! "#)?);
//!
//! let outcome = Runner::default()
//!     .run(pipeline, Vars::with_input(r#"{"price": "1.25"}"#))
//!     .await;
//! let value = outcome.final_result.unwrap().singular_result()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod graph;
pub mod observability;
pub mod params;
pub mod resources;
pub mod runner;
pub mod tasks;
pub mod testing;
pub mod utils;
pub mod vars;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{Config, LoggingConfig, ReaderManagerConfig, RunnerConfig};
    pub use crate::errors::{
        CycleDetectedError, PipelineError, PipelineResult, ReaderError, RunError,
    };
    pub use crate::graph::Pipeline;
    pub use crate::observability::init_tracing;
    pub use crate::resources::{
        BoundContract, Confidence, ContractReader, ReaderKey, ReaderManager, ReaderSpec,
        RelayId, Relayer, RelayerGetter,
    };
    pub use crate::runner::{FinalResult, RunOutcome, Runner, TaskExecutor, TaskRunResult};
    pub use crate::tasks::{RunInfo, Task, TaskContext, TaskResult, TaskType};
    pub use crate::vars::{Keypath, Value, Vars};
    pub use std::sync::Arc;
}

#[cfg(test)]
mod integration_tests;
