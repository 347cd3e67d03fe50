//! Pipeline execution.
//!
//! [`Runner`] walks a compiled [`Pipeline`](crate::graph::Pipeline): tasks
//! whose producers have all finished are dispatched to a bounded worker pool,
//! failed attempts are retried with [`Backoff`], and a failing `failEarly`
//! task cancels the rest of the run. The outcome is a [`RunOutcome`] holding
//! one [`TaskRunResult`] per task.

mod backoff;
mod executor;
mod result;
mod scheduler;

pub use backoff::{should_retry, Backoff, JitterStrategy, RetryDecision};
pub(crate) use executor::with_timeout;
pub use executor::{DefaultTaskExecutor, TaskExecutor};
pub use result::{FinalResult, RunOutcome, TaskRunResult};
pub use scheduler::Runner;
