//! Testing utilities for taskgraph pipelines.
//!
//! This module provides:
//! - A scripted task executor for driving the runner
//! - Mock relayers and contract readers for the reader cache

mod mocks;

pub use mocks::{MockReader, MockRelayer, MockRelayerGetter, ScriptedExecutor};
