//! Graph compilation.
//!
//! Graph text is parsed by [`dot`] into nodes and edges, checked for cycles,
//! numbered in a stable topological order and materialized as a [`Pipeline`]
//! of typed tasks.

pub mod dot;
mod pipeline;

pub use pipeline::Pipeline;
