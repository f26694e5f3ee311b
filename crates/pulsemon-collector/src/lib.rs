//! Metric collection framework for the pulsemon agent.
//!
//! Each [`Collector`] implementation gathers one category of readings
//! (allocator and process statistics, host CPU and memory, a random gauge)
//! and returns them as [`Metric`]s ready to be placed in the agent snapshot.
//! [`catalog`] lists the names the baseline collectors always produce.

pub mod alloc;
pub mod catalog;
pub mod host;
pub mod random;
pub mod runtime;

use anyhow::Result;
use pulsemon_common::types::Metric;

/// A metric source polled by the agent.
///
/// Implementations are registered with the agent scheduler and called at
/// each poll interval. The trait requires `Send + Sync` so the collector set
/// can live inside the scheduler's spawned poll task.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"runtime"`, `"host"`), used for logging.
    fn name(&self) -> &str;

    /// Samples current readings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
