//! Metric storage for the pulsemon server.
//!
//! Every backend implements [`Storage`]. [`cache::MemoryStorage`] holds the
//! merge rules (counters accumulate, gauges overwrite),
//! [`file::FileStorage`] keeps a JSON snapshot on disk,
//! [`mirror::MirroredStorage`] pairs the two, and
//! [`database::DatabaseStorage`] upserts into PostgreSQL with classified
//! retries. [`backend::Backend::open`] picks one from configuration.

pub mod backend;
pub mod cache;
pub mod classify;
pub mod database;
pub mod entities;
pub mod error;
pub mod file;
pub mod mirror;


use async_trait::async_trait;
use error::Result;
use pulsemon_common::types::{Metric, MetricKey};

/// Persistence contract shared by every backend.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because the storage is accessed from concurrent HTTP handlers and, for
/// the file mirror, from the background flush task.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Saves one metric and returns the stored record after merging.
    async fn save(&self, metric: Metric) -> Result<Metric>;

    /// Saves metrics in input order. The first failure aborts the batch.
    async fn save_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>>;

    /// Looks up one metric by id and type.
    async fn get(&self, key: &MetricKey) -> Result<Option<Metric>>;

    /// Returns every stored metric ordered by id, then type.
    async fn get_all(&self) -> Result<Vec<Metric>>;
}
