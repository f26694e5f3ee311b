use crate::cache::MemoryStorage;
use crate::error::Result;
use crate::file::FileStorage;
use crate::Storage;
use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// When the cache contents reach the snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Every write rewrites the file before it returns.
    Synchronous,
    /// Writes only touch the cache; [`MirroredStorage::run_flusher`] writes
    /// the file on this period.
    Interval(Duration),
}

impl FlushPolicy {
    /// Zero seconds means synchronous.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Synchronous
        } else {
            Self::Interval(Duration::from_secs(secs))
        }
    }
}

/// Cache backend mirrored to a JSON snapshot file.
///
/// In synchronous mode a write checkpoints the cache, merges, then persists
/// the full cache. A failed persist rolls the cache back to the checkpoint,
/// so the cache never holds data the file rejected.
pub struct MirroredStorage {
    cache: MemoryStorage,
    file: FileStorage,
    writes: Mutex<()>,
    policy: FlushPolicy,
}

impl MirroredStorage {
    pub fn new(file: FileStorage, policy: FlushPolicy) -> Self {
        Self {
            cache: MemoryStorage::new(),
            file,
            writes: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Loads the snapshot file into the cache. Returns the number of records
    /// read.
    pub async fn restore(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let metrics = self.file.load().await?;
        let count = metrics.len();
        self.cache.load(metrics);
        tracing::info!(count, path = %self.file.path().display(), "Restored metrics from file");
        Ok(count)
    }

    /// Writes the current cache contents to the file.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.file.persist(&self.cache.all()).await
    }

    /// Flushes on the configured interval until `shutdown` fires, then
    /// flushes one last time. Returns immediately in synchronous mode.
    pub async fn run_flusher(self: Arc<Self>, shutdown: CancellationToken) {
        let FlushPolicy::Interval(period) = self.policy else {
            return;
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        tracing::error!(error = %e, "Periodic flush failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        match self.flush().await {
            Ok(()) => tracing::info!(path = %self.file.path().display(), "Final flush complete"),
            Err(e) => tracing::error!(error = %e, "Final flush failed"),
        }
    }

    async fn write<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&MemoryStorage) -> Result<T>,
    {
        if self.policy != FlushPolicy::Synchronous {
            return mutate(&self.cache);
        }
        let _guard = self.writes.lock().await;
        let checkpoint = self.cache.checkpoint();
        let outcome = match mutate(&self.cache) {
            Ok(value) => self.file.persist(&self.cache.all()).await.map(|()| value),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.cache.rollback(checkpoint);
        }
        outcome
    }
}

#[async_trait]
impl Storage for MirroredStorage {
    async fn save(&self, metric: Metric) -> Result<Metric> {
        self.write(|cache| cache.apply(metric)).await
    }

    async fn save_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        self.write(|cache| cache.apply_all(metrics)).await
    }

    async fn get(&self, key: &MetricKey) -> Result<Option<Metric>> {
        Ok(self.cache.lookup(key))
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.cache.all())
    }
}
