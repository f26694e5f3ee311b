use crate::error::{Result, StorageError};
use crate::Storage;
use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKey, MetricValue};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// A copy of the cache table, used to undo a write.
pub type Checkpoint = HashMap<MetricKey, Metric>;

/// Applies an incoming metric to the stored one.
///
/// Counters accumulate, gauges take the incoming value. Records are keyed by
/// id and type, so `current` always has the same kind as `incoming`.
///
/// # Errors
///
/// Returns [`StorageError::CounterOverflow`] when the sum leaves the `i64`
/// range.
pub fn merge(current: Option<&Metric>, incoming: Metric) -> Result<Metric> {
    match (current.map(|m| m.value), incoming.value) {
        (Some(MetricValue::Counter(stored)), MetricValue::Counter(delta)) => {
            let sum = stored
                .checked_add(delta)
                .ok_or_else(|| StorageError::CounterOverflow {
                    id: incoming.id.clone(),
                })?;
            Ok(Metric::counter(incoming.id, sum))
        }
        _ => Ok(incoming),
    }
}

/// In-memory backend and the merge engine behind every non-database store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    table: Mutex<HashMap<MetricKey, Metric>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<MetricKey, Metric>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merges one metric into the table and returns the stored record.
    pub fn apply(&self, metric: Metric) -> Result<Metric> {
        let mut table = self.table();
        let key = metric.key();
        let merged = merge(table.get(&key), metric)?;
        table.insert(key, merged.clone());
        Ok(merged)
    }

    /// Merges metrics in order, stopping at the first failure. Earlier
    /// elements stay applied.
    pub fn apply_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let mut table = self.table();
        let mut saved = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let key = metric.key();
            let merged = merge(table.get(&key), metric.clone())?;
            table.insert(key, merged.clone());
            saved.push(merged);
        }
        Ok(saved)
    }

    /// Inserts metrics as-is, replacing records with the same key.
    pub fn load(&self, metrics: Vec<Metric>) {
        let mut table = self.table();
        for metric in metrics {
            table.insert(metric.key(), metric);
        }
    }

    pub fn lookup(&self, key: &MetricKey) -> Option<Metric> {
        self.table().get(key).cloned()
    }

    /// All records ordered by id, then type.
    pub fn all(&self) -> Vec<Metric> {
        let table = self.table();
        let mut keys: Vec<&MetricKey> = table.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| table[k].clone()).collect()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.table().clone()
    }

    pub fn rollback(&self, checkpoint: Checkpoint) {
        *self.table() = checkpoint;
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, metric: Metric) -> Result<Metric> {
        self.apply(metric)
    }

    async fn save_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        self.apply_all(metrics)
    }

    async fn get(&self, key: &MetricKey) -> Result<Option<Metric>> {
        Ok(self.lookup(key))
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        Ok(self.all())
    }
}
