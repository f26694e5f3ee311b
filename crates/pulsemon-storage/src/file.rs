use crate::cache::MemoryStorage;
use crate::error::{Result, StorageError};
use crate::Storage;
use async_trait::async_trait;
use pulsemon_common::types::{Metric, MetricKey};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// JSON snapshot of every metric, stored as one array in a single file.
///
/// Each write rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a half-written snapshot.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    writes: Mutex<()>,
}

impl FileStorage {
    /// Creates the parent directory if it is missing. The file itself is
    /// only created by the first write.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        Ok(Self {
            path,
            writes: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. A missing or empty file is an empty snapshot.
    pub async fn load(&self) -> Result<Vec<Metric>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replaces the snapshot with `metrics`.
    pub async fn persist(&self, metrics: &[Metric]) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.write_locked(metrics).await
    }

    async fn write_locked(&self, metrics: &[Metric]) -> Result<()> {
        let json = serde_json::to_vec_pretty(metrics)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }

    /// Loads the snapshot, merges `metrics` into it and writes it back.
    async fn merge_and_write(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let _guard = self.writes.lock().await;
        let table = MemoryStorage::new();
        table.load(self.load().await?);
        let saved = table.apply_all(metrics)?;
        self.write_locked(&table.all()).await?;
        Ok(saved)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(&self, metric: Metric) -> Result<Metric> {
        let mut saved = self.merge_and_write(std::slice::from_ref(&metric)).await?;
        saved.pop().ok_or_else(|| StorageError::InvalidRow {
            id: metric.id,
            reason: "merge produced no record".to_string(),
        })
    }

    /// All-or-nothing: the file is only rewritten when every element merged.
    async fn save_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        self.merge_and_write(metrics).await
    }

    async fn get(&self, key: &MetricKey) -> Result<Option<Metric>> {
        Ok(self.load().await?.into_iter().find(|m| &m.key() == key))
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        let mut metrics = self.load().await?;
        metrics.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(metrics)
    }
}
