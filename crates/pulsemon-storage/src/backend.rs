use crate::cache::MemoryStorage;
use crate::database::DatabaseStorage;
use crate::error::Result;
use crate::file::FileStorage;
use crate::mirror::{FlushPolicy, MirroredStorage};
use crate::Storage;
use pulsemon_common::retry::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs for choosing and opening the primary backend.
#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    pub database_dsn: Option<String>,
    pub file_path: Option<PathBuf>,
    pub restore: bool,
    pub flush: Option<FlushPolicy>,
    pub retry: RetryPolicy,
}

/// The primary backend chosen at startup.
#[derive(Clone)]
pub enum Backend {
    Database(Arc<DatabaseStorage>),
    Mirrored(Arc<MirroredStorage>),
    Memory(Arc<MemoryStorage>),
}

impl Backend {
    /// Opens exactly one backend: database when a DSN is set, otherwise the
    /// file mirror when a path is set, otherwise memory only.
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        if let Some(dsn) = settings.database_dsn.as_deref().filter(|d| !d.is_empty()) {
            let db = DatabaseStorage::connect(dsn, settings.retry.clone()).await?;
            tracing::info!("Using database storage");
            return Ok(Self::Database(Arc::new(db)));
        }

        if let Some(path) = &settings.file_path {
            let file = FileStorage::new(path)?;
            let policy = settings.flush.unwrap_or(FlushPolicy::Synchronous);
            let mirror = MirroredStorage::new(file, policy);
            if settings.restore {
                mirror.restore().await?;
            }
            tracing::info!(
                path = %path.display(),
                policy = ?mirror.policy(),
                "Using file-mirrored storage"
            );
            return Ok(Self::Mirrored(Arc::new(mirror)));
        }

        tracing::info!("Using in-memory storage");
        Ok(Self::Memory(Arc::new(MemoryStorage::new())))
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        match self {
            Self::Database(db) => db.clone(),
            Self::Mirrored(mirror) => mirror.clone(),
            Self::Memory(memory) => memory.clone(),
        }
    }

    pub fn database(&self) -> Option<Arc<DatabaseStorage>> {
        match self {
            Self::Database(db) => Some(db.clone()),
            _ => None,
        }
    }

    pub fn mirror(&self) -> Option<Arc<MirroredStorage>> {
        match self {
            Self::Mirrored(mirror) => Some(mirror.clone()),
            _ => None,
        }
    }
}
