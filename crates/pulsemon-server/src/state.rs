use crate::config::ServerConfig;
use pulsemon_common::signing::Signer;
use pulsemon_storage::backend::Backend;
use pulsemon_storage::database::DatabaseStorage;
use pulsemon_storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// Present only when the database is the primary backend; backs `/ping`.
    pub database: Option<Arc<DatabaseStorage>>,
    pub signer: Option<Signer>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(backend: &Backend, config: ServerConfig) -> Self {
        Self {
            storage: backend.storage(),
            database: backend.database(),
            signer: Signer::from_key(config.hash_key.as_deref()),
            config: Arc::new(config),
        }
    }
}
