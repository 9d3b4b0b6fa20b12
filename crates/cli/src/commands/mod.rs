pub mod doctor;
pub mod init;
pub mod providers;
pub mod serve;
pub mod sessions;

use std::sync::Arc;
use trailverse_config::AppConfig;
use trailverse_core::account::UserStore;
use trailverse_core::session::SessionStore;
use trailverse_store::{InMemoryStore, SqliteStore};

/// Session and account stores backed by the same database.
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub backend: &'static str,
}

/// Open the configured store backend. `force_memory` overrides the config.
pub async fn open_stores(
    config: &AppConfig,
    force_memory: bool,
) -> Result<Stores, Box<dyn std::error::Error>> {
    if force_memory || config.store.backend == "memory" {
        let store = Arc::new(InMemoryStore::new());
        return Ok(Stores {
            sessions: store.clone(),
            users: store,
            backend: "memory",
        });
    }

    let path = config.store.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
    Ok(Stores {
        sessions: store.clone(),
        users: store,
        backend: "sqlite",
    })
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
