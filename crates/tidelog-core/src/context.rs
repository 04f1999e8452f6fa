//! The process-wide `Context`: the single immutable carrier threaded
//! through every component, instead of global state (§4.7, §9 "Globally
//! mutable state").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::errors::Result;
use crate::store::Store;

/// Resolves the base directory (`~/.hishtory`-equivalent) honoring the
/// `TIDELOG_BASE_DIR` override, the way `directories::ProjectDirs` is
/// wrapped by callers elsewhere in the corpus.
pub fn resolve_base_dir() -> PathBuf {
    if let Ok(over) = std::env::var("TIDELOG_BASE_DIR") {
        return PathBuf::from(over);
    }
    if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
        return home.join(".hishtory");
    }
    PathBuf::from(".hishtory")
}

/// Everything every component needs, without reaching into process
/// globals: the live config (mutated and atomically persisted on change),
/// a handle to the local store, and the resolved base/home directories.
pub struct Context {
    pub config: Arc<RwLock<Config>>,
    pub store: Arc<dyn Store>,
    pub base_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl Context {
    pub fn new(config: Config, store: Arc<dyn Store>, base_dir: PathBuf, home_dir: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            base_dir,
            home_dir,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join("tidelog.db")
    }

    /// Persists the current in-memory config atomically (§4.7).
    pub async fn persist_config(&self) -> Result<()> {
        let config = self.config.read().await;
        config.save(&self.config_path())
    }
}

pub fn home_dir_of(base_dirs_home: Option<&Path>) -> PathBuf {
    base_dirs_home
        .map(Path::to_path_buf)
        .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("/"))
}
