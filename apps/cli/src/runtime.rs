//! Assembles the process-wide `Context` and every component that hangs off
//! it (store, relay client, sync engine, capture pipeline) from the
//! on-disk config, the way `init` wiring does in every component of the
//! corpus (§4.7).

use std::path::PathBuf;
use std::sync::Arc;

use tidelog_core::config::Config;
use tidelog_core::context::{self, Context};
use tidelog_core::crypto::Identity;
use tidelog_capture::CapturePipeline;
use tidelog_store::SqliteStore;
use tidelog_sync::SyncEngine;
use tidelog_transport::client::RelayClient;

/// Default relay base URL. Overridden by `TIDELOG_RELAY_HOST` for
/// self-hosted relays or tests.
const DEFAULT_RELAY_HOST: &str = "https://relay.tidelog.dev";
const CLIENT_VERSION: &str = "1";

pub fn relay_host() -> String {
    std::env::var("TIDELOG_RELAY_HOST").unwrap_or_else(|_| DEFAULT_RELAY_HOST.to_string())
}

pub fn local_username() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_string())
}

pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Everything a command needs, assembled once per invocation.
pub struct Runtime {
    pub context: Arc<Context>,
    pub engine: Arc<SyncEngine>,
    pub capture: CapturePipeline,
}

impl Runtime {
    /// Loads config (or defaults) from the resolved base directory, opens
    /// the local store, and wires the sync engine + capture pipeline on
    /// top. Does not talk to the network.
    pub fn load() -> anyhow::Result<Self> {
        let base_dir = context::resolve_base_dir();
        let home_dir = context::home_dir_of(None);
        let config_path = base_dir.join("config.json");
        let config = Config::load(&config_path)?;

        let custom_column_names: Vec<String> =
            config.custom_columns.iter().map(|c| c.column_name.clone()).collect();

        let db_path = base_dir.join("tidelog.db");
        let store = SqliteStore::open(&db_path, &home_dir.to_string_lossy(), &custom_column_names)?;
        let identity = Identity::derive(&config.user_secret)?;

        let context = Arc::new(Context::new(config, Arc::new(store), base_dir, home_dir));

        let client = RelayClient::new(&relay_host(), CLIENT_VERSION);
        let engine = Arc::new(SyncEngine::new(context.clone(), client, identity));
        let capture = CapturePipeline::new(context.clone(), engine.clone(), local_username(), hostname());

        Ok(Self { context, engine, capture })
    }

    pub fn config_path(&self) -> PathBuf {
        self.context.config_path()
    }
}
