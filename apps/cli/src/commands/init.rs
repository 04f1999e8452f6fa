//! `tidelog init [secret]`: rebuilds the device identity and bootstraps
//! from the relay (§4.4 "Bootstrap").

use std::sync::Arc;

use uuid::Uuid;

use tidelog_core::crypto::Identity;
use tidelog_sync::SyncEngine;
use tidelog_transport::client::RelayClient;

use crate::runtime::{self, Runtime};

pub async fn run(secret: Option<String>) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let secret = secret.unwrap_or_else(|| Uuid::new_v4().to_string());

    {
        let mut config = runtime.context.config.write().await;
        config.user_secret = secret.clone();
        config.device_id = Uuid::new_v4().to_string();
        config.have_completed_initial_import = false;
        config.save(&runtime.config_path())?;
    }

    // The loaded `engine` was built from the *previous* secret; rebuild it
    // now that the identity has changed underneath it.
    let identity = Identity::derive(&secret)?;
    let client = RelayClient::new(&runtime::relay_host(), "1");
    let engine = Arc::new(SyncEngine::new(runtime.context.clone(), client, identity));

    println!("device identity rebuilt; bootstrapping from relay");
    let inserted = engine.bootstrap().await?;
    {
        let mut config = runtime.context.config.write().await;
        config.have_completed_initial_import = true;
        config.save(&runtime.config_path())?;
    }

    println!("bootstrap complete: {inserted} entries pulled");
    println!("user secret (save this to register other devices): {secret}");
    Ok(())
}
