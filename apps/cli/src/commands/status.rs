//! `tidelog status`: prints the sync engine's bookkeeping snapshot.

use crate::runtime::Runtime;

pub async fn run() -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let status = runtime.engine.status().await;
    let config = runtime.context.config.read().await;

    println!("device_id: {}", config.device_id);
    println!("offline: {}", config.is_offline);
    println!("have_missed_uploads: {}", config.have_missed_uploads);
    println!("last_push_at: {:?}", status.last_push_at);
    println!("last_pull_at: {:?}", status.last_pull_at);
    println!("consecutive_failures: {}", status.consecutive_failures);
    println!("next_retry_at: {:?}", status.next_retry_at);
    if let Some(err) = &status.last_error {
        println!("last_error: {err}");
    }
    Ok(())
}
