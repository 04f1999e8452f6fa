//! `tidelog sync`: runs one opportunistic sync cycle on demand (deferred
//! replay, pull, deletion-request ingestion, dump-request check), per
//! SPEC_FULL §C.2's periodic-pull concept made reachable as a one-shot.

use crate::runtime::Runtime;

pub async fn run() -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let result = runtime.engine.run_cycle().await;

    println!("status: {}", result.status);
    println!("pulled: {}", result.pulled_count);
    println!("duration_ms: {}", result.duration_ms);

    if result.status != "ok" {
        anyhow::bail!("sync cycle did not complete cleanly: {}", result.status);
    }
    Ok(())
}
