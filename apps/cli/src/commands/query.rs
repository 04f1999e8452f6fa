//! `tidelog query` / `tidelog tquery`.

use tidelog_core::entry::HistoryEntry;

use crate::runtime::Runtime;

pub async fn run(atoms: &[String], limit: i64) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;

    // Best-effort: a query should never fail or block on the relay being
    // unreachable, it should just show what's in the local store (§4.3/§7
    // "offline ... never fatal").
    let _ = runtime.engine.pull().await;

    let query = atoms.join(" ");
    let entries = runtime.context.store.search(&query, limit).await?;
    print_table(&entries);
    Ok(())
}

pub fn tquery_unsupported() -> anyhow::Result<()> {
    anyhow::bail!("tquery is out of scope for this build; use `tidelog query` instead")
}

fn print_table(entries: &[HistoryEntry]) {
    for entry in entries {
        println!(
            "{}\t{}@{}\t{}\t{}\t{}",
            entry.exit_code, entry.local_username, entry.hostname, entry.current_working_directory, entry.end_time, entry.command
        );
    }
}
