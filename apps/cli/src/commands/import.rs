//! `tidelog import-json`: round-trips `export-json`'s JSON-lines format,
//! reassigning `device_id`/`entry_id` on the way in (§8 round-trip law).

use std::path::Path;

use uuid::Uuid;

use tidelog_core::entry::HistoryEntry;

use crate::runtime::Runtime;

pub async fn run(path: &Path) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let contents = std::fs::read_to_string(path)?;
    let device_id = runtime.context.config.read().await.device_id.clone();

    let mut entries = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut entry: HistoryEntry = serde_json::from_str(line)
            .map_err(|err| anyhow::anyhow!("line {}: {err}", line_no + 1))?;
        entry.device_id = device_id.clone();
        entry.entry_id = Uuid::new_v4().to_string();
        entries.push(entry);
    }

    let inserted = runtime.context.store.bulk_import(&entries).await?;
    println!("imported {inserted} new entries");

    runtime.engine.reupload().await?;
    Ok(())
}
