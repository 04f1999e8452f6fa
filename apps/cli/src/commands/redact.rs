//! `tidelog redact <atoms>`: deletes every locally matching entry and
//! broadcasts a deletion request for each (§4.4 "delete_and_broadcast").

use tidelog_core::store::DeletePredicate;

use crate::runtime::Runtime;

pub async fn run(atoms: &[String]) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let query = atoms.join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("refusing to redact with an empty query; pass at least one atom");
    }

    let matched = runtime.context.store.search(&query, 0).await?;
    let mut deleted = 0usize;
    for entry in &matched {
        let predicate = DeletePredicate {
            device_id: entry.device_id.clone(),
            end_time: None,
            entry_id: Some(entry.entry_id.clone()),
        };
        deleted += runtime.engine.delete_and_broadcast(predicate).await?;
    }

    println!("redacted {deleted} entries");
    Ok(())
}
