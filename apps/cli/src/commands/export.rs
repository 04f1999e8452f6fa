//! `tidelog export` / `tidelog export-json`.

use std::io::Write;
use std::path::Path;

use crate::runtime::Runtime;

pub async fn run_export(atoms: &[String]) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let query = atoms.join(" ");
    let entries = if query.is_empty() {
        runtime.context.store.all_entries_oldest_first().await?
    } else {
        let mut matched = runtime.context.store.search(&query, 0).await?;
        matched.reverse();
        matched
    };
    for entry in entries {
        println!("{}", entry.command);
    }
    Ok(())
}

pub async fn run_export_json(out: Option<&Path>) -> anyhow::Result<()> {
    let runtime = Runtime::load()?;
    let entries = runtime.context.store.all_entries_oldest_first().await?;

    let mut buf = String::new();
    for entry in &entries {
        buf.push_str(&serde_json::to_string(entry)?);
        buf.push('\n');
    }

    match out {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            file.write_all(buf.as_bytes())?;
        }
        None => print!("{buf}"),
    }
    Ok(())
}
