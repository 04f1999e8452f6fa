//! `saveHistoryEntry` / `presaveHistoryEntry`: the entry points invoked by
//! the shell integration scripts on every command (§4.5, §5 "hot on the
//! hooks' critical path").

use std::time::{SystemTime, UNIX_EPOCH};

use tidelog_capture::Shell;

use crate::runtime::Runtime;

fn parse_shell(name: &str) -> anyhow::Result<Shell> {
    Shell::parse(name).ok_or_else(|| anyhow::anyhow!("unknown shell: {name}"))
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

pub async fn presave(shell: &str, command: &str, start_time: i64, cwd: &str) -> anyhow::Result<()> {
    let shell = parse_shell(shell)?;
    let runtime = Runtime::load()?;
    runtime.capture.presave(shell, command, start_time, cwd).await?;
    Ok(())
}

/// `start_time` is seconds since epoch (matching the shell hook's
/// `$EPOCHSECONDS`-style timestamp); the end time is simply now.
pub async fn save(shell: &str, exit_code: i32, command: &str, start_time: i64, cwd: &str) -> anyhow::Result<()> {
    let shell = parse_shell(shell)?;
    let runtime = Runtime::load()?;
    runtime.capture.save(shell, exit_code, command, start_time, now_millis(), cwd).await?;
    Ok(())
}
