//! The capture pipeline (§4.5): the two entry points the shell hooks call,
//! `presave` (command started) and `save` (command finished).

use std::sync::Arc;

use uuid::Uuid;

use tidelog_core::context::Context;
use tidelog_core::entry::HistoryEntry;
use tidelog_core::store::DeletePredicate;
use tidelog_sync::SyncEngine;

use crate::custom_columns;
use crate::error::Result;
use crate::normalize::{self, Shell};

/// Translates a shell's notification of a command into zero or one
/// persisted [`HistoryEntry`], wired to a [`Context`] (for config/store)
/// and a [`SyncEngine`] (for submit/broadcast).
pub struct CapturePipeline {
    context: Arc<Context>,
    engine: Arc<SyncEngine>,
    local_username: String,
    hostname: String,
}

impl CapturePipeline {
    pub fn new(context: Arc<Context>, engine: Arc<SyncEngine>, local_username: String, hostname: String) -> Self {
        Self { context, engine, local_username, hostname }
    }

    fn bash_histtimeformat(&self, shell: Shell) -> Option<String> {
        if shell == Shell::Bash {
            std::env::var("HISTTIMEFORMAT").ok()
        } else {
            None
        }
    }

    /// Called after the user hits enter but before the command completes.
    /// Builds a not-yet-completed entry (`ExitCode=0`, `EndTime=0`),
    /// persists and submits it. Skipped if the identical command string was
    /// the last one presaved (§9 "Presave duplicate suppression") or if
    /// presaving is disabled.
    pub async fn presave(&self, shell: Shell, raw_command: &str, start_time_seconds: i64, cwd: &str) -> Result<Option<HistoryEntry>> {
        let histtimeformat = self.bash_histtimeformat(shell);
        let Some(command) = normalize::normalize_command(shell, raw_command, histtimeformat.as_deref()) else {
            return Ok(None);
        };

        {
            let config = self.context.config.read().await;
            if !config.presaving_enabled {
                return Ok(None);
            }
            if config.last_saved_history_line == command {
                return Ok(None);
            }
        }

        let entry = self.build_entry(&command, 0, start_time_seconds * 1000, 0, cwd).await?;
        self.context.store.create(&entry).await?;

        {
            let mut config = self.context.config.write().await;
            config.last_saved_history_line = command;
            config.save(&self.context.config_path())?;
        }

        self.engine.submit(&entry).await?;
        Ok(Some(entry))
    }

    /// Called after the command returns. Builds the completed entry; if a
    /// matching presaved entry exists (same `DeviceId` and `StartTime`), it
    /// is deleted (propagating) and the completed entry takes its place.
    pub async fn save(
        &self,
        shell: Shell,
        exit_code: i32,
        raw_command: &str,
        start_time_seconds: i64,
        end_time_millis: i64,
        cwd: &str,
    ) -> Result<Option<HistoryEntry>> {
        let histtimeformat = self.bash_histtimeformat(shell);
        let Some(command) = normalize::normalize_command(shell, raw_command, histtimeformat.as_deref()) else {
            return Ok(None);
        };

        let start_time_millis = start_time_seconds * 1000;
        let device_id = self.context.config.read().await.device_id.clone();

        if let Some(presave) = self.find_matching_presave(&device_id, start_time_millis).await? {
            let predicate = DeletePredicate {
                device_id: presave.device_id,
                end_time: None,
                entry_id: Some(presave.entry_id),
            };
            self.engine.delete_and_broadcast(predicate).await?;
        }

        let entry = self.build_entry(&command, exit_code, start_time_millis, end_time_millis, cwd).await?;
        self.context.store.create(&entry).await?;
        self.engine.submit(&entry).await?;
        Ok(Some(entry))
    }

    /// Linear scan for a presaved entry (same device + start time, still
    /// `EndTime == 0`). The store has no dedicated index for this lookup;
    /// local history sizes make an in-memory scan acceptable here.
    async fn find_matching_presave(&self, device_id: &str, start_time_millis: i64) -> Result<Option<HistoryEntry>> {
        let entries = self.context.store.all_entries_oldest_first().await?;
        Ok(entries
            .into_iter()
            .find(|e| e.device_id == device_id && e.start_time == start_time_millis && e.is_presave()))
    }

    async fn build_entry(&self, command: &str, exit_code: i32, start_time_millis: i64, end_time_millis: i64, cwd: &str) -> Result<HistoryEntry> {
        let (config_device_id, custom_column_defs) = {
            let config = self.context.config.read().await;
            (config.device_id.clone(), config.custom_columns.clone())
        };
        let home_directory = self.context.home_dir.to_string_lossy().to_string();
        let custom_columns = custom_columns::evaluate_all(&custom_column_defs).await;

        Ok(HistoryEntry {
            local_username: self.local_username.clone(),
            hostname: self.hostname.clone(),
            home_directory: home_directory.clone(),
            command: command.to_string(),
            current_working_directory: normalize::render_cwd_tilde(cwd, &home_directory),
            exit_code,
            start_time: start_time_millis,
            end_time: end_time_millis,
            device_id: config_device_id,
            entry_id: Uuid::new_v4().to_string(),
            custom_columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use tidelog_core::config::Config;
    use tidelog_core::crypto::Identity;
    use tidelog_store::SqliteStore;
    use tidelog_transport::client::RelayClient;

    fn make_pipeline(dir: &tempfile::TempDir, device_id: &str) -> CapturePipeline {
        let store = SqliteStore::open(&dir.path().join("t.db"), "/home/alice", &[]).unwrap();
        let mut config = Config::default();
        config.device_id = device_id.to_string();
        let context = Arc::new(Context::new(config, Arc::new(store), dir.path().to_path_buf(), PathBuf::from("/home/alice")));

        std::env::set_var("TIDELOG_SIMULATE_NETWORK_ERROR", "true");
        let client = RelayClient::new("http://127.0.0.1:1", "1");
        let identity = Identity::derive("k").unwrap();
        let engine = Arc::new(SyncEngine::new(context.clone(), client, identity));

        CapturePipeline::new(context, engine, "alice".into(), "box1".into())
    }

    #[tokio::test]
    async fn presave_persists_a_zero_end_time_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = make_pipeline(&dir, "dev-1");
        let entry = pipeline.presave(Shell::Bash, "ls -la", 100, "/home/alice").await.unwrap().unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");

        assert_eq!(entry.exit_code, 0);
        assert_eq!(entry.end_time, 0);
        assert!(entry.is_presave());
        assert_eq!(pipeline.context.store.all_entries_oldest_first().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_identical_presave_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = make_pipeline(&dir, "dev-1");
        assert!(pipeline.presave(Shell::Bash, "ls -la", 100, "/home/alice").await.unwrap().is_some());
        assert!(pipeline.presave(Shell::Bash, "ls -la", 101, "/home/alice").await.unwrap().is_none());
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");
    }

    #[tokio::test]
    async fn save_replaces_matching_presave() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = make_pipeline(&dir, "dev-1");
        pipeline.presave(Shell::Bash, "sleep 10", 100, "/home/alice").await.unwrap();

        let saved = pipeline.save(Shell::Bash, 0, "sleep 10", 100, 110_000, "/home/alice").await.unwrap().unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");

        assert_eq!(saved.exit_code, 0);
        assert_eq!(saved.start_time, 100_000);
        assert_eq!(saved.end_time, 110_000);

        let rows = pipeline.context.store.all_entries_oldest_first().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_presave());
    }

    #[tokio::test]
    async fn command_starting_with_space_is_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = make_pipeline(&dir, "dev-1");
        let result = pipeline.save(Shell::Bash, 0, " secret-command", 100, 110_000, "/home/alice").await.unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");
        assert!(result.is_none());
        assert!(pipeline.context.store.all_entries_oldest_first().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cwd_under_home_is_rendered_with_tilde() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = make_pipeline(&dir, "dev-1");
        let entry = pipeline.save(Shell::Bash, 0, "ls", 100, 110_000, "/home/alice/proj").await.unwrap().unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");
        assert_eq!(entry.current_working_directory, "~/proj");
    }
}
