//! The sync engine (§4.4): submit, deferred replay, pull, deletion-request
//! ingestion, bootstrap, reupload, and dump handling. This is the only
//! component that talks to both the local [`Store`] and the
//! [`RelayClient`]; every other component only ever sees one side.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use tokio::sync::RwLock;

use tidelog_core::context::Context;
use tidelog_core::crypto::Identity;
use tidelog_core::entry::{DeletionRequest, DeletionRequestMessage, DumpRequest, EncryptedEntry, HistoryEntry};
use tidelog_core::store::DeletePredicate;
use tidelog_transport::client::RelayClient;

use crate::error::{Result, SyncError};
use crate::model::{backoff_seconds, classify_http_status, SyncCycleResult, SyncEngineStatus, SyncRetryClass};

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Deferred replay and reupload both chunk their submissions so no single
/// HTTP request grows unbounded (§4.2 "Bulk import", §4.4 "Reupload").
const SUBMIT_BATCH_SIZE: usize = 100;

/// Orchestrates every flow in §4.4 against one `Context` + relay pair. Holds
/// no state of its own beyond the derived `Identity`; everything durable
/// lives in the `Context`'s config and store.
pub struct SyncEngine {
    context: Arc<Context>,
    client: RelayClient,
    identity: Identity,
    status: RwLock<SyncEngineStatus>,
}

impl SyncEngine {
    pub fn new(context: Arc<Context>, client: RelayClient, identity: Identity) -> Self {
        Self { context, client, identity, status: RwLock::new(SyncEngineStatus::default()) }
    }

    async fn device_id(&self) -> String {
        self.context.config.read().await.device_id.clone()
    }

    /// Snapshot of the bookkeeping exposed via `tidelog status`.
    pub async fn status(&self) -> SyncEngineStatus {
        self.status.read().await.clone()
    }

    async fn record_push_success(&self) {
        let mut status = self.status.write().await;
        status.last_push_at = Some(now_millis());
        status.consecutive_failures = 0;
        status.next_retry_at = None;
        status.last_cycle_status = "ok".to_string();
    }

    async fn record_pull_success(&self) {
        let mut status = self.status.write().await;
        status.last_pull_at = Some(now_millis());
        status.consecutive_failures = 0;
        status.next_retry_at = None;
        status.last_cycle_status = "ok".to_string();
    }

    async fn record_failure(&self, err: &str) {
        let mut status = self.status.write().await;
        status.consecutive_failures += 1;
        status.last_error = Some(err.to_string());
        status.next_retry_at = Some(now_millis() + backoff_seconds(status.consecutive_failures) * 1000);
        status.last_cycle_status = "error".to_string();
    }

    /// (a) Submit: encrypts and POSTs a single newly finalized entry. On an
    /// offline error, sets the missed-uploads flag and timestamp instead of
    /// retrying synchronously; on a fatal error, the error is returned to
    /// the caller (the CLI/hook then decides whether to notify the user).
    pub async fn submit(&self, entry: &HistoryEntry) -> Result<()> {
        self.deferred_replay().await;

        let device_id = self.device_id().await;
        let envelope = self.identity.encrypt(entry).map_err(SyncError::from)?;

        match self.client.submit(&device_id, std::slice::from_ref(&envelope)).await {
            Ok(response) => {
                self.record_push_success().await;
                for dump in response.dump_requests {
                    self.handle_dump_request(&dump).await;
                }
                Ok(())
            }
            Err(err) if err.is_offline() => {
                debug!("submit went offline, marking missed uploads");
                self.record_failure(&err.to_string()).await;
                self.mark_missed_uploads(entry.end_time).await?;
                Ok(())
            }
            Err(err) => {
                self.record_failure(&err.to_string()).await;
                Err(SyncError::from(err))
            }
        }
    }

    async fn mark_missed_uploads(&self, at: i64) -> Result<()> {
        let mut config = self.context.config.write().await;
        config.have_missed_uploads = true;
        if at > 0 {
            config.missed_upload_timestamp = at;
        }
        config.save(&self.context.config_path()).map_err(SyncError::from)
    }

    /// (b) Deferred replay: if the missed-uploads flag is set, re-submits
    /// every local entry since the flag's timestamp (rounded down to the
    /// day) in batches of [`SUBMIT_BATCH_SIZE`]. Failures here are silent —
    /// the flag stays set and the next `submit` tries again.
    pub async fn deferred_replay(&self) {
        let (have_missed, since) = {
            let config = self.context.config.read().await;
            (config.have_missed_uploads, round_down_to_day(config.missed_upload_timestamp))
        };
        if !have_missed {
            return;
        }

        let entries = match self.context.store.entries_since(since).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("deferred replay: could not read local store: {err}");
                return;
            }
        };

        let device_id = self.device_id().await;
        for chunk in entries.chunks(SUBMIT_BATCH_SIZE) {
            let envelopes: Vec<EncryptedEntry> = match chunk.iter().map(|e| self.identity.encrypt(e)).collect() {
                Ok(envelopes) => envelopes,
                Err(err) => {
                    warn!("deferred replay: encryption failed: {err}");
                    return;
                }
            };
            if let Err(err) = self.client.submit(&device_id, &envelopes).await {
                warn!("deferred replay: submit failed, will retry next cycle: {err}");
                return;
            }
        }

        let mut config = self.context.config.write().await;
        config.have_missed_uploads = false;
        if let Err(err) = config.save(&self.context.config_path()) {
            warn!("deferred replay: could not clear missed-uploads flag: {err}");
        }
    }

    /// (c) Pull: fetches every encrypted entry the relay has for this
    /// device that it has not yet acknowledged, decrypts and inserts each
    /// via `AddIfNew`, then processes deletion requests. Returns the number
    /// of newly inserted rows.
    pub async fn pull(&self) -> Result<usize> {
        let device_id = self.device_id().await;
        let envelopes = match self.client.query(&device_id, &self.identity.user_id).await {
            Ok(envelopes) => envelopes,
            Err(err) => {
                if let tidelog_transport::error::TransportError::Status { status, .. } = &err {
                    if classify_http_status(*status) == SyncRetryClass::ReauthRequired {
                        warn!("pull: relay rejected this device's credentials (status {status}); the user secret may need to be re-entered via `tidelog init`");
                    }
                }
                self.record_failure(&err.to_string()).await;
                return Err(SyncError::from(err));
            }
        };
        self.record_pull_success().await;

        let mut inserted = 0usize;
        for envelope in envelopes {
            match self.identity.decrypt(&envelope) {
                Ok(entry) => {
                    if self.context.store.add_if_new(&entry).await.map_err(SyncError::from)? {
                        inserted += 1;
                    }
                }
                Err(err) => {
                    warn!("pull: dropping entry that failed to decrypt: {err}");
                }
            }
        }

        self.ingest_deletion_requests().await?;
        Ok(inserted)
    }

    /// (d) Deletion-request ingestion: applies every pending `DeletionRequest`
    /// to the local store. Re-applying an already-applied deletion is a
    /// no-op, never an error.
    pub async fn ingest_deletion_requests(&self) -> Result<usize> {
        let device_id = self.device_id().await;
        let requests = self.client.get_deletion_requests(&self.identity.user_id, &device_id).await?;

        let mut deleted = 0usize;
        for request in requests {
            for message in &request.messages {
                let predicate = predicate_from_message(message);
                deleted += self.context.store.delete(&predicate).await.map_err(SyncError::from)?;
            }
        }
        Ok(deleted)
    }

    /// (e) Bootstrap: registers this device, then pulls every existing
    /// encrypted entry for the user and inserts each via `AddIfNew`. Run
    /// once at install/init time.
    pub async fn bootstrap(&self) -> Result<usize> {
        let device_id = self.device_id().await;
        self.client.register(&self.identity.user_id, &device_id).await?;

        let envelopes = self.client.bootstrap(&self.identity.user_id, &device_id).await?;
        let mut inserted = 0usize;
        for envelope in envelopes {
            match self.identity.decrypt(&envelope) {
                Ok(entry) => {
                    if self.context.store.add_if_new(&entry).await.map_err(SyncError::from)? {
                        inserted += 1;
                    }
                }
                Err(err) => {
                    warn!("bootstrap: dropping entry that failed to decrypt: {err}");
                }
            }
        }
        Ok(inserted)
    }

    /// Re-encrypts and resubmits every local entry in chunks of
    /// [`SUBMIT_BATCH_SIZE`]; used after switching from offline to online
    /// and after a bulk import.
    pub async fn reupload(&self) -> Result<usize> {
        let device_id = self.device_id().await;
        let entries = self.context.store.all_entries_oldest_first().await.map_err(SyncError::from)?;

        let mut submitted = 0usize;
        for chunk in entries.chunks(SUBMIT_BATCH_SIZE) {
            let envelopes: Vec<EncryptedEntry> =
                chunk.iter().map(|e| self.identity.encrypt(e)).collect::<tidelog_core::errors::Result<_>>().map_err(SyncError::from)?;
            self.client.submit(&device_id, &envelopes).await?;
            submitted += chunk.len();
        }
        Ok(submitted)
    }

    /// Runs one full opportunistic sync cycle: deferred replay, pull (which
    /// includes deletion-request ingestion), then a dump-request check.
    /// This is what a manual `tidelog sync` invocation and the query path
    /// both drive; the periodic background loop (SPEC_FULL §C.2) would call
    /// this on its own cadence.
    pub async fn run_cycle(&self) -> SyncCycleResult {
        let start = now_millis();
        self.deferred_replay().await;

        let (status, pulled_count) = match self.pull().await {
            Ok(count) => ("ok".to_string(), count),
            Err(err) => (format!("error: {err}"), 0),
        };
        self.check_dump_requests().await;

        SyncCycleResult {
            status,
            pushed_count: 0,
            pulled_count,
            duration_ms: (now_millis() - start).max(0),
        }
    }

    /// Checks for outstanding dump requests addressed to this device and
    /// satisfies each. Failures are silent: the relay will ask again.
    pub async fn check_dump_requests(&self) {
        let device_id = self.device_id().await;
        let requests = match self.client.get_dump_requests(&self.identity.user_id, &device_id).await {
            Ok(requests) => requests,
            Err(err) => {
                debug!("check_dump_requests: {err}");
                return;
            }
        };
        for request in requests {
            self.handle_dump_request(&request).await;
        }
    }

    /// Encrypts and POSTs the full local history to satisfy a pending dump
    /// request. Failures are silent (§4.4 "Dump response").
    async fn handle_dump_request(&self, request: &DumpRequest) {
        let device_id = self.device_id().await;
        let entries = match self.context.store.all_entries_oldest_first().await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("dump request: could not read local store: {err}");
                return;
            }
        };
        let envelopes: Vec<EncryptedEntry> = match entries.iter().map(|e| self.identity.encrypt(e)).collect() {
            Ok(envelopes) => envelopes,
            Err(err) => {
                warn!("dump request: encryption failed: {err}");
                return;
            }
        };
        if let Err(err) = self
            .client
            .submit_dump(&request.user_id, &request.requesting_device_id, &device_id, &envelopes)
            .await
        {
            warn!("dump request: submit-dump failed, relay will re-ask: {err}");
        }
    }

    /// Deletes `predicate` locally, then broadcasts the deletion to every
    /// other device sharing this identity via `add-deletion-request`. Used
    /// by `redact` and by the capture pipeline's presave-replacement path.
    /// The broadcast is best-effort: a local delete always takes effect,
    /// even if the relay is unreachable.
    pub async fn delete_and_broadcast(&self, predicate: DeletePredicate) -> Result<usize> {
        let deleted = self.context.store.delete(&predicate).await.map_err(SyncError::from)?;

        let request = DeletionRequest {
            user_id: self.identity.user_id.clone(),
            send_time: predicate.end_time.unwrap_or(0),
            messages: vec![DeletionRequestMessage {
                device_id: predicate.device_id,
                end_time: predicate.end_time.unwrap_or(0),
                entry_id: predicate.entry_id.unwrap_or_default(),
            }],
        };
        if let Err(err) = self.client.add_deletion_request(&request).await {
            warn!("redact: could not broadcast deletion, other devices will keep the entry until reconciled: {err}");
        }

        Ok(deleted)
    }
}

fn predicate_from_message(message: &DeletionRequestMessage) -> DeletePredicate {
    DeletePredicate {
        device_id: message.device_id.clone(),
        end_time: if message.end_time != 0 { Some(message.end_time) } else { None },
        entry_id: if message.entry_id.is_empty() { None } else { Some(message.entry_id.clone()) },
    }
}

/// Rounds a Unix-epoch-seconds-or-millis timestamp down to the start of its
/// UTC day, as §4.4's deferred-replay flow requires ("rounded to day").
/// Operates in whatever unit `timestamp` already is (the config stores
/// `start_time`-scale values), so it just masks off the sub-day remainder.
fn round_down_to_day(timestamp: i64) -> i64 {
    const MS_PER_DAY: i64 = 86_400_000;
    if timestamp <= 0 {
        return 0;
    }
    (timestamp / MS_PER_DAY) * MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;

    use tidelog_core::config::Config;
    use tidelog_store::SqliteStore;

    fn sample_entry(entry_id: &str, device_id: &str, end_time: i64) -> HistoryEntry {
        HistoryEntry {
            local_username: "alice".into(),
            hostname: "box1".into(),
            home_directory: "/home/alice".into(),
            command: "ls -la".into(),
            current_working_directory: "/home/alice".into(),
            exit_code: 0,
            start_time: end_time - 10,
            end_time,
            device_id: device_id.into(),
            entry_id: entry_id.into(),
            custom_columns: vec![],
        }
    }

    fn make_context(dir: &tempfile::TempDir, device_id: &str) -> Arc<Context> {
        let store = SqliteStore::open(&dir.path().join("t.db"), "/home/alice", &[]).unwrap();
        let mut config = Config::default();
        config.device_id = device_id.to_string();
        Arc::new(Context::new(config, Arc::new(store), dir.path().to_path_buf(), PathBuf::from("/home/alice")))
    }

    /// A minimal one-shot mock relay that answers every request with the
    /// same canned JSON body, used to exercise the offline/fatal branches
    /// of a single flow without a real server.
    fn start_canned_server(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn submit_sets_missed_uploads_flag_when_offline() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let identity = Identity::derive("k").unwrap();
        std::env::set_var("TIDELOG_SIMULATE_NETWORK_ERROR", "true");
        let client = RelayClient::new("http://127.0.0.1:1", "1");
        let engine = SyncEngine::new(context.clone(), client, identity);

        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        engine.submit(&entry).await.unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");

        let config = context.config.read().await;
        assert!(config.have_missed_uploads);
        assert_eq!(config.missed_upload_timestamp, entry.end_time);
    }

    #[tokio::test]
    async fn submit_surfaces_fatal_errors() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let identity = Identity::derive("k").unwrap();
        let base_url = start_canned_server("HTTP/1.1 400 Bad Request", "{}".to_string());
        let client = RelayClient::new(&base_url, "1");
        let engine = SyncEngine::new(context, client, identity);

        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        assert!(engine.submit(&entry).await.is_err());
    }

    #[tokio::test]
    async fn pull_inserts_decrypted_entries_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-2");
        let identity = Identity::derive("k").unwrap();
        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        let envelope = identity.encrypt(&entry).unwrap();
        let body = serde_json::to_string(&vec![envelope]).unwrap();

        let base_url = start_canned_server("HTTP/1.1 200 OK", body);
        let client = RelayClient::new(&base_url, "1");
        let engine = SyncEngine::new(context.clone(), client, identity);

        let inserted = engine.pull().await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(context.store.all_entries_oldest_first().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deferred_replay_clears_flag_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        context.store.create(&entry).await.unwrap();
        {
            let mut config = context.config.write().await;
            config.have_missed_uploads = true;
            config.missed_upload_timestamp = entry.end_time - 1000;
        }

        let identity = Identity::derive("k").unwrap();
        let base_url = start_canned_server("HTTP/1.1 200 OK", "{}".to_string());
        let client = RelayClient::new(&base_url, "1");
        let engine = SyncEngine::new(context.clone(), client, identity);

        engine.deferred_replay().await;
        assert!(!context.config.read().await.have_missed_uploads);
    }

    #[tokio::test]
    async fn delete_and_broadcast_removes_locally_even_if_broadcast_fails() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        context.store.create(&entry).await.unwrap();

        let identity = Identity::derive("k").unwrap();
        std::env::set_var("TIDELOG_SIMULATE_NETWORK_ERROR", "true");
        let client = RelayClient::new("http://127.0.0.1:1", "1");
        let engine = SyncEngine::new(context.clone(), client, identity);

        let predicate = DeletePredicate { device_id: "dev-1".into(), end_time: None, entry_id: Some("e1".into()) };
        let deleted = engine.delete_and_broadcast(predicate).await.unwrap();
        std::env::remove_var("TIDELOG_SIMULATE_NETWORK_ERROR");

        assert_eq!(deleted, 1);
        assert!(context.store.all_entries_oldest_first().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_reflects_push_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let identity = Identity::derive("k").unwrap();
        let base_url = start_canned_server("HTTP/1.1 200 OK", "{}".to_string());
        let client = RelayClient::new(&base_url, "1");
        let engine = SyncEngine::new(context, client, identity);

        let entry = sample_entry("e1", "dev-1", 1_700_000_000_000);
        engine.submit(&entry).await.unwrap();

        let status = engine.status().await;
        assert!(status.last_push_at.is_some());
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_cycle_status, "ok");
    }

    #[tokio::test]
    async fn run_cycle_reports_ok_status_with_no_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        let context = make_context(&dir, "dev-1");
        let identity = Identity::derive("k").unwrap();
        let base_url = start_canned_server("HTTP/1.1 200 OK", "[]".to_string());
        let client = RelayClient::new(&base_url, "1");
        let engine = SyncEngine::new(context, client, identity);

        let result = engine.run_cycle().await;
        assert_eq!(result.status, "ok");
        assert_eq!(result.pulled_count, 0);
    }

    #[test]
    fn round_down_to_day_masks_sub_day_remainder() {
        assert_eq!(round_down_to_day(0), 0);
        assert_eq!(round_down_to_day(86_400_000 + 12_345), 86_400_000);
    }
}
