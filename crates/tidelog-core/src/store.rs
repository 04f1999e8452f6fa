//! The `Store` trait: the contract every local persistence backend must
//! satisfy (§4.2). `tidelog-store` provides the embedded-SQLite
//! implementation; this crate only names the interface so that
//! `tidelog-sync` and `tidelog-capture` can depend on it without pulling in
//! diesel.

use async_trait::async_trait;

use crate::entry::HistoryEntry;
use crate::errors::Result;

/// A predicate matching `DeviceId = device_id AND (EndTime = end_time OR
/// EntryId = entry_id)`. Either `end_time` or `entry_id` may be absent;
/// the OR is essential, see §9 "Deletion predicate OR".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePredicate {
    pub device_id: String,
    pub end_time: Option<i64>,
    pub entry_id: Option<String>,
}

/// Outcome of a single `Create` call, distinguishing a fresh insert from an
/// idempotent no-op on a uniqueness collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Inserted,
    /// The uniqueness tuple already existed. Carries whether this was
    /// detected on the very first write attempt (in which case the caller
    /// may want to treat it as a true duplicate submission) or only on a
    /// lock-retry (where it is swallowed silently, since an earlier attempt
    /// likely already succeeded).
    AlreadyExists { first_attempt: bool },
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts `entry`. Idempotent on the uniqueness tuple, except that a
    /// collision detected on the first attempt is reported via
    /// [`CreateOutcome::AlreadyExists`] with `first_attempt: true`.
    async fn create(&self, entry: &HistoryEntry) -> Result<CreateOutcome>;

    /// Check-then-insert under the uniqueness tuple. Returns `true` if a new
    /// row was inserted, `false` if the tuple already existed.
    async fn add_if_new(&self, entry: &HistoryEntry) -> Result<bool>;

    /// Deletes every row matching `predicate`. Returns the number of rows
    /// removed; zero is a valid, non-error outcome (matches §8 "a
    /// DeletionRequest targeting an entry that does not exist is a
    /// no-op").
    async fn delete(&self, predicate: &DeletePredicate) -> Result<usize>;

    /// Evaluates `query` (§4.6) and returns matching rows ordered by
    /// `end_time DESC`, capped at `limit` rows if `limit` is positive.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<HistoryEntry>>;

    /// Batched insert (100 rows/batch) followed by a WAL checkpoint, used
    /// by `import-json` and reupload-adjacent maintenance flows.
    async fn bulk_import(&self, entries: &[HistoryEntry]) -> Result<usize>;

    /// All rows currently stored, oldest-to-newest by `end_time`, used by
    /// `export`/`export-json` and by the sync engine's reupload flow.
    async fn all_entries_oldest_first(&self) -> Result<Vec<HistoryEntry>>;

    /// Rows with `start_time >= since`, used by the sync engine's deferred
    /// replay flow (`after:<missed-upload-timestamp>`).
    async fn entries_since(&self, since: i64) -> Result<Vec<HistoryEntry>>;
}
