//! The history-entry data model: the plaintext `HistoryEntry`, its
//! wire/encrypted form `EncryptedEntry`, and the deletion/dump request
//! envelopes exchanged with the relay.

use serde::{Deserialize, Serialize};

/// One persisted command execution record.
///
/// `EndTime == 0` is the sentinel for "presaved, not yet completed" (see
/// [`HistoryEntry::is_presave`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryEntry {
    pub local_username: String,
    pub hostname: String,
    pub home_directory: String,
    pub command: String,
    pub current_working_directory: String,
    pub exit_code: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub device_id: String,
    pub entry_id: String,
    #[serde(default)]
    pub custom_columns: Vec<CustomColumn>,
}

impl HistoryEntry {
    /// A presave is a command that has been entered but not yet completed.
    pub fn is_presave(&self) -> bool {
        self.end_time == 0
    }

    /// Renders `cwd` with the user's home directory replaced by `~`, as the
    /// capture pipeline does before the entry is persisted.
    pub fn render_cwd_tilde(cwd: &str, home_directory: &str) -> String {
        if !home_directory.is_empty() {
            if let Some(rest) = cwd.strip_prefix(home_directory) {
                return format!("~{rest}");
            }
        }
        cwd.to_string()
    }

    /// Expands a `~/`-prefixed cwd back to its absolute form, the inverse of
    /// [`HistoryEntry::render_cwd_tilde`]. Used by the query atom `cwd:`.
    pub fn expand_cwd_tilde(cwd: &str, home_directory: &str) -> String {
        if let Some(rest) = cwd.strip_prefix('~') {
            return format!("{home_directory}{rest}");
        }
        cwd.to_string()
    }

    /// The uniqueness tuple enforced by the local store (§4.2).
    pub fn uniqueness_tuple(&self) -> UniquenessTuple<'_> {
        UniquenessTuple {
            local_username: &self.local_username,
            hostname: &self.hostname,
            command: &self.command,
            current_working_directory: &self.current_working_directory,
            home_directory: &self.home_directory,
            exit_code: self.exit_code,
            start_time: self.start_time,
            end_time: self.end_time,
            device_id: &self.device_id,
            entry_id: &self.entry_id,
        }
    }
}

/// Borrowed view of the ten-column uniqueness tuple, used for comparisons
/// without cloning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniquenessTuple<'a> {
    pub local_username: &'a str,
    pub hostname: &'a str,
    pub command: &'a str,
    pub current_working_directory: &'a str,
    pub home_directory: &'a str,
    pub exit_code: i32,
    pub start_time: i64,
    pub end_time: i64,
    pub device_id: &'a str,
    pub entry_id: &'a str,
}

/// An ordered `{name, value}` pair captured by a user-configured custom
/// column command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CustomColumn {
    pub name: String,
    pub value: String,
}

/// The wire form of a [`HistoryEntry`]: everything the relay can see is
/// cleartext bookkeeping, the command data itself is opaque ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EncryptedEntry {
    /// Base64-standard-encoded ciphertext + AEAD tag.
    pub encrypted_data: String,
    /// Base64-standard-encoded 12-byte nonce.
    pub nonce: String,
    pub user_id: String,
    /// Cleartext copy of `EndTime`, for server-side time-windowed hints.
    pub date: i64,
    /// Cleartext copy of `EntryId`, so the server can deduplicate.
    pub encrypted_id: String,
    /// Server-managed, not authenticated by the AEAD tag.
    #[serde(default)]
    pub read_count: i64,
    pub device_id: String,
}

/// One message inside a [`DeletionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeletionRequestMessage {
    pub device_id: String,
    pub end_time: i64,
    pub entry_id: String,
}

/// Broadcasts the deletion of one or more entries to every device sharing a
/// `UserId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeletionRequest {
    pub user_id: String,
    pub send_time: i64,
    pub messages: Vec<DeletionRequestMessage>,
}

/// Issued by the relay when a newly bootstrapped device needs the full
/// history from an already-enrolled one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DumpRequest {
    pub user_id: String,
    pub requesting_device_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HistoryEntry {
        HistoryEntry {
            local_username: "alice".into(),
            hostname: "box1".into(),
            home_directory: "/home/alice".into(),
            command: "ls -la".into(),
            current_working_directory: "/home/alice/proj".into(),
            exit_code: 0,
            start_time: 100,
            end_time: 110,
            device_id: "dev-1".into(),
            entry_id: "entry-1".into(),
            custom_columns: vec![],
        }
    }

    #[test]
    fn presave_is_detected_by_zero_end_time() {
        let mut entry = sample();
        entry.end_time = 0;
        assert!(entry.is_presave());
        entry.end_time = 110;
        assert!(!entry.is_presave());
    }

    #[test]
    fn cwd_tilde_round_trips() {
        let rendered = HistoryEntry::render_cwd_tilde("/home/alice/proj", "/home/alice");
        assert_eq!(rendered, "~/proj");
        let expanded = HistoryEntry::expand_cwd_tilde(&rendered, "/home/alice");
        assert_eq!(expanded, "/home/alice/proj");
    }

    #[test]
    fn cwd_outside_home_is_unchanged() {
        let rendered = HistoryEntry::render_cwd_tilde("/tmp/foo", "/home/alice");
        assert_eq!(rendered, "/tmp/foo");
    }

    #[test]
    fn entry_json_round_trips() {
        let entry = sample();
        let json = serde_json::to_string(&entry).unwrap();
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
