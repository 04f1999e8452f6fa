use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tidelog_core::entry::{CustomColumn, HistoryEntry};

use crate::errors::Result;
use crate::schema::history_entries;

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = history_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryEntryDB {
    pub id: i32,
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
    pub custom_columns: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = history_entries)]
pub struct NewHistoryEntryDB {
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
    pub custom_columns: String,
}

impl NewHistoryEntryDB {
    pub fn from_entry(entry: &HistoryEntry) -> Result<Self> {
        Ok(Self {
            local_username: entry.local_username.clone(),
            hostname: entry.hostname.clone(),
            home_directory: entry.home_directory.clone(),
            command: entry.command.clone(),
            current_working_directory: entry.current_working_directory.clone(),
            exit_code: entry.exit_code,
            start_time: entry.start_time,
            end_time: entry.end_time,
            device_id: entry.device_id.clone(),
            entry_id: entry.entry_id.clone(),
            custom_columns: serde_json::to_string(&entry.custom_columns)?,
        })
    }
}

impl HistoryEntryDB {
    pub fn into_entry(self) -> Result<HistoryEntry> {
        let custom_columns: Vec<CustomColumn> =
            serde_json::from_str(&self.custom_columns).unwrap_or_default();
        Ok(HistoryEntry {
            local_username: self.local_username,
            hostname: self.hostname,
            home_directory: self.home_directory,
            command: self.command,
            current_working_directory: self.current_working_directory,
            exit_code: self.exit_code,
            start_time: self.start_time,
            end_time: self.end_time,
            device_id: self.device_id,
            entry_id: self.entry_id,
            custom_columns,
        })
    }
}
