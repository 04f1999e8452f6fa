//! The embedded-SQLite implementation of `tidelog_core::Store` (§4.2).

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;

use tidelog_core::entry::HistoryEntry;
use tidelog_core::errors::{Error as CoreError, Result as CoreResult};
use tidelog_core::query::{self, Atom, AtomKind};
use tidelog_core::store::{CreateOutcome, DeletePredicate, Store};

use crate::db::{self, SqlitePool, WriteHandle};
use crate::errors::{Result, StorageError};
use crate::model::{HistoryEntryDB, NewHistoryEntryDB};
use crate::schema::history_entries;
use crate::schema::history_entries::dsl;

const SEARCH_MAX_RETRY_ATTEMPTS: u32 = 3;
const BULK_IMPORT_BATCH_SIZE: usize = 100;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
    home_dir: String,
    known_custom_columns: Arc<RwLock<HashSet<String>>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the SQLite store at `db_path`, running
    /// migrations and seeding the set of known custom-column names from
    /// `configured_custom_columns` plus whatever names are already present
    /// in stored rows.
    pub fn open(db_path: &Path, home_dir: &str, configured_custom_columns: &[String]) -> Result<Self> {
        let pool = db::establish_pool(db_path)?;
        let writer = WriteHandle::new(db_path.to_path_buf())?;

        let known_custom_columns = Arc::new(RwLock::new(HashSet::from_iter(
            configured_custom_columns.iter().cloned(),
        )));

        {
            let mut conn = db::get_connection(&pool)?;
            let raw_columns: Vec<String> = dsl::history_entries
                .select(dsl::custom_columns)
                .load(&mut conn)?;
            let mut known = known_custom_columns.write().unwrap();
            for raw in raw_columns {
                if let Ok(columns) =
                    serde_json::from_str::<Vec<tidelog_core::entry::CustomColumn>>(&raw)
                {
                    for column in columns {
                        known.insert(column.name);
                    }
                }
            }
        }

        Ok(Self { pool, writer, home_dir: home_dir.to_string(), known_custom_columns })
    }

    fn remember_custom_columns(&self, entry: &HistoryEntry) {
        if entry.custom_columns.is_empty() {
            return;
        }
        let mut known = self.known_custom_columns.write().unwrap();
        for column in &entry.custom_columns {
            known.insert(column.name.clone());
        }
    }
}

/// Retries `f` up to [`SEARCH_MAX_RETRY_ATTEMPTS`] times on "database is
/// locked", per §4.6's separate (smaller) retry budget for reads driven by
/// the search path; any other error surfaces immediately.
fn search_retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_locked() && attempt + 1 < SEARCH_MAX_RETRY_ATTEMPTS => {
                std::thread::sleep(Duration::from_millis(25 * 2u64.pow(attempt)));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create(&self, entry: &HistoryEntry) -> CoreResult<CreateOutcome> {
        let new_row = NewHistoryEntryDB::from_entry(entry).map_err(CoreError::from)?;
        let outcome = self
            .writer
            .exec(move |conn, attempt| -> Result<CreateOutcome> {
                match diesel::insert_into(history_entries::table)
                    .values(&new_row)
                    .execute(conn)
                {
                    Ok(_) => Ok(CreateOutcome::Inserted),
                    Err(diesel::result::Error::DatabaseError(
                        diesel::result::DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => Ok(CreateOutcome::AlreadyExists { first_attempt: attempt == 0 }),
                    Err(e) => Err(StorageError::from(e)),
                }
            })
            .await
            .map_err(CoreError::from)?;
        self.remember_custom_columns(entry);
        Ok(outcome)
    }

    async fn add_if_new(&self, entry: &HistoryEntry) -> CoreResult<bool> {
        let new_row = NewHistoryEntryDB::from_entry(entry).map_err(CoreError::from)?;
        let username = entry.local_username.clone();
        let host = entry.hostname.clone();
        let command = entry.command.clone();
        let cwd = entry.current_working_directory.clone();
        let home = entry.home_directory.clone();
        let exit_code = entry.exit_code;
        let start = entry.start_time;
        let end = entry.end_time;
        let device = entry.device_id.clone();
        let entry_id = entry.entry_id.clone();

        let inserted = self
            .writer
            .exec(move |conn, _attempt| -> Result<bool> {
                let existing = dsl::history_entries
                    .filter(dsl::local_username.eq(&username))
                    .filter(dsl::hostname.eq(&host))
                    .filter(dsl::command.eq(&command))
                    .filter(dsl::current_working_directory.eq(&cwd))
                    .filter(dsl::home_directory.eq(&home))
                    .filter(dsl::exit_code.eq(exit_code))
                    .filter(dsl::start_time.eq(start))
                    .filter(dsl::end_time.eq(end))
                    .filter(dsl::device_id.eq(&device))
                    .filter(dsl::entry_id.eq(&entry_id))
                    .count()
                    .get_result::<i64>(conn)
                    .map_err(StorageError::from)?;

                if existing > 0 {
                    return Ok(false);
                }

                match diesel::insert_into(history_entries::table)
                    .values(&new_row)
                    .execute(conn)
                {
                    Ok(_) => Ok(true),
                    Err(diesel::result::Error::DatabaseError(
                        diesel::result::DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => Ok(false),
                    Err(e) => Err(StorageError::from(e)),
                }
            })
            .await
            .map_err(CoreError::from)?;

        if inserted {
            self.remember_custom_columns(entry);
        }
        Ok(inserted)
    }

    async fn delete(&self, predicate: &DeletePredicate) -> CoreResult<usize> {
        let device_id = predicate.device_id.clone();
        let end_time = predicate.end_time;
        let entry_id = predicate.entry_id.clone();

        let affected = self
            .writer
            .exec(move |conn, _attempt| -> Result<usize> {
                let mut query = dsl::history_entries
                    .filter(dsl::device_id.eq(&device_id))
                    .into_boxed();

                query = match (&end_time, &entry_id) {
                    (Some(end_time), Some(entry_id)) => {
                        query.filter(dsl::end_time.eq(*end_time).or(dsl::entry_id.eq(entry_id.clone())))
                    }
                    (Some(end_time), None) => query.filter(dsl::end_time.eq(*end_time)),
                    (None, Some(entry_id)) => query.filter(dsl::entry_id.eq(entry_id.clone())),
                    (None, None) => return Ok(0),
                };

                diesel::delete(query).execute(conn).map_err(StorageError::from)
            })
            .await
            .map_err(CoreError::from)?;
        Ok(affected)
    }

    async fn search(&self, raw_query: &str, limit: i64) -> CoreResult<Vec<HistoryEntry>> {
        let atoms = query::parse_query(raw_query).map_err(|e| CoreError::protocol(e.to_string()))?;

        {
            let known = self.known_custom_columns.read().unwrap();
            for atom in &atoms {
                if let AtomKind::Custom { name, .. } = &atom.kind {
                    if !known.contains(name) {
                        return Err(CoreError::protocol(format!("unknown search atom: {name}:")));
                    }
                }
            }
        }

        let pool = self.pool.clone();
        let rows: Vec<HistoryEntryDB> = search_retry(move || {
            let mut conn = db::get_connection(&pool)?;
            dsl::history_entries
                .order(dsl::end_time.desc())
                .load::<HistoryEntryDB>(&mut conn)
                .map_err(StorageError::from)
        })
        .map_err(CoreError::from)?;

        let mut matched = Vec::new();
        for row in rows {
            let entry = row.into_entry().map_err(CoreError::from)?;
            if matches_all(&atoms, &entry, &self.home_dir)? {
                matched.push(entry);
            }
        }

        if limit > 0 {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn bulk_import(&self, entries: &[HistoryEntry]) -> CoreResult<usize> {
        let mut total = 0usize;
        for chunk in entries.chunks(BULK_IMPORT_BATCH_SIZE) {
            let rows: Vec<NewHistoryEntryDB> = chunk
                .iter()
                .map(NewHistoryEntryDB::from_entry)
                .collect::<Result<_>>()
                .map_err(CoreError::from)?;

            let inserted = self
                .writer
                .exec(move |conn, _attempt| -> Result<usize> {
                    diesel::insert_into(history_entries::table)
                        .values(&rows)
                        .execute(conn)
                        .map_err(StorageError::from)
                })
                .await
                .map_err(CoreError::from)?;
            total += inserted;
        }

        self.writer
            .exec(|conn, _attempt| -> Result<()> {
                diesel::sql_query("PRAGMA wal_checkpoint(TRUNCATE)")
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)?;

        for entry in entries {
            self.remember_custom_columns(entry);
        }
        Ok(total)
    }

    async fn all_entries_oldest_first(&self) -> CoreResult<Vec<HistoryEntry>> {
        let pool = self.pool.clone();
        let rows: Vec<HistoryEntryDB> = search_retry(move || {
            let mut conn = db::get_connection(&pool)?;
            dsl::history_entries
                .order(dsl::end_time.asc())
                .load::<HistoryEntryDB>(&mut conn)
                .map_err(StorageError::from)
        })
        .map_err(CoreError::from)?;

        rows.into_iter().map(|row| row.into_entry().map_err(CoreError::from)).collect()
    }

    async fn entries_since(&self, since: i64) -> CoreResult<Vec<HistoryEntry>> {
        let pool = self.pool.clone();
        let rows: Vec<HistoryEntryDB> = search_retry(move || {
            let mut conn = db::get_connection(&pool)?;
            dsl::history_entries
                .filter(dsl::start_time.ge(since))
                .order(dsl::end_time.desc())
                .load::<HistoryEntryDB>(&mut conn)
                .map_err(StorageError::from)
        })
        .map_err(CoreError::from)?;

        rows.into_iter().map(|row| row.into_entry().map_err(CoreError::from)).collect()
    }
}

/// Evaluates every atom against `entry`, ANDing the results together
/// (negated atoms invert their individual match).
fn matches_all(atoms: &[Atom], entry: &HistoryEntry, home_dir: &str) -> CoreResult<bool> {
    for atom in atoms {
        let positive = matches_one(atom, entry, home_dir)?;
        let matched = if atom.negate { !positive } else { positive };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_one(atom: &Atom, entry: &HistoryEntry, home_dir: &str) -> CoreResult<bool> {
    Ok(match &atom.kind {
        AtomKind::Plain(text) => {
            entry.command.contains(text.as_str())
                || entry.hostname.contains(text.as_str())
                || entry.current_working_directory.contains(text.as_str())
        }
        AtomKind::User(v) => entry.local_username.contains(v.as_str()),
        AtomKind::Host(v) => entry.hostname.contains(v.as_str()),
        AtomKind::Cwd(v) => {
            let expanded = HistoryEntry::expand_cwd_tilde(&entry.current_working_directory, home_dir);
            entry.current_working_directory.contains(v.as_str()) || expanded.contains(v.as_str())
        }
        AtomKind::ExitCode(v) => entry.exit_code == *v,
        AtomKind::Before(v) => entry.start_time / 1000 < *v,
        AtomKind::After(v) => entry.start_time / 1000 > *v,
        AtomKind::StartTime(v) => entry.start_time / 1000 == *v,
        AtomKind::EndTime(v) => entry.end_time / 1000 == *v,
        AtomKind::Command(v) => entry.command.contains(v.as_str()),
        AtomKind::Custom { name, value } => entry
            .custom_columns
            .iter()
            .any(|c| &c.name == name && c.value.contains(value.as_str())),
    })
}
