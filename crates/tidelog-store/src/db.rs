//! Connection pooling, the single-writer thread, and the retry-on-lock
//! wrapper required by §4.2: "every write and every read must be wrapped in
//! a bounded retry loop that treats 'database is locked' as transient."

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};
use diesel::{Connection, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rand::Rng;
use tokio::sync::oneshot;

use crate::errors::{Result, StorageError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

const MAX_RETRY_ATTEMPTS: u32 = 10;
const BASE_BACKOFF_MS: u64 = 20;
const MAX_BACKOFF_MS: u64 = 2000;

fn io_err(msg: impl Into<String>) -> StorageError {
    StorageError::Migration(Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg.into())))
}

fn apply_pragmas(conn: &mut SqliteConnection) -> Result<()> {
    conn.batch_execute(
        "PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;",
    )
    .map_err(StorageError::from)
}

/// Opens a pooled, read-oriented connection manager against `db_path`,
/// applies the WAL + busy-timeout pragmas, and runs pending migrations.
pub fn establish_pool(db_path: &Path) -> Result<Arc<SqlitePool>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(e.to_string()))?;
    }
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy().as_ref());
    let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

    {
        let mut conn = pool.get()?;
        apply_pragmas(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS).map_err(StorageError::Migration)?;
    }

    Ok(Arc::new(pool))
}

pub fn get_connection(
    pool: &SqlitePool,
) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
    Ok(pool.get()?)
}

/// Retries `f` with exponential jittered backoff while it reports the
/// database as locked, capped at [`MAX_RETRY_ATTEMPTS`]. `f` receives the
/// zero-based attempt index so a caller like `Create` can distinguish a
/// uniqueness collision observed on the first attempt (reported) from one
/// observed on a retry (swallowed, since an earlier attempt likely already
/// succeeded).
pub fn retry_on_lock<T>(mut f: impl FnMut(u32) -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match f(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_locked() && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                std::thread::sleep(backoff_with_jitter(attempt));
                attempt += 1;
            }
            Err(err) if err.is_locked() => return Err(StorageError::RetriesExhausted(MAX_RETRY_ATTEMPTS)),
            Err(err) => return Err(err),
        }
    }
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10));
    let capped = base.min(MAX_BACKOFF_MS);
    let half = capped / 2 + 1;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(capped / 2 + jitter)
}

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

/// Serializes every write onto a single dedicated connection owned by a
/// background thread, so writers within this process never contend with
/// each other — only with other processes' writer threads, which
/// [`retry_on_lock`] handles.
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::Sender<Job>,
}

impl WriteHandle {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let mut conn = SqliteConnection::establish(&db_path.to_string_lossy())
            .map_err(|e| io_err(e.to_string()))?;
        apply_pragmas(&mut conn)?;

        std::thread::Builder::new()
            .name("tidelog-writer".into())
            .spawn(move || {
                let mut conn = conn;
                for job in receiver {
                    job(&mut conn);
                }
            })
            .map_err(|e| io_err(e.to_string()))?;

        Ok(Self { sender })
    }

    /// Submits `f` to the writer thread and awaits its result. `f` is
    /// retried by [`retry_on_lock`] internally, so it must be safe to call
    /// more than once — build any owned payload before the closure and
    /// borrow it from inside, rather than moving it in.
    pub async fn exec<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&mut SqliteConnection, u32) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let result = retry_on_lock(|attempt| f(conn, attempt));
            let _ = tx.send(result);
        });
        self.sender.send(job).map_err(|_| io_err("writer thread is gone"))?;
        rx.await.map_err(|_| io_err("writer thread dropped its response"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::RunQueryDsl;

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = backoff_with_jitter(0);
        let d8 = backoff_with_jitter(8);
        assert!(d0.as_millis() < d8.as_millis());
        assert!(d8.as_millis() as u64 <= MAX_BACKOFF_MS);
    }

    #[tokio::test]
    async fn write_handle_executes_closures_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = establish_pool(&db_path).unwrap();
        let writer = WriteHandle::new(db_path).unwrap();

        writer
            .exec(move |conn, _attempt| {
                diesel::sql_query("CREATE TABLE IF NOT EXISTS t (v INTEGER)")
                    .execute(conn)
                    .map_err(StorageError::from)
            })
            .await
            .unwrap();

        for i in 0..5 {
            writer
                .exec(move |conn, _attempt| {
                    diesel::sql_query(format!("INSERT INTO t VALUES ({i})"))
                        .execute(conn)
                        .map_err(StorageError::from)
                })
                .await
                .unwrap();
        }

        let mut conn = get_connection(&pool).unwrap();
        let count: i64 = diesel::dsl::sql::<diesel::sql_types::BigInt>("SELECT COUNT(*) FROM t")
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(count, 5);
    }
}
