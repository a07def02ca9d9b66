//! SqliteStore - rusqlite による実ストア
//!
//! WAL はオープン時のフラグで有効化する。writer の直列化は SQLite 自身
//! （`BEGIN IMMEDIATE` + busy handler）に任せ、ハーネス側でロックは足さない。
//! 既定では二つ目の writer は一つ目が終わるまで待ち続ける。上限は opt-in。
//! torn read はこの adapter では起きない（SQLite の行書き込みは原子的）。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::ownership::TxOwner;
use crate::domain::{ConnectionId, HarnessError, TransactionState};
use crate::ports::{Store, StoreConnection};

pub const TABLE_NAME: &str = "test";

/// Pause between retries while another connection holds the write lock.
const BUSY_RETRY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    pub path: PathBuf,
    pub wal: bool,
    /// `None` waits for a busy writer indefinitely; `Some` gives up with
    /// `StoreFault` after that long.
    pub busy_timeout: Option<Duration>,
}

impl SqliteStoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal: true,
            busy_timeout: None,
        }
    }
}

/// File-backed store. Every [`Store::connect`] opens a separate SQLite connection.
pub struct SqliteStore {
    options: SqliteStoreOptions,
}

impl SqliteStore {
    /// Open (creating if absent) the database and its table.
    pub fn open(options: SqliteStoreOptions) -> Result<Self, HarnessError> {
        let conn = open_connection(&options)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_NAME} \
             (_id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT)"
        ))?;
        info!(path = %options.path.display(), wal = options.wal, "sqlite store ready");
        Ok(Self { options })
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn open_handle(&self) -> Result<SqliteConnection, HarnessError> {
        Ok(SqliteConnection {
            id: ConnectionId::generate(),
            conn: Mutex::new(open_connection(&self.options)?),
            owner: TxOwner::new(),
        })
    }
}

impl Store for SqliteStore {
    fn connect(&self) -> Result<Arc<dyn StoreConnection>, HarnessError> {
        Ok(Arc::new(self.open_handle()?))
    }

    fn describe(&self) -> String {
        format!(
            "sqlite({}, wal={})",
            self.options.path.display(),
            self.options.wal
        )
    }
}

fn open_connection(options: &SqliteStoreOptions) -> Result<Connection, HarnessError> {
    let conn = Connection::open(&options.path)?;
    if options.wal {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            return Err(HarnessError::StoreFault(format!(
                "journal_mode stayed {mode}"
            )));
        }
    }
    match options.busy_timeout {
        Some(timeout) => conn.busy_timeout(timeout)?,
        None => conn.busy_handler(Some(wait_for_writer))?,
    }
    Ok(conn)
}

fn wait_for_writer(_attempts: i32) -> bool {
    thread::sleep(BUSY_RETRY);
    true
}

/// One SQLite connection. Calls on a shared handle are serialized per call
/// (like SQLite's own serialized threading mode), not per transaction.
pub struct SqliteConnection {
    id: ConnectionId,
    conn: Mutex<Connection>,
    owner: TxOwner,
}

impl SqliteConnection {
    fn end(&self, action: &str, sql: &str, end: TransactionState) -> Result<(), HarnessError> {
        self.owner.ensure_owned(action)?;
        let result = self.conn.lock().execute_batch(sql);
        match result {
            Ok(()) => {
                self.owner.release(end);
                debug!(conn = %self.id, "{action}");
                Ok(())
            }
            Err(err) => {
                // Best effort: never leave the writer lock held after a failed end.
                let _ = self.conn.lock().execute_batch("ROLLBACK");
                self.owner.release(TransactionState::RolledBack);
                Err(err.into())
            }
        }
    }
}

impl StoreConnection for SqliteConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn begin_transaction(&self) -> Result<(), HarnessError> {
        self.owner.claim()?;
        if let Err(err) = self.conn.lock().execute_batch("BEGIN IMMEDIATE") {
            self.owner.abandon();
            return Err(err.into());
        }
        debug!(conn = %self.id, "begin transaction");
        Ok(())
    }

    fn insert_value(&self, text: &str) -> Result<i64, HarnessError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!("INSERT INTO {TABLE_NAME} (value) VALUES (?1)"),
            params![text],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn read_latest_value(&self) -> Result<String, HarnessError> {
        let conn = self.conn.lock();
        let value: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT value FROM {TABLE_NAME} ORDER BY _id DESC LIMIT 1"),
                [],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(value) => Ok(value.unwrap_or_default()),
            None => Err(HarnessError::EmptyResult),
        }
    }

    fn commit(&self) -> Result<(), HarnessError> {
        self.end("commit", "COMMIT", TransactionState::Committed)
    }

    fn rollback(&self) -> Result<(), HarnessError> {
        self.end("rollback", "ROLLBACK", TransactionState::RolledBack)
    }

    fn transaction_state(&self) -> TransactionState {
        self.owner.state()
    }
}
