//! MemoryStore - WAL の client 側契約をプロセス内で再現するストア
//!
//! # モデル
//! - committed 行は全 handle から見える
//! - writer slot はストア全体で 1 つ（同じ handle 内では共有される）
//! - 未 commit の行と書き込み途中の行は、書いている handle からだけ見える
//! - `torn_write_step` を設定すると insert は 1 文字ずつ値を公開するので、
//!   同じ handle を使う reader は途中の値を読める（torn read）

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::ownership::TxOwner;
use crate::domain::{ConnectionId, HarnessError, Row, TransactionState};
use crate::ports::{Store, StoreConnection};

#[derive(Debug, Clone, Default)]
pub struct MemoryStoreOptions {
    /// Delay between publishing successive characters of an inserted value.
    /// `None` publishes the whole value at once.
    pub torn_write_step: Option<Duration>,
}

struct WriterSlot {
    holder: ConnectionId,
    /// Concurrent holders on the same handle (a transaction plus stray
    /// non-transactional writers).
    depth: usize,
}

struct StoreState {
    committed: Vec<Row>,
    next_id: i64,
    writer: Option<WriterSlot>,
}

struct Shared {
    state: Mutex<StoreState>,
    writer_free: Condvar,
}

impl Shared {
    fn acquire_writer(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        loop {
            match &mut state.writer {
                None => {
                    state.writer = Some(WriterSlot {
                        holder: conn,
                        depth: 1,
                    });
                    return;
                }
                Some(slot) if slot.holder == conn => {
                    slot.depth += 1;
                    return;
                }
                Some(_) => self.writer_free.wait(&mut state),
            }
        }
    }

    fn release_writer(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(slot) = &mut state.writer
            && slot.holder == conn
        {
            slot.depth -= 1;
            if slot.depth == 0 {
                state.writer = None;
                self.writer_free.notify_all();
            }
        }
    }

    fn allocate_id(&self) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn publish(&self, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.state.lock();
        state.committed.extend(rows);
    }

    fn latest_committed(&self) -> Option<Row> {
        let state = self.state.lock();
        state.committed.iter().max_by_key(|row| row.id).cloned()
    }
}

/// In-process store honoring the WAL concurrency contract.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    options: MemoryStoreOptions,
}

impl MemoryStore {
    pub fn new(options: MemoryStoreOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState {
                    committed: Vec::new(),
                    next_id: 1,
                    writer: None,
                }),
                writer_free: Condvar::new(),
            }),
            options,
        }
    }

    /// Concrete handle type, for callers that want it without dynamic dispatch.
    pub fn open(&self) -> MemoryConnection {
        MemoryConnection {
            id: ConnectionId::generate(),
            shared: Arc::clone(&self.shared),
            owner: TxOwner::new(),
            local: Mutex::new(LocalView::default()),
            torn_write_step: self.options.torn_write_step,
        }
    }

    /// Every committed row in id order.
    pub fn committed_rows(&self) -> Vec<Row> {
        let mut rows = self.shared.state.lock().committed.clone();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreOptions::default())
    }
}

impl Store for MemoryStore {
    fn connect(&self) -> Result<Arc<dyn StoreConnection>, HarnessError> {
        Ok(Arc::new(self.open()))
    }

    fn describe(&self) -> String {
        match self.options.torn_write_step {
            Some(step) => format!("memory(torn_write_step={}ms)", step.as_millis()),
            None => "memory".to_string(),
        }
    }
}

#[derive(Default)]
struct LocalView {
    /// Rows written inside the handle's open transaction.
    pending: Vec<Row>,
    /// Rows whose value is still being written.
    in_progress: Vec<Row>,
}

pub struct MemoryConnection {
    id: ConnectionId,
    shared: Arc<Shared>,
    owner: TxOwner,
    local: Mutex<LocalView>,
    torn_write_step: Option<Duration>,
}

impl MemoryConnection {
    /// Write `text` into a freshly allocated row, publishing it to the local
    /// view piece by piece when a torn-write step is configured.
    fn write_row(&self, text: &str) -> Row {
        let id = self.shared.allocate_id();
        if let Some(step) = self.torn_write_step {
            self.local.lock().in_progress.push(Row::new(id, ""));
            for ch in text.chars() {
                {
                    let mut local = self.local.lock();
                    if let Some(row) = local.in_progress.iter_mut().find(|r| r.id == id) {
                        row.value.push(ch);
                    }
                }
                thread::sleep(step);
            }
            self.local.lock().in_progress.retain(|r| r.id != id);
        }
        Row::new(id, text)
    }
}

impl StoreConnection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn begin_transaction(&self) -> Result<(), HarnessError> {
        self.owner.claim()?;
        self.shared.acquire_writer(self.id);
        debug!(conn = %self.id, "begin transaction");
        Ok(())
    }

    fn insert_value(&self, text: &str) -> Result<i64, HarnessError> {
        if self.owner.is_held() {
            // Joins whatever transaction is open on this handle, even one
            // owned by another thread.
            let row = self.write_row(text);
            let id = row.id;
            if self.owner.is_held() {
                self.local.lock().pending.push(row);
            } else {
                self.shared.publish([row]);
            }
            trace!(conn = %self.id, id, "insert inside transaction");
            return Ok(id);
        }

        self.shared.acquire_writer(self.id);
        let row = self.write_row(text);
        let id = row.id;
        self.shared.publish([row]);
        self.shared.release_writer(self.id);
        trace!(conn = %self.id, id, "autocommit insert");
        Ok(id)
    }

    fn read_latest_value(&self) -> Result<String, HarnessError> {
        let committed = self.shared.latest_committed();
        let local = {
            let local = self.local.lock();
            local
                .pending
                .iter()
                .chain(local.in_progress.iter())
                .max_by_key(|row| row.id)
                .cloned()
        };
        [committed, local]
            .into_iter()
            .flatten()
            .max_by_key(|row| row.id)
            .map(|row| row.value)
            .ok_or(HarnessError::EmptyResult)
    }

    fn commit(&self) -> Result<(), HarnessError> {
        self.owner.ensure_owned("commit")?;
        let rows = std::mem::take(&mut self.local.lock().pending);
        let count = rows.len();
        self.shared.publish(rows);
        self.shared.release_writer(self.id);
        self.owner.release(TransactionState::Committed);
        debug!(conn = %self.id, rows = count, "commit");
        Ok(())
    }

    fn rollback(&self) -> Result<(), HarnessError> {
        self.owner.ensure_owned("rollback")?;
        let discarded = std::mem::take(&mut self.local.lock().pending).len();
        self.shared.release_writer(self.id);
        self.owner.release(TransactionState::RolledBack);
        debug!(conn = %self.id, discarded, "rollback");
        Ok(())
    }

    fn transaction_state(&self) -> TransactionState {
        self.owner.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn read_on_empty_store_is_empty_result() {
        let store = MemoryStore::default();
        let conn = store.open();
        assert_eq!(conn.read_latest_value(), Err(HarnessError::EmptyResult));
    }

    #[test]
    fn insert_then_read_returns_value() {
        let store = MemoryStore::default();
        let conn = store.open();
        conn.insert_value("10:15:00 AM").unwrap();
        assert_eq!(conn.read_latest_value().unwrap(), "10:15:00 AM");
    }

    #[test]
    fn latest_is_highest_id() {
        let store = MemoryStore::default();
        let conn = store.open();
        let a = conn.insert_value("a").unwrap();
        let b = conn.insert_value("b").unwrap();
        assert!(b > a);
        assert_eq!(conn.read_latest_value().unwrap(), "b");
    }

    #[test]
    fn commit_and_rollback_require_active_transaction() {
        let store = MemoryStore::default();
        let conn = store.open();
        assert!(matches!(
            conn.commit(),
            Err(HarnessError::InvalidTransactionState(_))
        ));
        assert!(matches!(
            conn.rollback(),
            Err(HarnessError::InvalidTransactionState(_))
        ));
    }

    #[test]
    fn double_begin_on_one_thread_fails() {
        let store = MemoryStore::default();
        let conn = store.open();
        conn.begin_transaction().unwrap();
        assert!(matches!(
            conn.begin_transaction(),
            Err(HarnessError::InvalidTransactionState(_))
        ));
        conn.rollback().unwrap();
    }

    #[test]
    fn uncommitted_rows_are_invisible_to_other_handles() {
        let store = MemoryStore::default();
        let writer = store.open();
        let reader = store.open();
        reader.insert_value("before").unwrap();

        writer.begin_transaction().unwrap();
        writer.insert_value("during").unwrap();
        assert_eq!(writer.read_latest_value().unwrap(), "during");
        assert_eq!(reader.read_latest_value().unwrap(), "before");

        writer.commit().unwrap();
        assert_eq!(reader.read_latest_value().unwrap(), "during");
        assert_eq!(writer.transaction_state(), TransactionState::Committed);
    }

    #[test]
    fn rollback_discards_writes() {
        let store = MemoryStore::default();
        let conn = store.open();
        conn.begin_transaction().unwrap();
        conn.insert_value("gone").unwrap();
        conn.rollback().unwrap();
        assert_eq!(conn.read_latest_value(), Err(HarnessError::EmptyResult));
        assert_eq!(conn.transaction_state(), TransactionState::RolledBack);
    }

    #[test]
    fn second_writer_blocks_until_first_commits() {
        let store = MemoryStore::default();
        let first = store.open();
        first.begin_transaction().unwrap();

        let (tx, rx) = mpsc::channel();
        let second_store = store.clone();
        let join = thread::spawn(move || {
            let second = second_store.open();
            second.begin_transaction().unwrap();
            tx.send(Instant::now()).unwrap();
            second.insert_value("second").unwrap();
            second.commit().unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        first.insert_value("first").unwrap();
        first.commit().unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        join.join().unwrap();

        let values: Vec<_> = store.committed_rows().into_iter().map(|r| r.value).collect();
        assert_eq!(values, vec!["first", "second"]);
    }

    #[test]
    fn reader_is_not_blocked_by_active_writer() {
        let store = MemoryStore::default();
        let writer = store.open();
        writer.insert_value("committed").unwrap();
        writer.begin_transaction().unwrap();
        writer.insert_value("pending").unwrap();

        let reader_store = store.clone();
        let value = thread::spawn(move || reader_store.open().read_latest_value())
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(value, "committed");
        writer.commit().unwrap();
    }

    #[test]
    fn shared_handle_insert_joins_foreign_transaction() {
        let store = MemoryStore::default();
        let shared = Arc::new(store.open());
        shared.begin_transaction().unwrap();

        let stray = Arc::clone(&shared);
        thread::spawn(move || stray.insert_value("stray").unwrap())
            .join()
            .unwrap();

        // Rolled back together with the owner's transaction.
        shared.rollback().unwrap();
        assert!(store.committed_rows().is_empty());
    }

    #[test]
    fn torn_write_is_observable_through_same_handle() {
        let store = MemoryStore::new(MemoryStoreOptions {
            torn_write_step: Some(Duration::from_millis(20)),
        });
        let shared = Arc::new(store.open());
        shared.insert_value("10:15:00 AM").unwrap();

        let writer = Arc::clone(&shared);
        let join = thread::spawn(move || writer.insert_value("10:15:03 AM").unwrap());

        let full = ["10:15:00 AM", "10:15:03 AM"];
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut torn = None;
        while Instant::now() < deadline && torn.is_none() {
            let seen = shared.read_latest_value().unwrap();
            if !full.contains(&seen.as_str()) {
                torn = Some(seen);
            }
            thread::sleep(Duration::from_millis(5));
        }
        join.join().unwrap();

        let torn = torn.expect("a partial value should be visible mid-write");
        assert!("10:15:03 AM".starts_with(&torn));
        assert_eq!(shared.read_latest_value().unwrap(), "10:15:03 AM");
    }

    #[test]
    fn torn_write_is_hidden_from_other_handles() {
        let store = MemoryStore::new(MemoryStoreOptions {
            torn_write_step: Some(Duration::from_millis(10)),
        });
        let writer = store.open();
        let reader = store.open();
        reader.insert_value("old").unwrap();

        let join = thread::spawn(move || writer.insert_value("new value").unwrap());
        let deadline = Instant::now() + Duration::from_millis(300);
        while Instant::now() < deadline {
            let seen = reader.read_latest_value().unwrap();
            assert!(seen == "old" || seen == "new value", "saw {seen}");
            thread::sleep(Duration::from_millis(3));
        }
        join.join().unwrap();
    }
}
