//! TransactionScope - begin したら必ず commit か rollback で終わらせる
//!
//! 終了し忘れたトランザクションは writer slot を握ったままになり、後続の
//! writer を無限に待たせる。Drop で rollback することで、エラーや panic の
//! 経路でも必ず終了させる。

use std::thread;

use tracing::{error, warn};

use crate::domain::HarnessError;
use crate::ports::StoreConnection;

pub struct TransactionScope<'a> {
    conn: &'a dyn StoreConnection,
    active: bool,
}

impl<'a> TransactionScope<'a> {
    pub fn begin(conn: &'a dyn StoreConnection) -> Result<Self, HarnessError> {
        conn.begin_transaction()?;
        Ok(Self { conn, active: true })
    }

    pub fn commit(mut self) -> Result<(), HarnessError> {
        self.active = false;
        self.conn.commit()
    }

    pub fn rollback(mut self) -> Result<(), HarnessError> {
        self.active = false;
        self.conn.rollback()
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        warn!(
            conn = %self.conn.id(),
            panicking = thread::panicking(),
            "transaction left open on exit path, rolling back"
        );
        if let Err(err) = self.conn.rollback() {
            error!(conn = %self.conn.id(), %err, "implicit rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionState;
    use crate::impls::MemoryStore;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn commit_publishes() {
        let store = MemoryStore::default();
        let conn = store.open();
        let tx = TransactionScope::begin(&conn).unwrap();
        conn.insert_value("kept").unwrap();
        tx.commit().unwrap();
        assert_eq!(conn.transaction_state(), TransactionState::Committed);
        assert_eq!(store.committed_rows().len(), 1);
    }

    #[test]
    fn early_return_rolls_back() {
        let store = MemoryStore::default();
        let conn = store.open();

        let attempt = || -> Result<(), HarnessError> {
            let _tx = TransactionScope::begin(&conn)?;
            conn.insert_value("dropped")?;
            Err(HarnessError::StoreFault("simulated".into()))
        };
        assert!(attempt().is_err());

        assert_eq!(conn.transaction_state(), TransactionState::RolledBack);
        assert!(store.committed_rows().is_empty());
    }

    #[test]
    fn panic_rolls_back_and_frees_writer_slot() {
        let store = MemoryStore::default();
        let conn = store.open();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _tx = TransactionScope::begin(&conn).unwrap();
            conn.insert_value("dropped").unwrap();
            panic!("mid-transaction");
        }));
        assert!(result.is_err());
        assert_eq!(conn.transaction_state(), TransactionState::RolledBack);

        // A later writer is not starved.
        let other = store.open();
        TransactionScope::begin(&other).unwrap().commit().unwrap();
    }
}
