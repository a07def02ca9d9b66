//! Store port - トランザクション付きストアの抽象化
//!
//! ストレージエンジン本体は外部コラボレータ扱い。ここでは client から見える
//! 並行性の契約だけを定義する:
//! - reader は writer のトランザクション中でも別 handle から読める（WAL）
//! - 2 つ目の writer は 1 つ目が commit / rollback するまで begin で待つ
//! - トランザクションは begin したスレッドが所有する

use std::sync::Arc;

use crate::domain::{ConnectionId, HarnessError, TransactionState};

/// One logical handle to the persistent table.
///
/// Handles are `Send + Sync` so the same handle can be shared by tasks on
/// different workers; whether two tasks share a handle is a scenario knob.
pub trait StoreConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Start a writer transaction owned by the calling thread.
    ///
    /// Blocks while another writer (on any handle) holds the store's writer
    /// slot. Beginning twice from the owning thread is
    /// [`HarnessError::InvalidTransactionState`].
    fn begin_transaction(&self) -> Result<(), HarnessError>;

    /// Append a row and return its id. Works with or without a transaction.
    fn insert_value(&self, text: &str) -> Result<i64, HarnessError>;

    /// Value of the row with the highest id visible through this handle.
    fn read_latest_value(&self) -> Result<String, HarnessError>;

    fn commit(&self) -> Result<(), HarnessError>;

    fn rollback(&self) -> Result<(), HarnessError>;

    fn transaction_state(&self) -> TransactionState;
}

/// Factory for handles onto one store.
pub trait Store: Send + Sync {
    /// Open a distinct handle.
    fn connect(&self) -> Result<Arc<dyn StoreConnection>, HarnessError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}
