//! Impls - Store port の実装
//!
//! # 含まれる実装
//! - **MemoryStore**: WAL の client 側契約をプロセス内で再現（torn read も再現可能）
//! - **SqliteStore**: rusqlite による実ファイルのストア

mod ownership;

pub mod memory_store;
pub mod sqlite_store;

pub use self::memory_store::{MemoryConnection, MemoryStore, MemoryStoreOptions};
pub use self::sqlite_store::{SqliteConnection, SqliteStore, SqliteStoreOptions};
