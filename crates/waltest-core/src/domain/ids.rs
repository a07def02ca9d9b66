//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type で型ごとに区別します。
//! - 生成順でソート可能（同じミリ秒内でも単調増加、FIFO の検証ログが読みやすい）
//! - `TaskId` と `SubscriptionId` を取り違えるとコンパイルエラー

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::LazyLock;
use ulid::{Generator, Ulid};

/// Process-wide monotonic source shared by every id flavour.
static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Marker trait for each id flavour; supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時のサイズは `Ulid` と同じ 16 bytes。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Fresh id from the current time, greater than every id generated
    /// before it in this process.
    pub fn generate() -> Self {
        // Overflow needs 2^80 ids within one millisecond.
        let ulid = GENERATOR.lock().generate().unwrap_or_else(|_| Ulid::new());
        Self::from_ulid(ulid)
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscription {}

impl IdMarker for Subscription {
    fn prefix() -> &'static str {
        "sub-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Connection {}

impl IdMarker for Connection {
    fn prefix() -> &'static str {
        "conn-"
    }
}

/// Identifier of a unit of work submitted to the worker pool.
pub type TaskId = Id<Task>;

/// Identifier of a result-delivery subscription.
pub type SubscriptionId = Id<Subscription>;

/// Identifier of one logical store handle.
pub type ConnectionId = Id<Connection>;
