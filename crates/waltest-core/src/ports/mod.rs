//! Ports - 抽象化レイヤー
//!
//! ストア（外部コラボレータ）と時刻を trait で切り出す。

pub mod clock;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::store::{Store, StoreConnection};
