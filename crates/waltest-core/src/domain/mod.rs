//! Domain model (ids, states, rows, task specs, errors).

pub mod errors;
pub mod ids;
pub mod row;
pub mod spec;
pub mod state;

pub use self::errors::HarnessError;
pub use self::ids::{ConnectionId, SubscriptionId, TaskId};
pub use self::row::Row;
pub use self::spec::{ConnectionChoice, ScenarioParams, TaskShape, TaskSpec, Work};
pub use self::state::{TaskState, TransactionState};
