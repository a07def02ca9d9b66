use serde::{Deserialize, Serialize};

/// One row of the append-only `test` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Monotonically increasing, assigned by the store.
    pub id: i64,
    /// Formatted timestamp text (or any caller-supplied text).
    pub value: String,
}

impl Row {
    pub fn new(id: i64, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}
