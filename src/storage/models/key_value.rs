use serde::{Deserialize, Serialize};

/// Checkpoint consulted by the update poller.
pub const KEY_LAST_CHECK: &str = "last.check";
/// Checkpoint stored by the reindex maintenance operation.
pub const KEY_LAST_REINDEX: &str = "last.reindex";
/// Checkpoint stored by the repush maintenance operation.
pub const KEY_LAST_REPUSH: &str = "last.repush";
/// Checkpoint stored by the refetch maintenance operation.
pub const KEY_LAST_REFETCH: &str = "last.refetch";

/// Timestamp predating every profile; used when a checkpoint has
/// never been written so the first run replays everything.
pub const BEGINNING_OF_TIME: &str = "1974-11-09T22:56:52.518001Z";

/// Small string checkpoint persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
