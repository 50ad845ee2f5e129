use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit row written whenever a harvested profile fact changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Database row id (None until persisted)
    pub id: Option<i64>,
    /// `{orcidid}:update:{field}`
    pub key: String,
    /// JSON-serialized previous value
    pub oldvalue: String,
    /// JSON-serialized new value
    pub newvalue: String,
    pub created: DateTime<Utc>,
}

impl ChangeLogEntry {
    /// Builds the audit row for one changed profile field.
    pub fn profile_update(orcidid: &str, field: &str, old: &Value, new: &Value) -> Self {
        Self {
            id: None,
            key: format!("{}:update:{}", orcidid, field),
            oldvalue: old.to_string(),
            newvalue: new.to_string(),
            created: Utc::now(),
        }
    }
}
