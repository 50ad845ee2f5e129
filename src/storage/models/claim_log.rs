use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State transition recorded by one claims-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Claimed,
    Updated,
    Removed,
    Unchanged,
    Forced,
    /// Sentinel marking a completed full reconciliation for an ORCID iD.
    #[serde(rename = "#full-import")]
    FullImport,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Updated => "updated",
            ClaimStatus::Removed => "removed",
            ClaimStatus::Unchanged => "unchanged",
            ClaimStatus::Forced => "forced",
            ClaimStatus::FullImport => "#full-import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "claimed" => Some(ClaimStatus::Claimed),
            "updated" => Some(ClaimStatus::Updated),
            "removed" => Some(ClaimStatus::Removed),
            "unchanged" => Some(ClaimStatus::Unchanged),
            "forced" => Some(ClaimStatus::Forced),
            "#full-import" => Some(ClaimStatus::FullImport),
            _ => None,
        }
    }

    /// Statuses that assert the author is (still) on the record.
    pub fn is_claiming(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Claimed | ClaimStatus::Updated | ClaimStatus::Forced
        )
    }
}

/// One immutable row of the append-only claims log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLogEntry {
    /// Database row id (None until persisted)
    pub id: Option<i64>,
    pub orcidid: String,
    /// Empty for `#full-import` sentinels
    pub bibcode: String,
    pub status: ClaimStatus,
    pub provenance: String,
    pub created: DateTime<Utc>,
}

impl ClaimLogEntry {
    pub fn new(
        bibcode: impl Into<String>,
        orcidid: impl Into<String>,
        status: ClaimStatus,
        provenance: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            orcidid: orcidid.into(),
            bibcode: bibcode.into(),
            status,
            provenance: provenance.into(),
            created,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.status == ClaimStatus::FullImport
    }
}
