use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for "no claim at this author position".
pub const NO_CLAIM: &str = "-";

/// Which claim array a claim lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimKind {
    Verified,
    Unverified,
}

impl ClaimKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimKind::Verified => "verified",
            ClaimKind::Unverified => "unverified",
        }
    }
}

/// The two claim arrays of a record. Both are kept at the exact
/// length of the record's author list; entry i is either `-` or the
/// ORCID iD claiming author position i.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordClaims {
    #[serde(default)]
    pub verified: Vec<String>,
    #[serde(default)]
    pub unverified: Vec<String>,
}

impl RecordClaims {
    /// Empty arrays sized for `num_authors`.
    pub fn sized(num_authors: usize) -> Self {
        Self {
            verified: vec![NO_CLAIM.to_string(); num_authors],
            unverified: vec![NO_CLAIM.to_string(); num_authors],
        }
    }

    pub fn field(&self, kind: ClaimKind) -> &[String] {
        match kind {
            ClaimKind::Verified => &self.verified,
            ClaimKind::Unverified => &self.unverified,
        }
    }

    pub fn field_mut(&mut self, kind: ClaimKind) -> &mut Vec<String> {
        match kind {
            ClaimKind::Verified => &mut self.verified,
            ClaimKind::Unverified => &mut self.unverified,
        }
    }

    /// Pads or truncates both arrays to `num_authors` entries.
    pub fn normalize(&mut self, num_authors: usize) {
        for kind in [ClaimKind::Verified, ClaimKind::Unverified] {
            let arr = self.field_mut(kind);
            if arr.len() < num_authors {
                arr.resize(num_authors, NO_CLAIM.to_string());
            } else if arr.len() > num_authors {
                arr.truncate(num_authors);
            }
        }
    }

    /// Blanks every occurrence of `orcidid` in both arrays. Returns
    /// true when at least one position was cleared.
    pub fn scrub(&mut self, orcidid: &str) -> bool {
        let mut modified = false;
        for kind in [ClaimKind::Verified, ClaimKind::Unverified] {
            for slot in self.field_mut(kind).iter_mut() {
                if slot == orcidid {
                    *slot = NO_CLAIM.to_string();
                    modified = true;
                }
            }
        }
        modified
    }

    /// Positions held by `orcidid` across both arrays.
    pub fn occurrences(&self, orcidid: &str) -> usize {
        self.verified.iter().filter(|s| *s == orcidid).count()
            + self.unverified.iter().filter(|s| *s == orcidid).count()
    }
}

/// Operator-managed flags on a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStatus {
    /// ORCID iDs that must never be (re-)inserted into this record
    #[serde(default)]
    pub blacklisted: Vec<String>,
}

/// A bibliographic record tracked by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Database row id (None until persisted)
    pub id: Option<i64>,
    /// 19-character canonical record identifier
    pub bibcode: String,
    /// Author display names as they appear on the record
    pub authors: Vec<String>,
    pub claims: RecordClaims,
    /// Operator flags (record-level blacklist)
    pub status: Option<RecordStatus>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub processed: Option<DateTime<Utc>>,
}

impl Record {
    /// Creates a fresh record with empty claim arrays sized to the
    /// supplied author list.
    pub fn new(bibcode: impl Into<String>, authors: Vec<String>) -> Self {
        let now = Utc::now();
        let claims = RecordClaims::sized(authors.len());
        Self {
            id: None,
            bibcode: bibcode.into(),
            authors,
            claims,
            status: None,
            created: now,
            updated: now,
            processed: None,
        }
    }

    /// True when this record refuses claims from the given ORCID iD.
    pub fn is_blacklisted(&self, orcidid: &str) -> bool {
        self.status
            .as_ref()
            .map(|s| s.blacklisted.iter().any(|b| b == orcidid))
            .unwrap_or(false)
    }
}
