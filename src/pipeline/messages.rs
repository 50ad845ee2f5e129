//! Payload types carried by the work queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::matcher::NameVariants;
use crate::storage::models::author_profile::{AuthorProfile, ProfileStatus};
use crate::storage::models::claim_log::{ClaimLogEntry, ClaimStatus};

/// Heartbeat consumed by the `check-updates` poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckUpdatesMessage {
    /// Consecutive failures seen by the poller; drives linear backoff
    #[serde(default)]
    pub errcount: u32,
}

/// One profile to reconcile, consumed by `check-orcidid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOrcidMessage {
    pub orcidid: String,
    /// Re-import even when the `#full-import` sentinel is fresh
    #[serde(default)]
    pub force: bool,
    /// When the updates feed reported this profile (diagnostic)
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
}

impl CheckOrcidMessage {
    pub fn new(orcidid: impl Into<String>) -> Self {
        Self {
            orcidid: orcidid.into(),
            force: false,
            start: None,
        }
    }

    pub fn forced(orcidid: impl Into<String>) -> Self {
        Self {
            orcidid: orcidid.into(),
            force: true,
            start: None,
        }
    }
}

/// A persisted claim-log row enriched with everything the matcher
/// needs, consumed by `match-claim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedClaim {
    pub bibcode: String,
    /// Empty only for malformed payloads; rejected by the task
    #[serde(default)]
    pub orcidid: String,
    pub status: ClaimStatus,
    #[serde(default)]
    pub provenance: String,
    pub created: DateTime<Utc>,

    /// Canonical display name of the claimant
    #[serde(default)]
    pub name: String,
    /// Name-variant fields copied from the profile facts
    #[serde(flatten)]
    pub variants: NameVariants,

    #[serde(default)]
    pub author_status: Option<ProfileStatus>,
    /// Verified-account marker; strings and integers both occur
    #[serde(default)]
    pub account_id: Option<Value>,
    #[serde(default)]
    pub author_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author_id: Option<i64>,

    /// Alternate identifiers of the record (non-removed claims)
    #[serde(default)]
    pub identifiers: Option<Vec<String>>,
    /// Author list of the record (non-removed claims)
    #[serde(default)]
    pub author_list: Option<Vec<String>>,
}

impl EnrichedClaim {
    /// Builds the match-claim payload for one persisted claim row.
    pub fn from_parts(entry: &ClaimLogEntry, author: &AuthorProfile) -> Self {
        Self {
            bibcode: entry.bibcode.clone(),
            orcidid: entry.orcidid.clone(),
            status: entry.status,
            provenance: entry.provenance.clone(),
            created: entry.created,
            name: author.name.clone(),
            variants: author.facts.name_variants(),
            author_status: author.status,
            account_id: author.account_id.map(Value::from),
            author_updated: Some(author.updated),
            author_id: author.id,
            identifiers: None,
            author_list: None,
        }
    }

    /// True when the claim originates from a verified site account.
    /// Accepts the shapes the account id arrives in: integers,
    /// numeric strings, and nothing at all.
    pub fn has_account(&self) -> bool {
        match &self.account_id {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map_or(true, |v| v != 0),
            Some(Value::String(s)) => !s.is_empty() && s != "0",
            Some(_) => true,
        }
    }
}

/// Reconciled claim arrays for one record, consumed by
/// `output-results` and forwarded to the downstream exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsMessage {
    pub bibcode: String,
    pub authors: Vec<String>,
    pub verified: Vec<String>,
    pub unverified: Vec<String>,
}
