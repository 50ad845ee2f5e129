//! External collaborators of the reconciliation engine.
//!
//! Everything the pipeline needs from the outside world sits behind
//! the [`ApiClient`] trait: the ORCID profile export, the
//! updated-profiles feed, the per-bibcode status callback, the
//! author-info sources used for harvesting, the search-index metadata
//! lookup, and the downstream exchange. Tests substitute in-process
//! fakes; production uses the reqwest-backed [`client::HttpApiClient`].

pub mod client;
pub mod harvest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::messages::ClaimsMessage;
use crate::storage::models::author_profile::Facts;

/// One external identifier attached to an ORCID work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkIdentifier {
    #[serde(rename = "type")]
    pub scheme: String,
    pub value: String,
}

/// One work from an author's ORCID profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrcidWork {
    #[serde(default)]
    pub identifiers: Vec<WorkIdentifier>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub provenance: String,
}

/// An author's ORCID profile as exported by the profile service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrcidProfile {
    #[serde(default)]
    pub works: Vec<OrcidWork>,
}

impl OrcidProfile {
    /// The profile's last-modified time: the newest work update.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.works.iter().map(|w| w.updated).max()
    }
}

/// One entry of the updated-profiles feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedProfile {
    pub orcid_id: String,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Metadata for one record from the search-index lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub bibcode: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub identifiers: Vec<String>,
}

/// Downstream status reported back per bibcode after matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BibStatus {
    Verified,
    Rejected,
}

impl BibStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BibStatus::Verified => "verified",
            BibStatus::Rejected => "rejected",
        }
    }
}

/// The full external surface the pipeline depends on.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetches the exported ORCID profile (works + identifiers).
    async fn get_orcid_profile(&self, orcidid: &str) -> Result<OrcidProfile>;

    /// Profiles touched since `since`, ordered by `updated` ascending.
    /// An empty response means "nothing new".
    async fn updates_since(&self, since: &DateTime<Utc>) -> Result<Vec<UpdatedProfile>>;

    /// Reports the reconciliation outcome for a set of bibcodes.
    /// Returns the per-bibcode mapping from the service.
    async fn update_bib_status(
        &self,
        orcidid: &str,
        bibcodes: &[String],
        status: BibStatus,
    ) -> Result<serde_json::Value>;

    /// Harvests the author-info facts for a profile (public ORCID
    /// profile + site author profile + search-index name variants).
    async fn harvest_author_info(&self, orcidid: &str) -> Result<Facts>;

    /// Resolves an identifier to record metadata. With
    /// `search_identifiers` the lookup also matches alternate
    /// identifiers and returns the canonical bibcode.
    async fn get_metadata(
        &self,
        identifier: &str,
        search_identifiers: bool,
    ) -> Result<Option<RecordMetadata>>;

    /// Forwards a reconciled record to the downstream exchange.
    async fn forward_message(&self, message: &ClaimsMessage) -> Result<()>;
}
