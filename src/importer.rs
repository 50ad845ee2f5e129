//! Imports an author's ORCID profile and diffs it against the
//! stored claims log.
//!
//! The importer answers one question per profile: which works does
//! ORCID assert right now, and which claims did we already act on
//! since the last full import. The caller turns the answer into
//! claim-log rows.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::api::{ApiClient, OrcidWork};
use crate::error::Result;
use crate::storage::models::claim_log::ClaimStatus;
use crate::storage::models::key_value::BEGINNING_OF_TIME;
use crate::storage::repository::truncate_to_micros;
use crate::store::ProfileStore;

/// One work the author currently asserts on ORCID, resolved to a
/// canonical bibcode.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentWork {
    pub bibcode: String,
    pub updated: DateTime<Utc>,
    pub provenance: String,
    pub identifiers: Vec<String>,
    pub author_list: Vec<String>,
}

/// One claim the store already acted on, replayed from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredClaim {
    pub bibcode: String,
    pub created: DateTime<Utc>,
}

/// What ORCID has, what we updated, and what we removed — each keyed
/// by the lower-cased canonical bibcode.
pub type ClaimsDiff = (
    BTreeMap<String, PresentWork>,
    BTreeMap<String, StoredClaim>,
    BTreeMap<String, StoredClaim>,
);

/// Orders a work's identifiers for canonical-bibcode selection:
/// highest priority first, ties resolved by first occurrence.
pub fn identifier_candidates<'a>(
    work: &'a OrcidWork,
    identifiers_order: &HashMap<String, i32>,
) -> Vec<&'a crate::api::WorkIdentifier> {
    let priority = |scheme: &str| -> i32 {
        identifiers_order
            .get(scheme)
            .or_else(|| identifiers_order.get("*"))
            .copied()
            .unwrap_or(-1)
    };

    let mut scored: Vec<(i32, usize, &crate::api::WorkIdentifier)> = work
        .identifiers
        .iter()
        .enumerate()
        .map(|(pos, ident)| (priority(&ident.scheme), pos, ident))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, ident)| ident).collect()
}

/// Fetches a fresh ORCID profile and computes the three-way diff
/// against the stored claims log.
///
/// When a `#full-import` sentinel already covers the profile's
/// last-modified time and `force` is off, the import short-circuits
/// with three empty maps.
pub async fn get_claims(
    store: &ProfileStore,
    api: &dyn ApiClient,
    orcidid: &str,
    force: bool,
    identifiers_order: &HashMap<String, i32>,
) -> Result<ClaimsDiff> {
    let profile = api.get_orcid_profile(orcidid).await?;
    let last_modified = profile.last_modified().map(truncate_to_micros);
    let sentinel = store.latest_full_import(orcidid)?;

    if !force {
        if let (Some(sentinel), Some(last_modified)) = (&sentinel, last_modified) {
            if sentinel.created >= last_modified {
                debug!(
                    orcidid = %orcidid,
                    sentinel = %sentinel.created,
                    profile = %last_modified,
                    "profile unchanged since last full import, skipping"
                );
                return Ok((BTreeMap::new(), BTreeMap::new(), BTreeMap::new()));
            }
        }
    }

    let mut orcid_present: BTreeMap<String, PresentWork> = BTreeMap::new();
    for work in &profile.works {
        for candidate in identifier_candidates(work, identifiers_order) {
            if let Some(metadata) = api.get_metadata(&candidate.value, true).await? {
                orcid_present.insert(
                    metadata.bibcode.to_lowercase(),
                    PresentWork {
                        bibcode: metadata.bibcode,
                        updated: work.updated,
                        provenance: work.provenance.clone(),
                        identifiers: metadata.identifiers,
                        author_list: metadata.authors,
                    },
                );
                break;
            }
        }
        // a work whose identifiers all fail to resolve is discarded
    }

    let replay_from = match &sentinel {
        Some(sentinel) => sentinel.created,
        None => BEGINNING_OF_TIME
            .parse::<DateTime<Utc>>()
            .expect("beginning-of-time constant parses"),
    };

    let mut updated_ads: BTreeMap<String, StoredClaim> = BTreeMap::new();
    let mut removed_ads: BTreeMap<String, StoredClaim> = BTreeMap::new();
    for row in store.claims_since(orcidid, &replay_from)? {
        if row.bibcode.is_empty() {
            continue;
        }
        let stored = StoredClaim {
            bibcode: row.bibcode.clone(),
            created: row.created,
        };
        match row.status {
            ClaimStatus::Claimed | ClaimStatus::Updated | ClaimStatus::Forced => {
                updated_ads.insert(row.bibcode.to_lowercase(), stored);
            }
            ClaimStatus::Removed => {
                removed_ads.insert(row.bibcode.to_lowercase(), stored);
            }
            ClaimStatus::Unchanged | ClaimStatus::FullImport => {}
        }
    }

    Ok((orcid_present, updated_ads, removed_ads))
}
