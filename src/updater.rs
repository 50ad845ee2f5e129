//! Applies claims to the per-record claim arrays.
//!
//! `apply_claim` is the write path of the reconciliation engine: it
//! repairs the claim arrays, scrubs stale positions for the claimant,
//! asks the matcher where the claim belongs, and records the outcome.
//! It mutates the record in memory only; persistence stays with the
//! caller so the read-modify-write can run in one transaction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::error::Result;
use crate::matcher::find_author_index;
use crate::pipeline::messages::EnrichedClaim;
use crate::storage::models::claim_log::ClaimStatus;
use crate::storage::models::record::{ClaimKind, Record, NO_CLAIM};
use crate::store::ProfileStore;

/// Outcome of applying one claim to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimUpdate {
    /// The claim was written to (or removed from) an author position.
    Placed { kind: ClaimKind, index: usize },
    /// No position was found but stale occurrences of the claimant
    /// were scrubbed; the record still changed and must be persisted.
    Scrubbed,
}

/// Applies `claim` to `record`, returning what changed (None when the
/// claim is refused and the record is untouched).
pub fn apply_claim(
    record: &mut Record,
    claim: &EnrichedClaim,
    min_ratio: f64,
) -> Option<ClaimUpdate> {
    let kind = if claim.has_account() {
        ClaimKind::Verified
    } else {
        ClaimKind::Unverified
    };

    let num_authors = record.authors.len();
    record.claims.normalize(num_authors);

    // always remove the orcidid before (re-)inserting it
    let scrubbed = record.claims.scrub(&claim.orcidid);

    if record.is_blacklisted(&claim.orcidid) {
        debug!(
            bibcode = %record.bibcode,
            orcidid = %claim.orcidid,
            "record refuses claims from blacklisted orcidid"
        );
        return scrubbed.then_some(ClaimUpdate::Scrubbed);
    }

    if !claim.variants.is_empty() {
        if let Some(index) = find_author_index(&record.authors, &claim.variants, min_ratio) {
            if index >= num_authors {
                error!(
                    bibcode = %record.bibcode,
                    orcidid = %claim.orcidid,
                    index,
                    num_authors,
                    "matched index is beyond the author list, dropping claim"
                );
            } else {
                record.claims.field_mut(kind)[index] = if claim.status == ClaimStatus::Removed {
                    NO_CLAIM.to_string()
                } else {
                    claim.orcidid.clone()
                };
                return Some(ClaimUpdate::Placed { kind, index });
            }
        }
    }

    scrubbed.then_some(ClaimUpdate::Scrubbed)
}

/// Replays the claims log for one profile since a starting point,
/// rebuilding the claim arrays of every touched record. Returns the
/// bibcodes that changed.
pub async fn reindex_all_claims(
    store: &ProfileStore,
    orcidid: &str,
    since: &DateTime<Utc>,
    min_ratio: f64,
    ignore_errors: bool,
) -> Result<Vec<String>> {
    let author = store.retrieve_profile(orcidid).await?;

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    let mut removed: BTreeSet<String> = BTreeSet::new();
    for row in store.claims_after(orcidid, since)? {
        if row.status.is_claiming() {
            claimed.insert(row.bibcode);
        } else if row.status == ClaimStatus::Removed {
            removed.insert(row.bibcode);
        }
    }

    let mut touched: BTreeSet<String> = BTreeSet::new();

    for bibcode in removed {
        let Some(mut record) = store.get_record(&bibcode)? else {
            continue;
        };
        if record.claims.scrub(orcidid) {
            store.record_claims(&bibcode, &record.claims, None)?;
            touched.insert(bibcode);
        }
    }

    for bibcode in claimed {
        let Some(mut record) = store.get_record(&bibcode)? else {
            continue;
        };
        let claim = EnrichedClaim {
            bibcode: bibcode.clone(),
            orcidid: orcidid.to_string(),
            status: ClaimStatus::Claimed,
            provenance: String::new(),
            created: Utc::now(),
            name: author.name.clone(),
            variants: author.facts.name_variants(),
            author_status: author.status,
            account_id: author.account_id.map(serde_json::Value::from),
            author_updated: Some(author.updated),
            author_id: author.id,
            identifiers: None,
            author_list: None,
        };
        if apply_claim(&mut record, &claim, min_ratio).is_some() {
            match store.record_claims(&bibcode, &record.claims, None) {
                Ok(()) => {
                    touched.insert(bibcode);
                }
                Err(e) if ignore_errors => {
                    error!(
                        bibcode = %bibcode,
                        orcidid = %orcidid,
                        error = %e,
                        "error persisting replayed claim, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(touched.into_iter().collect())
}
