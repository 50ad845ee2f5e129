//! The four task handlers of the coordinator.
//!
//! Handlers return typed outcomes describing the scheduling decision
//! they took, so the behavior is testable without waiting on timers;
//! the worker pool discards the outcome in production.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{info, warn};

use crate::api::BibStatus;
use crate::error::{Error, Result};
use crate::importer;
use crate::pipeline::messages::{
    CheckOrcidMessage, CheckUpdatesMessage, ClaimsMessage, EnrichedClaim,
};
use crate::pipeline::queues::PipelineContext;
use crate::storage::models::claim_log::ClaimStatus;
use crate::storage::models::key_value::{BEGINNING_OF_TIME, KEY_LAST_CHECK};
use crate::updater::{self, ClaimUpdate};

/// What the update poller decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckUpdatesOutcome {
    /// Called inside the polling window; one delayed self-retry queued.
    TooSoon { retry_in: Duration },
    /// The feed failed; retrying with linear backoff.
    Backoff { errcount: u32, retry_in: Duration },
    /// The feed had nothing new; normal-interval retry queued.
    NothingNew,
    /// Profiles dispatched to `check-orcidid`; checkpoint advanced.
    Dispatched { profiles: usize },
}

/// Checks the updates feed for touched ORCID profiles.
///
/// Multiple workers may receive this heartbeat concurrently; the
/// `last.check` checkpoint is advanced optimistically as soon as a
/// non-empty batch arrives so a redundant worker fetches nothing.
pub async fn task_check_orcid_updates(
    ctx: &PipelineContext,
    msg: CheckUpdatesMessage,
) -> Result<CheckUpdatesOutcome> {
    let last_check = match ctx.store.get_checkpoint(KEY_LAST_CHECK)? {
        Some(ts) => ts,
        None => BEGINNING_OF_TIME.parse().expect("constant parses"),
    };

    let now = Utc::now();
    let total_wait = ctx.config.orcid_check_for_changes_secs;
    let elapsed = (now - last_check).num_seconds();

    if elapsed < total_wait {
        // register our own execution in the future
        let retry_in = Duration::from_secs((total_wait - elapsed) as u64 + 1);
        ctx.queues.check_updates.send_after(retry_in, msg);
        return Ok(CheckUpdatesOutcome::TooSoon { retry_in });
    }

    info!("checking for orcid updates");
    let since = last_check + ChronoDuration::microseconds(1);

    let updates = match ctx.api.updates_since(&since).await {
        Ok(updates) => updates,
        Err(e) => {
            let errcount = msg.errcount + 1;
            let retry_in =
                Duration::from_secs((total_wait + total_wait * i64::from(errcount)) as u64);
            warn!(
                error = %e,
                errcount,
                "updates feed failed, rescheduling with backoff"
            );
            ctx.queues
                .check_updates
                .send_after(retry_in, CheckUpdatesMessage { errcount });
            return Ok(CheckUpdatesOutcome::Backoff { errcount, retry_in });
        }
    };

    if updates.is_empty() {
        ctx.queues
            .check_updates
            .send_after(Duration::from_secs(total_wait as u64), msg);
        return Ok(CheckUpdatesOutcome::NothingNew);
    }

    // advance the checkpoint immediately so concurrent pollers skip
    let latest = updates
        .iter()
        .map(|u| u.updated)
        .max()
        .unwrap_or(now);
    ctx.store.set_checkpoint(KEY_LAST_CHECK, &latest)?;

    let mut profiles = 0;
    for update in &updates {
        let dispatched = ctx.queues.check_orcidid.send(CheckOrcidMessage {
            orcidid: update.orcid_id.clone(),
            force: false,
            start: Some(since),
        });
        if dispatched {
            profiles += 1;
        }
    }

    ctx.queues.check_updates.send_after(
        Duration::from_secs(total_wait as u64),
        CheckUpdatesMessage { errcount: 0 },
    );
    Ok(CheckUpdatesOutcome::Dispatched { profiles })
}

/// What the profile-import task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Rows inserted but the profile is blacklisted/postponed.
    Suppressed { inserted: usize },
    /// Rows inserted and claims dispatched to `match-claim`.
    Dispatched { inserted: usize, dispatched: usize },
}

/// Imports one ORCID profile, persists the claim diff and dispatches
/// the enriched claims to the matcher.
pub async fn task_index_orcid_profile(
    ctx: &PipelineContext,
    msg: CheckOrcidMessage,
) -> Result<IndexOutcome> {
    if msg.orcidid.trim().is_empty() {
        return Err(Error::Ignorable(format!("received garbage: {:?}", msg)));
    }
    let orcidid = msg.orcidid.trim().to_lowercase();

    let author = ctx.store.retrieve_profile(&orcidid).await?;

    let (orcid_present, updated_ads, removed_ads) = importer::get_claims(
        &ctx.store,
        ctx.api.as_ref(),
        &orcidid,
        msg.force,
        &ctx.config.orcid_identifiers_order,
    )
    .await?;

    // always mark the beginning of a full import
    let mut to_claim = vec![ctx.store.create_claim(
        "",
        &orcidid,
        ClaimStatus::FullImport,
        "OrcidImporter",
        None,
        true,
    )?];

    let claims_we_have: std::collections::BTreeSet<&str> = updated_ads
        .keys()
        .map(String::as_str)
        .filter(|k| !removed_ads.contains_key(*k))
        .collect();
    let claims_orcid_has: std::collections::BTreeSet<&str> =
        orcid_present.keys().map(String::as_str).collect();

    // new on the orcid side (with the orcid date signature)
    for key in claims_orcid_has.difference(&claims_we_have) {
        let work = &orcid_present[*key];
        to_claim.push(ctx.store.create_claim(
            &work.bibcode,
            &orcidid,
            ClaimStatus::Claimed,
            &work.provenance,
            Some(work.updated),
            true,
        )?);
    }

    // gone from the orcid side
    for key in claims_we_have.difference(&claims_orcid_has) {
        let stored = &updated_ads[*key];
        to_claim.push(ctx.store.create_claim(
            &stored.bibcode,
            &orcidid,
            ClaimStatus::Removed,
            "OrcidImporter",
            None,
            true,
        )?);
    }

    // present on both sides: compare timestamps
    let update_window = ChronoDuration::seconds(ctx.config.orcid_update_window_secs);
    for key in claims_orcid_has.intersection(&claims_we_have) {
        let work = &orcid_present[*key];
        let stored = &updated_ads[*key];
        let status = if work.updated - stored.created > update_window {
            ClaimStatus::Updated
        } else if msg.force {
            ClaimStatus::Forced
        } else {
            ClaimStatus::Unchanged
        };
        to_claim.push(ctx.store.create_claim(
            &work.bibcode,
            &orcidid,
            status,
            "OrcidImporter",
            Some(work.updated),
            true,
        )?);
    }

    let inserted = ctx.store.insert_claims(to_claim)?;

    if author.is_suppressed() {
        info!(
            orcidid = %orcidid,
            status = ?author.status,
            "profile is suppressed, claims logged but not matched"
        );
        return Ok(IndexOutcome::Suppressed {
            inserted: inserted.len(),
        });
    }

    let mut dispatched = 0;
    for claim in inserted.iter().filter(|c| !c.bibcode.is_empty()) {
        let mut enriched = EnrichedClaim::from_parts(claim, &author);
        if claim.status != ClaimStatus::Removed {
            if let Some(work) = orcid_present.get(&claim.bibcode.trim().to_lowercase()) {
                enriched.identifiers = Some(work.identifiers.clone());
                enriched.author_list = Some(work.author_list.clone());
            }
        }
        if ctx.queues.match_claim.send(enriched) {
            dispatched += 1;
        }
    }

    Ok(IndexOutcome::Dispatched {
        inserted: inserted.len(),
        dispatched,
    })
}

/// What the matcher task did with one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub applied: Option<ClaimUpdate>,
    pub reported: BibStatus,
}

/// Matches one claim against its record, persists the result and
/// reports the per-bibcode status back to the profile service.
pub async fn task_match_claim(
    ctx: &PipelineContext,
    claim: EnrichedClaim,
) -> Result<MatchOutcome> {
    if claim.orcidid.trim().is_empty() {
        return Err(Error::Processing(format!(
            "unusable payload, missing orcidid: {:?}",
            claim
        )));
    }

    // removed claims no longer carry record metadata; re-fetch it
    let (identifiers, authors) = match (&claim.identifiers, &claim.author_list) {
        (Some(identifiers), Some(authors)) if claim.status != ClaimStatus::Removed => {
            (identifiers.clone(), authors.clone())
        }
        _ => {
            let metadata = ctx
                .store
                .retrieve_metadata(&claim.bibcode, false)
                .await?
                .unwrap_or_default();
            (metadata.identifiers, metadata.authors)
        }
    };

    let mut record = ctx.store.retrieve_record(&claim.bibcode, &authors)?;
    let applied = updater::apply_claim(&mut record, &claim, ctx.config.min_levenshtein_ratio);

    let reported = if applied.is_some() {
        ctx.store
            .record_claims(&claim.bibcode, &record.claims, Some(&record.authors))?;
        ctx.queues.output_results.send(ClaimsMessage {
            bibcode: record.bibcode.clone(),
            authors: record.authors.clone(),
            verified: record.claims.verified.clone(),
            unverified: record.claims.unverified.clone(),
        });
        BibStatus::Verified
    } else {
        warn!(
            bibcode = %claim.bibcode,
            orcidid = %claim.orcidid,
            "Claim refused"
        );
        BibStatus::Rejected
    };

    // report the outcome for the bibcode and its alternate identifiers
    let mut unique_bibs: Vec<String> = vec![claim.bibcode.clone()];
    for identifier in identifiers {
        if !unique_bibs.contains(&identifier) {
            unique_bibs.push(identifier);
        }
    }
    match ctx
        .api
        .update_bib_status(&claim.orcidid, &unique_bibs, reported)
        .await
    {
        Ok(response) => {
            let entries = response.as_object().map_or(0, |m| m.len());
            if entries != 1 {
                warn!(
                    bibcodes = ?unique_bibs,
                    orcidid = %claim.orcidid,
                    response = %response,
                    "number of updated bibcodes does not match input"
                );
            }
        }
        Err(e) => {
            warn!(
                bibcodes = ?unique_bibs,
                orcidid = %claim.orcidid,
                status = reported.as_str(),
                error = %e,
                "bibcodes not updated to reported status"
            );
        }
    }

    Ok(MatchOutcome { applied, reported })
}

/// Forwards one reconciled record to the downstream exchange.
pub async fn task_output_results(ctx: &PipelineContext, msg: ClaimsMessage) -> Result<()> {
    ctx.api.forward_message(&msg).await
}
