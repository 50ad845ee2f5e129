//! Maintenance operations behind the CLI: replaying history,
//! re-pushing records downstream and repairing claim arrays.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::error::{Error, Result};
use crate::pipeline::messages::{CheckOrcidMessage, ClaimsMessage};
use crate::pipeline::queues::{PipelineContext, QueueSender};
use crate::storage::models::key_value::{
    BEGINNING_OF_TIME, KEY_LAST_REFETCH, KEY_LAST_REINDEX, KEY_LAST_REPUSH,
};
use crate::storage::models::record::{ClaimKind, NO_CLAIM};
use crate::updater;

/// Enqueues with the one-retry backpressure policy: sleep briefly and
/// try once more before surfacing the failure.
async fn enqueue_with_retry<T: Clone + Send + 'static>(
    queue: &QueueSender<T>,
    message: T,
) -> Result<()> {
    if queue.send(message.clone()) {
        return Ok(());
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    if queue.send(message) {
        Ok(())
    } else {
        Err(Error::Processing("work queue is closed".to_string()))
    }
}

fn resolve_since(
    ctx: &PipelineContext,
    since: Option<&str>,
    checkpoint_key: &str,
) -> Result<DateTime<Utc>> {
    if let Some(raw) = since {
        if !raw.trim().is_empty() {
            return Ok(raw.trim().parse()?);
        }
    }
    match ctx.store.get_checkpoint(checkpoint_key)? {
        Some(ts) => Ok(ts),
        None => Ok(BEGINNING_OF_TIME.parse().expect("constant parses")),
    }
}

/// Pages through the updates feed and collects every ORCID iD touched
/// since `since`. Transient failures are tolerated up to the given
/// budgets, mirroring the feed's at-least-once delivery.
pub async fn get_all_touched_profiles(
    api: &dyn ApiClient,
    since: &DateTime<Utc>,
    max_failures: u32,
    max_cons_failures: u32,
) -> Result<Vec<String>> {
    let mut orcid_ids: BTreeSet<String> = BTreeSet::new();
    let mut latest_point = *since;
    let mut failures = 0;
    let mut cons_failures = 0;

    loop {
        let probe = latest_point + ChronoDuration::microseconds(1);
        let batch = match api.updates_since(&probe).await {
            Ok(batch) => batch,
            Err(e) => {
                cons_failures += 1;
                failures += 1;
                if cons_failures < max_cons_failures && failures < max_failures {
                    warn!(
                        error = %e,
                        failures,
                        cons_failures,
                        "error querying the updates feed, retrying"
                    );
                    continue;
                }
                return Err(e);
            }
        };

        if batch.is_empty() {
            break;
        }
        cons_failures = 0;

        latest_point = batch.iter().map(|u| u.updated).max().unwrap_or(probe);
        for update in batch {
            orcid_ids.insert(update.orcid_id);
        }
    }

    Ok(orcid_ids.into_iter().collect())
}

/// Replays the claims log for every known profile since a date, then
/// harvests the updates feed and re-enqueues everything with force.
pub async fn reindex_claims(
    ctx: &PipelineContext,
    since: Option<&str>,
    orcid_ids: &[String],
) -> Result<()> {
    for oid in orcid_ids {
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::forced(oid)).await?;
    }
    if !orcid_ids.is_empty() && since.is_none() {
        info!("done (just the supplied orcidids)");
        return Ok(());
    }

    let from_date = resolve_since(ctx, since, KEY_LAST_REINDEX)?;
    info!(since = %from_date, "loading records");

    let mut replayed: BTreeSet<String> = BTreeSet::new();
    for orcidid in ctx.store.list_orcidids()? {
        if orcidid.trim().is_empty() {
            continue;
        }
        match updater::reindex_all_claims(
            &ctx.store,
            &orcidid,
            &from_date,
            ctx.config.min_levenshtein_ratio,
            true,
        )
        .await
        {
            Ok(changed) => {
                if !changed.is_empty() {
                    replayed.insert(orcidid.clone());
                }
                enqueue_with_retry(
                    &ctx.queues.check_orcidid,
                    CheckOrcidMessage::forced(&orcidid),
                )
                .await?;
            }
            Err(e) => {
                error!(orcidid = %orcidid, error = %e, "error replaying profile, continuing");
            }
        }
        if !replayed.is_empty() && replayed.len() % 100 == 0 {
            info!(profiles = replayed.len(), "replay progress");
        }
    }

    info!("now harvesting orcid profiles");
    let touched = get_all_touched_profiles(ctx.api.as_ref(), &from_date, 5, 2).await?;
    let checkpoint = Utc::now();

    let mut submitted = 0;
    for orcidid in touched {
        if replayed.contains(&orcidid) {
            continue;
        }
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::forced(&orcidid))
            .await?;
        submitted += 1;
    }

    ctx.store.set_checkpoint(KEY_LAST_REINDEX, &checkpoint)?;
    info!(submitted, "done submitting orcid ids");
    Ok(())
}

/// Re-sends every record updated since a date to the output queue.
pub async fn repush_claims(
    ctx: &PipelineContext,
    since: Option<&str>,
    orcid_ids: &[String],
) -> Result<()> {
    for oid in orcid_ids {
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::new(oid)).await?;
    }
    if !orcid_ids.is_empty() && since.is_none() {
        info!("done (just the supplied orcidids)");
        return Ok(());
    }

    let from_date = resolve_since(ctx, since, KEY_LAST_REPUSH)?;
    info!(since = %from_date, "re-pushing records");

    let mut num_bibcodes = 0;
    for record in ctx.store.records_updated_since(&from_date)? {
        enqueue_with_retry(
            &ctx.queues.output_results,
            ClaimsMessage {
                bibcode: record.bibcode,
                authors: record.authors,
                verified: record.claims.verified,
                unverified: record.claims.unverified,
            },
        )
        .await?;
        num_bibcodes += 1;
    }

    ctx.store.set_checkpoint(KEY_LAST_REPUSH, &Utc::now())?;
    info!(num_bibcodes, "done re-pushing records");
    Ok(())
}

/// Enqueues every profile the updates feed reports as touched.
pub async fn refetch_orcidids(
    ctx: &PipelineContext,
    since: Option<&str>,
    orcid_ids: &[String],
) -> Result<()> {
    for oid in orcid_ids {
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::new(oid)).await?;
    }
    if !orcid_ids.is_empty() && since.is_none() {
        info!("done (just the supplied orcidids)");
        return Ok(());
    }

    let from_date = resolve_since(ctx, since, KEY_LAST_REFETCH)?;
    info!(since = %from_date, "re-fetching orcidids");

    let touched = get_all_touched_profiles(ctx.api.as_ref(), &from_date, 5, 2).await?;
    let checkpoint = Utc::now();

    let submitted = touched.len();
    for orcidid in touched {
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::new(&orcidid)).await?;
    }

    ctx.store.set_checkpoint(KEY_LAST_REFETCH, &checkpoint)?;
    info!(submitted, "done submitting orcid ids");
    Ok(())
}

/// Expands a `--bibcodes` argument: a comma-separated list, or
/// `@file` with one bibcode per line and `#` comments.
pub fn load_bibcodes(raw: &str) -> Result<Vec<String>> {
    if let Some(path) = raw.strip_prefix('@') {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path, e)))?;
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect());
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Verifies that the stored claim arrays match the canonical author
/// list of each bibcode, rebuilds mis-sized arrays, and re-enqueues
/// every ORCID iD found in a mis-sized array.
pub async fn reprocess_bibcodes(
    ctx: &PipelineContext,
    bibcodes: &[String],
    force: bool,
) -> Result<()> {
    let mut orcids_to_process: BTreeSet<String> = BTreeSet::new();

    for bibcode in bibcodes {
        debug!(bibcode = %bibcode, "reprocessing bibcode");

        let Some(metadata) = ctx.store.retrieve_metadata(bibcode, true).await? else {
            warn!(bibcode = %bibcode, "no metadata found, skipping");
            continue;
        };
        // make sure we're using the canonical bibcode
        let canonical = metadata.bibcode;
        let author_list = metadata.authors;

        let mut record = ctx.store.retrieve_record(&canonical, &author_list)?;
        let mut update = false;

        for kind in [ClaimKind::Verified, ClaimKind::Unverified] {
            let arr = record.claims.field(kind);
            if !arr.is_empty() && arr.len() != author_list.len() {
                debug!(
                    bibcode = %canonical,
                    field = kind.as_str(),
                    "claims length does not match author length, reprocessing"
                );
                let orcids: BTreeSet<String> = arr
                    .iter()
                    .filter(|s| *s != NO_CLAIM)
                    .cloned()
                    .collect();
                let empty = orcids.is_empty();
                orcids_to_process.extend(orcids);
                if force || empty {
                    // rebuild manually; valid claims get rebuilt by the
                    // forced reindex below
                    *record.claims.field_mut(kind) = vec![NO_CLAIM.to_string(); author_list.len()];
                    update = true;
                }
            }
        }

        if update {
            ctx.store
                .record_claims(&canonical, &record.claims, Some(&author_list))?;
            enqueue_with_retry(
                &ctx.queues.output_results,
                ClaimsMessage {
                    bibcode: canonical,
                    authors: author_list,
                    verified: record.claims.verified.clone(),
                    unverified: record.claims.unverified.clone(),
                },
            )
            .await?;
        }
    }

    for orcidid in orcids_to_process {
        enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::forced(&orcidid))
            .await?;
    }

    info!("done processing the given bibcodes");
    Ok(())
}

/// Prints the values stored in the key/value table.
pub fn print_kvs(ctx: &PipelineContext) -> Result<()> {
    println!("Key, Value from the storage:");
    println!("{}", "-".repeat(80));
    for kv in ctx.store.all_checkpoints()? {
        println!("{} {}", kv.key, kv.value);
    }
    Ok(())
}

/// Prints what the pipeline sees for the given profiles and bibcodes,
/// then submits the profiles for processing.
pub async fn show_api_diagnostics(
    ctx: &PipelineContext,
    orcid_ids: &[String],
    bibcodes: &[String],
) -> Result<()> {
    println!("api_orcid_export_profile: {}", ctx.config.api_orcid_export_profile);
    println!("api_orcid_updates_endpoint: {}", ctx.config.api_orcid_updates_endpoint);
    println!("api_solr_query_endpoint: {}", ctx.config.api_solr_query_endpoint);

    for orcidid in orcid_ids {
        println!("{}", orcidid);
        match ctx.store.retrieve_profile(orcidid).await {
            Ok(profile) => println!("profile: {}", serde_json::to_string_pretty(&profile)?),
            Err(e) => println!("profile unavailable: {}", e),
        }
        match crate::importer::get_claims(
            &ctx.store,
            ctx.api.as_ref(),
            orcidid,
            false,
            &ctx.config.orcid_identifiers_order,
        )
        .await
        {
            Ok((present, updated, removed)) => {
                println!("all of orcid: {}", present.len());
                println!("in need of update: {}", updated.len());
                println!("in need of removal: {}", removed.len());
            }
            Err(e) => println!("claims unavailable: {}", e),
        }
        println!("{}", "=".repeat(80));
    }

    for bibcode in bibcodes {
        match ctx.store.retrieve_metadata(bibcode, true).await {
            Ok(Some(metadata)) => println!("{}: {:?}", bibcode, metadata),
            Ok(None) => println!("{}: not found", bibcode),
            Err(e) => println!("{}: lookup failed: {}", bibcode, e),
        }
    }

    if !orcid_ids.is_empty() {
        println!("now submitting orcid ids for processing");
        for orcidid in orcid_ids {
            enqueue_with_retry(&ctx.queues.check_orcidid, CheckOrcidMessage::new(orcidid))
                .await?;
        }
    }

    Ok(())
}
