//! Task-level behavior of the four-queue coordinator, driven against
//! an in-memory store and the fake API.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{bibcode_work, test_context, test_context_with_store, FakeApi};
use orcid_pipeline::api::{BibStatus, OrcidProfile, RecordMetadata, UpdatedProfile};
use orcid_pipeline::pipeline::messages::{CheckOrcidMessage, CheckUpdatesMessage, EnrichedClaim};
use orcid_pipeline::pipeline::tasks::{
    task_check_orcid_updates, task_index_orcid_profile, task_match_claim, task_output_results,
    CheckUpdatesOutcome, IndexOutcome,
};
use orcid_pipeline::storage::connection::{DatabaseConfig, DatabaseManager};
use orcid_pipeline::storage::models::author_profile::{AuthorProfile, ProfileStatus};
use orcid_pipeline::storage::models::claim_log::{ClaimLogEntry, ClaimStatus};
use orcid_pipeline::storage::models::key_value::KEY_LAST_CHECK;
use orcid_pipeline::storage::models::record::ClaimKind;
use orcid_pipeline::storage::repository::Repository;
use orcid_pipeline::store::ProfileStore;
use orcid_pipeline::updater::ClaimUpdate;
use orcid_pipeline::Config;

const ORCIDID: &str = "0000-0003-3041-2092";

fn stern_facts() -> serde_json::Value {
    json!({
        "name": "Stern, D K",
        "author": ["Stern, D", "Stern, D K", "Stern, Daniel"],
        "orcid_name": ["Stern, Daniel"],
        "author_norm": ["Stern, D"]
    })
}

// === check-updates ===

#[tokio::test]
async fn test_poller_inside_window_does_not_call_api() {
    let api = Arc::new(FakeApi::new());
    let (ctx, _receivers) = test_context(api.clone());

    // last check was 10 seconds ago; the window is 300 seconds
    ctx.store
        .set_checkpoint(KEY_LAST_CHECK, &(Utc::now() - ChronoDuration::seconds(10)))
        .unwrap();

    let outcome = task_check_orcid_updates(&ctx, CheckUpdatesMessage::default())
        .await
        .unwrap();

    match outcome {
        CheckUpdatesOutcome::TooSoon { retry_in } => {
            assert!(retry_in >= Duration::from_secs(285));
            assert!(retry_in <= Duration::from_secs(295));
        }
        other => panic!("expected TooSoon, got {:?}", other),
    }
    assert_eq!(api.updates_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poller_dispatches_and_advances_checkpoint() {
    let api = Arc::new(FakeApi::new());
    let newest = Utc::now();
    api.push_update_batch(vec![
        UpdatedProfile {
            orcid_id: "0000-0003-3041-2092".to_string(),
            updated: newest - ChronoDuration::seconds(5),
            created: None,
        },
        UpdatedProfile {
            orcid_id: "0000-0003-3041-2093".to_string(),
            updated: newest,
            created: None,
        },
    ]);
    let (ctx, mut receivers) = test_context(api.clone());

    let outcome = task_check_orcid_updates(&ctx, CheckUpdatesMessage::default())
        .await
        .unwrap();
    assert_eq!(outcome, CheckUpdatesOutcome::Dispatched { profiles: 2 });

    let first = receivers.check_orcidid.try_recv().unwrap();
    assert_eq!(first.orcidid, "0000-0003-3041-2092");
    assert!(!first.force);
    let second = receivers.check_orcidid.try_recv().unwrap();
    assert_eq!(second.orcidid, "0000-0003-3041-2093");

    // checkpoint advanced to the newest updated timestamp in the batch
    let checkpoint = ctx.store.get_checkpoint(KEY_LAST_CHECK).unwrap().unwrap();
    assert_eq!(
        checkpoint.timestamp_micros(),
        newest.timestamp_micros()
    );
}

#[tokio::test]
async fn test_poller_backs_off_linearly_on_feed_errors() {
    let api = Arc::new(FakeApi::new());
    api.fail_updates.store(true, Ordering::SeqCst);
    let (ctx, mut receivers) = test_context(api.clone());

    let outcome = task_check_orcid_updates(&ctx, CheckUpdatesMessage { errcount: 1 })
        .await
        .unwrap();

    // total_wait * (1 + errcount) with the incremented errcount
    assert_eq!(
        outcome,
        CheckUpdatesOutcome::Backoff {
            errcount: 2,
            retry_in: Duration::from_secs(900)
        }
    );
    assert!(receivers.check_orcidid.try_recv().is_err());
}

#[tokio::test]
async fn test_poller_reschedules_on_empty_feed() {
    let api = Arc::new(FakeApi::new());
    let (ctx, mut receivers) = test_context(api.clone());

    let outcome = task_check_orcid_updates(&ctx, CheckUpdatesMessage::default())
        .await
        .unwrap();
    assert_eq!(outcome, CheckUpdatesOutcome::NothingNew);
    assert!(receivers.check_orcidid.try_recv().is_err());
}

// === check-orcidid ===

fn two_work_profile() -> OrcidProfile {
    OrcidProfile {
        works: vec![
            bibcode_work("2017ApJ...111..111B", Utc::now() - ChronoDuration::days(1)),
            bibcode_work("2017ApJ...222..222B", Utc::now() - ChronoDuration::days(1)),
        ],
    }
}

fn register_work_metadata(api: &FakeApi) {
    for bibcode in ["2017ApJ...111..111B", "2017ApJ...222..222B"] {
        api.add_metadata(
            bibcode,
            RecordMetadata {
                bibcode: bibcode.to_string(),
                authors: vec!["Stern, D K".to_string(), "author two".to_string()],
                identifiers: vec!["id1".to_string(), "id2".to_string()],
            },
        );
    }
}

#[tokio::test]
async fn test_index_profile_rejects_missing_orcidid() {
    let api = Arc::new(FakeApi::new());
    let (ctx, _receivers) = test_context(api);

    let err = task_index_orcid_profile(&ctx, CheckOrcidMessage::new(""))
        .await
        .unwrap_err();
    assert!(matches!(err, orcid_pipeline::Error::Ignorable(_)));
}

#[tokio::test]
async fn test_index_profile_diffs_and_dispatches() {
    let api = Arc::new(FakeApi::new());
    api.set_profile(two_work_profile());
    api.set_facts(stern_facts());
    register_work_metadata(&api);
    let (ctx, mut receivers) = test_context(api.clone());

    // the store already believes in a third bibcode, from a past import
    let old = Utc::now() - ChronoDuration::days(30);
    ctx.store
        .insert_claims(vec![
            ClaimLogEntry::new("", ORCIDID, ClaimStatus::FullImport, "OrcidImporter", old),
            ClaimLogEntry::new(
                "2016Old...333..333C",
                ORCIDID,
                ClaimStatus::Claimed,
                "external",
                old + ChronoDuration::seconds(1),
            ),
        ])
        .unwrap();

    let outcome = task_index_orcid_profile(&ctx, CheckOrcidMessage::new(ORCIDID))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IndexOutcome::Dispatched {
            inserted: 4,
            dispatched: 3
        }
    );

    // the new sentinel plus the three diff rows
    let rows = ctx.store.claims_since(ORCIDID, &old).unwrap();
    let mut statuses: Vec<(String, ClaimStatus)> = rows
        .iter()
        .filter(|r| r.created > old + ChronoDuration::seconds(2))
        .map(|r| (r.bibcode.clone(), r.status))
        .collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        statuses,
        vec![
            ("".to_string(), ClaimStatus::FullImport),
            ("2016Old...333..333C".to_string(), ClaimStatus::Removed),
            ("2017ApJ...111..111B".to_string(), ClaimStatus::Claimed),
            ("2017ApJ...222..222B".to_string(), ClaimStatus::Claimed),
        ]
    );

    let mut dispatched = Vec::new();
    while let Ok(claim) = receivers.match_claim.try_recv() {
        dispatched.push(claim);
    }
    assert_eq!(dispatched.len(), 3);

    let claimed: Vec<&EnrichedClaim> = dispatched
        .iter()
        .filter(|c| c.status == ClaimStatus::Claimed)
        .collect();
    assert_eq!(claimed.len(), 2);
    for claim in claimed {
        assert_eq!(claim.name, "Stern, D K");
        assert_eq!(claim.variants.author.len(), 3);
        assert_eq!(
            claim.author_list.as_deref(),
            Some(&["Stern, D K".to_string(), "author two".to_string()][..])
        );
        assert_eq!(
            claim.identifiers.as_deref(),
            Some(&["id1".to_string(), "id2".to_string()][..])
        );
    }

    let removed: Vec<&EnrichedClaim> = dispatched
        .iter()
        .filter(|c| c.status == ClaimStatus::Removed)
        .collect();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].identifiers.is_none());
}

#[tokio::test]
async fn test_index_profile_stops_for_blacklisted_author() {
    let api = Arc::new(FakeApi::new());
    api.set_profile(two_work_profile());
    api.set_facts(stern_facts());
    register_work_metadata(&api);

    // seed a store whose profile row carries the blacklist status
    let manager = DatabaseManager::new(DatabaseConfig::in_memory()).unwrap();
    let repo = Repository::new(manager.connect().unwrap());
    let mut profile = AuthorProfile::new(ORCIDID);
    profile.status = Some(ProfileStatus::Blacklisted);
    repo.insert_profile(profile).unwrap();
    let store = Arc::new(ProfileStore::new(
        repo,
        api.clone(),
        Duration::from_secs(3600),
    ));
    let (ctx, mut receivers) = test_context_with_store(api.clone(), Config::default(), store);

    let outcome = task_index_orcid_profile(&ctx, CheckOrcidMessage::new(ORCIDID))
        .await
        .unwrap();
    match outcome {
        IndexOutcome::Suppressed { inserted } => assert_eq!(inserted, 3),
        other => panic!("expected Suppressed, got {:?}", other),
    }

    // claim rows are logged, but nothing reaches the matcher
    assert!(receivers.match_claim.try_recv().is_err());
    let rows = ctx
        .store
        .claims_since(ORCIDID, &(Utc::now() - ChronoDuration::days(2)))
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_forced_reimport_marks_unchanged_claims_forced() {
    let api = Arc::new(FakeApi::new());
    let profile = two_work_profile();
    let work_time = profile.works[0].updated;
    api.set_profile(profile);
    api.set_facts(stern_facts());
    register_work_metadata(&api);
    let (ctx, _receivers) = test_context(api.clone());

    // previous import already claimed both works at the work time
    let sentinel_time = work_time - ChronoDuration::days(1);
    ctx.store
        .insert_claims(vec![
            ClaimLogEntry::new("", ORCIDID, ClaimStatus::FullImport, "OrcidImporter", sentinel_time),
            ClaimLogEntry::new(
                "2017ApJ...111..111B",
                ORCIDID,
                ClaimStatus::Claimed,
                "external",
                work_time,
            ),
            ClaimLogEntry::new(
                "2017ApJ...222..222B",
                ORCIDID,
                ClaimStatus::Claimed,
                "external",
                work_time,
            ),
        ])
        .unwrap();

    task_index_orcid_profile(&ctx, CheckOrcidMessage::forced(ORCIDID))
        .await
        .unwrap();

    let statuses: Vec<ClaimStatus> = ctx
        .store
        .claims_since(ORCIDID, &sentinel_time)
        .unwrap()
        .iter()
        .map(|r| r.status)
        .collect();
    // the forced re-import logs a second sentinel and re-marks the
    // unchanged intersection as forced
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == ClaimStatus::FullImport)
            .count(),
        2
    );
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == ClaimStatus::Forced)
            .count(),
        2
    );
}

// === match-claim ===

fn match_claim_payload() -> EnrichedClaim {
    serde_json::from_value(json!({
        "status": "claimed",
        "bibcode": "BIBCODE22",
        "orcidid": ORCIDID,
        "name": "Stern, D K",
        "provenance": "provenance",
        "created": "2017-01-01T00:00:00Z",
        "identifiers": ["id1", "id2"],
        "author": ["Stern, D", "Stern, D K", "Stern, Daniel"],
        "orcid_name": ["Stern, Daniel"],
        "author_norm": ["Stern, D"],
        "account_id": null,
        "author_list": ["Einstein, A", "Socrates", "Stern, D K", "Munger, C"]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_match_claim_persists_and_forwards() {
    let api = Arc::new(FakeApi::new());
    let (ctx, mut receivers) = test_context(api.clone());

    let outcome = task_match_claim(&ctx, match_claim_payload()).await.unwrap();
    assert_eq!(
        outcome.applied,
        Some(ClaimUpdate::Placed {
            kind: ClaimKind::Unverified,
            index: 2
        })
    );
    assert_eq!(outcome.reported, BibStatus::Verified);

    let record = ctx.store.get_record("BIBCODE22").unwrap().unwrap();
    assert_eq!(record.claims.unverified[2], ORCIDID);
    assert!(record.claims.verified.iter().all(|s| s == "-"));

    let message = receivers.output_results.try_recv().unwrap();
    assert_eq!(message.bibcode, "BIBCODE22");
    assert_eq!(message.unverified[2], ORCIDID);

    let calls = api.bib_status_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (orcidid, bibcodes, status) = &calls[0];
    assert_eq!(orcidid, ORCIDID);
    assert_eq!(
        bibcodes,
        &vec![
            "BIBCODE22".to_string(),
            "id1".to_string(),
            "id2".to_string()
        ]
    );
    assert_eq!(*status, BibStatus::Verified);
}

#[tokio::test]
async fn test_match_claim_refusal_reports_rejected() {
    let api = Arc::new(FakeApi::new());
    let (ctx, mut receivers) = test_context(api.clone());

    let mut claim = match_claim_payload();
    claim.author_list = Some(vec!["Erdmann, Christopher".to_string()]);

    let outcome = task_match_claim(&ctx, claim).await.unwrap();
    assert_eq!(outcome.applied, None);
    assert_eq!(outcome.reported, BibStatus::Rejected);

    // the record exists (created on retrieval) but holds no claims
    let record = ctx.store.get_record("BIBCODE22").unwrap().unwrap();
    assert!(record.claims.verified.iter().all(|s| s == "-"));
    assert!(record.claims.unverified.iter().all(|s| s == "-"));

    assert!(receivers.output_results.try_recv().is_err());
    assert_eq!(api.bib_status_calls.lock().unwrap()[0].2, BibStatus::Rejected);
}

#[tokio::test]
async fn test_match_claim_rejects_payload_without_orcidid() {
    let api = Arc::new(FakeApi::new());
    let (ctx, _receivers) = test_context(api);

    let mut claim = match_claim_payload();
    claim.orcidid = String::new();

    let err = task_match_claim(&ctx, claim).await.unwrap_err();
    assert!(matches!(err, orcid_pipeline::Error::Processing(_)));
}

#[tokio::test]
async fn test_match_removed_claim_refetches_metadata_and_scrubs() {
    let api = Arc::new(FakeApi::new());
    api.add_metadata(
        "BIBCODE22",
        RecordMetadata {
            bibcode: "BIBCODE22".to_string(),
            authors: vec![
                "Einstein, A".to_string(),
                "Socrates".to_string(),
                "Stern, D K".to_string(),
                "Munger, C".to_string(),
            ],
            identifiers: vec!["id1".to_string(), "id2".to_string()],
        },
    );
    let (ctx, mut receivers) = test_context(api.clone());

    // seed the record with the claim that is about to be withdrawn
    let seeded = task_match_claim(&ctx, match_claim_payload()).await.unwrap();
    assert!(seeded.applied.is_some());
    receivers.output_results.try_recv().unwrap();

    let metadata_calls_before = api.metadata_calls.load(Ordering::SeqCst);

    let mut claim = match_claim_payload();
    claim.status = ClaimStatus::Removed;
    claim.identifiers = None;
    claim.author_list = None;

    let outcome = task_match_claim(&ctx, claim).await.unwrap();
    assert!(outcome.applied.is_some());
    assert_eq!(outcome.reported, BibStatus::Verified);
    assert!(api.metadata_calls.load(Ordering::SeqCst) > metadata_calls_before);

    let record = ctx.store.get_record("BIBCODE22").unwrap().unwrap();
    assert!(record.claims.unverified.iter().all(|s| s == "-"));

    let message = receivers.output_results.try_recv().unwrap();
    assert!(message.unverified.iter().all(|s| s == "-"));
}

// === output-results ===

#[tokio::test]
async fn test_output_results_forwards_downstream() {
    let api = Arc::new(FakeApi::new());
    let (ctx, _receivers) = test_context(api.clone());

    let message = orcid_pipeline::pipeline::messages::ClaimsMessage {
        bibcode: "BIBCODE22".to_string(),
        authors: vec!["Stern, D K".to_string()],
        verified: vec!["-".to_string()],
        unverified: vec![ORCIDID.to_string()],
    };
    task_output_results(&ctx, message.clone()).await.unwrap();

    let forwarded = api.forwarded.lock().unwrap();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0], message);
}
