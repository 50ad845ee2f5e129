//! Shared test fixtures: an in-process fake of the external API
//! surface with programmable responses and call recording.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use orcid_pipeline::api::{
    ApiClient, BibStatus, OrcidProfile, OrcidWork, RecordMetadata, UpdatedProfile, WorkIdentifier,
};
use orcid_pipeline::error::{Error, Result};
use orcid_pipeline::pipeline::messages::ClaimsMessage;
use orcid_pipeline::pipeline::queues::{PipelineContext, QueueReceivers, Queues};
use orcid_pipeline::storage::models::author_profile::Facts;
use orcid_pipeline::store::ProfileStore;
use orcid_pipeline::Config;

#[derive(Default)]
pub struct FakeApi {
    pub profile: Mutex<OrcidProfile>,
    pub facts: Mutex<Facts>,
    pub metadata: Mutex<HashMap<String, RecordMetadata>>,
    /// When set, any 19-character identifier resolves to itself
    pub resolve_bibcode_like: AtomicBool,
    pub update_batches: Mutex<Vec<Vec<UpdatedProfile>>>,
    pub fail_updates: AtomicBool,
    pub bib_status_response: Mutex<Option<Value>>,

    pub profile_calls: AtomicUsize,
    pub updates_calls: AtomicUsize,
    pub harvest_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub bib_status_calls: Mutex<Vec<(String, Vec<String>, BibStatus)>>,
    pub forwarded: Mutex<Vec<ClaimsMessage>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profile(&self, profile: OrcidProfile) {
        *self.profile.lock().unwrap() = profile;
    }

    pub fn set_facts(&self, facts: Value) {
        *self.facts.lock().unwrap() = serde_json::from_value(facts).unwrap();
    }

    pub fn add_metadata(&self, identifier: &str, metadata: RecordMetadata) {
        self.metadata
            .lock()
            .unwrap()
            .insert(identifier.to_string(), metadata);
    }

    pub fn push_update_batch(&self, batch: Vec<UpdatedProfile>) {
        self.update_batches.lock().unwrap().push(batch);
    }
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn get_orcid_profile(&self, _orcidid: &str) -> Result<OrcidProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn updates_since(&self, _since: &DateTime<Utc>) -> Result<Vec<UpdatedProfile>> {
        self.updates_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::transient("/updates", "HTTP 503"));
        }
        let mut batches = self.update_batches.lock().unwrap();
        if batches.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(batches.remove(0))
        }
    }

    async fn update_bib_status(
        &self,
        orcidid: &str,
        bibcodes: &[String],
        status: BibStatus,
    ) -> Result<Value> {
        self.bib_status_calls.lock().unwrap().push((
            orcidid.to_string(),
            bibcodes.to_vec(),
            status,
        ));
        if let Some(response) = self.bib_status_response.lock().unwrap().clone() {
            return Ok(response);
        }
        let mut response = serde_json::Map::new();
        response.insert(bibcodes[0].clone(), json!(status.as_str()));
        Ok(Value::Object(response))
    }

    async fn harvest_author_info(&self, _orcidid: &str) -> Result<Facts> {
        self.harvest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.facts.lock().unwrap().clone())
    }

    async fn get_metadata(
        &self,
        identifier: &str,
        _search_identifiers: bool,
    ) -> Result<Option<RecordMetadata>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(metadata) = self.metadata.lock().unwrap().get(identifier) {
            return Ok(Some(metadata.clone()));
        }
        if self.resolve_bibcode_like.load(Ordering::SeqCst) && identifier.len() == 19 {
            return Ok(Some(RecordMetadata {
                bibcode: identifier.to_string(),
                authors: Vec::new(),
                identifiers: Vec::new(),
            }));
        }
        Ok(None)
    }

    async fn forward_message(&self, message: &ClaimsMessage) -> Result<()> {
        self.forwarded.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Builds an ORCID work carrying a single bibcode identifier.
pub fn bibcode_work(bibcode: &str, updated: DateTime<Utc>) -> OrcidWork {
    OrcidWork {
        identifiers: vec![WorkIdentifier {
            scheme: "bibcode".to_string(),
            value: bibcode.to_string(),
        }],
        updated,
        provenance: "external".to_string(),
    }
}

/// A pipeline context over an in-memory store and the fake API, with
/// the queue receivers handed back for inspection.
pub fn test_context(api: Arc<FakeApi>) -> (Arc<PipelineContext>, QueueReceivers) {
    let config = Config::default();
    test_context_with_config(api, config)
}

pub fn test_context_with_config(
    api: Arc<FakeApi>,
    config: Config,
) -> (Arc<PipelineContext>, QueueReceivers) {
    let store = Arc::new(ProfileStore::in_memory(api.clone()).unwrap());
    test_context_with_store(api, config, store)
}

pub fn test_context_with_store(
    api: Arc<FakeApi>,
    config: Config,
    store: Arc<ProfileStore>,
) -> (Arc<PipelineContext>, QueueReceivers) {
    let pending = Arc::new(AtomicUsize::new(0));
    let (queues, receivers) = Queues::new(pending);
    let context = Arc::new(PipelineContext {
        store,
        api,
        config: Arc::new(config),
        queues,
    });
    (context, receivers)
}
