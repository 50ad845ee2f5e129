//! The Profile Store: the only shared mutable resource of the engine.
//!
//! Wraps the repository behind a mutex so every read-modify-write runs
//! against a single connection, adds the TTL profile cache, and owns
//! the fresh-harvest refresh that keeps profile facts current.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::api::{ApiClient, RecordMetadata};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::connection::{DatabaseConfig, DatabaseManager};
use crate::storage::models::author_profile::{normalize_orcidid, AuthorProfile};
use crate::storage::models::change_log::ChangeLogEntry;
use crate::storage::models::claim_log::{ClaimLogEntry, ClaimStatus};
use crate::storage::models::key_value::KeyValue;
use crate::storage::models::record::{Record, RecordClaims};
use crate::storage::repository::{format_timestamp, parse_timestamp, Repository};

pub struct ProfileStore {
    repo: Mutex<Repository>,
    cache: moka::sync::Cache<String, AuthorProfile>,
    api: Arc<dyn ApiClient>,
}

impl ProfileStore {
    /// Builds a store over an already-migrated repository.
    pub fn new(repo: Repository, api: Arc<dyn ApiClient>, cache_ttl: Duration) -> Self {
        Self {
            repo: Mutex::new(repo),
            cache: moka::sync::Cache::builder()
                .time_to_live(cache_ttl)
                .max_capacity(10_000)
                .build(),
            api,
        }
    }

    /// Opens (and migrates) the configured database.
    pub fn open(config: &Config, api: Arc<dyn ApiClient>) -> Result<Self> {
        let manager = DatabaseManager::new(DatabaseConfig::new(&config.database_path))
            .map_err(Error::Config)?;
        let repo = Repository::new(manager.connect()?);
        Ok(Self::new(
            repo,
            api,
            Duration::from_secs(config.profile_cache_ttl_secs),
        ))
    }

    /// In-memory store for tests.
    pub fn in_memory(api: Arc<dyn ApiClient>) -> Result<Self> {
        let manager = DatabaseManager::new(DatabaseConfig::in_memory()).map_err(Error::Config)?;
        let repo = Repository::new(manager.connect()?);
        Ok(Self::new(repo, api, Duration::from_secs(3600)))
    }

    fn repo(&self) -> std::sync::MutexGuard<'_, Repository> {
        self.repo.lock().expect("repository mutex poisoned")
    }

    /// Drops every cached profile; the next retrieval harvests fresh.
    pub fn clear_caches(&self) {
        self.cache.invalidate_all();
    }

    // === Author profiles ===

    /// Returns the profile for an ORCID iD, creating it on first
    /// sight and opportunistically refreshing its harvested facts.
    /// Every changed fact produces a change-log row.
    ///
    /// A failing harvest is recoverable: the caller may retry later.
    pub async fn retrieve_profile(&self, orcidid: &str) -> Result<AuthorProfile> {
        let orcidid = normalize_orcidid(orcidid);
        if let Some(cached) = self.cache.get(&orcidid) {
            return Ok(cached);
        }

        let existing = self.repo().get_profile(&orcidid)?;
        let harvested = self.api.harvest_author_info(&orcidid).await?;

        let profile = match existing {
            None => {
                let mut profile = AuthorProfile::new(&orcidid);
                profile.apply_harvest(harvested);
                self.repo().insert_profile(profile)?
            }
            Some(mut profile) => {
                let changes = profile.apply_harvest(harvested);
                if !changes.is_empty() {
                    let rows: Vec<ChangeLogEntry> = changes
                        .iter()
                        .map(|(field, old, new)| {
                            ChangeLogEntry::profile_update(&orcidid, field, old, new)
                        })
                        .collect();
                    let mut repo = self.repo();
                    repo.insert_change_log(&rows)?;
                    repo.update_profile(&profile)?;
                    info!(orcidid = %orcidid, changes = rows.len(), "profile facts updated");
                }
                profile
            }
        };

        self.cache.insert(orcidid, profile.clone());
        Ok(profile)
    }

    /// All known ORCID iDs.
    pub fn list_orcidids(&self) -> Result<Vec<String>> {
        Ok(self.repo().list_orcidids()?)
    }

    // === Claims log ===

    /// Builds a claim-log row without persisting it. With
    /// `force_new = false` an identical `(bibcode, orcidid, date)` row
    /// is returned instead of a new one (with the requested status).
    pub fn create_claim(
        &self,
        bibcode: &str,
        orcidid: &str,
        status: ClaimStatus,
        provenance: &str,
        date: Option<DateTime<Utc>>,
        force_new: bool,
    ) -> Result<ClaimLogEntry> {
        let created = date.unwrap_or_else(Utc::now);
        if !force_new {
            if let Some(mut existing) = self.repo().find_claim(bibcode, orcidid, &created)? {
                existing.status = status;
                if !provenance.is_empty() {
                    existing.provenance = provenance.to_string();
                }
                return Ok(existing);
            }
        }
        Ok(ClaimLogEntry::new(bibcode, orcidid, status, provenance, created))
    }

    /// Persists a batch of claim rows atomically.
    pub fn insert_claims(&self, entries: Vec<ClaimLogEntry>) -> Result<Vec<ClaimLogEntry>> {
        Ok(self.repo().insert_claims(entries)?)
    }

    /// Most recent `#full-import` sentinel for a profile.
    pub fn latest_full_import(&self, orcidid: &str) -> Result<Option<ClaimLogEntry>> {
        Ok(self.repo().latest_full_import(orcidid)?)
    }

    /// Claim rows created at or after `since`.
    pub fn claims_since(
        &self,
        orcidid: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ClaimLogEntry>> {
        Ok(self.repo().claims_since(orcidid, since)?)
    }

    /// Claim rows created strictly after `since`.
    pub fn claims_after(
        &self,
        orcidid: &str,
        since: &DateTime<Utc>,
    ) -> Result<Vec<ClaimLogEntry>> {
        Ok(self.repo().claims_after(orcidid, since)?)
    }

    // === Records ===

    /// Returns the record for a bibcode, creating it with the
    /// supplied author list when missing.
    pub fn retrieve_record(&self, bibcode: &str, authors: &[String]) -> Result<Record> {
        let repo = self.repo();
        if let Some(record) = repo.get_record(bibcode)? {
            return Ok(record);
        }
        let record = Record::new(bibcode, authors.to_vec());
        Ok(repo.insert_record(record)?)
    }

    /// Returns an existing record without creating one.
    pub fn get_record(&self, bibcode: &str) -> Result<Option<Record>> {
        Ok(self.repo().get_record(bibcode)?)
    }

    /// Persists new claim arrays for a record, creating the record
    /// when missing; `created` is preserved, `updated` bumped.
    pub fn record_claims(
        &self,
        bibcode: &str,
        claims: &RecordClaims,
        authors: Option<&[String]>,
    ) -> Result<()> {
        let repo = self.repo();
        if repo.get_record(bibcode)?.is_some() {
            repo.update_record_claims(bibcode, claims, authors)?;
        } else {
            let mut record = Record::new(bibcode, authors.map(<[String]>::to_vec).unwrap_or_default());
            record.claims = claims.clone();
            repo.insert_record(record)?;
        }
        Ok(())
    }

    /// Stamps a record as pushed downstream.
    pub fn mark_processed(&self, bibcode: &str) -> Result<()> {
        Ok(self.repo().mark_processed(bibcode)?)
    }

    /// Records updated at or after `since`, oldest first.
    pub fn records_updated_since(&self, since: &DateTime<Utc>) -> Result<Vec<Record>> {
        Ok(self.repo().records_updated_since(since)?)
    }

    /// Resolves an identifier through the external corpus lookup.
    pub async fn retrieve_metadata(
        &self,
        identifier: &str,
        search_identifiers: bool,
    ) -> Result<Option<RecordMetadata>> {
        self.api.get_metadata(identifier, search_identifiers).await
    }

    // === Checkpoints ===

    /// Reads a timestamp checkpoint.
    pub fn get_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.repo().get_value(key)? {
            Some(raw) => Ok(Some(parse_timestamp(&raw)?)),
            None => Ok(None),
        }
    }

    /// Writes a timestamp checkpoint.
    pub fn set_checkpoint(&self, key: &str, value: &DateTime<Utc>) -> Result<()> {
        Ok(self.repo().set_value(key, &format_timestamp(value))?)
    }

    /// Every stored checkpoint, for diagnostics.
    pub fn all_checkpoints(&self) -> Result<Vec<KeyValue>> {
        Ok(self.repo().all_values()?)
    }

    /// Audit rows stored under one change-log key.
    pub fn change_log_for_key(&self, key: &str) -> Result<Vec<ChangeLogEntry>> {
        Ok(self.repo().change_log_for_key(key)?)
    }
}
