use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file path
    pub database_path: PathBuf,

    /// Log level
    pub log_level: String,

    /// Bearer token for the API endpoints
    pub api_token: String,

    /// ORCID profile export endpoint; `{orcidid}` is substituted
    pub api_orcid_export_profile: String,

    /// Updated-profiles feed; `{since}` is substituted
    pub api_orcid_updates_endpoint: String,

    /// Per-bibcode claim status callback; `{orcidid}` is substituted
    pub api_orcid_update_bib_status: String,

    /// Public ORCID profile endpoint; `{orcidid}` is substituted
    pub api_orcid_profile_endpoint: String,

    /// Search-index query endpoint used for metadata and name variants
    pub api_solr_query_endpoint: String,

    /// Downstream exchange for reconciled claims; empty disables forwarding
    pub output_exchange_url: String,

    /// Seconds an ORCID work may be newer than the stored claim before
    /// an `updated` row is emitted
    pub orcid_update_window_secs: i64,

    /// Minimum seconds between two runs of the update poller
    pub orcid_check_for_changes_secs: i64,

    /// Minimum Levenshtein ratio accepted by the name matcher
    pub min_levenshtein_ratio: f64,

    /// Identifier scheme priorities used when selecting the canonical
    /// bibcode for an ORCID work; `*` is the default priority
    pub orcid_identifiers_order: HashMap<String, i32>,

    /// Seconds a harvested author profile stays cached
    pub profile_cache_ttl_secs: u64,

    /// Number of workers per processing queue
    pub workers_per_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut identifiers_order = HashMap::new();
        identifiers_order.insert("bibcode".to_string(), 9);
        identifiers_order.insert("*".to_string(), -1);

        Self {
            database_path: PathBuf::from("./orcid-pipeline.db"),
            log_level: "info".to_string(),
            api_token: String::new(),
            api_orcid_export_profile: "https://api.adsabs.harvard.edu/v1/orcid/get-profile/{orcidid}".to_string(),
            api_orcid_updates_endpoint: "https://api.adsabs.harvard.edu/v1/orcid/export/{since}".to_string(),
            api_orcid_update_bib_status: "https://api.adsabs.harvard.edu/v1/orcid/update-status/{orcidid}".to_string(),
            api_orcid_profile_endpoint: "https://api.adsabs.harvard.edu/v1/orcid/{orcidid}/orcid-profile".to_string(),
            api_solr_query_endpoint: "https://api.adsabs.harvard.edu/v1/search/query".to_string(),
            output_exchange_url: String::new(),
            orcid_update_window_secs: 60,
            orcid_check_for_changes_secs: 300,
            min_levenshtein_ratio: 0.9,
            orcid_identifiers_order: identifiers_order,
            profile_cache_ttl_secs: 3600,
            workers_per_queue: num_cpus::get(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults,
    /// then apply environment overrides for deployment secrets.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", p.display(), e)))?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Config(format!("cannot parse {}: {}", p.display(), e)))?
            }
            None => Self::default(),
        };

        if let Ok(token) = std::env::var("ORCID_PIPELINE_API_TOKEN") {
            config.api_token = token;
        }
        if let Ok(db) = std::env::var("ORCID_PIPELINE_DATABASE") {
            config.database_path = PathBuf::from(db);
        }

        Ok(config)
    }

    /// Priority score for an identifier scheme, falling back to `*`.
    pub fn identifier_priority(&self, scheme: &str) -> i32 {
        self.orcid_identifiers_order
            .get(scheme)
            .or_else(|| self.orcid_identifiers_order.get("*"))
            .copied()
            .unwrap_or(-1)
    }
}
