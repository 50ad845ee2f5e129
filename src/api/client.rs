//! reqwest-backed implementation of the external API surface.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{harvest, ApiClient, BibStatus, OrcidProfile, RecordMetadata, UpdatedProfile};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::messages::ClaimsMessage;
use crate::storage::models::author_profile::Facts;

/// HTTP client for the profile service, the search index and the
/// downstream exchange. All requests carry the configured Bearer token.
pub struct HttpApiClient {
    http: reqwest::Client,
    config: Config,
}

impl HttpApiClient {
    pub fn new(config: Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(template: &str, key: &str, value: &str) -> String {
        template.replace(&format!("{{{}}}", key), value)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::transient(url, format!("HTTP {}: {}", status, body)));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Runs one search-index query and returns the matching documents.
    async fn query_index(&self, query: &str, fields: &str) -> Result<Vec<Value>> {
        let url = format!(
            "{}?q={}&fl={}",
            self.config.api_solr_query_endpoint,
            urlencode(query),
            urlencode(fields),
        );
        let body = self.get_json(&url).await?;
        let docs = body
            .get("response")
            .and_then(|r| r.get("docs"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(docs)
    }
}

/// Minimal percent-encoding for query strings.
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn get_orcid_profile(&self, orcidid: &str) -> Result<OrcidProfile> {
        let url = Self::endpoint(&self.config.api_orcid_export_profile, "orcidid", orcidid);
        let body = self.get_json(&url).await?;
        if body.is_null() {
            return Ok(OrcidProfile::default());
        }
        Ok(serde_json::from_value(body)?)
    }

    async fn updates_since(&self, since: &DateTime<Utc>) -> Result<Vec<UpdatedProfile>> {
        let since = since.to_rfc3339_opts(SecondsFormat::Micros, true);
        let url = format!(
            "{}?fields=orcid_id,updated,created",
            Self::endpoint(&self.config.api_orcid_updates_endpoint, "since", &since)
        );
        let body = self.get_json(&url).await?;
        // empty string and empty array both mean "nothing new"
        if body.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(body)?)
    }

    async fn update_bib_status(
        &self,
        orcidid: &str,
        bibcodes: &[String],
        status: BibStatus,
    ) -> Result<Value> {
        let url = Self::endpoint(&self.config.api_orcid_update_bib_status, "orcidid", orcidid);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_token)
            .json(&json!({"bibcodes": bibcodes, "status": status.as_str()}))
            .send()
            .await?;

        let http_status = response.status();
        let body = response.text().await?;
        if !http_status.is_success() {
            return Err(Error::transient(
                &url,
                format!("HTTP {}: {}", http_status, body),
            ));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn harvest_author_info(&self, orcidid: &str) -> Result<Facts> {
        let public_url = Self::endpoint(&self.config.api_orcid_profile_endpoint, "orcidid", orcidid);
        let public_profile = self.get_json(&public_url).await?;

        let profile_url = Self::endpoint(&self.config.api_orcid_export_profile, "orcidid", orcidid);
        let author_profile = self.get_json(&profile_url).await?;

        let index_form = orcidid.replace('-', "");
        let docs = self
            .query_index(
                &format!("orcid_pub:\"{}\"", index_form),
                "orcid_pub,author,author_norm",
            )
            .await?;

        Ok(harvest::combine_facts(
            orcidid,
            &public_profile,
            &author_profile,
            &docs,
        ))
    }

    async fn get_metadata(
        &self,
        identifier: &str,
        search_identifiers: bool,
    ) -> Result<Option<RecordMetadata>> {
        let query = if search_identifiers {
            format!("identifier:\"{}\"", identifier)
        } else {
            format!("bibcode:\"{}\"", identifier)
        };
        let docs = self.query_index(&query, "bibcode,author,identifier").await?;

        let Some(doc) = docs.first() else {
            return Ok(None);
        };
        let Some(bibcode) = doc.get("bibcode").and_then(Value::as_str) else {
            return Ok(None);
        };

        let as_list = |key: &str| -> Vec<String> {
            doc.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Some(RecordMetadata {
            bibcode: bibcode.to_string(),
            authors: as_list("author"),
            identifiers: as_list("identifier"),
        }))
    }

    async fn forward_message(&self, message: &ClaimsMessage) -> Result<()> {
        if self.config.output_exchange_url.is_empty() {
            debug!(bibcode = %message.bibcode, "output exchange disabled, dropping message");
            return Ok(());
        }

        let response = self
            .http
            .post(&self.config.output_exchange_url)
            .bearer_auth(&self.config.api_token)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transient(
                &self.config.output_exchange_url,
                format!("HTTP {}: {}", status, body),
            ));
        }
        Ok(())
    }
}
