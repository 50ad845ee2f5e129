use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::matcher::{FactField, NameVariants};

/// Moderation state of an author profile. Blacklisted and postponed
/// profiles still accept claim-log rows but never reach the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Blacklisted,
    Postponed,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Blacklisted => "blacklisted",
            ProfileStatus::Postponed => "postponed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "blacklisted" => Some(ProfileStatus::Blacklisted),
            "postponed" => Some(ProfileStatus::Postponed),
            _ => None,
        }
    }
}

/// Harvested knowledge about an author, keyed by field name.
///
/// The five name-variant fields drive the matcher; any other key
/// (`authorized`, `current_affiliation`, …) is carried verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts(pub BTreeMap<String, Value>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// String list stored under a variant field; scalars are treated
    /// as single-element lists, anything else as empty.
    pub fn variant_list(&self, field: FactField) -> Vec<String> {
        match self.0.get(field.as_str()) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// All five variant fields, in matcher order.
    pub fn name_variants(&self) -> NameVariants {
        NameVariants {
            author: self.variant_list(FactField::Author),
            orcid_name: self.variant_list(FactField::OrcidName),
            author_norm: self.variant_list(FactField::AuthorNorm),
            short_name: self.variant_list(FactField::ShortName),
            ascii_name: self.variant_list(FactField::AsciiName),
        }
    }

    /// True when the harvested facts mark a verified site account.
    pub fn is_authorized(&self) -> bool {
        matches!(self.0.get("authorized"), Some(Value::Bool(true)))
    }
}

/// An author profile keyed by ORCID iD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorProfile {
    /// Database row id (None until persisted)
    pub id: Option<i64>,
    /// 19-character ORCID iD, lower-cased, hyphens retained
    pub orcidid: String,
    /// Canonical display name
    pub name: String,
    /// Harvested name variants and account flags
    pub facts: Facts,
    /// Moderation state (None = active)
    pub status: Option<ProfileStatus>,
    /// Set when the profile belongs to a verified site account
    pub account_id: Option<i64>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl AuthorProfile {
    /// Creates a fresh, unpersisted profile for an ORCID iD.
    pub fn new(orcidid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            orcidid: normalize_orcidid(&orcidid.into()),
            name: String::new(),
            facts: Facts::new(),
            status: None,
            account_id: None,
            created: now,
            updated: now,
        }
    }

    /// True when claims from this profile must not reach the matcher.
    pub fn is_suppressed(&self) -> bool {
        self.status.is_some()
    }

    /// Applies freshly harvested facts, returning the list of
    /// `(field, old, new)` changes. Facts are replaced wholesale; a
    /// change row is produced for every added, removed or differing
    /// field, plus one for the display name.
    pub fn apply_harvest(&mut self, harvested: Facts) -> Vec<(String, Value, Value)> {
        let mut changes = Vec::new();

        let new_name = match harvested.get("name") {
            Some(Value::String(s)) => s.clone(),
            _ => self.name.clone(),
        };
        if new_name != self.name {
            changes.push((
                "name".to_string(),
                Value::String(self.name.clone()),
                Value::String(new_name.clone()),
            ));
            self.name = new_name;
        }

        let mut keys: Vec<&String> = self.facts.0.keys().chain(harvested.0.keys()).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if *key == "name" {
                continue;
            }
            let old = self.facts.get(key).cloned().unwrap_or(Value::Null);
            let new = harvested.get(key).cloned().unwrap_or(Value::Null);
            if old != new {
                changes.push((key.clone(), old, new));
            }
        }

        if harvested.is_authorized() {
            self.account_id = Some(1);
        }
        self.facts = harvested;
        if !changes.is_empty() {
            self.updated = Utc::now();
        }
        changes
    }
}

/// Normalizes an ORCID iD: lower-case, hyphens retained.
pub fn normalize_orcidid(orcidid: &str) -> String {
    orcidid.trim().to_lowercase()
}
