//! Combines the three author-info sources into one facts object.
//!
//! The public ORCID profile contributes the author's own name, the
//! site author profile contributes name variations and account flags,
//! and the search index contributes the `author`/`author_norm` strings
//! aligned with the position of the ORCID iD on already-claimed
//! records. Short and ASCII forms are derived from the result.

use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::matcher::{build_short_forms, cleanup_name, transliterate};
use crate::storage::models::author_profile::Facts;

/// Strips hyphens and lower-cases, the form the search index stores.
fn index_orcid_form(orcidid: &str) -> String {
    orcidid.replace('-', "").to_lowercase()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// "Family, Given" from the public ORCID profile, when both parts exist.
fn public_profile_name(public_profile: &Value) -> Option<String> {
    let name = public_profile.get("person")?.get("name")?;
    let family = name.get("family-name")?.get("value")?.as_str()?;
    let given = name.get("given-names")?.get("value")?.as_str()?;
    Some(format!("{}, {}", family, given))
}

/// Builds the facts object for one author.
///
/// `index_docs` are search-index documents carrying `orcid_pub`,
/// `author` and `author_norm` arrays; entries whose `orcid_pub` does
/// not contain the ORCID iD are skipped.
pub fn combine_facts(
    orcidid: &str,
    public_profile: &Value,
    author_profile: &Value,
    index_docs: &[Value],
) -> Facts {
    let mut authors: BTreeSet<String> = BTreeSet::new();
    let mut author_norms: BTreeSet<String> = BTreeSet::new();

    let info = author_profile.get("info").unwrap_or(&Value::Null);
    for variation in string_list(info.get("nameVariations")) {
        if !cleanup_name(&variation).is_empty() {
            authors.insert(cleanup_name(&variation));
        }
    }
    let preferred_name = info
        .get("name")
        .and_then(Value::as_str)
        .map(cleanup_name)
        .filter(|n| !n.is_empty());
    if let Some(name) = &preferred_name {
        authors.insert(name.clone());
    }

    let wanted = index_orcid_form(orcidid);
    for doc in index_docs {
        let orcid_pub = string_list(doc.get("orcid_pub"));
        let Some(idx) = orcid_pub.iter().position(|o| index_orcid_form(o) == wanted) else {
            continue;
        };
        for (field, target) in [("author", &mut authors), ("author_norm", &mut author_norms)] {
            if let Some(name) = string_list(doc.get(field)).get(idx) {
                let cleaned = cleanup_name(name);
                if !cleaned.is_empty() {
                    target.insert(cleaned);
                }
            }
        }
    }

    let orcid_name = public_profile_name(public_profile).map(|n| cleanup_name(&n));

    let mut short_names: BTreeSet<String> = BTreeSet::new();
    for author in &authors {
        short_names.extend(build_short_forms(author));
    }

    let mut ascii_names: BTreeSet<String> = BTreeSet::new();
    for name in authors.iter().chain(short_names.iter()) {
        ascii_names.insert(transliterate(name));
    }

    let display_name = preferred_name
        .or_else(|| author_norms.iter().next().cloned())
        .or_else(|| orcid_name.clone())
        .unwrap_or_default();

    let mut facts = Facts::new();
    facts.insert("name", json!(display_name));
    facts.insert("author", json!(authors.iter().collect::<Vec<_>>()));
    if let Some(orcid_name) = orcid_name {
        facts.insert("orcid_name", json!([orcid_name]));
    }
    facts.insert("author_norm", json!(author_norms.iter().collect::<Vec<_>>()));
    facts.insert("short_name", json!(short_names.iter().collect::<Vec<_>>()));
    facts.insert("ascii_name", json!(ascii_names.iter().collect::<Vec<_>>()));
    if let Some(authorized) = info.get("authorized").and_then(Value::as_bool) {
        facts.insert("authorized", json!(authorized));
    }
    if let Some(affiliation) = info.get("currentAffiliation").and_then(Value::as_str) {
        facts.insert("current_affiliation", json!(affiliation));
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FactField;

    #[test]
    fn test_combine_facts_merges_all_sources() {
        let public_profile = json!({
            "person": {"name": {
                "given-names": {"value": "Daniel"},
                "family-name": {"value": "Stern"}
            }}
        });
        let author_profile = json!({
            "info": {
                "name": "Stern, D",
                "nameVariations": ["Stern, A D", "Stern, Andrew D", "Stern, Daniel", ""],
                "authorized": true,
                "currentAffiliation": "ADS"
            }
        });
        let docs = vec![json!({
            "orcid_pub": ["-", "0000000326869241"],
            "author": ["Someone, Else", "Stern, D K"],
            "author_norm": ["Someone, E", "Stern, D"]
        })];

        let facts = combine_facts("0000-0003-2686-9241", &public_profile, &author_profile, &docs);

        assert_eq!(
            facts.variant_list(FactField::Author),
            vec![
                "Stern, A D",
                "Stern, Andrew D",
                "Stern, D",
                "Stern, D K",
                "Stern, Daniel"
            ]
        );
        assert_eq!(facts.variant_list(FactField::OrcidName), vec!["Stern, Daniel"]);
        assert_eq!(facts.variant_list(FactField::AuthorNorm), vec!["Stern, D"]);
        assert_eq!(
            facts.variant_list(FactField::ShortName),
            vec!["Stern, A", "Stern, A D", "Stern, D", "Stern, D K"]
        );
        assert_eq!(
            facts.variant_list(FactField::AsciiName),
            vec![
                "Stern, A",
                "Stern, A D",
                "Stern, Andrew D",
                "Stern, D",
                "Stern, D K",
                "Stern, Daniel"
            ]
        );
        assert!(facts.is_authorized());
        assert_eq!(facts.get("name").unwrap(), "Stern, D");
        assert_eq!(facts.get("current_affiliation").unwrap(), "ADS");
    }

    #[test]
    fn test_combine_facts_skips_foreign_docs() {
        let docs = vec![json!({
            "orcid_pub": ["0000000000000001"],
            "author": ["Other, Author"],
            "author_norm": ["Other, A"]
        })];
        let facts = combine_facts(
            "0000-0003-2686-9241",
            &Value::Null,
            &Value::Null,
            &docs,
        );
        assert!(facts.variant_list(FactField::Author).is_empty());
        assert!(facts.variant_list(FactField::AuthorNorm).is_empty());
    }

    #[test]
    fn test_ascii_names_transliterate() {
        let author_profile = json!({
            "info": {"name": "Yıldız, Umut", "nameVariations": ["Yıldız, U"]}
        });
        let facts = combine_facts("0000-0001-2345-6789", &Value::Null, &author_profile, &[]);
        let ascii = facts.variant_list(FactField::AsciiName);
        assert!(ascii.contains(&"Yildiz, Umut".to_string()));
        assert!(ascii.contains(&"Yildiz, U".to_string()));
    }
}
