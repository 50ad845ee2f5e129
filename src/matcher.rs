//! Locates a claimant's position inside a record's author list.
//!
//! Matching works on cleaned, lower-cased strings and proceeds from
//! the most discriminating evidence to the most permissive: an exact
//! scan (then an exact scan over ASCII-transliterated author names),
//! followed by a per-field Levenshtein pass with a substring fallback.
//! The functions here are pure; all I/O stays with the callers.

use deunicode::deunicode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::normalized_levenshtein;

/// The name-variant fields attached to an author profile, in the
/// order the fuzzy matcher consults them. The order moves from full
/// author strings seen on other records down to generated short and
/// ASCII forms, letting precise matches win before noisy ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactField {
    Author,
    OrcidName,
    AuthorNorm,
    ShortName,
    AsciiName,
}

impl FactField {
    /// All variant fields in matching order.
    pub const ALL: [FactField; 5] = [
        FactField::Author,
        FactField::OrcidName,
        FactField::AuthorNorm,
        FactField::ShortName,
        FactField::AsciiName,
    ];

    /// Field name as stored in profile facts and claim payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            FactField::Author => "author",
            FactField::OrcidName => "orcid_name",
            FactField::AuthorNorm => "author_norm",
            FactField::ShortName => "short_name",
            FactField::AsciiName => "ascii_name",
        }
    }
}

/// Per-field name variants for one claimant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameVariants {
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub orcid_name: Vec<String>,
    #[serde(default)]
    pub author_norm: Vec<String>,
    #[serde(default)]
    pub short_name: Vec<String>,
    #[serde(default)]
    pub ascii_name: Vec<String>,
}

impl NameVariants {
    /// The variants stored under one field.
    pub fn field(&self, field: FactField) -> &[String] {
        match field {
            FactField::Author => &self.author,
            FactField::OrcidName => &self.orcid_name,
            FactField::AuthorNorm => &self.author_norm,
            FactField::ShortName => &self.short_name,
            FactField::AsciiName => &self.ascii_name,
        }
    }

    /// True when no field carries a usable variant.
    pub fn is_empty(&self) -> bool {
        FactField::ALL
            .iter()
            .all(|f| self.field(*f).iter().all(|v| cleanup_name(v).is_empty()))
    }
}

/// Removes characters that carry no matching signal from a name.
///
/// Literal dots are dropped and runs of whitespace collapse to single
/// spaces, so `"Wong, J. Y."` and `"Wong, J Y"` compare equal.
pub fn cleanup_name(name: &str) -> String {
    let without_dots = name.replace('.', "");
    without_dots.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic ASCII approximation of a Unicode name.
///
/// Covers characters with no Unicode decomposition (`ı` → `i`), which
/// is what makes transliterated exact matches possible at all.
pub fn transliterate(name: &str) -> String {
    deunicode(name)
}

/// Transliteration folded to lower case, for comparisons.
pub fn ascii_fold(name: &str) -> String {
    transliterate(name).to_lowercase()
}

/// Generates the short forms of `"Surname, given1 given2 …"`.
///
/// Every form replaces exactly one given name with its initial, plus
/// every truncation of the all-initials form. Names without a comma,
/// or with only a single single-letter initial, produce nothing.
pub fn build_short_forms(name: &str) -> Vec<String> {
    let name = cleanup_name(name);
    let Some((surname, rest)) = name.split_once(',') else {
        return Vec::new();
    };

    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.is_empty() || (parts.len() == 1 && parts[0].chars().count() == 1) {
        return Vec::new();
    }

    let mut forms = HashSet::new();
    for (i, part) in parts.iter().enumerate() {
        if part.chars().count() > 1 {
            let mut working: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
            working[i] = part.chars().next().unwrap().to_string();
            forms.insert(format!("{}, {}", surname, working.join(" ")));
        }
    }

    let mut initials: Vec<String> = parts
        .iter()
        .map(|p| p.chars().next().unwrap().to_string())
        .collect();
    while !initials.is_empty() {
        forms.insert(format!("{}, {}", surname, initials.join(" ")));
        initials.pop();
    }

    let mut out: Vec<String> = forms.into_iter().collect();
    out.sort();
    out
}

/// Finds the index of the claimant inside `authors`, or None when the
/// claim cannot be attached to any author.
///
/// `min_ratio` applies to the fuzzy pass only; exact matches (including
/// matches against the ASCII transliteration of an author) always win.
pub fn find_author_index(
    authors: &[String],
    variants: &NameVariants,
    min_ratio: f64,
) -> Option<usize> {
    let cleaned: Vec<String> = authors
        .iter()
        .map(|a| cleanup_name(a).to_lowercase())
        .collect();

    let mut exact: HashSet<String> = HashSet::new();
    for field in FactField::ALL {
        for variant in variants.field(field) {
            let v = cleanup_name(variant).to_lowercase();
            if !v.is_empty() {
                exact.insert(v);
            }
        }
    }
    if exact.is_empty() {
        return None;
    }

    for (i, author) in cleaned.iter().enumerate() {
        if !author.is_empty() && exact.contains(author) {
            return Some(i);
        }
    }
    for (i, author) in cleaned.iter().enumerate() {
        if !author.is_empty() && exact.contains(&ascii_fold(author)) {
            return Some(i);
        }
    }

    // Fuzzy pass: the first field producing a hit wins.
    for field in FactField::ALL {
        let field_variants: Vec<String> = variants
            .field(field)
            .iter()
            .map(|v| cleanup_name(v).to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        if field_variants.is_empty() {
            continue;
        }

        let mut best: Option<(f64, usize, usize)> = None;
        for (vi, variant) in field_variants.iter().enumerate() {
            for (ai, author) in cleaned.iter().enumerate() {
                if author.is_empty() {
                    continue;
                }
                let plain = normalized_levenshtein(author, variant);
                let folded = normalized_levenshtein(&ascii_fold(author), variant);
                let ratio = if folded > plain { folded } else { plain };

                let better = match best {
                    None => true,
                    Some((best_ratio, best_ai, best_vi)) => {
                        ratio > best_ratio
                            || (ratio == best_ratio
                                && author.len() + variant.len()
                                    > cleaned[best_ai].len() + field_variants[best_vi].len())
                    }
                };
                if better {
                    best = Some((ratio, ai, vi));
                }
            }
        }

        if let Some((ratio, ai, vi)) = best {
            if ratio >= min_ratio {
                return Some(ai);
            }
            // Sub-match: accept when the top-ranked author and variant
            // contain one another (initials vs spelled-out given names).
            let author = &cleaned[ai];
            let variant = &field_variants[vi];
            if author.contains(variant.as_str()) || variant.contains(author.as_str()) {
                return Some(ai);
            }
        }
    }

    None
}
