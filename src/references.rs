//! Reference Canonicalization
//!
//! Each workflow owns one [`ReferenceCanonicalizer`]. References contributed by
//! independent authors are matched on a cleaned DOI first and a normalized title
//! second; a match returns the existing canonical id so citation numbers stay stable.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Identifier values models emit instead of leaving the field empty.
const BOGUS_DOIS: &[&str] = &["not provided", "n/a", "na", "none", "unknown", "null", ""];

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Upper bound on normalization passes before the result is taken as final.
const MAX_NORMALIZE_PASSES: usize = 8;

static BRACKET_ID_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[\w.:/-]+\]\s*").unwrap());
static SOURCE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[|\u{2013}\u{2014}]\s*|\s+-\s+").unwrap());
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").unwrap());

/// A reference as contributed by one author, numbered in that author's own list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCandidate {
    pub local_id: u32,
    pub title: String,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub year: Option<i32>,
}

impl ReferenceCandidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            local_id: 1,
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    /// No title, identifier or link.
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty()
            && self.doi.as_deref().map_or(true, |d| d.trim().is_empty())
            && self.url.as_deref().map_or(true, |u| u.trim().is_empty())
    }
}

/// Canonical record for every detected variant of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: u32,
    pub title: String,
    pub normalized_title: String,
    pub doi: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub year: Option<i32>,
    /// Raw titles seen for this record, first one included
    pub variants: Vec<String>,
}

/// Per-workflow deduplication index.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCanonicalizer {
    references: Vec<Reference>,
    by_doi: HashMap<String, u32>,
    by_title: HashMap<String, u32>,
}

impl ReferenceCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from previously canonicalized references (e.g. from a checkpoint).
    pub fn from_references(references: Vec<Reference>) -> Self {
        let mut canonicalizer = Self::new();
        for mut reference in references {
            reference.id = canonicalizer.references.len() as u32 + 1;
            canonicalizer.index(&reference);
            canonicalizer.references.push(reference);
        }
        canonicalizer
    }

    /// Returns the canonical id for `candidate`, creating a record only when nothing matches.
    pub fn add_reference(&mut self, candidate: &ReferenceCandidate) -> u32 {
        let doi = candidate.doi.as_deref().and_then(clean_doi);
        let normalized = normalize_title(&candidate.title);

        let existing = doi
            .as_ref()
            .and_then(|d| self.by_doi.get(&d.to_lowercase()))
            .or_else(|| {
                (!normalized.is_empty())
                    .then(|| self.by_title.get(&normalized))
                    .flatten()
            })
            .copied();

        if let Some(id) = existing {
            let record = &mut self.references[id as usize - 1];
            let raw = candidate.title.trim();
            if !raw.is_empty() && !record.variants.iter().any(|v| v == raw) {
                record.variants.push(raw.to_string());
            }
            if record.doi.is_none() {
                record.doi = doi;
            }
            if record.url.is_none() {
                record.url = candidate.url.clone();
            }
            if record.year.is_none() {
                record.year = candidate.year;
            }
            let snapshot = record.clone();
            self.index(&snapshot);
            if !normalized.is_empty() {
                self.by_title.entry(normalized).or_insert(id);
            }
            return id;
        }

        let id = self.references.len() as u32 + 1;
        let title = candidate.title.trim().to_string();
        let reference = Reference {
            id,
            variants: if title.is_empty() {
                Vec::new()
            } else {
                vec![title.clone()]
            },
            title,
            normalized_title: normalized,
            doi,
            url: candidate.url.clone(),
            authors: candidate.authors.clone(),
            year: candidate.year,
        };
        self.index(&reference);
        self.references.push(reference);
        id
    }

    /// Canonicalize one author's list, returning local id → canonical id.
    pub fn merge(&mut self, candidates: &[ReferenceCandidate]) -> HashMap<u32, u32> {
        candidates
            .iter()
            .map(|c| (c.local_id, self.add_reference(c)))
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&Reference> {
        id.checked_sub(1)
            .and_then(|i| self.references.get(i as usize))
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn into_references(self) -> Vec<Reference> {
        self.references
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    fn index(&mut self, reference: &Reference) {
        if let Some(doi) = &reference.doi {
            self.by_doi.entry(doi.to_lowercase()).or_insert(reference.id);
        }
        if !reference.normalized_title.is_empty() {
            self.by_title
                .entry(reference.normalized_title.clone())
                .or_insert(reference.id);
        }
    }
}

/// Normalize a title for comparison. Idempotent.
pub fn normalize_title(title: &str) -> String {
    let mut current = normalize_once(title);
    for _ in 0..MAX_NORMALIZE_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_once(title: &str) -> String {
    let folded: String = title.nfkc().collect::<String>().to_lowercase();
    let stripped = BRACKET_ID_PREFIX.replace(folded.trim(), "");
    let head = SOURCE_SUFFIX
        .split(&stripped)
        .next()
        .filter(|head| !head.trim().is_empty())
        .unwrap_or(&stripped);
    let bare = PUNCTUATION.replace_all(head, "");
    bare.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a DOI, or `None` for placeholders and values that are not DOIs.
pub fn clean_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if BOGUS_DOIS.contains(&trimmed.to_lowercase().as_str()) {
        return None;
    }
    let lower = trimmed.to_lowercase();
    let stripped = DOI_PREFIXES
        .iter()
        .find(|prefix| lower.starts_with(*prefix))
        .map(|prefix| trimmed[prefix.len()..].trim())
        .unwrap_or(trimmed);
    let valid = stripped.starts_with("10.") || stripped.to_lowercase().starts_with("arxiv:");
    valid.then(|| stripped.to_string())
}

/// Rewrite `[n]` and `[n, m]` citations through `mapping`. Unknown numbers are kept.
pub fn remap_citations(text: &str, mapping: &HashMap<u32, u32>) -> String {
    CITATION
        .replace_all(text, |caps: &Captures| {
            let mut ids: Vec<String> = Vec::new();
            for part in caps[1].split(',') {
                let part = part.trim();
                let mapped = part
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| mapping.get(&n))
                    .map(u32::to_string)
                    .unwrap_or_else(|| part.to_string());
                if !ids.contains(&mapped) {
                    ids.push(mapped);
                }
            }
            format!("[{}]", ids.join(", "))
        })
        .into_owned()
}
