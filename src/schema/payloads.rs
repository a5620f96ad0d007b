//! Typed stage payloads.
//!
//! Every field read from model output goes through [`Fields`], which applies the
//! fallback for its kind: identifiers fall back to a positional id, titles and names
//! to a positional placeholder, free text to `""`, lists to `[]` and scores to
//! [`DEFAULT_SCORE`]. Parsing never fails on a missing field.

use super::repair::repair_json;
use crate::references::ReferenceCandidate;
use crate::workflow::{ExpertConfig, ExpertRole, Section, VerdictDecision};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Score used when a reviewer gives no usable number.
pub const DEFAULT_SCORE: f64 = 5.0;
pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;
pub const DEFAULT_CONFIDENCE: u8 = 3;

pub fn section_id(index: usize) -> String {
    format!("section-{}", index)
}

pub fn section_title(index: usize) -> String {
    format!("Section {}", index)
}

pub fn expert_id(index: usize) -> String {
    format!("expert-{}", index)
}

pub fn expert_name(index: usize) -> String {
    format!("Expert {}", index)
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(MIN_SCORE, MAX_SCORE)
    } else {
        DEFAULT_SCORE
    }
}

/// Field accessor over an optional JSON object. Each lookup takes a list of aliases.
#[derive(Clone, Copy)]
struct Fields<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn of(value: &'a Value) -> Self {
        Self {
            map: value.as_object(),
        }
    }

    fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        let map = self.map?;
        keys.iter()
            .filter_map(|k| map.get(*k))
            .find(|v| !v.is_null())
    }

    fn opt_text(&self, keys: &[&str]) -> Option<String> {
        match self.get(keys)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn text(&self, keys: &[&str]) -> String {
        match self.get(keys) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn list(&self, keys: &[&str]) -> Vec<String> {
        match self.get(keys) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }

    fn array(&self, keys: &[&str]) -> &'a [Value] {
        match self.get(keys) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        self.get(keys).and_then(as_number)
    }

    fn object(&self, keys: &[&str]) -> Option<&'a Map<String, Value>> {
        self.get(keys).and_then(Value::as_object)
    }
}

/// Numbers, numeric strings and leading numbers such as `"8/10"`.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..end].parse().ok()
        }
        _ => None,
    }
}

/// Reviewers and (in multi-author mode) authors proposed for a topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamProposal {
    pub analysis: String,
    pub experts: Vec<ExpertConfig>,
}

impl TeamProposal {
    /// Accepts `{"experts": [...]}` or a bare array.
    pub fn from_value(value: &Value) -> Self {
        let fields = Fields::of(value);
        let entries: &[Value] = match value {
            Value::Array(items) => items,
            _ => fields.array(&["experts", "team", "reviewers"]),
        };
        let experts = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let f = Fields::of(entry);
                let role = match f.opt_text(&["role"]).map(|r| r.to_lowercase()) {
                    Some(r) if r.contains("author") || r.contains("writer") => ExpertRole::Author,
                    _ => ExpertRole::Reviewer,
                };
                ExpertConfig {
                    id: f.opt_text(&["id", "expert_id"]).unwrap_or_else(|| expert_id(i)),
                    domain: f
                        .opt_text(&["domain", "expert_domain", "name"])
                        .unwrap_or_else(|| expert_name(i)),
                    focus_areas: f.list(&["focus_areas", "focus"]),
                    model_tier: f.opt_text(&["model_tier", "tier"]),
                    role,
                    rationale: f.text(&["rationale"]),
                }
            })
            .collect();
        Self {
            analysis: fields.text(&["analysis"]),
            experts,
        }
    }

    pub fn from_output(text: &str) -> Self {
        match repair_json(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                debug!(error = %e, "Team proposal is not JSON; no experts proposed");
                Self::default()
            }
        }
    }
}

/// Draft manuscript from one author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPayload {
    pub title: String,
    pub sections: Vec<Section>,
    pub references: Vec<ReferenceCandidate>,
}

impl DraftPayload {
    pub fn from_value(value: &Value, author_id: &str) -> Self {
        let fields = Fields::of(value);
        let sections = fields
            .array(&["sections"])
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let f = Fields::of(entry);
                Section {
                    id: f.opt_text(&["id", "section_id"]).unwrap_or_else(|| section_id(i)),
                    title: f
                        .opt_text(&["title", "heading"])
                        .unwrap_or_else(|| section_title(i)),
                    content: f.text(&["content", "body", "text"]),
                    author_id: author_id.to_string(),
                }
            })
            .collect();
        Self {
            title: fields.text(&["title"]),
            sections,
            references: parse_references(fields.array(&["references", "bibliography"])),
        }
    }

    /// Non-JSON output becomes a single section holding the raw text.
    pub fn from_output(text: &str, author_id: &str) -> Self {
        let mut payload = match repair_json(text) {
            Ok(value) => Self::from_value(&value, author_id),
            Err(e) => {
                debug!(error = %e, author_id, "Draft is not JSON; keeping raw text");
                Self {
                    title: markdown_title(text).unwrap_or_default(),
                    ..Self::default()
                }
            }
        };
        if payload.sections.is_empty() {
            payload.sections.push(Section {
                id: section_id(0),
                title: section_title(0),
                content: text.trim().to_string(),
                author_id: author_id.to_string(),
            });
        }
        payload
    }
}

fn markdown_title(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string())
}

/// Reference entries; local ids fall back to position + 1 and empty entries are dropped.
fn parse_references(entries: &[Value]) -> Vec<ReferenceCandidate> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let f = Fields::of(entry);
            let candidate = ReferenceCandidate {
                local_id: f
                    .number(&["id", "number", "local_id"])
                    .filter(|n| *n >= 1.0)
                    .map(|n| n as u32)
                    .unwrap_or(i as u32 + 1),
                title: f.text(&["title"]),
                doi: f.opt_text(&["doi", "DOI"]),
                url: f.opt_text(&["url", "link"]),
                authors: match f.get(&["authors", "author"]) {
                    Some(Value::Array(_)) => f.list(&["authors", "author"]).join(", "),
                    _ => f.text(&["authors", "author"]),
                },
                year: f.number(&["year"]).map(|y| y as i32),
            };
            (!candidate.is_empty()).then_some(candidate)
        })
        .collect()
}

/// Desk screening gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningVerdict {
    pub passed: bool,
    pub reason: String,
}

impl Default for ScreeningVerdict {
    fn default() -> Self {
        Self {
            passed: true,
            reason: String::new(),
        }
    }
}

impl ScreeningVerdict {
    /// Anything short of an explicit rejection passes.
    pub fn from_value(value: &Value) -> Self {
        let fields = Fields::of(value);
        let rejected = match fields.get(&["passed", "pass"]) {
            Some(Value::Bool(passed)) => !passed,
            _ => fields
                .opt_text(&["decision", "verdict"])
                .map(|d| {
                    let d = d.to_lowercase();
                    d.contains("reject") || d == "fail" || d == "failed"
                })
                .unwrap_or(false),
        };
        Self {
            passed: !rejected,
            reason: fields.text(&["reason", "rationale", "summary"]),
        }
    }

    pub fn from_output(text: &str) -> Self {
        repair_json(text)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }
}

/// One reviewer's structured assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub scores: BTreeMap<String, f64>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub detailed_feedback: String,
}

impl ReviewPayload {
    /// Scores come from a `scores` object, or from criterion keys at the top level.
    pub fn from_value(value: &Value, criteria: &[String]) -> Self {
        let fields = Fields::of(value);
        let scores = match fields.object(&["scores"]) {
            Some(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), as_number(v).map(clamp_score).unwrap_or(DEFAULT_SCORE)))
                .collect(),
            None => criteria
                .iter()
                .filter_map(|c| fields.number(&[c.as_str()]).map(|s| (c.clone(), clamp_score(s))))
                .collect(),
        };
        Self {
            scores,
            summary: fields.text(&["summary"]),
            strengths: fields.list(&["strengths"]),
            weaknesses: fields.list(&["weaknesses"]),
            suggestions: fields.list(&["suggestions"]),
            detailed_feedback: fields.text(&["detailed_feedback", "feedback"]),
        }
    }

    /// Non-JSON output yields the default score for every criterion.
    pub fn from_output(text: &str, criteria: &[String]) -> Self {
        match repair_json(text) {
            Ok(value) => Self::from_value(&value, criteria),
            Err(e) => {
                debug!(error = %e, "Review is not JSON; using default scores");
                Self {
                    scores: criteria
                        .iter()
                        .map(|c| (c.clone(), DEFAULT_SCORE))
                        .collect(),
                    detailed_feedback: text.trim().to_string(),
                    ..Self::default()
                }
            }
        }
    }

    /// Mean of the criterion scores, rounded to one decimal.
    pub fn composite(&self) -> f64 {
        if self.scores.is_empty() {
            return DEFAULT_SCORE;
        }
        let mean = self.scores.values().sum::<f64>() / self.scores.len() as f64;
        (mean * 10.0).round() / 10.0
    }
}

/// Moderator's final judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorPayload {
    pub decision: Option<VerdictDecision>,
    pub confidence: u8,
    pub meta_review: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub required_changes: Vec<String>,
    pub recommendation: String,
}

impl Default for ModeratorPayload {
    fn default() -> Self {
        Self {
            decision: None,
            confidence: DEFAULT_CONFIDENCE,
            meta_review: String::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            required_changes: Vec::new(),
            recommendation: String::new(),
        }
    }
}

impl ModeratorPayload {
    pub fn from_value(value: &Value) -> Self {
        let fields = Fields::of(value);
        Self {
            decision: fields
                .opt_text(&["decision"])
                .and_then(|d| d.parse().ok()),
            confidence: fields
                .number(&["confidence"])
                .map(|c| c.round().clamp(1.0, 5.0) as u8)
                .unwrap_or(DEFAULT_CONFIDENCE),
            meta_review: fields.text(&["meta_review", "summary"]),
            strengths: fields.list(&["key_strengths", "strengths"]),
            weaknesses: fields.list(&["key_weaknesses", "weaknesses"]),
            required_changes: fields.list(&["required_changes"]),
            recommendation: fields.text(&["recommendation"]),
        }
    }

    /// Non-JSON output carries no decision.
    pub fn from_output(text: &str) -> Self {
        match repair_json(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                debug!(error = %e, "Moderator output is not JSON; no decision");
                Self {
                    meta_review: text.trim().to_string(),
                    ..Self::default()
                }
            }
        }
    }
}

/// Replacement content for one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRevision {
    pub id: String,
    pub title: Option<String>,
    pub content: String,
}

/// Sections the author chose to rewrite. Sections not listed are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionPayload {
    pub sections: Vec<SectionRevision>,
    pub response: String,
}

impl RevisionPayload {
    pub fn from_value(value: &Value) -> Self {
        let fields = Fields::of(value);
        let sections = fields
            .array(&["revised_sections", "sections"])
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                let f = Fields::of(entry);
                let content = f.text(&["content", "body", "text"]);
                if content.trim().is_empty() {
                    return None;
                }
                Some(SectionRevision {
                    id: f.opt_text(&["id", "section_id"]).unwrap_or_else(|| section_id(i)),
                    title: f.opt_text(&["title"]),
                    content,
                })
            })
            .collect();
        Self {
            sections,
            response: fields.text(&["response_to_reviewers", "response", "summary"]),
        }
    }

    /// Non-JSON output revises nothing.
    pub fn from_output(text: &str) -> Self {
        repair_json(text)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }
}
