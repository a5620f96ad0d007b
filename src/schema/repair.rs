//! Best-effort recovery of a JSON object from model output.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Attempts made when cutting a truncated document back to an earlier comma.
const MAX_CUTBACKS: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepairError {
    #[error("Output contains no JSON object")]
    NoJson,

    #[error("Output JSON could not be repaired: {0}")]
    Unrepairable(String),
}

/// Which recovery step produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    Direct,
    Fenced,
    Braces,
    Truncated,
}

/// Parse `text` as JSON, trying progressively more aggressive repairs.
pub fn repair_json(text: &str) -> Result<Value, RepairError> {
    repair_json_with_strategy(text).map(|(value, _)| value)
}

pub fn repair_json_with_strategy(text: &str) -> Result<(Value, RepairStrategy), RepairError> {
    let trimmed = text.trim();

    if let Some(value) = parse_structured(trimmed) {
        return Ok((value, RepairStrategy::Direct));
    }

    let body = fenced_block(trimmed).unwrap_or(trimmed);
    if body.len() != trimmed.len() {
        if let Some(value) = parse_structured(body.trim()) {
            return Ok((value, RepairStrategy::Fenced));
        }
    }

    let start = body.find('{').ok_or(RepairError::NoJson)?;
    if let Some(end) = body.rfind('}') {
        if end > start {
            if let Some(value) = parse_structured(&body[start..=end]) {
                return Ok((value, RepairStrategy::Braces));
            }
        }
    }

    let value = repair_truncated(&body[start..])?;
    debug!(input_len = text.len(), "Repaired truncated JSON output");
    Ok((value, RepairStrategy::Truncated))
}

fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Contents of the first ```json (or bare ```) fence; an unclosed fence runs to the end.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    Some(match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    })
}

fn repair_truncated(fragment: &str) -> Result<Value, RepairError> {
    let mut last_error = String::new();
    let cutbacks = structural_commas(fragment);

    let candidates = std::iter::once(fragment.len())
        .chain(cutbacks.into_iter().rev().take(MAX_CUTBACKS));
    for end in candidates {
        let closed = close_truncated(&fragment[..end]);
        match serde_json::from_str::<Value>(&closed) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(RepairError::Unrepairable(last_error))
}

/// Close an open string, patch a dangling separator and close every open bracket.
fn close_truncated(fragment: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in fragment.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = fragment.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    out.truncate(out.trim_end().len());
    if out.ends_with(',') {
        out.pop();
    }
    if out.ends_with(':') {
        out.push_str(" null");
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

/// Byte offsets of commas outside strings.
fn structural_commas(fragment: &str) -> Vec<usize> {
    let mut commas = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in fragment.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => commas.push(i),
            _ => {}
        }
    }
    commas
}
