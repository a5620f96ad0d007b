//! Workflow formatters: list table, detail view, follow lines and the final outcome.

use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

use super::to_pretty_json;
use crate::checkpoint::CompletionMarker;
use crate::error::ApiError;
use crate::status::StatusSnapshot;
use crate::workflow::{Workflow, WorkflowStatus};

fn status_label(status: WorkflowStatus) -> String {
    match status {
        WorkflowStatus::Completed => status.as_str().green().to_string(),
        WorkflowStatus::Rejected => status.as_str().yellow().to_string(),
        WorkflowStatus::Failed => status.as_str().red().to_string(),
        WorkflowStatus::Interrupted => status.as_str().magenta().to_string(),
        WorkflowStatus::Running => status.as_str().cyan().to_string(),
        WorkflowStatus::Queued => status.as_str().dimmed().to_string(),
    }
}

fn score_label(score: Option<f64>) -> String {
    score.map(|s| format!("{:.1}", s)).unwrap_or_else(|| "-".to_string())
}

/// RFC 3339 rendering of a millisecond timestamp.
fn timestamp_label(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

pub fn format_workflow_list(workflows: &[Workflow]) -> String {
    if workflows.is_empty() {
        return "No workflows.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Topic", "Status", "Stage", "Round", "Score", "Updated"]);
    for w in workflows {
        table.add_row(vec![
            w.id.clone(),
            truncate(&w.request.topic, 40),
            status_label(w.status),
            w.stage.to_string(),
            w.round.to_string(),
            score_label(w.final_score),
            timestamp_label(w.updated_at_ms),
        ]);
    }
    table.to_string()
}

pub fn format_workflow_list_json(workflows: &[Workflow]) -> Result<String, ApiError> {
    to_pretty_json(workflows)
}

pub fn format_workflow_detail(workflow: &Workflow, marker: Option<&CompletionMarker>) -> String {
    let mut lines = vec![
        format!("Workflow: {}", workflow.id.bold()),
        format!("  Topic:    {}", workflow.request.topic),
        format!("  Status:   {}", status_label(workflow.status)),
        format!("  Stage:    {} (round {})", workflow.stage, workflow.round),
        format!(
            "  Mode:     {} / {}",
            workflow.request.mode.as_str(),
            workflow.request.audience.as_str()
        ),
        format!(
            "  Review:   {} reviewers, threshold {:.1}, up to {} rounds",
            workflow.request.team_size, workflow.request.threshold, workflow.request.max_rounds
        ),
        format!(
            "  Created:  {}  Updated: {}",
            timestamp_label(workflow.created_at_ms),
            timestamp_label(workflow.updated_at_ms)
        ),
    ];
    if let Some(outcome) = workflow.outcome {
        lines.push(format!(
            "  Outcome:  {:?} (score {})",
            outcome,
            score_label(workflow.final_score)
        ));
    }
    if let Some(ref error) = workflow.last_error {
        lines.push(format!("  Error:    {}", error.red()));
    }
    if let Some(marker) = marker {
        lines.push(format!(
            "  Usage:    {} in / {} out units, est. cost {:.4}",
            marker.input_units, marker.output_units, marker.estimated_cost
        ));
    }
    match workflow.status {
        WorkflowStatus::Interrupted => {
            lines.push(format!("\nResume with: refereed resume {}", workflow.id))
        }
        WorkflowStatus::Failed => lines.push(format!("\nRetry with: refereed retry {}", workflow.id)),
        _ => {}
    }
    lines.join("\n")
}

pub fn format_workflow_json(
    workflow: &Workflow,
    marker: Option<&CompletionMarker>,
) -> Result<String, ApiError> {
    to_pretty_json(&json!({ "workflow": workflow, "completion": marker }))
}

/// One line per followed status change.
pub fn format_snapshot_line(snapshot: &StatusSnapshot) -> String {
    format!(
        "[{}] {} {} (round {})",
        snapshot.workflow_id,
        status_label(snapshot.status),
        snapshot.stage,
        snapshot.round
    )
}

pub fn format_outcome(workflow: &Workflow) -> String {
    match workflow.status {
        WorkflowStatus::Completed => format!(
            "{} {} accepted with score {}",
            "✓".green(),
            workflow.id,
            score_label(workflow.final_score)
        ),
        WorkflowStatus::Rejected => format!(
            "{} {} rejected (score {})",
            "✗".yellow(),
            workflow.id,
            score_label(workflow.final_score)
        ),
        status => format!(
            "{} {} stopped: {}{}",
            "!".red(),
            workflow.id,
            status,
            workflow
                .last_error
                .as_ref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        ),
    }
}
