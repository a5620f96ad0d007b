//! Recovery scan formatters.

use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde_json::json;

use super::to_pretty_json;
use crate::checkpoint::RecoveryClass;
use crate::error::ApiError;
use crate::pool::RecoveryReport;

pub fn format_recovery_text(report: &RecoveryReport, dry_run: bool) -> String {
    if report.entries.is_empty() {
        return "No workflow directories found.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Workflow", "Class", "Checkpoint", "Marker", "Files", "Action"]);
    for entry in &report.entries {
        let id = &entry.workflow_id;
        let action = if report.resumed.contains(id) {
            "resumed"
        } else if report.failed.contains(id) {
            "marked failed"
        } else if report.settled.contains(id) {
            "settled"
        } else if dry_run && entry.class == RecoveryClass::Resumable {
            "would resume"
        } else {
            "-"
        };
        table.add_row(vec![
            id.clone(),
            entry.class.to_string(),
            yes_no(entry.state.has_checkpoint).to_string(),
            yes_no(entry.state.has_completion_marker).to_string(),
            entry.state.artifact_files.len().to_string(),
            action.to_string(),
        ]);
    }

    let count = |class: RecoveryClass| report.entries.iter().filter(|e| e.class == class).count();
    format!(
        "{}\n{} resumable, {} orphaned, {} complete",
        table,
        count(RecoveryClass::Resumable),
        count(RecoveryClass::Orphan),
        count(RecoveryClass::Complete)
    )
}

pub fn format_recovery_json(report: &RecoveryReport, dry_run: bool) -> Result<String, ApiError> {
    to_pretty_json(&json!({ "dry_run": dry_run, "report": report }))
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
