//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{exit_code, map_error};
pub use parse::{Cli, Commands};
pub use presentation::{
    format_outcome, format_recovery_json, format_recovery_text, format_snapshot_line,
    format_workflow_detail, format_workflow_json, format_workflow_list,
    format_workflow_list_json,
};
pub use route::RunContext;
