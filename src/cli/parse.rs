//! CLI parse: clap types for refereed. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Refereed CLI - checkpointed draft, review and revise pipelines
#[derive(Parser)]
#[command(name = "refereed")]
#[command(about = "Run topics through a resumable draft, peer review and decision pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a topic and follow it to a decision
    Run {
        /// Topic to write about
        topic: String,
        /// Execution mode (single, multi)
        #[arg(long)]
        mode: Option<String>,
        /// Audience level (beginner, intermediate, professional)
        #[arg(long)]
        audience: Option<String>,
        /// Number of reviewers
        #[arg(long)]
        team_size: Option<usize>,
        /// Maximum peer review rounds
        #[arg(long)]
        max_rounds: Option<u32>,
        /// Aggregate score needed to pass review (0-10)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Show one workflow, or list all of them
    Status {
        /// Workflow id (omit to list)
        id: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Classify result directories and resume interrupted workflows
    Recover {
        /// Only report the classification
        #[arg(long)]
        dry_run: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Continue an interrupted workflow from its checkpoint
    Resume {
        id: String,
    },
    /// Run a failed workflow again from scratch
    Retry {
        id: String,
    },
    /// Delete a finished workflow and its results
    Delete {
        id: String,
    },
    /// Print the effective configuration
    Config {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}
