//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use tracing::info;

use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_outcome, format_recovery_json, format_recovery_text, format_snapshot_line,
    format_workflow_detail, format_workflow_json, format_workflow_list,
    format_workflow_list_json, to_pretty_json,
};
use crate::config::{ConfigLoader, RefereedConfig};
use crate::error::ApiError;
use crate::pool::{RecoveryReport, WorkerPool};
use crate::runtime::Services;
use crate::workflow::{AudienceLevel, ExecutionMode, WorkflowRequest, WorkflowStatus};

#[derive(Debug, Clone, Copy)]
enum Restart {
    Resume,
    Retry,
}

/// Runtime context for CLI execution: workspace, loaded config and services.
pub struct RunContext {
    workspace_root: PathBuf,
    config: RefereedConfig,
    services: Arc<Services>,
}

impl RunContext {
    /// Load config (explicit file, else the layered workspace config) and build services.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        let services = Services::from_config(config.clone(), &workspace_root)?;
        Ok(Self {
            workspace_root,
            config,
            services,
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Execute a CLI command via the single route table.
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Run {
                topic,
                mode,
                audience,
                team_size,
                max_rounds,
                threshold,
            } => {
                let mut request = WorkflowRequest::new(topic.clone(), &self.config.pipeline);
                if let Some(mode) = mode {
                    request.mode = ExecutionMode::from_str(mode).map_err(ApiError::ConfigError)?;
                }
                if let Some(audience) = audience {
                    request.audience =
                        AudienceLevel::from_str(audience).map_err(ApiError::ConfigError)?;
                }
                if let Some(team_size) = team_size {
                    request.team_size = *team_size;
                }
                if let Some(max_rounds) = max_rounds {
                    request.max_rounds = *max_rounds;
                }
                if let Some(threshold) = threshold {
                    request.threshold = *threshold;
                }
                self.handle_run(request).await
            }
            Commands::Status { id, format } => self.handle_status(id.as_deref(), format),
            Commands::Recover { dry_run, format } => self.handle_recover(*dry_run, format).await,
            Commands::Resume { id } => self.run_existing(id, Restart::Resume).await,
            Commands::Retry { id } => self.run_existing(id, Restart::Retry).await,
            Commands::Delete { id } => {
                WorkerPool::new(Arc::clone(&self.services)).delete(id)?;
                Ok(format!("Deleted {}", id))
            }
            Commands::Config { format } => {
                if format == "json" {
                    to_pretty_json(&self.config)
                } else {
                    ConfigLoader::to_toml(&self.config)
                }
            }
        }
    }

    async fn handle_run(&self, request: WorkflowRequest) -> Result<String, ApiError> {
        let pool = WorkerPool::new(Arc::clone(&self.services));
        let report = pool.start().await?;
        if !report.resumed.is_empty() {
            eprintln!("Resuming {} interrupted workflow(s)", report.resumed.len());
        }

        let workflow_id = pool.submit(request).await?;
        eprintln!("Submitted {}", workflow_id);
        self.follow(&pool, &workflow_id).await
    }

    /// Start a pool without resuming anything else, restart one workflow, then follow it.
    async fn run_existing(&self, workflow_id: &str, restart: Restart) -> Result<String, ApiError> {
        let pool = WorkerPool::new(Arc::clone(&self.services));
        pool.start_with(false).await?;
        match restart {
            Restart::Resume => pool.resume(workflow_id).await?,
            Restart::Retry => pool.retry(workflow_id).await?,
        }
        self.follow(&pool, workflow_id).await
    }

    async fn follow(&self, pool: &WorkerPool, workflow_id: &str) -> Result<String, ApiError> {
        let mut updates = self.services.status.subscribe(workflow_id)?;
        while let Some(snapshot) = updates.next().await {
            eprintln!("{}", format_snapshot_line(&snapshot));
            if snapshot.status.is_settled() {
                break;
            }
        }
        let workflow = pool.wait_for(workflow_id).await?;
        pool.shutdown().await;
        info!(workflow_id, status = %workflow.status, "Workflow settled");
        Ok(format_outcome(&workflow))
    }

    fn handle_status(&self, id: Option<&str>, format: &str) -> Result<String, ApiError> {
        let status = &self.services.status;
        match id {
            Some(id) => {
                let workflow = status.get(id)?;
                let marker = if workflow.status.is_terminal() && workflow.status != WorkflowStatus::Failed {
                    self.services.checkpoints.completion_marker(id)?
                } else {
                    None
                };
                if format == "json" {
                    format_workflow_json(&workflow, marker.as_ref())
                } else {
                    Ok(format_workflow_detail(&workflow, marker.as_ref()))
                }
            }
            None => {
                let workflows = status.list()?;
                if format == "json" {
                    format_workflow_list_json(&workflows)
                } else {
                    Ok(format_workflow_list(&workflows))
                }
            }
        }
    }

    async fn handle_recover(&self, dry_run: bool, format: &str) -> Result<String, ApiError> {
        let report = if dry_run {
            RecoveryReport {
                entries: self.services.checkpoints.scan()?,
                ..RecoveryReport::default()
            }
        } else {
            let pool = WorkerPool::new(Arc::clone(&self.services));
            let report = pool.start_with(true).await?;
            for workflow_id in &report.resumed {
                let workflow = pool.wait_for(workflow_id).await?;
                eprintln!("{}", format_outcome(&workflow));
            }
            pool.shutdown().await;
            report
        };
        info!(
            workspace = %self.workspace_root.display(),
            entries = report.entries.len(),
            dry_run,
            "Recovery finished"
        );
        if format == "json" {
            format_recovery_json(&report, dry_run)
        } else {
            Ok(format_recovery_text(&report, dry_run))
        }
    }
}
