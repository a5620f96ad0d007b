//! Resumable per-workflow state machine.
//!
//! Each `advance` runs exactly one stage. The handler works on a copy of the state;
//! the copy replaces the live state only after the following checkpoint (or the
//! completion marker, for terminal stages) is on disk. A crash at any point therefore
//! resumes from the last durable stage boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::checkpoint::{draft_file, Checkpoint, CompletionMarker};
use crate::error::PipelineError;
use crate::runtime::Services;
use crate::status::now_millis;

use super::stage::{StageContext, StagePlan};
use super::types::{Outcome, Progress, Stage, WorkflowRequest, WorkflowState};

/// Cooperative cancellation, observed between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WorkflowStateMachine {
    workflow_id: String,
    request: WorkflowRequest,
    progress: Progress,
    state: WorkflowState,
    created_at_ms: u64,
    services: Arc<Services>,
    plan: StagePlan,
}

impl WorkflowStateMachine {
    /// Start a workflow from its first planned stage.
    pub fn fresh(services: Arc<Services>, workflow_id: &str, request: WorkflowRequest) -> Self {
        let plan = services.stage_plan();
        Self {
            workflow_id: workflow_id.to_string(),
            progress: Progress::new(0, plan.first()),
            request,
            state: WorkflowState::default(),
            created_at_ms: now_millis(),
            services,
            plan,
        }
    }

    /// Continue from a checkpoint, skipping every stage it already covers.
    pub fn resume(services: Arc<Services>, checkpoint: Checkpoint) -> Self {
        let plan = services.stage_plan();
        Self {
            workflow_id: checkpoint.workflow_id,
            request: checkpoint.request,
            progress: checkpoint.progress,
            state: checkpoint.state,
            created_at_ms: checkpoint.created_at_ms,
            services,
            plan,
        }
    }

    /// Resume from the stored checkpoint when one is valid, else start over from the
    /// stored request.
    pub fn load(services: Arc<Services>, workflow_id: &str) -> Result<Self, PipelineError> {
        match services.checkpoints.load(workflow_id)? {
            Some(checkpoint) => {
                info!(
                    workflow_id,
                    progress = %checkpoint.progress,
                    "Resuming from checkpoint"
                );
                Ok(Self::resume(services, checkpoint))
            }
            None => {
                let request = services.checkpoints.read_request(workflow_id)?;
                info!(workflow_id, "No usable checkpoint, starting from the beginning");
                Ok(Self::fresh(services, workflow_id, request))
            }
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.progress.stage.is_terminal()
    }

    /// Run one stage and persist its result. Returns the new progress.
    pub async fn advance(&mut self) -> Result<Progress, PipelineError> {
        if self.is_finished() {
            return Err(PipelineError::InvalidState(format!(
                "workflow {} already finished at {}",
                self.workflow_id, self.progress
            )));
        }
        let current = self.progress;
        self.services
            .status
            .record_progress(&self.workflow_id, current.stage, current.round)?;

        let handler = self.services.stages.get(current.stage)?;
        let mut scratch = self.state.clone();
        let transition = {
            let ctx = StageContext {
                workflow_id: &self.workflow_id,
                request: &self.request,
                progress: current,
                services: &self.services,
                plan: &self.plan,
            };
            debug!(workflow_id = %self.workflow_id, progress = %current, "Running stage");
            handler.run(&ctx, &mut scratch).await?
        };

        let next = transition.apply(current);
        if next <= current {
            return Err(PipelineError::InvalidState(format!(
                "stage {} did not move forward (next {})",
                current, next
            )));
        }
        scratch.metrics.update_cost(&self.services.config.pricing);

        if next.stage.is_terminal() {
            self.complete(next, &scratch)?;
        } else {
            let checkpoint = Checkpoint {
                workflow_id: self.workflow_id.clone(),
                progress: next,
                request: self.request.clone(),
                draft_ref: scratch.draft.as_ref().map(|d| draft_file(d.version)),
                state: scratch.clone(),
                created_at_ms: self.created_at_ms,
                updated_at_ms: now_millis(),
            };
            self.services.checkpoints.save(&checkpoint)?;
        }

        self.state = scratch;
        self.progress = next;
        Ok(next)
    }

    fn complete(&self, terminal: Progress, state: &WorkflowState) -> Result<(), PipelineError> {
        let outcome = match terminal.stage {
            Stage::Completed => Outcome::Accepted,
            _ => Outcome::Rejected,
        };
        let final_score = state.final_score();
        let marker = CompletionMarker {
            workflow_id: self.workflow_id.clone(),
            topic: self.request.topic.clone(),
            outcome,
            rounds: state.rounds.len() as u32,
            final_score,
            passed: outcome == Outcome::Accepted,
            input_units: state.metrics.input_units,
            output_units: state.metrics.output_units,
            estimated_cost: state.metrics.estimated_cost,
            completed_at_ms: now_millis(),
        };
        self.services.checkpoints.mark_complete(&marker)?;
        self.services
            .status
            .finish(&self.workflow_id, outcome, final_score)?;
        info!(
            workflow_id = %self.workflow_id,
            outcome = ?outcome,
            rounds = marker.rounds,
            final_score = ?final_score,
            cost = state.metrics.estimated_cost,
            "Workflow finished"
        );
        Ok(())
    }

    /// Drive the workflow to a terminal stage, checking `cancel` between stages.
    pub async fn run(&mut self, cancel: &CancelFlag) -> Result<Outcome, PipelineError> {
        while !self.is_finished() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(self.workflow_id.clone()));
            }
            self.advance().await?;
        }
        Ok(match self.progress.stage {
            Stage::Completed => Outcome::Accepted,
            _ => Outcome::Rejected,
        })
    }
}
