use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

use crate::checkpoint::draft_file;
use crate::error::PipelineError;
use crate::policy::Operation;
use crate::provider::Role;
use crate::schema::RevisionPayload;
use crate::workflow::prompts;
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{Stage, WorkflowState};

use super::require_draft;

/// Surgical revision: only sections named by the author's revision change.
pub struct ReviseStage;

#[async_trait]
impl StageHandler for ReviseStage {
    fn stage(&self) -> Stage {
        Stage::Revising
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let round = state
            .last_round()
            .cloned()
            .ok_or_else(|| PipelineError::InvalidState("revision without a review round".to_string()))?;
        let draft = require_draft(state)?;
        let lead_tier = state
            .authors()
            .first()
            .and_then(|a| a.model_tier.clone());

        let started = Instant::now();
        let prompt = prompts::revision(ctx.request, draft, &round);
        let call = ctx
            .invoke(Operation::Revise, Role::Author, &prompt, lead_tier.as_deref())
            .await?;

        let revision = RevisionPayload::from_output(&call.generation.text);
        let (revised, changed) = draft.apply_revision(&revision);
        ctx.write_artifact(&draft_file(revised.version), &revised)?;

        state.metrics.record_call(&call);
        let metrics = state.metrics.round_mut(ctx.progress.round);
        metrics.revision_ms = started.elapsed().as_millis() as u64;
        metrics.input_units += call.generation.input_units;
        metrics.output_units += call.generation.output_units;

        info!(
            workflow_id = ctx.workflow_id,
            round = ctx.progress.round,
            version = revised.version,
            changed_sections = changed,
            "Draft revised"
        );
        state.draft = Some(revised);
        Ok(Transition::NextRound(Stage::PeerReview))
    }
}
