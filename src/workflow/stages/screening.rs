use async_trait::async_trait;
use tracing::{info, warn};

use crate::checkpoint::SCREENING_FILE;
use crate::error::PipelineError;
use crate::policy::Operation;
use crate::provider::Role;
use crate::schema::ScreeningVerdict;
use crate::workflow::prompts;
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{Stage, WorkflowState};

use super::require_draft;

/// Cheap pass/fail gate before peer review. A failure rejects without a review round.
pub struct DeskScreeningStage;

#[async_trait]
impl StageHandler for DeskScreeningStage {
    fn stage(&self) -> Stage {
        Stage::DeskScreening
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let prompt = prompts::screening(ctx.request, require_draft(state)?);
        let call = ctx
            .invoke(Operation::Screen, Role::DeskEditor, &prompt, None)
            .await?;
        state.metrics.record_call(&call);

        let verdict = ScreeningVerdict::from_output(&call.generation.text);
        ctx.write_artifact(SCREENING_FILE, &verdict)?;
        let passed = verdict.passed;
        state.screening = Some(verdict);

        if passed {
            info!(workflow_id = ctx.workflow_id, "Desk screening passed");
            Ok(ctx.plan.after(Stage::DeskScreening))
        } else {
            warn!(workflow_id = ctx.workflow_id, "Desk screening rejected manuscript");
            Ok(Transition::To(Stage::Rejected))
        }
    }
}
