use async_trait::async_trait;
use tracing::info;

use crate::checkpoint::DECISION_FILE;
use crate::error::PipelineError;
use crate::policy::Operation;
use crate::provider::Role;
use crate::schema::ModeratorPayload;
use crate::workflow::prompts;
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{
    ModeratorVerdict, Outcome, Recommendation, RoundDecision, Stage, WorkflowState,
};

use super::require_draft;

/// Final judgment. The moderator may confirm or override the score-based default.
pub struct ModeratorStage;

#[async_trait]
impl StageHandler for ModeratorStage {
    fn stage(&self) -> Stage {
        Stage::ModeratorDecision
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let recommendation = state.recommendation.unwrap_or_else(|| {
            match state.last_round().map(|r| r.decision) {
                Some(RoundDecision::Accept) => Recommendation::Accept,
                _ => Recommendation::Reject,
            }
        });

        let prompt = prompts::moderator(ctx.request, require_draft(state)?, &state.rounds, recommendation);
        let call = ctx
            .invoke(Operation::Moderate, Role::Moderator, &prompt, None)
            .await?;
        state.metrics.record_call(&call);

        let payload = ModeratorPayload::from_output(&call.generation.text);
        let outcome = ModeratorVerdict::settle(payload.decision, recommendation);
        let verdict = ModeratorVerdict {
            decision: payload.decision,
            confidence: payload.confidence,
            meta_review: payload.meta_review,
            strengths: payload.strengths,
            weaknesses: payload.weaknesses,
            required_changes: payload.required_changes,
            recommendation,
            outcome,
        };
        ctx.write_artifact(DECISION_FILE, &verdict)?;

        info!(
            workflow_id = ctx.workflow_id,
            recommendation = ?recommendation,
            decision = ?verdict.decision,
            outcome = ?outcome,
            overridden = verdict.overrode(),
            "Moderator decided"
        );
        state.recommendation = Some(recommendation);
        state.verdict = Some(verdict);

        Ok(Transition::To(match outcome {
            Outcome::Accepted => Stage::Completed,
            Outcome::Rejected => Stage::Rejected,
        }))
    }
}
