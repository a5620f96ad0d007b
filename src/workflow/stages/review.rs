use async_trait::async_trait;

use crate::checkpoint::round_file;
use crate::error::PipelineError;
use crate::workflow::review::{ReviewRoundCoordinator, RoundConfig};
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{Recommendation, RoundDecision, Stage, WorkflowState};

use super::require_draft;

/// One peer review round, compared against the request threshold.
pub struct PeerReviewStage;

#[async_trait]
impl StageHandler for PeerReviewStage {
    fn stage(&self) -> Stage {
        Stage::PeerReview
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let round = ctx.progress.round;
        let reviewers = state.reviewers();
        let coordinator = ReviewRoundCoordinator::new(
            &ctx.services.registry,
            &ctx.services.policies,
            RoundConfig::from_pipeline(ctx.pipeline()),
        );
        let result = coordinator
            .run_round(ctx.request, require_draft(state)?, &reviewers, round)
            .await?;

        for call in &result.calls {
            state.metrics.record_call(call);
        }
        let round_metrics = state.metrics.round_mut(round);
        round_metrics.reviewer_ms = result.elapsed_ms;
        round_metrics.reviews_received = result.round.reviews.len();
        round_metrics.reviews_missing = result.round.missing.len();
        for call in &result.calls {
            round_metrics.input_units += call.generation.input_units;
            round_metrics.output_units += call.generation.output_units;
        }

        ctx.write_artifact(&round_file(round), &result.round)?;
        let decision = result.round.decision;
        state.rounds.push(result.round);

        Ok(match decision {
            RoundDecision::Accept => {
                state.recommendation = Some(Recommendation::Accept);
                Transition::To(Stage::ModeratorDecision)
            }
            RoundDecision::Revise => Transition::To(Stage::Revising),
            RoundDecision::Reject => {
                state.recommendation = Some(Recommendation::Reject);
                Transition::To(Stage::ModeratorDecision)
            }
        })
    }
}
