use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

use crate::checkpoint::TEAM_FILE;
use crate::error::PipelineError;
use crate::policy::Operation;
use crate::provider::Role;
use crate::schema::payloads::{expert_id, expert_name};
use crate::schema::TeamProposal;
use crate::workflow::prompts;
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{ExecutionMode, ExpertConfig, ExpertRole, Stage, WorkflowState};

/// Picks reviewers (and authors in multi-author mode) for the topic.
pub struct ComposeTeamStage;

#[async_trait]
impl StageHandler for ComposeTeamStage {
    fn stage(&self) -> Stage {
        Stage::ComposingTeam
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let prompt = prompts::team_composition(ctx.request);
        let call = ctx
            .invoke(Operation::ComposeTeam, Role::TeamComposer, &prompt, None)
            .await?;
        state.metrics.record_call(&call);

        let proposal = TeamProposal::from_output(&call.generation.text);
        state.team = assemble_team(proposal.experts, ctx.request.mode, ctx.request.team_size);
        ctx.write_artifact(TEAM_FILE, &state.team)?;

        info!(
            workflow_id = ctx.workflow_id,
            authors = state.authors().len(),
            reviewers = state.reviewers().len(),
            "Team composed"
        );
        Ok(ctx.plan.after(Stage::ComposingTeam))
    }
}

/// Authors first, then exactly `team_size` reviewers, with unique ids.
///
/// Missing reviewers are filled with positional placeholders; a team without an
/// author gets the lead author.
pub(crate) fn assemble_team(
    proposed: Vec<ExpertConfig>,
    mode: ExecutionMode,
    team_size: usize,
) -> Vec<ExpertConfig> {
    let (authors, reviewers): (Vec<_>, Vec<_>) = proposed
        .into_iter()
        .partition(|e| e.role == ExpertRole::Author);

    let mut authors: Vec<ExpertConfig> = match mode {
        ExecutionMode::SingleAuthor => authors.into_iter().take(1).collect(),
        ExecutionMode::MultiAuthor => authors.into_iter().take(team_size).collect(),
    };
    if authors.is_empty() {
        authors.push(ExpertConfig::lead_author());
    }

    let mut reviewers: Vec<ExpertConfig> = reviewers.into_iter().take(team_size).collect();
    for i in reviewers.len()..team_size {
        reviewers.push(ExpertConfig {
            id: expert_id(i),
            domain: expert_name(i),
            focus_areas: Vec::new(),
            model_tier: None,
            role: ExpertRole::Reviewer,
            rationale: String::new(),
        });
    }

    let mut seen = HashSet::new();
    authors
        .into_iter()
        .chain(reviewers)
        .enumerate()
        .map(|(i, mut expert)| {
            if !seen.insert(expert.id.clone()) {
                expert.id = format!("{}-{}", expert.id, i);
                seen.insert(expert.id.clone());
            }
            expert
        })
        .collect()
}
