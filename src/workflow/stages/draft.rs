use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use tracing::info;

use crate::checkpoint::draft_file;
use crate::error::PipelineError;
use crate::policy::Operation;
use crate::provider::Role;
use crate::references::{remap_citations, ReferenceCanonicalizer};
use crate::schema::DraftPayload;
use crate::workflow::prompts;
use crate::workflow::stage::{StageContext, StageHandler, Transition};
use crate::workflow::types::{ExpertConfig, Manuscript, Stage, WorkflowState};

/// Authors draft concurrently; their sections are concatenated in author order and
/// their reference lists merged through the workflow's canonicalizer.
pub struct DraftStage;

#[async_trait]
impl StageHandler for DraftStage {
    fn stage(&self) -> Stage {
        Stage::Drafting
    }

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError> {
        let mut authors = state.authors();
        if authors.is_empty() {
            authors.push(ExpertConfig::lead_author());
        }
        let count = authors.len();

        let calls = join_all(authors.iter().enumerate().map(|(i, author)| {
            let prompt = prompts::draft(ctx.request, author, i, count);
            async move {
                ctx.invoke(Operation::Draft, Role::Author, &prompt, author.model_tier.as_deref())
                    .await
            }
        }))
        .await;

        let mut canonicalizer = ReferenceCanonicalizer::from_references(std::mem::take(&mut state.references));
        let mut manuscript = Manuscript {
            title: String::new(),
            version: 1,
            sections: Vec::new(),
        };
        let mut section_ids = HashSet::new();

        for (author, call) in authors.iter().zip(calls) {
            let call = call?;
            state.metrics.record_call(&call);
            let payload = DraftPayload::from_output(&call.generation.text, &author.id);

            let mapping = canonicalizer.merge(&payload.references);
            if manuscript.title.is_empty() {
                manuscript.title = payload.title.trim().to_string();
            }
            for mut section in payload.sections {
                section.content = remap_citations(&section.content, &mapping);
                if !section_ids.insert(section.id.clone()) {
                    section.id = format!("{}-{}", author.id, section.id);
                    section_ids.insert(section.id.clone());
                }
                manuscript.sections.push(section);
            }
        }
        if manuscript.title.is_empty() {
            manuscript.title = ctx.request.topic.clone();
        }

        state.references = canonicalizer.into_references();
        ctx.write_artifact(&draft_file(manuscript.version), &manuscript)?;
        info!(
            workflow_id = ctx.workflow_id,
            authors = count,
            sections = manuscript.sections.len(),
            references = state.references.len(),
            words = manuscript.word_count(),
            "Draft assembled"
        );
        state.draft = Some(manuscript);

        Ok(ctx.plan.after(Stage::Drafting))
    }
}
