//! Built-in stage handlers.

mod draft;
mod moderator;
mod review;
mod revise;
mod screening;
mod team;

pub use draft::DraftStage;
pub use moderator::ModeratorStage;
pub use review::PeerReviewStage;
pub use revise::ReviseStage;
pub use screening::DeskScreeningStage;
pub use team::ComposeTeamStage;

use crate::error::PipelineError;

use super::types::{Manuscript, WorkflowState};

pub(crate) fn require_draft(state: &WorkflowState) -> Result<&Manuscript, PipelineError> {
    state
        .draft
        .as_ref()
        .ok_or_else(|| PipelineError::InvalidState("no draft to work on".to_string()))
}
