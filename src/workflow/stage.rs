//! Pluggable stage handlers and the pre-review stage plan.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::policy::{CallOutcome, Operation};
use crate::provider::{PromptContext, Role};
use crate::runtime::Services;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::stages;
use super::types::{Progress, Stage, WorkflowRequest, WorkflowState};

/// Where a stage hands control next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Next stage in the same round
    To(Stage),
    /// Next stage opens a new round
    NextRound(Stage),
}

impl Transition {
    pub fn apply(self, from: Progress) -> Progress {
        match self {
            Transition::To(stage) => Progress::new(from.round, stage),
            Transition::NextRound(stage) => Progress::new(from.round + 1, stage),
        }
    }
}

/// Everything a handler may read while running one stage.
pub struct StageContext<'a> {
    pub workflow_id: &'a str,
    pub request: &'a WorkflowRequest,
    pub progress: Progress,
    pub services: &'a Services,
    pub plan: &'a StagePlan,
}

impl StageContext<'_> {
    /// Invoke a capability under the operation's policy; failures become stage failures.
    pub async fn invoke(
        &self,
        op: Operation,
        role: Role,
        prompt: &PromptContext,
        tier: Option<&str>,
    ) -> Result<CallOutcome, PipelineError> {
        self.services
            .policies
            .invoke(&self.services.registry, op, role, prompt, tier)
            .await
            .map_err(|source| PipelineError::StageFailed {
                stage: self.progress.stage.to_string(),
                source,
            })
    }

    pub fn write_artifact<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), PipelineError> {
        self.services
            .checkpoints
            .write_artifact(self.workflow_id, name, value)?;
        Ok(())
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.services.config.pipeline
    }
}

/// Work for one stage kind.
///
/// Handlers mutate a scratch copy of the workflow state; the machine keeps it only
/// once the following checkpoint is durable.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(
        &self,
        ctx: &StageContext<'_>,
        state: &mut WorkflowState,
    ) -> Result<Transition, PipelineError>;
}

/// Handlers keyed by stage kind.
#[derive(Clone, Default)]
pub struct StageRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers for every built-in stage.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(stages::ComposeTeamStage));
        registry.register(Arc::new(stages::DraftStage));
        registry.register(Arc::new(stages::DeskScreeningStage));
        registry.register(Arc::new(stages::PeerReviewStage));
        registry.register(Arc::new(stages::ReviseStage));
        registry.register(Arc::new(stages::ModeratorStage));
        registry
    }

    /// Register a handler, replacing any existing handler for its stage.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    pub fn get(&self, stage: Stage) -> Result<Arc<dyn StageHandler>, PipelineError> {
        self.handlers
            .get(&stage)
            .cloned()
            .ok_or_else(|| PipelineError::MissingStage(stage.to_string()))
    }
}

/// Ordered stages that run before peer review, all in round 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    prelude: Vec<Stage>,
}

impl Default for StagePlan {
    fn default() -> Self {
        Self {
            prelude: vec![Stage::ComposingTeam, Stage::Drafting, Stage::DeskScreening],
        }
    }
}

impl StagePlan {
    /// Prelude stages must be pre-review stages in execution order and include drafting.
    pub fn new(prelude: Vec<Stage>) -> Result<Self, PipelineError> {
        if !prelude.contains(&Stage::Drafting) {
            return Err(PipelineError::InvalidState(
                "stage plan must include drafting".to_string(),
            ));
        }
        if prelude
            .iter()
            .any(|s| *s == Stage::Queued || *s >= Stage::PeerReview)
        {
            return Err(PipelineError::InvalidState(
                "stage plan may only hold pre-review stages".to_string(),
            ));
        }
        if prelude.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::InvalidState(
                "stage plan must be in execution order".to_string(),
            ));
        }
        Ok(Self { prelude })
    }

    pub fn from_config(pipeline: &PipelineConfig) -> Self {
        let mut plan = Self::default();
        if !pipeline.desk_screening {
            plan.prelude.retain(|s| *s != Stage::DeskScreening);
        }
        plan
    }

    pub fn stages(&self) -> &[Stage] {
        &self.prelude
    }

    pub fn first(&self) -> Stage {
        self.prelude.first().copied().unwrap_or(Stage::Drafting)
    }

    /// Transition out of a prelude stage: the next prelude stage, else round 1 review.
    pub fn after(&self, stage: Stage) -> Transition {
        let next = self
            .prelude
            .iter()
            .position(|s| *s == stage)
            .and_then(|i| self.prelude.get(i + 1));
        match next {
            Some(stage) => Transition::To(*stage),
            None => Transition::NextRound(Stage::PeerReview),
        }
    }
}
