//! Workflow Core
//!
//! A workflow turns one topic into a reviewed manuscript: compose a team, draft,
//! screen, then alternate peer review and revision until the aggregate score meets
//! the threshold or the round budget runs out, and finally let a moderator decide.
//! Stages are pluggable [`StageHandler`]s driven by [`WorkflowStateMachine`], which
//! checkpoints after every stage.

pub mod machine;
pub mod metrics;
pub mod prompts;
pub mod review;
pub mod stage;
pub mod stages;
pub mod types;

pub use machine::{CancelFlag, WorkflowStateMachine};
pub use metrics::{RoundMetrics, RunMetrics};
pub use review::{ReviewRoundCoordinator, RoundConfig, RoundResult};
pub use stage::{StageContext, StageHandler, StagePlan, StageRegistry, Transition};
pub use types::{
    AudienceLevel, ExecutionMode, ExpertConfig, ExpertRole, Manuscript, ModeratorVerdict,
    Outcome, Progress, Recommendation, Review, ReviewRound, ReviewerTimeoutPolicy,
    RoundDecision, Section, Stage, VerdictDecision, Workflow, WorkflowRequest, WorkflowState,
    WorkflowStatus,
};
