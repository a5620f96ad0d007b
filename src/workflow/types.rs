//! Workflow data model.

use crate::config::PipelineConfig;
use crate::references::Reference;
use crate::schema::{RevisionPayload, ScreeningVerdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::metrics::RunMetrics;

/// Pipeline stage. Declaration order is execution order within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    ComposingTeam,
    Drafting,
    DeskScreening,
    PeerReview,
    Revising,
    ModeratorDecision,
    Completed,
    Rejected,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Queued,
        Stage::ComposingTeam,
        Stage::Drafting,
        Stage::DeskScreening,
        Stage::PeerReview,
        Stage::Revising,
        Stage::ModeratorDecision,
        Stage::Completed,
        Stage::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::ComposingTeam => "composing_team",
            Stage::Drafting => "drafting",
            Stage::DeskScreening => "desk_screening",
            Stage::PeerReview => "peer_review",
            Stage::Revising => "revising",
            Stage::ModeratorDecision => "moderator_decision",
            Stage::Completed => "completed",
            Stage::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Rejected)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Position in a run: `(round, stage)`, compared lexicographically.
///
/// Stages before peer review run in round 0; each peer review round starts a new round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Progress {
    pub round: u32,
    pub stage: Stage,
}

impl Progress {
    pub fn new(round: u32, stage: Stage) -> Self {
        Self { round, stage }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stage, self.round)
    }
}

/// Externally visible workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Queued,
    Running,
    /// Failed after a checkpoint; resumable
    Interrupted,
    /// Failed before any checkpoint; retry from scratch
    Failed,
    Rejected,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Queued => "queued",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Interrupted => "interrupted",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::Completed => "completed",
        }
    }

    /// No further progress without an explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Rejected | WorkflowStatus::Failed
        )
    }

    /// Not queued and not running.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == WorkflowStatus::Interrupted
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        if self == next {
            return true;
        }
        match self {
            Queued => matches!(next, Running | Interrupted | Failed),
            Running => matches!(next, Interrupted | Failed | Rejected | Completed),
            // Explicit resume / retry
            Interrupted => matches!(next, Queued | Failed),
            Failed => next == Queued,
            Rejected | Completed => false,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    SingleAuthor,
    MultiAuthor,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::SingleAuthor => "single_author",
            ExecutionMode::MultiAuthor => "multi_author",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single_author" | "single" => Ok(ExecutionMode::SingleAuthor),
            "multi_author" | "multi" => Ok(ExecutionMode::MultiAuthor),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Professional,
}

impl AudienceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AudienceLevel::Beginner => "beginner",
            AudienceLevel::Intermediate => "intermediate",
            AudienceLevel::Professional => "professional",
        }
    }
}

impl FromStr for AudienceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(AudienceLevel::Beginner),
            "intermediate" => Ok(AudienceLevel::Intermediate),
            "professional" | "expert" => Ok(AudienceLevel::Professional),
            other => Err(format!("unknown audience level '{}'", other)),
        }
    }
}

/// What a review round does when a reviewer misses its deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerTimeoutPolicy {
    /// Aggregate the reviews that arrived
    #[default]
    ProceedWithPartial,
    /// Fail the stage
    FailRound,
}

/// Submission parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub topic: String,
    pub mode: ExecutionMode,
    pub audience: AudienceLevel,
    pub team_size: usize,
    pub max_rounds: u32,
    pub threshold: f64,
    #[serde(default)]
    pub caller: String,
}

impl WorkflowRequest {
    /// Request with the pipeline defaults.
    pub fn new(topic: impl Into<String>, pipeline: &PipelineConfig) -> Self {
        Self {
            topic: topic.into(),
            mode: pipeline.default_mode,
            audience: pipeline.default_audience,
            team_size: pipeline.team_size,
            max_rounds: pipeline.max_rounds,
            threshold: pipeline.threshold,
            caller: "local".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("topic cannot be empty".to_string());
        }
        if self.team_size == 0 {
            return Err("team_size must be at least 1".to_string());
        }
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".to_string());
        }
        if !(0.0..=10.0).contains(&self.threshold) {
            return Err(format!("threshold {} outside 0..=10", self.threshold));
        }
        Ok(())
    }
}

/// Final accept/reject outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    Rejected,
}

/// Registry record for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub request: WorkflowRequest,
    pub stage: Stage,
    pub status: WorkflowStatus,
    pub round: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub final_score: Option<f64>,
}

impl Workflow {
    pub fn queued(id: impl Into<String>, request: WorkflowRequest, now_ms: u64) -> Self {
        Self {
            id: id.into(),
            request,
            stage: Stage::Queued,
            status: WorkflowStatus::Queued,
            round: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            last_error: None,
            outcome: None,
            final_score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertRole {
    Author,
    #[default]
    Reviewer,
}

/// One team member. Fixed once team composition is checkpointed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertConfig {
    pub id: String,
    pub domain: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Tier override for this expert's calls
    #[serde(default)]
    pub model_tier: Option<String>,
    #[serde(default)]
    pub role: ExpertRole,
    #[serde(default)]
    pub rationale: String,
}

impl ExpertConfig {
    /// Lead author used when composition proposes no author.
    pub fn lead_author() -> Self {
        Self {
            id: "author-lead".to_string(),
            domain: "Lead Author".to_string(),
            focus_areas: Vec::new(),
            model_tier: None,
            role: ExpertRole::Author,
            rationale: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub author_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manuscript {
    pub title: String,
    pub version: u32,
    pub sections: Vec<Section>,
}

impl Manuscript {
    pub fn render_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content.trim()));
        }
        out
    }

    pub fn word_count(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.content.split_whitespace().count())
            .sum()
    }

    /// Next version with the listed sections replaced. Returns it with the number of
    /// sections changed; revisions for unknown section ids are ignored.
    pub fn apply_revision(&self, revision: &RevisionPayload) -> (Manuscript, usize) {
        let mut next = self.clone();
        next.version += 1;
        let mut changed = 0;
        for revised in &revision.sections {
            if let Some(section) = next.sections.iter_mut().find(|s| s.id == revised.id) {
                if section.content != revised.content {
                    section.content = revised.content.clone();
                    changed += 1;
                }
                if let Some(title) = &revised.title {
                    section.title = title.clone();
                }
            }
        }
        (next, changed)
    }
}

/// One reviewer's recorded review. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer_id: String,
    pub scores: BTreeMap<String, f64>,
    pub composite: f64,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub detailed_feedback: String,
    pub input_units: u64,
    pub output_units: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundDecision {
    /// Aggregate met the threshold
    Accept,
    /// Below threshold with rounds remaining
    Revise,
    /// Below threshold on the final round
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRound {
    pub round: u32,
    pub reviews: Vec<Review>,
    /// Reviewers that timed out or failed
    pub missing: Vec<String>,
    pub aggregate: f64,
    pub decision: RoundDecision,
}

/// Score-based default handed to the moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Reject,
}

impl Recommendation {
    pub fn outcome(self) -> Outcome {
        match self {
            Recommendation::Accept => Outcome::Accepted,
            Recommendation::Reject => Outcome::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictDecision {
    Accept,
    MinorRevision,
    MajorRevision,
    Reject,
}

impl FromStr for VerdictDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "ACCEPT" => Ok(VerdictDecision::Accept),
            "MINOR_REVISION" => Ok(VerdictDecision::MinorRevision),
            "MAJOR_REVISION" => Ok(VerdictDecision::MajorRevision),
            "REJECT" => Ok(VerdictDecision::Reject),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Moderator judgment and the outcome it settles on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorVerdict {
    pub decision: Option<VerdictDecision>,
    pub confidence: u8,
    pub meta_review: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub required_changes: Vec<String>,
    pub recommendation: Recommendation,
    pub outcome: Outcome,
}

impl ModeratorVerdict {
    /// Only an explicit ACCEPT or REJECT overrides the recommendation.
    pub fn settle(decision: Option<VerdictDecision>, recommendation: Recommendation) -> Outcome {
        match decision {
            Some(VerdictDecision::Accept) => Outcome::Accepted,
            Some(VerdictDecision::Reject) => Outcome::Rejected,
            _ => recommendation.outcome(),
        }
    }

    pub fn overrode(&self) -> bool {
        self.outcome != self.recommendation.outcome()
    }
}

/// Everything a run has accumulated. Persisted whole in each checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub team: Vec<ExpertConfig>,
    #[serde(default)]
    pub draft: Option<Manuscript>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub screening: Option<ScreeningVerdict>,
    #[serde(default)]
    pub rounds: Vec<ReviewRound>,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub verdict: Option<ModeratorVerdict>,
    #[serde(default)]
    pub metrics: RunMetrics,
}

impl WorkflowState {
    pub fn reviewers(&self) -> Vec<ExpertConfig> {
        self.team
            .iter()
            .filter(|e| e.role == ExpertRole::Reviewer)
            .cloned()
            .collect()
    }

    pub fn authors(&self) -> Vec<ExpertConfig> {
        self.team
            .iter()
            .filter(|e| e.role == ExpertRole::Author)
            .cloned()
            .collect()
    }

    pub fn last_round(&self) -> Option<&ReviewRound> {
        self.rounds.last()
    }

    pub fn final_score(&self) -> Option<f64> {
        self.rounds.last().map(|r| r.aggregate)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        if let Some(verdict) = &self.verdict {
            return Some(verdict.outcome);
        }
        match &self.screening {
            Some(screening) if !screening.passed => Some(Outcome::Rejected),
            _ => None,
        }
    }
}
