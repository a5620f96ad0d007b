//! Review round coordination: concurrent fan-out, partial-result handling and
//! two-level score aggregation.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::policy::{CallOutcome, Operation, PolicyTable};
use crate::provider::{CapabilityRegistry, Role};
use crate::schema::ReviewPayload;

use super::prompts;
use super::types::{
    ExpertConfig, Manuscript, Review, ReviewRound, ReviewerTimeoutPolicy, RoundDecision,
    WorkflowRequest,
};

/// Round-level settings.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub criteria: Vec<String>,
    pub reviewer_timeout: Duration,
    pub timeout_policy: ReviewerTimeoutPolicy,
    pub min_reviews: usize,
}

impl RoundConfig {
    pub fn from_pipeline(pipeline: &PipelineConfig) -> Self {
        Self {
            criteria: pipeline.criteria.clone(),
            reviewer_timeout: Duration::from_millis(pipeline.reviewer_timeout_ms),
            timeout_policy: pipeline.reviewer_timeout_policy,
            min_reviews: pipeline.min_reviews,
        }
    }
}

/// A finished round plus the calls that produced it.
#[derive(Debug, Clone)]
pub struct RoundResult {
    pub round: ReviewRound,
    pub calls: Vec<CallOutcome>,
    pub elapsed_ms: u64,
}

/// Score-driven loop decision.
pub fn decide(aggregate: f64, threshold: f64, round: u32, max_rounds: u32) -> RoundDecision {
    if aggregate >= threshold {
        RoundDecision::Accept
    } else if round < max_rounds {
        RoundDecision::Revise
    } else {
        RoundDecision::Reject
    }
}

/// Mean of reviewer composites. Each composite is itself the mean of that
/// reviewer's criterion scores.
pub fn aggregate(reviews: &[Review]) -> f64 {
    if reviews.is_empty() {
        return 0.0;
    }
    reviews.iter().map(|r| r.composite).sum::<f64>() / reviews.len() as f64
}

pub struct ReviewRoundCoordinator<'a> {
    registry: &'a CapabilityRegistry,
    policies: &'a PolicyTable,
    config: RoundConfig,
}

enum SlotResult {
    Reviewed(Review, CallOutcome),
    Failed(String),
    TimedOut,
}

impl<'a> ReviewRoundCoordinator<'a> {
    pub fn new(registry: &'a CapabilityRegistry, policies: &'a PolicyTable, config: RoundConfig) -> Self {
        Self {
            registry,
            policies,
            config,
        }
    }

    /// Run one round: every reviewer concurrently, joined at one barrier.
    pub async fn run_round(
        &self,
        request: &WorkflowRequest,
        manuscript: &Manuscript,
        reviewers: &[ExpertConfig],
        round: u32,
    ) -> Result<RoundResult, PipelineError> {
        let started = Instant::now();
        let slots = join_all(
            reviewers
                .iter()
                .map(|reviewer| self.review_one(request, manuscript, reviewer, round)),
        )
        .await;

        let mut reviews = Vec::new();
        let mut calls = Vec::new();
        let mut missing = Vec::new();
        for (reviewer, slot) in reviewers.iter().zip(slots) {
            match slot {
                SlotResult::Reviewed(review, call) => {
                    reviews.push(review);
                    calls.push(call);
                }
                SlotResult::TimedOut => {
                    if self.config.timeout_policy == ReviewerTimeoutPolicy::FailRound {
                        return Err(PipelineError::ReviewerTimedOut {
                            round,
                            reviewer_id: reviewer.id.clone(),
                        });
                    }
                    warn!(round, reviewer_id = %reviewer.id, "Reviewer timed out; proceeding without it");
                    missing.push(reviewer.id.clone());
                }
                SlotResult::Failed(error) => {
                    warn!(round, reviewer_id = %reviewer.id, error = %error, "Reviewer failed; proceeding without it");
                    missing.push(reviewer.id.clone());
                }
            }
        }

        let required = self.config.min_reviews.min(reviewers.len()).max(1);
        if reviews.len() < required {
            return Err(PipelineError::InsufficientReviews {
                round,
                received: reviews.len(),
                required,
            });
        }

        let aggregate = aggregate(&reviews);
        let decision = decide(aggregate, request.threshold, round, request.max_rounds);
        info!(
            round,
            aggregate,
            threshold = request.threshold,
            received = reviews.len(),
            missing = missing.len(),
            decision = ?decision,
            "Review round aggregated"
        );

        Ok(RoundResult {
            round: ReviewRound {
                round,
                reviews,
                missing,
                aggregate,
                decision,
            },
            calls,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn review_one(
        &self,
        request: &WorkflowRequest,
        manuscript: &Manuscript,
        reviewer: &ExpertConfig,
        round: u32,
    ) -> SlotResult {
        let prompt = prompts::review(request, manuscript, reviewer, round, &self.config.criteria);
        let started = Instant::now();
        let call = self.policies.invoke(
            self.registry,
            Operation::Review,
            Role::Reviewer,
            &prompt,
            reviewer.model_tier.as_deref(),
        );
        match timeout(self.config.reviewer_timeout, call).await {
            Err(_) => SlotResult::TimedOut,
            Ok(Err(e)) => SlotResult::Failed(e.to_string()),
            Ok(Ok(outcome)) => {
                let payload = ReviewPayload::from_output(&outcome.generation.text, &self.config.criteria);
                let review = Review {
                    reviewer_id: reviewer.id.clone(),
                    composite: payload.composite(),
                    scores: payload.scores,
                    summary: payload.summary,
                    strengths: payload.strengths,
                    weaknesses: payload.weaknesses,
                    suggestions: payload.suggestions,
                    detailed_feedback: payload.detailed_feedback,
                    input_units: outcome.generation.input_units,
                    output_units: outcome.generation.output_units,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                SlotResult::Reviewed(review, outcome)
            }
        }
    }
}
