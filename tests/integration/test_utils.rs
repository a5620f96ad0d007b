//! Shared test utilities for integration tests
//!
//! A scripted capability standing in for real providers, plus helpers that build
//! services rooted in a temp directory.

use async_trait::async_trait;
use parking_lot::Mutex;
use refereed::config::RefereedConfig;
use refereed::error::ProviderError;
use refereed::provider::{CallConfig, Capability, CapabilityRegistry, Generation, PromptContext, Role};
use refereed::runtime::Services;
use refereed::status::now_millis;
use refereed::workflow::{Workflow, WorkflowRequest, WorkflowStatus};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Deterministic capability that answers by role.
///
/// - reviewers score every criterion with the next value from `reviewer_scores`
/// - the team composer proposes two reviewers plus `proposed_authors` authors
/// - authors return a draft that also carries a one-section revision; a second
///   author cites the same sources under its own numbering
/// - the desk editor passes unless `screening_passes` is false
/// - the moderator returns `moderator_decision` (none keeps the recommendation)
pub struct ScriptedCapability {
    calls: Mutex<HashMap<Role, usize>>,
    review_calls: AtomicUsize,
    pub reviewer_scores: Mutex<Vec<f64>>,
    pub screening_passes: Mutex<bool>,
    pub moderator_decision: Mutex<Option<String>>,
    pub proposed_authors: Mutex<usize>,
    /// Calls for this role fail with a non-transient error while set
    pub failing_role: Mutex<Option<Role>>,
    /// When set, author calls wait for a permit
    pub author_gate: Option<Arc<Semaphore>>,
}

impl ScriptedCapability {
    pub fn new(reviewer_scores: Vec<f64>) -> Arc<Self> {
        Arc::new(Self::build(reviewer_scores, None))
    }

    /// Author calls block until `gate` receives permits.
    pub fn gated(reviewer_scores: Vec<f64>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(reviewer_scores, Some(gate)))
    }

    fn build(reviewer_scores: Vec<f64>, author_gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            review_calls: AtomicUsize::new(0),
            reviewer_scores: Mutex::new(reviewer_scores),
            screening_passes: Mutex::new(true),
            moderator_decision: Mutex::new(None),
            proposed_authors: Mutex::new(0),
            failing_role: Mutex::new(None),
            author_gate,
        }
    }

    pub fn calls(&self, role: Role) -> usize {
        self.calls.lock().get(&role).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn fail(&self, role: Option<Role>) {
        *self.failing_role.lock() = role;
    }

    fn respond(&self, role: Role, prompt: &PromptContext) -> String {
        match role {
            Role::TeamComposer => {
                let mut experts = vec![
                    json!({"id": "methods", "domain": "Methods", "role": "reviewer"}),
                    json!({"id": "applications", "domain": "Applications", "role": "reviewer"}),
                ];
                for i in 1..=*self.proposed_authors.lock() {
                    experts.push(json!({
                        "id": format!("author-{}", i),
                        "domain": format!("Area {}", i),
                        "role": "author"
                    }));
                }
                json!({
                    "analysis": "Needs methods and applications reviewers",
                    "experts": experts
                })
                .to_string()
            }
            Role::Author if prompt.user.contains("author 2 of") => json!({
                "title": "Second Author Notes",
                "sections": [
                    {"id": "results", "title": "Results", "content": "Results [1] build on [2]."}
                ],
                "references": [
                    {"id": 1, "title": "Deep Residual Learning | CVPR 2016"},
                    {"id": 2, "title": "Attention is all you need", "doi": "https://doi.org/10.5555/3295222"}
                ]
            })
            .to_string(),
            Role::Author => json!({
                "title": "A Scripted Manuscript",
                "sections": [
                    {"id": "intro", "title": "Introduction", "content": "Background [1]."},
                    {"id": "method", "title": "Method", "content": "Approach [2]."}
                ],
                "references": [
                    {"id": 1, "title": "Attention Is All You Need | NeurIPS 2017", "doi": "10.5555/3295222"},
                    {"id": 2, "title": "Deep Residual Learning", "doi": "N/A"}
                ],
                "revised_sections": [
                    {"id": "method", "content": "A clearer approach [2]."}
                ],
                "response_to_reviewers": "Clarified the method."
            })
            .to_string(),
            Role::DeskEditor => {
                let passed = *self.screening_passes.lock();
                json!({
                    "decision": if passed { "pass" } else { "reject" },
                    "reason": "scripted"
                })
                .to_string()
            }
            Role::Reviewer => {
                let scores = self.reviewer_scores.lock();
                let index = self.review_calls.fetch_add(1, Ordering::SeqCst);
                let score = if scores.is_empty() {
                    5.0
                } else {
                    scores[index % scores.len()]
                };
                json!({
                    "scores": {
                        "accuracy": score,
                        "clarity": score,
                        "rigor": score,
                    },
                    "summary": "scripted review",
                    "weaknesses": ["Method section is terse"],
                })
                .to_string()
            }
            Role::Moderator => match self.moderator_decision.lock().clone() {
                Some(decision) => json!({
                    "decision": decision,
                    "confidence": 4,
                    "meta_review": "scripted decision"
                })
                .to_string(),
                None => "I defer to the reviewers.".to_string(),
            },
        }
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    async fn generate(
        &self,
        role: Role,
        prompt: &PromptContext,
        _config: &CallConfig,
    ) -> Result<Generation, ProviderError> {
        if role == Role::Author {
            if let Some(ref gate) = self.author_gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|_| ProviderError::ProviderUnavailable("gate closed".into()))?;
            }
        }
        *self.calls.lock().entry(role).or_insert(0) += 1;
        if *self.failing_role.lock() == Some(role) {
            return Err(ProviderError::AuthFailed(format!("scripted failure for {}", role)));
        }
        Ok(Generation {
            text: self.respond(role, prompt),
            input_units: 100,
            output_units: 50,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Config tuned for tests: no submission interval, short reviewer timeout.
pub fn test_config() -> RefereedConfig {
    let mut config = RefereedConfig::default();
    config.pool.min_submit_interval_ms = 0;
    config.pool.workers = 2;
    config.pipeline.reviewer_timeout_ms = 5_000;
    config
}

/// Services rooted in `temp_dir`, answering every tier with `capability`.
pub fn test_services(
    temp_dir: &TempDir,
    config: RefereedConfig,
    capability: Arc<ScriptedCapability>,
) -> Arc<Services> {
    let registry = CapabilityRegistry::single(capability);
    Services::new(config, registry, temp_dir.path()).unwrap()
}

/// Registry record plus `request.json`, already marked running, as a worker would leave it.
pub fn register_running(services: &Services, workflow_id: &str, request: &WorkflowRequest) {
    services.checkpoints.begin(workflow_id, request).unwrap();
    services
        .status
        .create(&Workflow::queued(workflow_id, request.clone(), now_millis()))
        .unwrap();
    services
        .status
        .set_status(workflow_id, WorkflowStatus::Running, None)
        .unwrap();
}
