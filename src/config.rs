//! Configuration System
//!
//! Layered runtime configuration: built-in defaults, a global config file, workspace
//! config files and `REFEREED__*` environment overrides, merged by the `config` crate
//! and validated before any service is constructed.

use crate::logging::LoggingConfig;
use crate::policy::{CallPolicyOverride, Operation};
use crate::workflow::{AudienceLevel, ExecutionMode, ReviewerTimeoutPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use crate::provider::ProviderConfig;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefereedConfig {
    /// Review loop and stage plan settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Generation providers by name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Model tier to provider name
    #[serde(default)]
    pub tiers: HashMap<String, String>,

    /// Per-operation call policy overrides, keyed by operation name
    #[serde(default)]
    pub policies: HashMap<String, CallPolicyOverride>,

    /// Cost estimation rates
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Review loop defaults and stage plan switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default maximum number of peer review rounds
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Default aggregate score needed to pass a round
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Default number of reviewers
    #[serde(default = "default_team_size")]
    pub team_size: usize,

    /// Per-reviewer timeout for one round (milliseconds)
    #[serde(default = "default_reviewer_timeout_ms")]
    pub reviewer_timeout_ms: u64,

    /// What a round does when a reviewer times out
    #[serde(default)]
    pub reviewer_timeout_policy: ReviewerTimeoutPolicy,

    /// Minimum reviews needed to aggregate a round
    #[serde(default = "default_min_reviews")]
    pub min_reviews: usize,

    /// Scoring criteria requested from reviewers
    #[serde(default = "default_criteria")]
    pub criteria: Vec<String>,

    /// Run the desk screening gate before peer review
    #[serde(default = "default_true")]
    pub desk_screening: bool,

    #[serde(default)]
    pub default_mode: ExecutionMode,

    #[serde(default)]
    pub default_audience: AudienceLevel,
}

fn default_max_rounds() -> u32 {
    3
}

fn default_threshold() -> f64 {
    8.0
}

fn default_team_size() -> usize {
    3
}

fn default_reviewer_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_min_reviews() -> usize {
    1
}

fn default_criteria() -> Vec<String> {
    ["accuracy", "completeness", "clarity", "novelty", "rigor"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            threshold: default_threshold(),
            team_size: default_team_size(),
            reviewer_timeout_ms: default_reviewer_timeout_ms(),
            reviewer_timeout_policy: ReviewerTimeoutPolicy::default(),
            min_reviews: default_min_reviews(),
            criteria: default_criteria(),
            desk_screening: default_true(),
            default_mode: ExecutionMode::default(),
            default_audience: AudienceLevel::default(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers; each owns at most one workflow at a time
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum queued jobs
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Minimum interval between submissions from one caller (milliseconds)
    #[serde(default = "default_min_submit_interval_ms")]
    pub min_submit_interval_ms: u64,

    /// Re-enqueue resumable workflows found by the startup recovery scan
    #[serde(default = "default_true")]
    pub resume_on_start: bool,
}

fn default_workers() -> usize {
    2
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_min_submit_interval_ms() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queue_size: default_max_queue_size(),
            min_submit_interval_ms: default_min_submit_interval_ms(),
            resume_on_start: default_true(),
        }
    }
}

/// Storage configuration. Relative paths resolve against the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Per-workflow result directories (defaults to `<root>/results`)
    #[serde(default)]
    pub results_dir: Option<PathBuf>,

    /// Workflow registry database (defaults to `<root>/store`)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".refereed")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            results_dir: None,
            store_dir: None,
        }
    }
}

impl StorageConfig {
    /// Resolve `(results_dir, store_dir)` against the workspace root.
    pub fn resolve_paths(&self, workspace_root: &Path) -> (PathBuf, PathBuf) {
        let base = dunce::canonicalize(workspace_root).unwrap_or_else(|_| workspace_root.to_path_buf());
        let root = if self.root.is_absolute() {
            self.root.clone()
        } else {
            base.join(&self.root)
        };
        let resolve = |path: &Option<PathBuf>, fallback: &str| match path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => base.join(p),
            None => root.join(fallback),
        };
        (
            resolve(&self.results_dir, "results"),
            resolve(&self.store_dir, "store"),
        )
    }
}

/// Cost per one million input/output units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_input_price")]
    pub input_per_million: f64,

    #[serde(default = "default_output_price")]
    pub output_per_million: f64,
}

fn default_input_price() -> f64 {
    3.0
}

fn default_output_price() -> f64 {
    15.0
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_million: default_input_price(),
            output_per_million: default_output_price(),
        }
    }
}

impl PricingConfig {
    pub fn estimate(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1_000_000.0) * self.input_per_million
            + (output_units as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Pipeline(String),
    Pool(String),
    Provider(String, String),
    Tier(String, String),
    Policy(String, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Pipeline(msg) => write!(f, "Pipeline: {}", msg),
            ValidationError::Pool(msg) => write!(f, "Pool: {}", msg),
            ValidationError::Provider(name, msg) => write!(f, "Provider '{}': {}", name, msg),
            ValidationError::Tier(name, msg) => write!(f, "Tier '{}': {}", name, msg),
            ValidationError::Policy(name, msg) => write!(f, "Policy '{}': {}", name, msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_rounds == 0 {
            return Err("max_rounds must be at least 1".to_string());
        }
        if !(0.0..=10.0).contains(&self.threshold) {
            return Err(format!("threshold {} outside 0..=10", self.threshold));
        }
        if self.team_size == 0 {
            return Err("team_size must be at least 1".to_string());
        }
        if self.min_reviews == 0 {
            return Err("min_reviews must be at least 1".to_string());
        }
        if self.reviewer_timeout_ms == 0 {
            return Err("reviewer_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

impl RefereedConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.pipeline.validate() {
            errors.push(ValidationError::Pipeline(e));
        }
        if self.pool.workers == 0 {
            errors.push(ValidationError::Pool("workers must be at least 1".to_string()));
        }
        if self.pool.max_queue_size == 0 {
            errors.push(ValidationError::Pool(
                "max_queue_size must be at least 1".to_string(),
            ));
        }

        for (name, provider) in &self.providers {
            if let Err(e) = provider.validate() {
                errors.push(ValidationError::Provider(name.clone(), e));
            }
        }

        for (tier, provider) in &self.tiers {
            if !self.providers.contains_key(provider) {
                errors.push(ValidationError::Tier(
                    tier.clone(),
                    format!("unknown provider '{}'", provider),
                ));
            }
        }

        for (name, policy) in &self.policies {
            if Operation::from_str(name).is_err() {
                errors.push(ValidationError::Policy(
                    name.clone(),
                    "unknown operation".to_string(),
                ));
                continue;
            }
            if self.tiers.is_empty() {
                continue;
            }
            for tier in [&policy.tier, &policy.fallback_tier].into_iter().flatten() {
                if !self.tiers.contains_key(tier) {
                    errors.push(ValidationError::Policy(
                        name.clone(),
                        format!("unknown tier '{}'", tier),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold all errors into a single `ApiError`.
    pub fn ensure_valid(&self) -> Result<(), crate::error::ApiError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            crate::error::ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }
}
