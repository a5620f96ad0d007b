//! Call Policy Table
//!
//! Every capability call goes through [`PolicyTable::invoke`], which applies the
//! operation's timeout, retries transient failures with exponential backoff and,
//! once retries are exhausted, makes one more attempt cycle on the fallback tier.

use crate::error::ProviderError;
use crate::provider::{CallConfig, CapabilityRegistry, Generation, PromptContext, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Capability call sites, one per stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ComposeTeam,
    Draft,
    Screen,
    Review,
    Revise,
    Moderate,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::ComposeTeam,
        Operation::Draft,
        Operation::Screen,
        Operation::Review,
        Operation::Revise,
        Operation::Moderate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ComposeTeam => "compose_team",
            Operation::Draft => "draft",
            Operation::Screen => "screen",
            Operation::Review => "review",
            Operation::Revise => "revise",
            Operation::Moderate => "moderate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation '{}'", s))
    }
}

/// Exponential backoff curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Declarative policy for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub timeout_ms: u64,
    pub tier: String,
    pub fallback_tier: Option<String>,
    pub temperature: f32,
    pub max_output: u32,
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn call_config(&self, tier: &str) -> CallConfig {
        CallConfig {
            model_tier: tier.to_string(),
            temperature: self.temperature,
            max_output: self.max_output,
        }
    }

    fn default_for(op: Operation) -> Self {
        let backoff = Backoff {
            initial_ms: 1000,
            multiplier: 2.0,
            max_ms: 30_000,
        };
        let (max_retries, timeout_ms, tier, fallback, temperature, max_output) = match op {
            Operation::ComposeTeam => (2, 120_000, "standard", Some("economy"), 0.7, 2048),
            Operation::Draft => (3, 600_000, "premium", Some("standard"), 0.7, 16_384),
            Operation::Screen => (2, 60_000, "economy", Some("standard"), 0.2, 1024),
            Operation::Review => (2, 300_000, "standard", Some("economy"), 0.3, 4096),
            Operation::Revise => (3, 600_000, "premium", Some("standard"), 0.7, 16_384),
            Operation::Moderate => (2, 180_000, "premium", Some("standard"), 0.3, 4096),
        };
        Self {
            max_retries,
            backoff,
            timeout_ms,
            tier: tier.to_string(),
            fallback_tier: fallback.map(str::to_string),
            temperature,
            max_output,
        }
    }

    fn apply(&mut self, o: &CallPolicyOverride) {
        if let Some(v) = o.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = o.initial_backoff_ms {
            self.backoff.initial_ms = v;
        }
        if let Some(v) = o.backoff_multiplier {
            self.backoff.multiplier = v;
        }
        if let Some(v) = o.max_backoff_ms {
            self.backoff.max_ms = v;
        }
        if let Some(v) = o.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = &o.tier {
            self.tier = v.clone();
        }
        // An empty fallback tier disables fallback.
        if let Some(v) = &o.fallback_tier {
            self.fallback_tier = (!v.is_empty()).then(|| v.clone());
        }
        if let Some(v) = o.temperature {
            self.temperature = v;
        }
        if let Some(v) = o.max_output {
            self.max_output = v;
        }
    }
}

/// Partial policy from `[policies.<operation>]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output: Option<u32>,
}

/// Successful call with bookkeeping for metrics and logs.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub generation: Generation,
    pub attempts: u32,
    pub tier: String,
    pub fell_back: bool,
}

/// Policies for every operation.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<Operation, CallPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            policies: Operation::ALL
                .into_iter()
                .map(|op| (op, CallPolicy::default_for(op)))
                .collect(),
        }
    }
}

impl PolicyTable {
    /// Built-in defaults with config overrides applied. Unknown operation names are skipped;
    /// config validation reports them.
    pub fn from_overrides(overrides: &HashMap<String, CallPolicyOverride>) -> Self {
        let mut table = Self::default();
        for (name, o) in overrides {
            if let Ok(op) = Operation::from_str(name) {
                table.override_with(op, o);
            }
        }
        table
    }

    pub fn override_with(&mut self, op: Operation, o: &CallPolicyOverride) {
        self.policies
            .entry(op)
            .or_insert_with(|| CallPolicy::default_for(op))
            .apply(o);
    }

    pub fn set(&mut self, op: Operation, policy: CallPolicy) {
        self.policies.insert(op, policy);
    }

    pub fn policy(&self, op: Operation) -> CallPolicy {
        self.policies
            .get(&op)
            .cloned()
            .unwrap_or_else(|| CallPolicy::default_for(op))
    }

    /// Run one capability call under the operation's policy.
    ///
    /// `tier_override` (an expert's assigned tier) replaces the policy's primary tier.
    pub async fn invoke(
        &self,
        registry: &CapabilityRegistry,
        op: Operation,
        role: Role,
        prompt: &PromptContext,
        tier_override: Option<&str>,
    ) -> Result<CallOutcome, ProviderError> {
        let policy = self.policy(op);
        let primary = tier_override.unwrap_or(&policy.tier).to_string();

        let primary_err = match attempt_tier(registry, &policy, op, role, prompt, &primary).await {
            Ok((generation, attempts)) => {
                return Ok(CallOutcome {
                    generation,
                    attempts,
                    tier: primary,
                    fell_back: false,
                })
            }
            Err(err) => err,
        };

        let fallback = match &policy.fallback_tier {
            Some(tier) if primary_err.is_transient() && *tier != primary => tier.clone(),
            _ => return Err(primary_err),
        };

        warn!(
            operation = %op,
            primary_tier = %primary,
            fallback_tier = %fallback,
            error = %primary_err,
            "Retries exhausted, falling back"
        );
        let (generation, attempts) =
            attempt_tier(registry, &policy, op, role, prompt, &fallback).await?;
        Ok(CallOutcome {
            generation,
            attempts,
            tier: fallback,
            fell_back: true,
        })
    }
}

async fn attempt_tier(
    registry: &CapabilityRegistry,
    policy: &CallPolicy,
    op: Operation,
    role: Role,
    prompt: &PromptContext,
    tier: &str,
) -> Result<(Generation, u32), ProviderError> {
    let capability = registry.resolve(tier)?;
    let config = policy.call_config(tier);
    let mut attempt: u32 = 0;

    loop {
        let result = match timeout(policy.timeout(), capability.generate(role, prompt, &config)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{} exceeded {}ms on tier {}",
                op, policy.timeout_ms, tier
            ))),
        };

        match result {
            Ok(generation) => {
                debug!(
                    operation = %op,
                    capability = capability.name(),
                    tier,
                    attempt = attempt + 1,
                    "Capability call succeeded"
                );
                return Ok((generation, attempt + 1));
            }
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff.delay_for(attempt);
                warn!(
                    operation = %op,
                    tier,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient provider error, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
