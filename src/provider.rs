//! Capability Abstraction
//!
//! The narrow interface the orchestration core uses to turn a prompt into text.
//! Which provider or model serves a call is resolved through a model tier, so
//! stages never name a concrete backend.

use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod openai;

pub use openai::OpenAiCompatibleClient;

/// Who is asking. Providers may use it for routing or accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    TeamComposer,
    Author,
    DeskEditor,
    Reviewer,
    Moderator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::TeamComposer => "team_composer",
            Role::Author => "author",
            Role::DeskEditor => "desk_editor",
            Role::Reviewer => "reviewer",
            Role::Moderator => "moderator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt handed to a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContext {
    pub system: String,
    pub user: String,
}

impl PromptContext {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    pub model_tier: String,
    pub temperature: f32,
    pub max_output: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            model_tier: "standard".to_string(),
            temperature: 0.7,
            max_output: 4096,
        }
    }
}

/// Result of one generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub input_units: u64,
    pub output_units: u64,
}

/// A text-generation backend.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn generate(
        &self,
        role: Role,
        prompt: &PromptContext,
        config: &CallConfig,
    ) -> Result<Generation, ProviderError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// OpenAI-compatible provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    #[serde(default)]
    pub endpoint: Option<String>,

    pub model: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// HTTP request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Invalid endpoint URL: {}", endpoint));
            }
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Resolves model tiers to capabilities.
///
/// A fallback capability, when set, serves every tier without an explicit entry.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    tiers: HashMap<String, Arc<dyn Capability>>,
    fallback: Option<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where one capability serves every tier.
    pub fn single(capability: Arc<dyn Capability>) -> Self {
        Self {
            tiers: HashMap::new(),
            fallback: Some(capability),
        }
    }

    pub fn register(&mut self, tier: impl Into<String>, capability: Arc<dyn Capability>) {
        self.tiers.insert(tier.into(), capability);
    }

    pub fn with_tier(mut self, tier: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        self.register(tier, capability);
        self
    }

    pub fn resolve(&self, tier: &str) -> Result<Arc<dyn Capability>, ProviderError> {
        self.tiers
            .get(tier)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(format!("No capability for tier '{}'", tier)))
    }

    pub fn tiers(&self) -> Vec<String> {
        let mut tiers: Vec<String> = self.tiers.keys().cloned().collect();
        tiers.sort();
        tiers
    }

    /// Build HTTP clients for every configured tier.
    pub fn from_config(config: &crate::config::RefereedConfig) -> Result<Self, ApiError> {
        let mut clients: HashMap<String, Arc<dyn Capability>> = HashMap::new();
        for (name, provider) in &config.providers {
            let client = OpenAiCompatibleClient::from_config(name, provider)?;
            clients.insert(name.clone(), Arc::new(client));
        }

        let mut registry = Self::new();
        for (tier, provider_name) in &config.tiers {
            let client = clients.get(provider_name).ok_or_else(|| {
                ApiError::ConfigError(format!(
                    "Tier '{}' references unknown provider '{}'",
                    tier, provider_name
                ))
            })?;
            registry.register(tier.clone(), Arc::clone(client));
        }

        // A lone provider serves every tier when no tier table is given.
        if config.tiers.is_empty() && clients.len() == 1 {
            registry.fallback = clients.into_values().next();
        }

        Ok(registry)
    }
}
