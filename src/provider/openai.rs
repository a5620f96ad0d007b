//! OpenAI-compatible chat-completions client.

use super::{CallConfig, Capability, Generation, PromptContext, ProviderConfig, Role};
use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleClient {
    name: String,
    client: Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            name: name.into(),
            client,
            model: model.into(),
            api_key,
            base_url,
        })
    }

    /// Build from config, reading the API key from the named environment variable.
    pub fn from_config(name: &str, config: &ProviderConfig) -> Result<Self, ApiError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ApiError::ConfigError(format!(
                    "Provider '{}' expects API key in ${}, which is not set",
                    name, var
                ))
            })?),
            None => None,
        };
        Self::new(
            name,
            config.model.clone(),
            api_key,
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

fn map_status(status: StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed(format!("{}: {}", status, body)),
        429 => ProviderError::RateLimited(format!("{}: {}", status, body)),
        404 => ProviderError::NotConfigured(format!("Model not found: {}", body)),
        code if code >= 500 => ProviderError::ProviderUnavailable(format!("{}: {}", status, body)),
        _ => ProviderError::ProviderUnavailable(format!("Request failed with {}: {}", status, body)),
    }
}

fn map_http_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else if let Some(status) = error.status() {
        map_status(status, &error.to_string())
    } else {
        ProviderError::ProviderUnavailable(format!("HTTP error: {}", error))
    }
}

#[async_trait]
impl Capability for OpenAiCompatibleClient {
    async fn generate(
        &self,
        role: Role,
        prompt: &PromptContext,
        config: &CallConfig,
    ) -> Result<Generation, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: config.temperature,
            max_tokens: config.max_output,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status, &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedOutput(format!("Failed to parse response: {}", e)))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedOutput("No choices in response".to_string()))?;
        let (input_units, output_units) = completion
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        debug!(
            provider = %self.name,
            model = %self.model,
            role = %role,
            input_units,
            output_units,
            "Generation completed"
        );

        Ok(Generation {
            text,
            input_units,
            output_units,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
