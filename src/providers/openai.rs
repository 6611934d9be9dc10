use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::{ProviderConfig, ProviderId, Secret};
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{
    Completion, GenerationParams, InFlightTracker, Prompt, Provider, ProviderCapabilities, execute_json, http_client,
};

/// Client for OpenAI-compatible chat completion endpoints
#[derive(Debug)]
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    /// Bearer token
    api_key: Secret,
    /// Base URL, e.g. https://api.openai.com/v1
    endpoint: String,
    model: String,
    capabilities: ProviderCapabilities,
    in_flight: InFlightTracker,
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    /// system, user or assistant
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

impl OpenAIRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(OpenAIMessage {
            role: role.into(),
            content: Some(content.into()),
        });
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl OpenAI {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, TranslationError> {
        Ok(Self {
            client: http_client(config)?,
            api_key: config.resolve_credential(),
            endpoint: config.endpoint(),
            model: config.model.clone(),
            capabilities: ProviderCapabilities::for_config(config),
            in_flight: InFlightTracker::default(),
        })
    }

    /// Turn a decoded response into a completion
    pub fn completion_from(response: OpenAIResponse) -> Result<Completion, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;
        let finish = choice.finish_reason.unwrap_or_default();
        if finish == "length" {
            return Err(ProviderError::ContextLengthExceeded(
                "completion was cut off at max_tokens".to_string(),
            ));
        }
        let usage = response.usage.unwrap_or(OpenAIUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            refused: finish == "content_filter",
        })
    }
}

#[async_trait]
impl Provider for OpenAI {
    fn id(&self) -> ProviderId {
        ProviderId::HostedChat
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let _guard = self.in_flight.enter();
        let request = OpenAIRequest::new(&self.model)
            .add_message("system", &prompt.system)
            .add_message("user", &prompt.user)
            .temperature(params.temperature)
            .max_tokens(params.max_output_tokens as u32);

        let url = format!("{}/chat/completions", self.endpoint);
        debug!("POST {} ({} chars)", url, prompt.user.len());
        let response: OpenAIResponse = execute_json(
            self.client
                .post(&url)
                .bearer_auth(self.api_key.expose())
                .json(&request),
            params.timeout,
        )
        .await?;
        Self::completion_from(response)
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.in_flight.wait_idle(grace).await {
            debug!("OpenAI adapter shut down with {} calls in flight", self.in_flight.current());
        }
    }
}
