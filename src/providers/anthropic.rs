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

/// Anthropic client for interacting with Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: Secret,
    /// API endpoint URL
    endpoint: String,
    /// Value of the anthropic-version header
    api_version: String,
    model: String,
    capabilities: ProviderCapabilities,
    in_flight: InFlightTracker,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// The model to use
    model: String,

    /// The messages for the conversation
    messages: Vec<AnthropicMessage>,

    /// System prompt to guide the AI
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,

    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,

    /// Content of the message
    pub content: String,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens
    pub input_tokens: u64,
    /// Number of output tokens
    pub output_tokens: u64,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// The content of the response
    pub content: Vec<AnthropicContent>,
    /// Why generation stopped
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage information
    pub usage: TokenUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    pub content_type: String,

    /// The actual text content
    #[serde(default)]
    pub text: String,
}

impl AnthropicRequest {
    /// Create a new Anthropic request
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system: None,
            temperature: None,
            max_tokens,
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(AnthropicMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        // the messages API caps temperature at 1.0
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

impl Anthropic {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, TranslationError> {
        Ok(Self {
            client: http_client(config)?,
            api_key: config.resolve_credential(),
            endpoint: config.endpoint(),
            api_version: config.api_version.clone(),
            model: config.model.clone(),
            capabilities: ProviderCapabilities::for_config(config),
            in_flight: InFlightTracker::default(),
        })
    }

    /// Extract text from Anthropic response
    pub fn extract_text_from_response(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect()
    }

    pub fn completion_from(response: AnthropicResponse) -> Result<Completion, ProviderError> {
        let stop = response.stop_reason.clone().unwrap_or_default();
        if stop == "max_tokens" {
            return Err(ProviderError::ContextLengthExceeded(
                "completion was cut off at max_tokens".to_string(),
            ));
        }
        Ok(Completion {
            text: Self::extract_text_from_response(&response),
            tokens_in: response.usage.input_tokens,
            tokens_out: response.usage.output_tokens,
            refused: stop == "refusal",
        })
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn id(&self) -> ProviderId {
        ProviderId::HostedChatAlt1
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let _guard = self.in_flight.enter();
        let request = AnthropicRequest::new(&self.model, params.max_output_tokens as u32)
            .system(&prompt.system)
            .add_message("user", &prompt.user)
            .temperature(params.temperature);

        let url = format!("{}/v1/messages", self.endpoint);
        debug!("POST {} ({} chars)", url, prompt.user.len());
        let response: AnthropicResponse = execute_json(
            self.client
                .post(&url)
                .header("x-api-key", self.api_key.expose())
                .header("anthropic-version", &self.api_version)
                .json(&request),
            params.timeout,
        )
        .await?;
        Self::completion_from(response)
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.in_flight.wait_idle(grace).await {
            debug!("Anthropic adapter shut down with {} calls in flight", self.in_flight.current());
        }
    }
}
