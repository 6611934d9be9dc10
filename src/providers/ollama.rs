use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::{ProviderConfig, ProviderId};
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{
    Completion, GenerationParams, InFlightTracker, Prompt, Provider, ProviderCapabilities, execute_json, http_client,
};
use crate::translation::segmenter::estimate_tokens;

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
    model: String,
    capabilities: ProviderCapabilities,
    in_flight: InFlightTracker,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for generation (default: 0.8)
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Top-p sampling (default: 0.9)
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    /// Context window to allocate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

/// Chat message object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant, or tool)
    pub role: String,
    /// Content of the message
    pub content: String,
}

/// Chat request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    model: String,
    /// Messages of the conversation
    messages: Vec<ChatMessage>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    stream: bool,
    /// How long to keep the model loaded in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

/// Chat response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Model name
    pub model: String,
    /// Response message
    pub message: ChatMessage,
    /// Whether the generation is complete
    pub done: bool,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    /// Number of prompt tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: None,
            stream: false,
            keep_alive: None,
        }
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }
}

impl Ollama {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, TranslationError> {
        Ok(Self {
            base_url: config.endpoint(),
            client: http_client(config)?,
            model: config.model.clone(),
            capabilities: ProviderCapabilities::for_config(config),
            in_flight: InFlightTracker::default(),
        })
    }

    fn completion_from(prompt: &Prompt, response: ChatResponse) -> Result<Completion, ProviderError> {
        if response.done_reason.as_deref() == Some("length") {
            return Err(ProviderError::ContextLengthExceeded(
                "completion was cut off at num_predict".to_string(),
            ));
        }
        let text = response.message.content;
        Ok(Completion {
            tokens_in: response
                .prompt_eval_count
                .unwrap_or_else(|| estimate_tokens(&prompt.flattened()) as u64),
            tokens_out: response.eval_count.unwrap_or_else(|| estimate_tokens(&text) as u64),
            text,
            refused: false,
        })
    }
}

#[async_trait]
impl Provider for Ollama {
    fn id(&self) -> ProviderId {
        ProviderId::HostedChatAlt2
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let _guard = self.in_flight.enter();
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: prompt.system.clone(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt.user.clone(),
            },
        ];
        let request = ChatRequest::new(&self.model, messages)
            .options(GenerationOptions {
                temperature: Some(params.temperature),
                top_p: Some(0.9),
                num_predict: Some(params.max_output_tokens as u32),
                num_ctx: Some(self.capabilities.max_context_tokens as u32),
            })
            .keep_alive("10m");

        let url = format!("{}/api/chat", self.base_url);
        debug!("POST {} ({} chars)", url, prompt.user.len());
        let response: ChatResponse = execute_json(self.client.post(&url).json(&request), params.timeout).await?;
        Self::completion_from(prompt, response)
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.in_flight.wait_idle(grace).await {
            debug!("Ollama adapter shut down with {} calls in flight", self.in_flight.current());
        }
    }
}
