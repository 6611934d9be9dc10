/*!
 * Client for an inference worker running on another host.
 *
 * The worker exposes a single endpoint, `POST {base}/v1/translate`, that
 * takes the rendered prompt and sampling parameters and answers with the
 * completion and token usage.
 */

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
use crate::translation::segmenter::estimate_tokens;

#[derive(Debug)]
pub struct RemoteInference {
    client: Client,
    base_url: String,
    /// Optional bearer token
    token: Secret,
    model: String,
    capabilities: ProviderCapabilities,
    in_flight: InFlightTracker,
}

#[derive(Debug, Serialize)]
pub struct WorkerRequest<'a> {
    system: &'a str,
    prompt: &'a str,
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Deserialize)]
pub struct WorkerResponse {
    pub text: String,
    #[serde(default)]
    pub tokens_in: Option<u64>,
    #[serde(default)]
    pub tokens_out: Option<u64>,
    #[serde(default)]
    pub refused: bool,
}

impl RemoteInference {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, TranslationError> {
        let base_url = config.endpoint();
        url::Url::parse(&base_url)
            .map_err(|e| TranslationError::Configuration(format!("invalid worker URL {}: {}", base_url, e)))?;
        Ok(Self {
            client: http_client(config)?,
            base_url,
            token: config.resolve_credential(),
            model: config.model.clone(),
            capabilities: ProviderCapabilities::for_config(config),
            in_flight: InFlightTracker::default(),
        })
    }

    fn completion_from(prompt: &Prompt, response: WorkerResponse) -> Completion {
        Completion {
            tokens_in: response
                .tokens_in
                .unwrap_or_else(|| estimate_tokens(&prompt.flattened()) as u64),
            tokens_out: response.tokens_out.unwrap_or_else(|| estimate_tokens(&response.text) as u64),
            text: response.text,
            refused: response.refused,
        }
    }
}

#[async_trait]
impl Provider for RemoteInference {
    fn id(&self) -> ProviderId {
        ProviderId::RemoteInference
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let _guard = self.in_flight.enter();
        let request = WorkerRequest {
            system: &prompt.system,
            prompt: &prompt.user,
            model: &self.model,
            temperature: params.temperature,
            max_tokens: params.max_output_tokens,
        };
        let url = format!("{}/v1/translate", self.base_url.trim_end_matches('/'));
        debug!("POST {} ({} chars)", url, prompt.user.len());

        let mut builder = self.client.post(&url).json(&request);
        if !self.token.is_empty() {
            builder = builder.bearer_auth(self.token.expose());
        }
        let response: WorkerResponse = execute_json(builder, params.timeout).await?;
        Ok(Self::completion_from(prompt, response))
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.in_flight.wait_idle(grace).await {
            debug!("Remote worker adapter shut down with {} calls in flight", self.in_flight.current());
        }
    }
}
