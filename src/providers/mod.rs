/*!
 * Provider implementations for different translation back-ends.
 *
 * This module contains client implementations for the supported back-ends:
 * - OpenAI-compatible chat completions (hostedChat)
 * - Anthropic messages API (hostedChatAlt1)
 * - Ollama chat API (hostedChatAlt2)
 * - llama.cpp-style binary run as a subprocess (localInference)
 * - HTTP inference worker on another host (remoteInference)
 *
 * Every adapter maps its failures onto `ProviderError`, whose `kind()` is
 * what the retry policy acts on. Configured fallbacks are chained behind
 * the primary adapter by `failover::FailoverProvider`.
 */

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Notify;

use crate::app_config::{ProviderConfig, ProviderId};
use crate::errors::{ProviderError, TranslationError};
use crate::translation::concurrency::ProviderProfile;

pub mod anthropic;
pub mod failover;
pub mod local;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod remote;

/// A rendered request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Single-string form for back-ends without a system role
    pub fn flattened(&self) -> String {
        if self.system.is_empty() {
            self.user.clone()
        } else {
            format!("{}\n\n{}\n", self.system, self.user)
        }
    }
}

/// Per-call generation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub timeout: Duration,
}

/// Raw model answer plus usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// The back-end flagged the answer as a refusal
    pub refused: bool,
}

/// What an adapter can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub max_context_tokens: usize,
    pub concurrent_request_limit: usize,
    pub supports_system_prompt: bool,
    pub streaming: bool,
}

impl ProviderCapabilities {
    /// Profile defaults, with the configured context window taking precedence
    pub fn for_config(config: &ProviderConfig) -> Self {
        let profile = ProviderProfile::for_provider(config.provider_id);
        Self {
            max_context_tokens: config.max_context_tokens.unwrap_or(profile.default_context_tokens),
            concurrent_request_limit: profile.effective_concurrent_requests(None),
            supports_system_prompt: profile.supports_system_prompt,
            streaming: profile.supports_streaming,
        }
    }
}

/// Common trait for all LLM providers
///
/// Implementations must be safe to call from many tasks at once; the worker
/// pool decides how many calls actually run.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    fn model(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Translate one rendered prompt
    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError>;

    /// Wait up to `grace` for in-flight calls, then release resources
    async fn shutdown(&self, grace: Duration);
}

/// Counts calls in progress so `shutdown` can wait for them
#[derive(Debug, Default)]
pub struct InFlightTracker {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the tracker when dropped
pub struct InFlightGuard<'a> {
    tracker: &'a InFlightTracker,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl InFlightTracker {
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { tracker: self }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// True if the tracker drained within `grace`
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.current() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

const CONTEXT_PHRASES: &[&str] = &[
    "max_tokens",
    "token limit",
    "too large",
    "too long",
    "maximum length",
    "context length",
    "context_length",
    "context window",
    "exceeds",
];

const QUOTA_PHRASES: &[&str] = &["insufficient_quota", "billing", "credit", "quota"];

const POLICY_PHRASES: &[&str] = &["content policy", "content_policy", "safety", "content_filter", "flagged"];

fn mentions(body: &str, phrases: &[&str]) -> bool {
    let lower = body.to_lowercase();
    phrases.iter().any(|p| lower.contains(p))
}

/// Map an HTTP failure onto the error taxonomy
pub fn classify_http_error(status: u16, body: &str, retry_after: Option<Duration>) -> ProviderError {
    let message = truncate(body, 500);
    match status {
        401 | 403 => ProviderError::AuthenticationError(message),
        402 => ProviderError::QuotaExceeded(message),
        429 if mentions(body, &["insufficient_quota", "billing"]) => ProviderError::QuotaExceeded(message),
        429 => ProviderError::RateLimitExceeded { message, retry_after },
        400 | 413 if mentions(body, CONTEXT_PHRASES) => ProviderError::ContextLengthExceeded(message),
        400..=499 if mentions(body, QUOTA_PHRASES) => ProviderError::QuotaExceeded(message),
        400..=499 if mentions(body, POLICY_PHRASES) => ProviderError::ContentRefused(message),
        404 => ProviderError::Configuration(format!("unknown model or endpoint: {}", message)),
        408 | 500..=599 => ProviderError::ApiError { status_code: status, message },
        _ => ProviderError::ApiError { status_code: status, message },
    }
}

/// `Retry-After` in seconds, if present
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Map a transport failure
pub fn map_transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if error.is_connect() {
        ProviderError::ConnectionError(error.to_string())
    } else {
        ProviderError::RequestFailed(error.to_string())
    }
}

/// Send a JSON request and decode a JSON answer, classifying failures
pub(crate) async fn execute_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| map_transport_error(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_http_error(status.as_u16(), &body, retry_after));
    }
    let body = response.text().await.map_err(|e| map_transport_error(e, timeout))?;
    serde_json::from_str(&body).map_err(|e| ProviderError::ParseError(format!("{}: {}", e, truncate(&body, 200))))
}

/// HTTP client shared by one adapter
pub(crate) fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, TranslationError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| TranslationError::Configuration(format!("cannot build HTTP client: {}", e)))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

/// Build the adapter selected by one provider configuration
pub fn build_adapter(config: &ProviderConfig) -> Result<Arc<dyn Provider>, TranslationError> {
    let provider: Arc<dyn Provider> = match config.provider_id {
        ProviderId::HostedChat => Arc::new(openai::OpenAI::from_config(config)?),
        ProviderId::HostedChatAlt1 => Arc::new(anthropic::Anthropic::from_config(config)?),
        ProviderId::HostedChatAlt2 => Arc::new(ollama::Ollama::from_config(config)?),
        ProviderId::LocalInference => Arc::new(local::LocalInference::from_config(config)?),
        ProviderId::RemoteInference => Arc::new(remote::RemoteInference::from_config(config)?),
    };
    Ok(provider)
}

/// Build the primary adapter, chained with its fallbacks when there are any
pub fn build_provider(
    primary: &ProviderConfig,
    fallbacks: &[ProviderConfig],
) -> Result<Arc<dyn Provider>, TranslationError> {
    let primary = build_adapter(primary)?;
    if fallbacks.is_empty() {
        return Ok(primary);
    }
    let mut chain = vec![primary];
    for fallback in fallbacks {
        chain.push(build_adapter(fallback)?);
    }
    info!("Provider failover: {} back-ends configured", chain.len());
    let failover = failover::FailoverProvider::new(chain)
        .ok_or_else(|| TranslationError::Internal("empty provider chain".to_string()))?;
    Ok(Arc::new(failover))
}
