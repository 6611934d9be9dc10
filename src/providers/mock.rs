/*!
 * Mock provider implementations for testing.
 *
 * This module provides a scripted provider that simulates different behaviors:
 * - `MockProvider::working()` - Always succeeds with a deterministic "translation"
 * - `MockProvider::echo()` - Answers with the source text unchanged
 * - `MockProvider::failing()` - Always fails with a server error
 * - `MockProvider::refusing()` - Declines every request
 * - `MockProvider::fail_first(n, status)` - Fails n times, then works
 *
 * The working translation upper-cases the text (transliterating to Cyrillic
 * when the request asks for it) and leaves block markers alone, so grouped
 * segments survive the round trip. A custom responder replaces the default
 * answer for scenario tests.
 */

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::json;

use crate::app_config::ProviderId;
use crate::errors::ProviderError;
use crate::providers::{Completion, GenerationParams, Prompt, Provider, ProviderCapabilities};
use crate::translation::prompts::SegmentRequest;
use crate::translation::quality::script::to_cyrillic;
use crate::translation::segmenter::estimate_tokens;

static MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<BLOCK_\d+>>|<<END>>").expect("valid marker regex"));

/// What the mock sees of a request
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// The text to translate, or the whole user prompt for other tasks
    pub text: String,
    /// Source language
    pub source_language: String,
    /// Target language
    pub target_language: String,
    /// Empty when the prompt is not a translation request
    pub task: String,
    pub system: String,
    pub target_script: Option<String>,
    pub context_before: Option<String>,
    pub strict: bool,
    pub temperature: f32,
    /// Zero-based position of this call
    pub call_index: usize,
}

impl MockRequest {
    fn from_prompt(prompt: &Prompt, params: &GenerationParams, call_index: usize) -> Self {
        match SegmentRequest::from_user_prompt(&prompt.user) {
            Some(request) => Self {
                text: request.text,
                source_language: request.source_language,
                target_language: request.target_language,
                task: request.task,
                system: prompt.system.clone(),
                target_script: request.constraints.target_script,
                context_before: request.context_before,
                strict: request.constraints.strict,
                temperature: params.temperature,
                call_index,
            },
            None => Self {
                text: prompt.user.clone(),
                system: prompt.system.clone(),
                temperature: params.temperature,
                call_index,
                ..Self::default()
            },
        }
    }

    /// Whether this is a segment translation rather than an analysis call
    pub fn is_translation(&self) -> bool {
        !self.task.is_empty()
    }

    /// Whether the request used the neutral framing sent after a refusal
    pub fn is_rephrased(&self) -> bool {
        self.task == "neutral_literary_translation"
    }
}

/// Custom response generator
pub type Responder = Arc<dyn Fn(&MockRequest) -> Result<String, ProviderError> + Send + Sync>;

/// Per-request delay, overrides the fixed delay when it returns `Some`
pub type DelayFn = Arc<dyn Fn(&MockRequest) -> Option<Duration> + Send + Sync>;

/// Behavior mode for the mock provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a proper translation
    Working,
    /// Returns the source text untouched
    Echo,
    /// Always fails with an error
    Failing,
    /// Flags every answer as a refusal
    Refusing,
    /// Returns empty response
    Empty,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// The first `failures` calls fail with `status`, the rest work
    FailFirst { failures: usize, status: u16 },
    /// Simulates slow response (for timeout and cancellation testing)
    Slow { delay_ms: u64 },
}

/// Mock provider for testing translation behavior
#[derive(Clone)]
pub struct MockProvider {
    /// Behavior mode
    behavior: MockBehavior,
    id: ProviderId,
    model: String,
    capabilities: ProviderCapabilities,
    /// Requests whose text is longer than this fail with a context overflow
    overflow_above_chars: Option<usize>,
    /// Sleep before answering
    delay: Option<Duration>,
    delay_for: Option<DelayFn>,
    retry_after: Option<Duration>,
    /// Request counter shared between clones
    request_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    /// Every request seen, in call order
    requests: Arc<Mutex<Vec<MockRequest>>>,
    /// Custom response generator (optional)
    responder: Option<Responder>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("behavior", &self.behavior)
            .field("model", &self.model)
            .field("calls", &self.calls())
            .finish()
    }
}

/// Decrements the in-flight counter when a call ends
struct CallGuard(Arc<AtomicUsize>);

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            id: ProviderId::HostedChat,
            model: "mock-model".to_string(),
            capabilities: ProviderCapabilities {
                max_context_tokens: 8_192,
                concurrent_request_limit: 4,
                supports_system_prompt: true,
                streaming: false,
            },
            overflow_above_chars: None,
            delay: None,
            delay_for: None,
            retry_after: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            responder: None,
        }
    }

    /// Create a working mock provider that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Create a failing mock provider that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn refusing() -> Self {
        Self::new(MockBehavior::Refusing)
    }

    /// Create a mock that returns empty responses
    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    /// Create an intermittently failing mock provider
    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent {
            fail_every: fail_every.max(1),
        })
    }

    pub fn fail_first(failures: usize, status: u16) -> Self {
        Self::new(MockBehavior::FailFirst { failures, status })
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Set a custom response generator
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&MockRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_context_window(mut self, max_context_tokens: usize) -> Self {
        self.capabilities.max_context_tokens = max_context_tokens;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.capabilities.concurrent_request_limit = limit.max(1);
        self
    }

    /// Fail requests whose text exceeds `chars` with a context overflow
    pub fn with_overflow_above(mut self, chars: usize) -> Self {
        self.overflow_above_chars = Some(chars);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay chosen per request, to force a completion order
    pub fn with_delay_for<F>(mut self, delay_for: F) -> Self
    where
        F: Fn(&MockRequest) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay_for = Some(Arc::new(delay_for));
        self
    }

    /// Retry-After attached to simulated 429 and 503 answers
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_id(mut self, id: ProviderId) -> Self {
        self.id = id;
        self
    }

    /// Number of calls received so far
    pub fn calls(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot of every request seen
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    /// Translation calls only, without analysis requests
    pub fn translation_requests(&self) -> Vec<MockRequest> {
        self.requests.lock().iter().filter(|r| r.is_translation()).cloned().collect()
    }

    /// The default deterministic translation of a request
    pub fn default_translation(request: &MockRequest) -> String {
        let cyrillic = request.target_script.as_deref() == Some("cyrillic");
        let mut out = String::with_capacity(request.text.len());
        let mut last = 0;
        for marker in MARKERS.find_iter(&request.text) {
            out.push_str(&Self::transform(&request.text[last..marker.start()], cyrillic));
            out.push_str(marker.as_str());
            last = marker.end();
        }
        out.push_str(&Self::transform(&request.text[last..], cyrillic));
        out
    }

    fn transform(text: &str, cyrillic: bool) -> String {
        if cyrillic {
            to_cyrillic(text).to_uppercase()
        } else {
            text.to_uppercase()
        }
    }

    /// Wrap a translation in the JSON envelope the prompt asks for
    pub fn envelope(translation: &str, named_entities: &[(&str, &str)]) -> String {
        let entities: serde_json::Map<String, serde_json::Value> = named_entities
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        json!({ "translation": translation, "named_entities": entities }).to_string()
    }

    fn server_error(&self, status: u16, call_index: usize) -> ProviderError {
        if status == 429 {
            ProviderError::RateLimitExceeded {
                message: format!("Simulated rate limit (request #{})", call_index + 1),
                retry_after: self.retry_after,
            }
        } else {
            ProviderError::ApiError {
                status_code: status,
                message: format!("Simulated server failure (request #{})", call_index + 1),
            }
        }
    }

    fn answer(&self, request: &MockRequest) -> Result<Completion, ProviderError> {
        if let Some(limit) = self.overflow_above_chars {
            if request.is_translation() && request.text.chars().count() > limit {
                return Err(ProviderError::ContextLengthExceeded(format!(
                    "{} characters exceed the simulated window of {}",
                    request.text.chars().count(),
                    limit
                )));
            }
        }

        let text = match self.behavior {
            MockBehavior::Failing => {
                return Err(ProviderError::ApiError {
                    status_code: 500,
                    message: "Simulated provider failure".to_string(),
                });
            }
            MockBehavior::Intermittent { fail_every } if request.call_index % fail_every == fail_every - 1 => {
                return Err(self.server_error(503, request.call_index));
            }
            MockBehavior::FailFirst { failures, status } if request.call_index < failures => {
                return Err(self.server_error(status, request.call_index));
            }
            MockBehavior::Refusing => {
                return Ok(Completion {
                    text: "I'm sorry, but I can't help with translating this content.".to_string(),
                    tokens_in: estimate_tokens(&request.text) as u64,
                    tokens_out: 12,
                    refused: true,
                });
            }
            MockBehavior::Empty => String::new(),
            MockBehavior::Echo => request.text.clone(),
            _ => match &self.responder {
                Some(responder) => responder(request)?,
                None if request.is_translation() => Self::envelope(&Self::default_translation(request), &[]),
                None => json!({ "content_type": "novel", "genre": "literary fiction" }).to_string(),
            },
        };

        Ok(Completion {
            tokens_in: estimate_tokens(&request.text) as u64,
            tokens_out: estimate_tokens(&text) as u64,
            text,
            refused: false,
        })
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let call_index = self.request_count.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = CallGuard(Arc::clone(&self.in_flight));

        let request = MockRequest::from_prompt(prompt, params, call_index);
        self.requests.lock().push(request.clone());

        let delay = match self.behavior {
            MockBehavior::Slow { delay_ms } => Some(Duration::from_millis(delay_ms)),
            _ => self.delay_for.as_ref().and_then(|f| f(&request)).or(self.delay),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.answer(&request)
    }

    async fn shutdown(&self, _grace: Duration) {}
}
