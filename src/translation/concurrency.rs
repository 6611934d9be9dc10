/*!
 * Worker pool and provider-specific concurrency tuning.
 *
 * Every provider call goes through the pool. A call first waits for an
 * in-flight permit (FIFO), then for its estimated tokens from the
 * tokens-per-minute bucket, and only then reaches the adapter. All three
 * waits, and the call itself, end early when the run is cancelled.
 */

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::app_config::ProviderId;
use crate::errors::TranslationError;

/// Provider-specific concurrency profile with tuned defaults
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Maximum concurrent requests
    pub max_concurrent_requests: usize,
    /// Context window when the configuration does not name one
    pub default_context_tokens: usize,
    /// Whether the back-end takes a separate system prompt
    pub supports_system_prompt: bool,
    /// Whether provider supports streaming
    pub supports_streaming: bool,
}

impl ProviderProfile {
    /// Get the optimal profile for a given provider
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            ProviderId::HostedChat => Self {
                max_concurrent_requests: 10,
                default_context_tokens: 128_000,
                supports_system_prompt: true,
                supports_streaming: true,
            },
            ProviderId::HostedChatAlt1 => Self {
                // lower rate limits, larger context
                max_concurrent_requests: 5,
                default_context_tokens: 200_000,
                supports_system_prompt: true,
                supports_streaming: true,
            },
            ProviderId::HostedChatAlt2 => Self {
                max_concurrent_requests: 8,
                default_context_tokens: 8_192,
                supports_system_prompt: true,
                supports_streaming: true,
            },
            ProviderId::LocalInference => Self {
                // one model process at a time
                max_concurrent_requests: 1,
                default_context_tokens: 4_096,
                supports_system_prompt: false,
                supports_streaming: false,
            },
            ProviderId::RemoteInference => Self {
                max_concurrent_requests: 4,
                default_context_tokens: 32_768,
                supports_system_prompt: true,
                supports_streaming: false,
            },
        }
    }

    /// Get effective concurrent requests, respecting any user override
    pub fn effective_concurrent_requests(&self, user_override: Option<usize>) -> usize {
        user_override.unwrap_or(self.max_concurrent_requests).max(1)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Tokens-per-minute budget
///
/// The state lock is only held to refill and take tokens, never while a
/// waiter sleeps. Waiters are not queued, so a small request can pass a
/// large one that is still waiting for its refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    per_second: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn per_minute(tokens_per_minute: u32) -> Self {
        let capacity = f64::from(tokens_per_minute.max(1));
        Self {
            capacity,
            per_second: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `tokens` from the bucket, waiting for the refill if needed
    ///
    /// A request larger than the whole bucket waits for a full bucket.
    pub async fn acquire(&self, tokens: usize) {
        let cost = (tokens as f64).clamp(1.0, self.capacity);
        loop {
            let Some(wait) = self.try_take(cost) else { return };
            debug!("Token bucket empty, waiting {:?} for {} tokens", wait, cost);
            tokio::time::sleep(wait).await;
        }
    }

    /// Refill, then take `cost` tokens or return how long until they exist
    fn try_take(&self, cost: f64) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.per_second).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= cost {
            state.tokens -= cost;
            return None;
        }
        Some(Duration::from_secs_f64((cost - state.tokens) / self.per_second))
    }

    /// Tokens currently available, without refilling
    pub fn available(&self) -> f64 {
        self.state.lock().tokens
    }
}

/// Bounded executor for provider calls
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    bucket: Option<Arc<TokenBucket>>,
    cancel: CancellationToken,
    max_in_flight: usize,
}

impl WorkerPool {
    pub fn new(max_in_flight: usize, tokens_per_minute: Option<u32>, cancel: CancellationToken) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            bucket: tokens_per_minute.map(|tpm| Arc::new(TokenBucket::per_minute(tpm))),
            cancel,
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `task` once a permit and its token budget are available
    ///
    /// Dropping out on cancellation drops `task`, which aborts an in-flight
    /// HTTP request or kills a child process.
    pub async fn run<F, T>(&self, estimated_tokens: usize, task: F) -> Result<T, TranslationError>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(TranslationError::Cancelled);
        }
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TranslationError::Cancelled),
            permit = self.semaphore.acquire() => permit
                .map_err(|e| TranslationError::Internal(format!("worker pool closed: {}", e)))?,
        };
        if let Some(bucket) = &self.bucket {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TranslationError::Cancelled),
                _ = bucket.acquire(estimated_tokens) => {}
            }
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TranslationError::Cancelled),
            output = task => Ok(output),
        }
    }
}
