/*!
 * Provider failover.
 *
 * Wraps the configured provider and its fallbacks behind one `Provider`.
 * A call goes to the first member that is not resting. When it fails
 * with a transient or an account error the next member gets the same
 * prompt. Rate-limited members rest for the server's hint (or
 * `RATE_LIMIT_REST`); members whose credential or quota is gone are
 * skipped for the rest of the run. Any other failure is returned as is,
 * since another back-end would see the same prompt.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::app_config::ProviderId;
use crate::errors::{ErrorKind, ProviderError};
use crate::providers::{Completion, GenerationParams, Prompt, Provider, ProviderCapabilities};

/// Rest after a rate limit without a Retry-After hint
pub const RATE_LIMIT_REST: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Member {
    provider: Arc<dyn Provider>,
    /// `None` once the member is out for good
    available_from: Mutex<Option<Instant>>,
}

impl Member {
    fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            available_from: Mutex::new(Some(Instant::now())),
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        matches!(*self.available_from.lock(), Some(from) if from <= now)
    }

    fn is_retired(&self) -> bool {
        self.available_from.lock().is_none()
    }

    fn rest(&self, duration: Duration) {
        let mut slot = self.available_from.lock();
        if slot.is_some() {
            *slot = Some(Instant::now() + duration);
        }
    }

    fn retire(&self) {
        *self.available_from.lock() = None;
    }
}

/// Ordered list of providers tried one after another
#[derive(Debug)]
pub struct FailoverProvider {
    members: Vec<Member>,
}

impl FailoverProvider {
    /// `providers[0]` is the primary; returns `None` for an empty list
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Option<Self> {
        if providers.is_empty() {
            return None;
        }
        Some(Self {
            members: providers.into_iter().map(Member::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn primary(&self) -> &dyn Provider {
        self.members[0].provider.as_ref()
    }

    /// Members to try for the next call, ready ones first
    ///
    /// Resting members are still tried after the ready ones so a call never
    /// fails only because everyone is resting.
    fn call_order(&self) -> Vec<&Member> {
        let now = Instant::now();
        let (ready, resting): (Vec<&Member>, Vec<&Member>) = self
            .members
            .iter()
            .filter(|m| !m.is_retired())
            .partition(|m| m.is_ready(now));
        ready.into_iter().chain(resting).collect()
    }
}

#[async_trait]
impl Provider for FailoverProvider {
    fn id(&self) -> ProviderId {
        self.primary().id()
    }

    fn model(&self) -> &str {
        self.primary().model()
    }

    /// The smallest window of all members, so any of them can take a segment
    fn capabilities(&self) -> ProviderCapabilities {
        let mut capabilities = self.primary().capabilities();
        for member in &self.members[1..] {
            let other = member.provider.capabilities();
            capabilities.max_context_tokens = capabilities.max_context_tokens.min(other.max_context_tokens);
            capabilities.supports_system_prompt &= other.supports_system_prompt;
        }
        capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let order = self.call_order();
        let mut last_error = None;

        for (position, member) in order.iter().enumerate() {
            let provider = member.provider.as_ref();
            if position > 0 {
                info!("Failing over to {} ({})", provider.id().display_name(), provider.model());
            }
            let error = match provider.translate_segment(prompt, params).await {
                Ok(completion) => return Ok(completion),
                Err(error) => error,
            };

            match error.kind() {
                ErrorKind::Transient => {
                    if let ProviderError::RateLimitExceeded { retry_after, .. } = &error {
                        member.rest(retry_after.unwrap_or(RATE_LIMIT_REST));
                    }
                }
                ErrorKind::AuthOrQuota if self.members.len() > 1 => {
                    warn!(
                        "{} ({}) is out for this run: {}",
                        provider.id().display_name(),
                        provider.model(),
                        error
                    );
                    member.retire();
                }
                _ => return Err(error),
            }
            warn!("{} ({}) failed: {}", provider.id().display_name(), provider.model(), error);
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::AuthenticationError("every configured provider is out for this run".to_string())
        }))
    }

    async fn shutdown(&self, grace: Duration) {
        join_all(self.members.iter().map(|m| m.provider.shutdown(grace))).await;
    }
}
