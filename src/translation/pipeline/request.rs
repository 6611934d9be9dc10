/*!
 * Single requests sent outside the segment workers.
 *
 * The preparation analysis and the polish pass each send one prompt at a
 * time. The call runs under a worker pool and the call timeout. Only
 * transient failures are retried: a refusal or an unreadable answer is
 * final for these requests.
 */

use log::debug;

use crate::errors::{ProviderError, TranslationError};
use crate::providers::{Completion, GenerationParams, Prompt, Provider};
use crate::translation::concurrency::WorkerPool;
use crate::translation::retry::{AttemptState, RetryDecision, RetryPolicy};
use crate::translation::segmenter::estimate_tokens;

/// Send `prompt` until `parse` accepts an answer or the policy gives up
pub(crate) async fn request_with_retry<T, P>(
    provider: &dyn Provider,
    pool: &WorkerPool,
    policy: &RetryPolicy,
    prompt: &Prompt,
    params: &GenerationParams,
    parse: P,
) -> Result<T, TranslationError>
where
    P: Fn(&Completion) -> Result<T, ProviderError>,
{
    let cancel = pool.cancel_token().clone();
    let estimate = estimate_tokens(&prompt.system) + estimate_tokens(&prompt.user);
    let mut state = AttemptState::default();

    loop {
        state.attempts += 1;
        let call = pool
            .run(
                estimate,
                tokio::time::timeout(params.timeout, provider.translate_segment(prompt, params)),
            )
            .await?;
        let error = match call {
            Err(_) => ProviderError::Timeout(params.timeout),
            Ok(answer) => match answer.and_then(|completion| parse(&completion)) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            },
        };

        let delay = match policy.decide(error.kind(), &mut state, error.retry_after()) {
            RetryDecision::RetryAfter(delay) => delay,
            _ => return Err(TranslationError::Provider(error)),
        };
        debug!("Attempt {} failed ({}), retrying in {:?}", state.attempts, error, delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranslationError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
