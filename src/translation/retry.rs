/*!
 * Retry and backoff policy.
 *
 * The policy never sleeps or calls anything itself. Given the kind of the
 * last failure and what has been tried so far, it decides what the segment
 * worker does next.
 */

use std::time::Duration;

use rand::Rng;

use crate::app_config::RetryConfig;
use crate::errors::ErrorKind;
use crate::translation::report::UnresolvedReason;

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Same request again after a delay
    RetryAfter(Duration),
    /// Wrap the request in the neutral literary framing
    RetryRephrased,
    /// Same request at a lower temperature
    RetryCooler { temperature: f32 },
    /// Last attempt with explicit output constraints
    RetryStrict { temperature: f32 },
    /// Hand the segment back to the segmenter
    NeedsResegment,
    /// Fall back to the review marker
    GiveUp(UnresolvedReason),
    /// Stop the run
    Abort,
}

/// Failures seen so far for one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    pub attempts: u32,
    pub transient: u32,
    pub refusals: u32,
    pub malformed: u32,
    pub strict_used: bool,
}

impl AttemptState {
    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    max_attempts: u32,
    malformed_retries: u32,
    temperature_step: f32,
    base_temperature: f32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, base_temperature: f32) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
            jitter: config.jitter.clamp(0.0, 1.0),
            max_attempts: config.max_attempts.max(1),
            malformed_retries: config.malformed_retries,
            temperature_step: config.temperature_step,
            base_temperature,
        }
    }

    pub fn base_temperature(&self) -> f32 {
        self.base_temperature
    }

    /// Delay before transient retry number `retry` (1-based)
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.backoff_delay_with(retry, &mut rand::rng())
    }

    pub fn backoff_delay_with<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay);
        let factor = if self.jitter > 0.0 {
            rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        raw.mul_f64(factor).min(self.max_delay)
    }

    fn cooler(&self, step: u32) -> f32 {
        (self.base_temperature - self.temperature_step * step as f32).max(0.0)
    }

    /// Record a failure of `kind` and decide the next step
    pub fn decide(&self, kind: ErrorKind, state: &mut AttemptState, retry_after: Option<Duration>) -> RetryDecision {
        match kind {
            ErrorKind::Transient => {
                state.transient += 1;
                if state.transient >= self.max_attempts {
                    return RetryDecision::GiveUp(UnresolvedReason::RetriesExhausted);
                }
                let delay = self.backoff_delay(state.transient);
                // a server hint raises the delay but never past the cap
                RetryDecision::RetryAfter(retry_after.map_or(delay, |min| delay.max(min.min(self.max_delay))))
            }
            ErrorKind::ContextOverflow => RetryDecision::NeedsResegment,
            ErrorKind::Refusal => {
                state.refusals += 1;
                if state.refusals == 1 {
                    RetryDecision::RetryRephrased
                } else {
                    RetryDecision::GiveUp(UnresolvedReason::Refused)
                }
            }
            ErrorKind::Malformed => {
                state.malformed += 1;
                if state.malformed <= self.malformed_retries {
                    RetryDecision::RetryCooler { temperature: self.cooler(state.malformed) }
                } else if !state.strict_used {
                    state.strict_used = true;
                    RetryDecision::RetryStrict { temperature: self.cooler(self.malformed_retries) }
                } else {
                    RetryDecision::GiveUp(UnresolvedReason::Malformed)
                }
            }
            ErrorKind::Cancelled => RetryDecision::GiveUp(UnresolvedReason::Cancelled),
            ErrorKind::AuthOrQuota
            | ErrorKind::Configuration
            | ErrorKind::Internal
            | ErrorKind::Reader
            | ErrorKind::Writer => RetryDecision::Abort,
        }
    }
}
