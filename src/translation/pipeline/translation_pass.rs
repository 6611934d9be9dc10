/*!
 * Translation pass: takes one segment from cache lookup to an accepted
 * translation.
 *
 * A segment is first looked up in the cache. On a miss the build runs under
 * the singleflight guard, so identical concurrent segments share one
 * provider call. Every provider answer goes through the output checks and
 * the retry policy decides what happens after a failure. Accepted answers
 * are cached together with the named entities the model listed; those only
 * reach the glossary once the whole chapter is done.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::app_config::Config;
use crate::errors::{ErrorKind, ProviderError, TranslationError};
use crate::language_utils::{Script, get_language_name};
use crate::providers::{Completion, GenerationParams, Prompt, Provider};
use crate::translation::cache::{CacheKey, CacheKeyParts, CacheRecord, Singleflight, TranslationCache, source_hash};
use crate::translation::concurrency::WorkerPool;
use crate::translation::context::{GlossaryView, StyleProfile};
use crate::translation::events::{EventBus, EventKind};
use crate::translation::prompts::{
    PromptVariant, ResponseEnvelope, TranslationPromptBuilder, looks_like_refusal, parse_envelope,
};
use crate::translation::quality::OutputValidator;
use crate::translation::report::UnresolvedReason;
use crate::translation::retry::{AttemptState, RetryDecision, RetryPolicy};
use crate::translation::segmenter::{Segment, estimate_tokens, split_grouped, tail_chars};

/// Where an accepted translation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Provider,
    Cache,
    /// Built by a concurrent request for the same key
    Shared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedSegment {
    pub translation: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub retries: u32,
    pub source: ResultSource,
    /// Names the model reported, source term to translation
    pub named_entities: BTreeMap<String, String>,
}

/// Terminal state of one segment attempt cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Translated(TranslatedSegment),
    /// The model window was exceeded; the segment has to be cut smaller
    NeedsResegment { attempts: u32 },
    /// Retries are exhausted; the slot gets the review-marked source
    Failed {
        reason: UnresolvedReason,
        attempts: u32,
        message: String,
    },
    /// The run has to stop
    Fatal { kind: ErrorKind, message: String },
}

impl SegmentOutcome {
    fn cancelled(attempts: u32) -> Self {
        SegmentOutcome::Failed {
            reason: UnresolvedReason::Cancelled,
            attempts,
            message: "run cancelled".to_string(),
        }
    }

    fn from_error(error: &TranslationError, attempts: u32) -> Self {
        match error.kind() {
            ErrorKind::Cancelled => Self::cancelled(attempts),
            kind => SegmentOutcome::Fatal {
                kind,
                message: error.to_string(),
            },
        }
    }
}

/// State shared by the segments of one chapter
#[derive(Debug, Clone)]
pub struct ChapterContext {
    pub ordinal: usize,
    /// Glossary entries fixed when the chapter was enqueued
    pub view: Arc<GlossaryView>,
    pub budget: usize,
    translations: Arc<Mutex<HashMap<String, String>>>,
}

impl ChapterContext {
    pub fn new(ordinal: usize, view: GlossaryView, budget: usize) -> Self {
        Self {
            ordinal,
            view: Arc::new(view),
            budget,
            translations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record_translation(&self, segment_id: &str, translation: &str) {
        self.translations
            .lock()
            .insert(segment_id.to_string(), translation.to_string());
    }

    pub fn known_translation(&self, segment_id: &str) -> Option<String> {
        self.translations.lock().get(segment_id).cloned()
    }
}

/// A segment plus the id of the segment before it in reading order
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment: Segment,
    pub previous_id: Option<String>,
}

/// Run settings the translator needs
#[derive(Debug, Clone)]
pub struct TranslatorSettings {
    pub source_name: String,
    pub target_name: String,
    pub target_language: String,
    pub target_script: Option<Script>,
    pub prompt_version: u32,
    pub max_output_tokens: usize,
    pub timeout: Duration,
    pub context_chars: usize,
}

impl TranslatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_name: get_language_name(&config.run.source_language),
            target_name: get_language_name(&config.run.target_language),
            target_language: config.run.target_language.clone(),
            target_script: config.run.target_script,
            prompt_version: config.run.prompt_version,
            max_output_tokens: config.provider.max_output_tokens,
            timeout: config.provider.timeout(),
            context_chars: config.run.context_chars,
        }
    }
}

/// Translates segments; shared by every chapter of a run
pub struct SegmentTranslator {
    provider: Arc<dyn Provider>,
    pool: WorkerPool,
    cache: Arc<TranslationCache>,
    inflight: Singleflight<SegmentOutcome>,
    events: EventBus,
    policy: RetryPolicy,
    validator: OutputValidator,
    style: StyleProfile,
    style_digest: String,
    settings: TranslatorSettings,
}

impl std::fmt::Debug for SegmentTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentTranslator")
            .field("provider", &self.provider.id())
            .field("model", &self.provider.model())
            .field("inflight", &self.inflight.in_flight())
            .finish()
    }
}

impl SegmentTranslator {
    pub fn new(
        config: &Config,
        provider: Arc<dyn Provider>,
        pool: WorkerPool,
        cache: Arc<TranslationCache>,
        events: EventBus,
        style: StyleProfile,
    ) -> Self {
        let settings = TranslatorSettings::from_config(config);
        Self {
            validator: OutputValidator::new(
                &config.run.source_language,
                &config.run.target_language,
                settings.target_script,
            ),
            policy: RetryPolicy::new(&config.retry, config.provider.temperature),
            style_digest: style.digest(),
            provider,
            pool,
            cache,
            inflight: Singleflight::new(),
            events,
            style,
            settings,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn cache_key(&self, segment: &Segment, glossary_digest: &str) -> CacheKey {
        CacheKey::compute(CacheKeyParts {
            model: self.provider.model(),
            prompt_version: self.settings.prompt_version,
            target_language: &self.settings.target_language,
            segment_id: &segment.segment_id,
            style_digest: &self.style_digest,
            glossary_digest,
        })
    }

    /// Translate one segment
    pub async fn translate(self: &Arc<Self>, job: &SegmentJob, chapter: &ChapterContext) -> SegmentOutcome {
        if self.pool.is_cancelled() {
            return SegmentOutcome::cancelled(0);
        }
        let key = self.cache_key(&job.segment, chapter.view.digest());

        let outcome = match self.cache.get(&key) {
            Some(record) => Self::replay(&record),
            None => {
                let this = Arc::clone(self);
                let owned_job = job.clone();
                let owned_chapter = chapter.clone();
                let owned_key = key.clone();
                let (outcome, leader) = self
                    .inflight
                    .run(key.as_str(), move || async move {
                        this.translate_uncached(&owned_job, &owned_chapter, &owned_key).await
                    })
                    .await;
                match outcome {
                    SegmentOutcome::Translated(mut done) if !leader => {
                        done.source = ResultSource::Shared;
                        done.tokens_in = 0;
                        done.tokens_out = 0;
                        SegmentOutcome::Translated(done)
                    }
                    other => other,
                }
            }
        };

        if let SegmentOutcome::Translated(done) = &outcome {
            chapter.record_translation(&job.segment.segment_id, &done.translation);
        }
        outcome
    }

    /// Serve a cached record with the named entities it was stored with
    fn replay(record: &CacheRecord) -> SegmentOutcome {
        SegmentOutcome::Translated(TranslatedSegment {
            translation: record.translation.clone(),
            tokens_in: 0,
            tokens_out: 0,
            retries: 0,
            source: ResultSource::Cache,
            named_entities: record.named_entities.clone(),
        })
    }

    async fn translate_uncached(&self, job: &SegmentJob, chapter: &ChapterContext, key: &CacheKey) -> SegmentOutcome {
        // a leader that finished between our lookup and the singleflight check
        if let Some(record) = self.cache.peek(key) {
            return Self::replay(&record);
        }

        let segment = &job.segment;
        let context_before = job
            .previous_id
            .as_deref()
            .and_then(|id| chapter.known_translation(id))
            .map(|t| tail_chars(&t, self.settings.context_chars))
            .unwrap_or_else(|| segment.context_before.clone());

        let mut state = AttemptState::default();
        let mut variant = PromptVariant::Standard;
        let mut temperature = self.policy.base_temperature();
        let mut tokens_in = 0u64;
        let mut tokens_out = 0u64;

        loop {
            if self.pool.is_cancelled() {
                return SegmentOutcome::cancelled(state.attempts);
            }
            state.attempts += 1;

            let prompt = self.build_prompt(segment, chapter, &context_before, variant);
            let params = GenerationParams {
                temperature,
                max_output_tokens: self.settings.max_output_tokens,
                timeout: self.settings.timeout,
            };
            let estimate = estimate_tokens(&prompt.system) + estimate_tokens(&prompt.user) + segment.token_estimate;

            let call = self
                .pool
                .run(estimate, self.provider.translate_segment(&prompt, &params))
                .await;
            let error = match call {
                Err(e) => return SegmentOutcome::from_error(&e, state.attempts),
                Ok(Err(e)) => e,
                Ok(Ok(completion)) => {
                    tokens_in += completion.tokens_in;
                    tokens_out += completion.tokens_out;
                    match self.accept(segment, &completion) {
                        Ok(envelope) => {
                            return self.store(segment, key, envelope, tokens_in, tokens_out, state.retries());
                        }
                        Err(e) => e,
                    }
                }
            };

            let kind = error.kind();
            let message = error.to_string();
            debug!("Segment {} attempt {} failed: {}", segment.segment_id, state.attempts, message);
            self.events.publish(EventKind::ProviderError {
                segment_id: segment.segment_id.clone(),
                kind,
                message: message.clone(),
            });

            let delay = match self.policy.decide(kind, &mut state, error.retry_after()) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::RetryRephrased => {
                    variant = PromptVariant::Rephrased;
                    Duration::ZERO
                }
                RetryDecision::RetryCooler { temperature: cooler } => {
                    temperature = cooler;
                    Duration::ZERO
                }
                RetryDecision::RetryStrict { temperature: cooler } => {
                    temperature = cooler;
                    variant = PromptVariant::Strict;
                    Duration::ZERO
                }
                RetryDecision::NeedsResegment => {
                    return SegmentOutcome::NeedsResegment { attempts: state.attempts };
                }
                RetryDecision::GiveUp(reason) => {
                    warn!("Giving up on segment {} after {} attempts: {}", segment.segment_id, state.attempts, message);
                    return SegmentOutcome::Failed {
                        reason,
                        attempts: state.attempts,
                        message,
                    };
                }
                RetryDecision::Abort => return SegmentOutcome::Fatal { kind, message },
            };

            self.events.publish(EventKind::RetryScheduled {
                segment_id: segment.segment_id.clone(),
                attempt: state.attempts + 1,
                delay_ms: delay.as_millis() as u64,
                reason: kind,
            });
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.pool.cancel_token().cancelled() => return SegmentOutcome::cancelled(state.attempts),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn build_prompt(&self, segment: &Segment, chapter: &ChapterContext, context_before: &str, variant: PromptVariant) -> Prompt {
        TranslationPromptBuilder::new(&self.settings.source_name, &self.settings.target_name)
            .with_style(&self.style)
            .with_glossary(chapter.view.relevant_to(&segment.text))
            .with_context(Some(context_before), Some(&segment.context_after))
            .with_target_script(self.settings.target_script)
            .with_block_markers(Some(segment.block_count))
            .with_variant(variant)
            .build(&segment.text)
    }

    /// Turn a completion into an accepted envelope or the error to retry on
    fn accept(&self, segment: &Segment, completion: &Completion) -> Result<ResponseEnvelope, ProviderError> {
        if completion.refused {
            return Err(ProviderError::ContentRefused("the provider flagged the answer".to_string()));
        }
        let mut envelope = parse_envelope(&completion.text)?;
        let short = envelope.translation.chars().count() < segment.text.chars().count().max(80);
        if short && looks_like_refusal(&envelope.translation) {
            return Err(ProviderError::ContentRefused(envelope.translation));
        }
        envelope.translation = self.validator.validate(&segment.text, &envelope.translation)?;
        if segment.is_grouped() && split_grouped(&envelope.translation, segment.block_count).is_none() {
            return Err(ProviderError::MalformedResponse(
                "block markers are missing or out of order".to_string(),
            ));
        }
        Ok(envelope)
    }

    fn store(
        &self,
        segment: &Segment,
        key: &CacheKey,
        envelope: ResponseEnvelope,
        tokens_in: u64,
        tokens_out: u64,
        retries: u32,
    ) -> SegmentOutcome {
        self.cache.put(CacheRecord {
            key: key.clone(),
            model: self.provider.model().to_string(),
            provider_id: self.provider.id().to_string(),
            prompt_version: self.settings.prompt_version,
            source_hash: source_hash(&segment.text),
            translation: envelope.translation.clone(),
            created_at: Utc::now(),
            named_entities: envelope.named_entities.clone(),
            tokens_in,
            tokens_out,
        });
        SegmentOutcome::Translated(TranslatedSegment {
            translation: envelope.translation,
            tokens_in,
            tokens_out,
            retries,
            source: ResultSource::Provider,
            named_entities: envelope.named_entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::ProviderId;
    use crate::providers::mock::MockProvider;
    use crate::translation::context::GlossarySnapshot;
    use crate::translation::document::BlockKind;
    use crate::translation::segmenter::segment_id;
    use tokio_util::sync::CancellationToken;

    fn segment(text: &str) -> Segment {
        Segment {
            segment_id: segment_id("ch-001", 0, &[], text),
            chapter_id: "ch-001".to_string(),
            block_index: 0,
            block_count: 1,
            piece_path: Vec::new(),
            trailing: String::new(),
            text: text.to_string(),
            kind: BlockKind::Paragraph,
            token_estimate: estimate_tokens(text),
            context_before: String::new(),
            context_after: String::new(),
        }
    }

    fn translator(provider: MockProvider) -> (Arc<SegmentTranslator>, EventBus) {
        let mut config = Config::for_target(ProviderId::HostedChat, "sr");
        config.run.source_language = "en".to_string();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 20;
        let events = EventBus::new("test", 256);
        let translator = SegmentTranslator::new(
            &config,
            Arc::new(provider),
            WorkerPool::new(4, None, CancellationToken::new()),
            Arc::new(TranslationCache::in_memory()),
            events.clone(),
            StyleProfile::default(),
        );
        (Arc::new(translator), events)
    }

    fn chapter() -> ChapterContext {
        ChapterContext::new(0, GlossarySnapshot::default().view_for_chapter(0, 2), 500)
    }

    fn job(text: &str) -> SegmentJob {
        SegmentJob {
            segment: segment(text),
            previous_id: None,
        }
    }

    #[tokio::test]
    async fn test_translate_secondCall_shouldBeServedFromCache() {
        let provider = MockProvider::working();
        let (translator, _) = translator(provider.clone());
        let first = translator.translate(&job("Hello."), &chapter()).await;
        let second = translator.translate(&job("Hello."), &chapter()).await;

        let SegmentOutcome::Translated(first) = first else { panic!("expected translation") };
        let SegmentOutcome::Translated(second) = second else { panic!("expected translation") };
        assert_eq!(first.translation, "HELLO.");
        assert_eq!(first.source, ResultSource::Provider);
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_translate_transientFailures_shouldRetryAndCount() {
        let provider = MockProvider::fail_first(2, 503);
        let (translator, _) = translator(provider.clone());
        let SegmentOutcome::Translated(done) = translator.translate(&job("World."), &chapter()).await else {
            panic!("expected translation")
        };
        assert_eq!(done.translation, "WORLD.");
        assert_eq!(done.retries, 2);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_translate_refusedTwice_shouldFailAsRefused() {
        let provider = MockProvider::refusing();
        let (translator, _) = translator(provider.clone());
        let outcome = translator.translate(&job("Something dark."), &chapter()).await;
        assert!(matches!(
            outcome,
            SegmentOutcome::Failed { reason: UnresolvedReason::Refused, attempts: 2, .. }
        ));
        assert!(provider.requests()[1].is_rephrased());
    }

    #[tokio::test]
    async fn test_translate_overflow_shouldAskForResegmentation() {
        let provider = MockProvider::working().with_overflow_above(5);
        let (translator, _) = translator(provider);
        let outcome = translator.translate(&job("A much longer paragraph."), &chapter()).await;
        assert_eq!(outcome, SegmentOutcome::NeedsResegment { attempts: 1 });
    }

    #[tokio::test]
    async fn test_translate_authFailure_shouldBeFatal() {
        let provider = MockProvider::working()
            .with_responder(|_| Err(ProviderError::AuthenticationError("invalid key".to_string())));
        let (translator, _) = translator(provider);
        let outcome = translator.translate(&job("Hello."), &chapter()).await;
        assert!(matches!(outcome, SegmentOutcome::Fatal { kind: ErrorKind::AuthOrQuota, .. }));
    }

    #[tokio::test]
    async fn test_translate_echoedOutput_shouldEndMalformedAfterStrictPrompt() {
        let provider = MockProvider::echo();
        let (translator, _) = translator(provider.clone());
        let outcome = translator.translate(&job("He went home."), &chapter()).await;
        assert!(matches!(
            outcome,
            SegmentOutcome::Failed { reason: UnresolvedReason::Malformed, attempts: 5, .. }
        ));
        assert!(provider.requests().last().is_some_and(|r| r.strict));
    }

    #[tokio::test]
    async fn test_translate_namedEntities_shouldComeBackFromProviderAndCache() {
        let provider = MockProvider::working()
            .with_responder(|_| Ok(MockProvider::envelope("Ivan je došao.", &[("Иван", "Ivan")])));
        let (translator, _) = translator(provider.clone());
        let first = translator.translate(&job("Иван came."), &chapter()).await;
        let second = translator.translate(&job("Иван came."), &chapter()).await;

        let SegmentOutcome::Translated(first) = first else { panic!("expected translation") };
        let SegmentOutcome::Translated(second) = second else { panic!("expected translation") };
        assert_eq!(first.named_entities.get("Иван").map(String::as_str), Some("Ivan"));
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(second.named_entities, first.named_entities);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_translate_knownPreviousTranslation_shouldBecomeContext() {
        let provider = MockProvider::working();
        let (translator, _) = translator(provider.clone());
        let chapter = chapter();
        chapter.record_translation("prev", "PRETHODNI PASUS.");
        let job = SegmentJob {
            segment: segment("Next."),
            previous_id: Some("prev".to_string()),
        };
        translator.translate(&job, &chapter).await;
        let request = provider.requests().remove(0);
        assert_eq!(request.context_before.as_deref(), Some("PRETHODNI PASUS."));
    }

    #[tokio::test]
    async fn test_translate_cancelled_shouldNotCallProvider() {
        let provider = MockProvider::working();
        let (translator, _) = translator(provider.clone());
        translator.pool().cancel_token().cancel();
        let outcome = translator.translate(&job("Hello."), &chapter()).await;
        assert!(matches!(outcome, SegmentOutcome::Failed { reason: UnresolvedReason::Cancelled, .. }));
        assert_eq!(provider.calls(), 0);
    }
}
