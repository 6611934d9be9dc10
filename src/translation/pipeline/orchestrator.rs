/*!
 * Run orchestrator.
 *
 * A run walks the chapters in order with at most `maxChaptersInFlight`
 * chapters open at once. Inside a chapter every segment is dispatched
 * immediately and the worker pool decides how many reach the provider.
 * Results land in the chapter's slots as they arrive. Once a chapter has no
 * pending slot it waits for the chapters before it; chapters are closed in
 * reading order, which runs the glossary pass and the finalizer. A chapter
 * is closed before the chapter `window` places after it is started.
 *
 * A fatal provider error cancels the run token: chapters that have not
 * started are passed through, and unresolved segments keep their source.
 */

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::language_utils::language_codes_match;
use crate::providers::Provider;
use crate::translation::cache::TranslationCache;
use crate::translation::concurrency::WorkerPool;
use crate::translation::context::GlossaryMemory;
use crate::translation::document::{Chapter, Document};
use crate::translation::events::{EventBus, EventKind};
use crate::translation::quality::transliterate;
use crate::translation::report::{
    ReportCollector, RunReport, RunStatus, SegmentStatus, TranslationResult, UnresolvedReason, UnresolvedSegment,
};
use crate::translation::segmenter::{Segment, Segmenter, budget_for, segment_id};

use super::finalizer::{ChapterFinalizer, ChapterSlots, SlotText};
use super::glossary_pass::GlossaryPass;
use super::preparation_pass::WorkPlan;
use super::translation_pass::{
    ChapterContext, ResultSource, SegmentJob, SegmentOutcome, SegmentTranslator, TranslatedSegment,
};

/// Errors kept for the `runFailed` event
const MAX_REPORTED_ERRORS: usize = 10;

/// Translated document plus its report
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub document: Document,
    pub report: RunReport,
    /// Fatal errors, oldest first
    pub errors: Vec<String>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.report.status
    }
}

/// Everything a single run shares between its chapters
struct RunState<'a> {
    plan: &'a WorkPlan,
    translator: Arc<SegmentTranslator>,
    glossary: GlossaryMemory,
    names: GlossaryPass,
    segmenter: Segmenter,
    collector: ReportCollector,
    finalizer: ChapterFinalizer,
    run_token: CancellationToken,
    errors: Mutex<Vec<String>>,
    window: usize,
    default_budget: usize,
}

/// A chapter whose slots are all resolved, waiting to be closed in order
struct OpenChapter<'c> {
    ordinal: usize,
    chapter: &'c Chapter,
    /// `None` when the chapter never started
    slots: Option<ChapterSlots>,
    interrupted: bool,
}

/// A finished segment job
struct JobDone {
    slot: usize,
    job: SegmentJob,
    outcome: SegmentOutcome,
    elapsed: Duration,
}

fn start_job(
    translator: Arc<SegmentTranslator>,
    context: ChapterContext,
    slot: usize,
    job: SegmentJob,
) -> impl Future<Output = JobDone> {
    async move {
        let started = Instant::now();
        let outcome = translator.translate(&job, &context).await;
        JobDone {
            slot,
            job,
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

/// Drives one document through the translation pass
pub struct TranslationPipeline {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    cache: Arc<TranslationCache>,
    events: EventBus,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TranslationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationPipeline")
            .field("provider", &self.provider.id())
            .field("model", &self.provider.model())
            .field("run_id", &self.events.run_id())
            .finish()
    }
}

impl TranslationPipeline {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        cache: Arc<TranslationCache>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            provider,
            cache,
            events,
            cancel,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Token that stops the run when cancelled
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Translate `document` following `plan`
    pub async fn run(&self, document: &Document, plan: &WorkPlan) -> Result<RunOutcome, TranslationError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let capabilities = self.provider.capabilities();
        let provider_config = &self.config.provider;

        let glossary = GlossaryMemory::spawn(self.events.clone());
        let seeded = glossary.seed(plan.glossary_seed.clone()).await?;
        debug!("Glossary seeded with {} entries", seeded);

        let run_token = self.cancel.child_token();
        let max_in_flight = provider_config
            .max_in_flight
            .min(capabilities.concurrent_request_limit)
            .max(1);
        let pool = WorkerPool::new(max_in_flight, provider_config.tokens_per_minute, run_token.clone());
        let translator = Arc::new(SegmentTranslator::new(
            &self.config,
            Arc::clone(&self.provider),
            pool,
            Arc::clone(&self.cache),
            self.events.clone(),
            plan.style_profile.clone(),
        ));

        let max_context = provider_config
            .max_context_tokens
            .unwrap_or(capabilities.max_context_tokens);
        let state = RunState {
            plan,
            translator,
            names: GlossaryPass::new(glossary.clone()),
            glossary,
            segmenter: Segmenter::new(self.config.run.context_chars),
            collector: ReportCollector::new(),
            finalizer: ChapterFinalizer::new(&self.config.run.review_marker),
            run_token,
            errors: Mutex::new(Vec::new()),
            window: self.config.run.max_chapters_in_flight.max(1),
            default_budget: budget_for(max_context, provider_config.max_output_tokens),
        };

        info!(
            "Translating {} chapters with {} ({}), {} requests and {} chapters in flight",
            document.chapters.len(),
            self.provider.id(),
            self.provider.model(),
            max_in_flight,
            state.window
        );
        self.events.publish(EventKind::RunStarted {
            chapters: document.chapters.len(),
            provider_id: self.provider.id().to_string(),
            model: self.provider.model().to_string(),
        });

        // buffered yields in chapter order and starts a chapter only when
        // the one `window` places before it has been taken out and closed
        let mut open = pin!(
            stream::iter(document.chapters.iter().enumerate())
                .map(|(ordinal, chapter)| self.run_chapter(&state, ordinal, chapter))
                .buffered(state.window)
        );
        let mut chapters: Vec<Chapter> = Vec::with_capacity(document.chapters.len());
        while let Some(finished) = open.next().await {
            chapters.push(self.close_chapter(&state, finished).await);
        }

        state.collector.update(|stats| {
            stats.chapters = document.chapters.len();
            stats.segmenter_calls = state.segmenter.calls();
        });
        self.cache.flush().await;

        let mut translated = Document {
            metadata: document.metadata.clone(),
            chapters,
        };
        translated.metadata.language = Some(self.config.run.target_language.clone());
        translated.metadata.script = self.config.run.target_script.map(|s| s.iso_code().to_string());
        self.convert_output_script(&mut translated);

        let errors = state.errors.lock().clone();
        let status = if !errors.is_empty() {
            RunStatus::Failed
        } else if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let chapter_order: Vec<String> = document.chapters.iter().map(|c| c.id.clone()).collect();
        let report = state
            .collector
            .finish(self.events.run_id(), status, started_at, &chapter_order);

        match status {
            RunStatus::Failed => {
                let skip = errors.len().saturating_sub(MAX_REPORTED_ERRORS);
                self.events.publish(EventKind::RunFailed {
                    errors: errors[skip..].to_vec(),
                });
                error!("Run failed: {}", errors.join("; "));
            }
            _ => {
                self.events.publish(EventKind::RunCompleted {
                    status,
                    segments: report.stats.segments,
                    cache_hits: report.stats.cache_hits + report.stats.shared_waits,
                    flagged: report.stats.review_flagged,
                });
                info!("Run {:?}: {}", status, report.stats.summary(started.elapsed()));
            }
        }

        Ok(RunOutcome {
            document: translated,
            report,
            errors,
        })
    }

    /// Whole-document Serbian script conversion
    fn convert_output_script(&self, document: &mut Document) {
        let run = &self.config.run;
        let Some(script) = run.target_script else { return };
        if !run.convert_output_script || !language_codes_match(&run.target_language, "sr") {
            return;
        }
        for section in document.chapters.iter_mut().flat_map(|c| c.sections.iter_mut()) {
            if section.needs_translation() {
                section.text = transliterate(&section.text, script);
            }
        }
    }

    async fn run_chapter<'c>(&self, state: &RunState<'_>, ordinal: usize, chapter: &'c Chapter) -> OpenChapter<'c> {
        if state.run_token.is_cancelled() {
            self.skip_chapter(state, chapter);
            return OpenChapter {
                ordinal,
                chapter,
                slots: None,
                interrupted: true,
            };
        }

        let hint = state.plan.hint(&chapter.id);
        let budget = hint.token_budget_override.unwrap_or(state.default_budget);
        let strategy = hint.split_strategy.unwrap_or_default();
        let view = state.glossary.snapshot().view_for_chapter(ordinal, state.window);
        let context = ChapterContext::new(ordinal, view, budget);

        let segments = state.segmenter.segment(chapter, budget, strategy);
        debug!(
            "Chapter {} ({}): {} segments, budget {}, {:?}",
            ordinal,
            chapter.id,
            segments.len(),
            budget,
            strategy
        );
        self.events.publish(EventKind::ChapterStarted {
            chapter_id: chapter.id.clone(),
            ordinal,
            segments: segments.len(),
        });

        let (mut slots, ids) = ChapterSlots::new(segments);
        let mut running = FuturesUnordered::new();
        let mut previous: Option<String> = None;
        for slot in ids {
            let Some(segment) = slots.segment(slot).cloned() else { continue };
            let previous_id = previous.replace(segment.segment_id.clone());
            running.push(start_job(
                Arc::clone(&state.translator),
                context.clone(),
                slot,
                SegmentJob { segment, previous_id },
            ));
        }

        let mut interrupted = false;
        while let Some(done) = running.next().await {
            let JobDone {
                slot,
                job,
                outcome,
                elapsed,
            } = done;
            let segment = &job.segment;

            match outcome {
                SegmentOutcome::Translated(translated) => {
                    self.accept(state, segment, &translated, elapsed);
                    slots.resolve(slot, SlotText::Translated(translated.translation));
                    slots.set_entities(slot, translated.named_entities);
                }
                SegmentOutcome::NeedsResegment { attempts } => match state.segmenter.resegment(segment, budget) {
                    Some(children) => {
                        debug!("Segment {} split into {} parts", segment.segment_id, children.len());
                        state.collector.update(|stats| stats.resegmented += 1);
                        let mut previous = job.previous_id.clone();
                        for child in slots.split(slot, children) {
                            let Some(child_segment) = slots.segment(child).cloned() else { continue };
                            let previous_id = previous.replace(child_segment.segment_id.clone());
                            running.push(start_job(
                                Arc::clone(&state.translator),
                                context.clone(),
                                child,
                                SegmentJob {
                                    segment: child_segment,
                                    previous_id,
                                },
                            ));
                        }
                    }
                    None => {
                        let message = "segment exceeds the model window and cannot be split further".to_string();
                        self.flag(state, segment, UnresolvedReason::ContextOverflow, attempts, message, elapsed);
                        slots.resolve(slot, SlotText::Flagged);
                    }
                },
                SegmentOutcome::Failed {
                    reason: UnresolvedReason::Cancelled,
                    attempts,
                    ..
                } => {
                    interrupted = true;
                    self.cancel_segment(state, segment, attempts, elapsed);
                    slots.resolve(slot, SlotText::Cancelled);
                }
                SegmentOutcome::Failed {
                    reason,
                    attempts,
                    message,
                } => {
                    self.flag(state, segment, reason, attempts, message, elapsed);
                    slots.resolve(slot, SlotText::Flagged);
                }
                SegmentOutcome::Fatal { kind, message } => {
                    error!("Fatal {:?} error on segment {}: {}", kind, segment.segment_id, message);
                    state.errors.lock().push(message);
                    state.run_token.cancel();
                    interrupted = true;
                    self.cancel_segment(state, segment, 0, elapsed);
                    slots.resolve(slot, SlotText::Cancelled);
                }
            }
        }

        OpenChapter {
            ordinal,
            chapter,
            slots: Some(slots),
            interrupted,
        }
    }

    /// Harvest names and rebuild the chapter; called in reading order
    async fn close_chapter(&self, state: &RunState<'_>, open: OpenChapter<'_>) -> Chapter {
        let OpenChapter {
            ordinal,
            chapter,
            slots,
            interrupted,
        } = open;
        let Some(mut slots) = slots else {
            return chapter.passthrough();
        };

        if let Err(e) = state.names.harvest(ordinal, &mut slots).await {
            warn!("Glossary pass stopped on chapter {}: {}", chapter.id, e);
        }
        let finalized = state.finalizer.finalize(chapter, &slots);
        state.collector.update(|stats| {
            stats.flagged_blocks += finalized.flagged;
            if !interrupted {
                stats.chapters_completed += 1;
            }
        });
        self.events.publish(EventKind::ChapterCompleted {
            chapter_id: chapter.id.clone(),
            ordinal,
            flagged: finalized.flagged,
        });
        finalized.chapter
    }

    /// List every translatable block of a chapter that never started
    fn skip_chapter(&self, state: &RunState<'_>, chapter: &Chapter) {
        debug!("Chapter {} not started, passing it through", chapter.id);
        for (index, section) in chapter.sections.iter().enumerate() {
            if !section.needs_translation() {
                continue;
            }
            state.collector.record_unresolved(UnresolvedSegment {
                segment_id: segment_id(&chapter.id, index, &[], &section.text),
                chapter_id: chapter.id.clone(),
                block_index: index,
                reason: UnresolvedReason::Cancelled,
                attempts: 0,
                message: Some("chapter not started".to_string()),
            });
        }
    }

    fn accept(&self, state: &RunState<'_>, segment: &Segment, translated: &TranslatedSegment, elapsed: Duration) {
        let status = match translated.source {
            ResultSource::Provider => SegmentStatus::Succeeded,
            ResultSource::Cache | ResultSource::Shared => SegmentStatus::Cached,
        };
        state.collector.update(|stats| match translated.source {
            ResultSource::Provider => stats.cache_misses += 1,
            ResultSource::Cache => stats.cache_hits += 1,
            ResultSource::Shared => stats.shared_waits += 1,
        });
        self.record(
            state,
            segment,
            TranslationResult {
                segment_id: segment.segment_id.clone(),
                chapter_id: segment.chapter_id.clone(),
                block_index: segment.block_index,
                translation: translated.translation.clone(),
                provider_id: self.provider.id().to_string(),
                model: self.provider.model().to_string(),
                tokens_in: translated.tokens_in,
                tokens_out: translated.tokens_out,
                retries: translated.retries,
                duration_ms: elapsed.as_millis() as u64,
                status,
            },
        );
    }

    /// The slot gets the review-marked source and the report lists the segment
    fn flag(
        &self,
        state: &RunState<'_>,
        segment: &Segment,
        reason: UnresolvedReason,
        attempts: u32,
        message: String,
        elapsed: Duration,
    ) {
        warn!(
            "Segment {} flagged for review after {} attempts ({:?}): {}",
            segment.segment_id, attempts, reason, message
        );
        if reason == UnresolvedReason::Refused {
            state
                .collector
                .warn(format!("Provider refused segment {} in chapter {}", segment.segment_id, segment.chapter_id));
        }
        state.collector.update(|stats| stats.cache_misses += 1);
        self.record(
            state,
            segment,
            TranslationResult {
                segment_id: segment.segment_id.clone(),
                chapter_id: segment.chapter_id.clone(),
                block_index: segment.block_index,
                translation: format!("{} {}", self.config.run.review_marker, segment.text),
                provider_id: self.provider.id().to_string(),
                model: self.provider.model().to_string(),
                tokens_in: 0,
                tokens_out: 0,
                retries: attempts.saturating_sub(1),
                duration_ms: elapsed.as_millis() as u64,
                status: SegmentStatus::Flagged,
            },
        );
        state.collector.record_unresolved(UnresolvedSegment {
            segment_id: segment.segment_id.clone(),
            chapter_id: segment.chapter_id.clone(),
            block_index: segment.block_index,
            reason,
            attempts,
            message: Some(message),
        });
    }

    fn cancel_segment(&self, state: &RunState<'_>, segment: &Segment, attempts: u32, elapsed: Duration) {
        self.record(
            state,
            segment,
            TranslationResult {
                segment_id: segment.segment_id.clone(),
                chapter_id: segment.chapter_id.clone(),
                block_index: segment.block_index,
                translation: segment.text.clone(),
                provider_id: self.provider.id().to_string(),
                model: self.provider.model().to_string(),
                tokens_in: 0,
                tokens_out: 0,
                retries: attempts.saturating_sub(1),
                duration_ms: elapsed.as_millis() as u64,
                status: SegmentStatus::Cancelled,
            },
        );
        state.collector.record_unresolved(UnresolvedSegment {
            segment_id: segment.segment_id.clone(),
            chapter_id: segment.chapter_id.clone(),
            block_index: segment.block_index,
            reason: UnresolvedReason::Cancelled,
            attempts,
            message: None,
        });
    }

    fn record(&self, state: &RunState<'_>, segment: &Segment, result: TranslationResult) {
        self.events.publish(EventKind::SegmentCompleted {
            chapter_id: segment.chapter_id.clone(),
            segment_id: segment.segment_id.clone(),
            block_index: segment.block_index,
            status: result.status,
            retries: result.retries,
            duration_ms: result.duration_ms,
        });
        state.collector.record_result(result);
    }
}
