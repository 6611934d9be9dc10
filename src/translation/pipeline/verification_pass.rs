/*!
 * Verification pass: checks the finished book and polishes failing blocks.
 *
 * Runs once after a completed run when `verification.enabled` is set. The
 * verifier scores the whole book. Blocks with untranslated text or stray
 * markup are then sent back to the provider with an editing prompt, up to
 * `verification.maxPolishedBlocks` of them. A polished block replaces the
 * old one only when it passes every check the old one failed; blocks left
 * for review are never polished since the report already lists them.
 */

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::language_utils::get_language_name;
use crate::providers::{GenerationParams, Provider};
use crate::translation::concurrency::WorkerPool;
use crate::translation::document::Document;
use crate::translation::prompts::{PolishPromptBuilder, parse_polish};
use crate::translation::quality::OutputValidator;
use crate::translation::quality::verifier::{FindingKind, Verification, Verifier};
use crate::translation::report::VerificationReport;
use crate::translation::retry::RetryPolicy;

use super::request::request_with_retry;

/// A block sent to the editor
struct PolishJob {
    chapter: usize,
    block: usize,
    source: String,
    current: String,
    problems: Vec<String>,
}

pub struct VerificationPass {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    verifier: Verifier,
}

impl VerificationPass {
    pub fn new(config: Arc<Config>, provider: Arc<dyn Provider>) -> Self {
        let verifier = Verifier::from_config(&config);
        Self {
            config,
            provider,
            verifier,
        }
    }

    /// Verify `translated` against `source`, polishing blocks in place
    ///
    /// Only cancellation is an error; a failed polish request leaves its
    /// block as it was.
    pub async fn run(
        &self,
        source: &Document,
        translated: &mut Document,
        cancel: &CancellationToken,
    ) -> Result<VerificationReport, TranslationError> {
        let settings = &self.config.verification;
        let before = self.verifier.verify(source, translated);
        info!(
            "Verification: score {:.3}, {} findings in {} blocks",
            before.score,
            before.findings.len(),
            before.blocks_checked
        );

        let mut polished_blocks = 0;
        let mut polish_rejected = 0;
        if settings.polish {
            let jobs = self.polish_jobs(source, translated, &before);
            if !jobs.is_empty() {
                info!("Polishing {} blocks", jobs.len());
            }
            let source_language = self.verifier.resolve_source(source.metadata.language.as_deref());
            for (job, answer) in self.polish_all(jobs, &source_language, cancel).await? {
                match answer {
                    Some(text) => {
                        translated.chapters[job.chapter].sections[job.block].text = text;
                        polished_blocks += 1;
                    }
                    None => polish_rejected += 1,
                }
            }
        }

        let result = if polished_blocks > 0 {
            self.verifier.verify(source, translated)
        } else {
            before.clone()
        };
        let valid = result.is_valid(settings.min_score);
        if valid {
            info!("Verification passed with score {:.3}", result.score);
        } else {
            warn!(
                "Verification score {:.3} is below {:.2} or text is left untranslated",
                result.score, settings.min_score
            );
        }

        Ok(VerificationReport {
            score_before: before.score,
            polished_blocks,
            polish_rejected,
            valid,
            result,
        })
    }

    fn polish_jobs(
        &self,
        source: &Document,
        translated: &Document,
        verification: &Verification,
    ) -> Vec<PolishJob> {
        let limit = self.config.verification.max_polished_blocks;
        let blocks = verification.polishable_blocks();
        if blocks.len() > limit {
            warn!("{} blocks need polishing, only the first {} are sent", blocks.len(), limit);
        }

        blocks
            .into_iter()
            .take(limit)
            .filter_map(|(chapter_id, block)| {
                let chapter = translated.chapters.iter().position(|c| c.id == chapter_id)?;
                let problems = verification
                    .findings_for(&chapter_id, block)
                    .into_iter()
                    .map(|f| match f.kind {
                        FindingKind::MarkupArtifact => format!("stray markup: {}", f.detail),
                        _ => f.detail.clone(),
                    })
                    .collect();
                Some(PolishJob {
                    chapter,
                    block,
                    source: source.chapters.get(chapter)?.sections.get(block)?.text.clone(),
                    current: translated.chapters[chapter].sections.get(block)?.text.clone(),
                    problems,
                })
            })
            .collect()
    }

    /// Send every job; `None` marks a block that keeps its text
    async fn polish_all(
        &self,
        jobs: Vec<PolishJob>,
        source_language: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<(PolishJob, Option<String>)>, TranslationError> {
        let provider_config = &self.config.provider;
        let pool = WorkerPool::new(provider_config.max_in_flight, provider_config.tokens_per_minute, cancel.clone());
        let policy = RetryPolicy::new(&self.config.retry, provider_config.temperature);
        let params = GenerationParams {
            temperature: provider_config.temperature,
            max_output_tokens: provider_config.max_output_tokens,
            timeout: provider_config.timeout(),
        };
        let builder = PolishPromptBuilder::new(
            &get_language_name(source_language),
            &get_language_name(&self.config.run.target_language),
        )
        .with_target_script(self.config.run.target_script);
        let validator = OutputValidator::new(
            source_language,
            &self.config.run.target_language,
            self.config.run.target_script,
        );

        let results: Vec<(PolishJob, Result<Option<String>, TranslationError>)> = stream::iter(jobs)
            .map(|job| {
                let (pool, policy, builder, validator) = (&pool, &policy, &builder, &validator);
                async move {
                    let prompt = builder.build(&job.source, &job.current, &job.problems);
                    let answer = request_with_retry(self.provider.as_ref(), pool, policy, &prompt, &params, |completion| {
                        Ok((!completion.refused).then(|| parse_polish(&completion.text).polished).flatten())
                    })
                    .await
                    .map(|polished| polished.and_then(|text| self.accept(validator, source_language, &job, &text)));
                    (job, answer)
                }
            })
            .buffer_unordered(provider_config.max_in_flight.max(1))
            .collect()
            .await;

        let mut accepted = Vec::with_capacity(results.len());
        for (job, answer) in results {
            match answer {
                Ok(answer) => accepted.push((job, answer)),
                Err(TranslationError::Cancelled) => return Err(TranslationError::Cancelled),
                Err(e) => {
                    warn!("Polishing block {} of chapter {} failed: {}", job.block, job.chapter, e);
                    accepted.push((job, None));
                }
            }
        }
        Ok(accepted)
    }

    /// The polished text, if it passes every check
    fn accept(&self, validator: &OutputValidator, source_language: &str, job: &PolishJob, text: &str) -> Option<String> {
        let text = match validator.validate(&job.source, text) {
            Ok(text) => text,
            Err(e) => {
                debug!("Rejected polished block {}: {}", job.block, e);
                return None;
            }
        };
        let remaining = self.verifier.check_block(source_language, &job.source, &text);
        if !remaining.is_empty() {
            debug!("Rejected polished block {}: {} problems left", job.block, remaining.len());
            return None;
        }
        Some(text)
    }
}
