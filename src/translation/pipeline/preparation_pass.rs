/*!
 * Preparation pass: a pre-scan of the book before bulk translation.
 *
 * Pass 1 sends a sample of chapters (first, middle, last and a seeded random
 * share of the rest) to the model and asks for a structured description of
 * the work. Pass 2 turns that description into a locked glossary seed, a
 * style profile and per-chapter segmentation hints. The resulting
 * `WorkPlan` is cached under the source hash, so a rerun of the same book
 * with the same model gets the same plan without another call.
 *
 * The analysis call goes through the same worker pool, call timeout and
 * retry policy as segment calls, so a passing transient failure does not
 * leave the run with an uncached heuristic plan.
 */

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::language_utils::get_language_name;
use crate::providers::{GenerationParams, Prompt, Provider};
use crate::translation::cache::{CacheKey, TranslationCache};
use crate::translation::concurrency::WorkerPool;
use crate::translation::context::{GlossaryEntry, StyleProfile, TermKind};
use crate::translation::document::{Chapter, Document};
use crate::translation::prompts::{AnalysisPromptBuilder, ContentAnalysis, Excerpt, parse_analysis};
use crate::translation::retry::RetryPolicy;
use crate::translation::segmenter::{SplitStrategy, estimate_tokens};

use super::request::request_with_retry;

/// Chapters with more blocks than this may be grouped
const GROUPING_MIN_BLOCKS: usize = 40;

/// Grouped chapters average fewer tokens per block than this
const GROUPING_MAX_AVG_TOKENS: usize = 25;

/// Segmentation hints for one chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget_override: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_strategy: Option<SplitStrategy>,
}

/// Output of the preparation pass, read-only afterwards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPlan {
    pub style_profile: StyleProfile,
    #[serde(default)]
    pub glossary_seed: Vec<GlossaryEntry>,
    #[serde(default)]
    pub per_chapter_hints: BTreeMap<String, ChapterHint>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Estimated source tokens of the whole book
    #[serde(default)]
    pub estimated_tokens: usize,
}

impl WorkPlan {
    /// Plan built from the document alone, without asking the model
    pub fn heuristic(document: &Document, config: &Config) -> Self {
        Self {
            style_profile: base_style(config),
            glossary_seed: Vec::new(),
            per_chapter_hints: chapter_hints(document),
            content_type: None,
            estimated_tokens: estimated_tokens(document),
        }
    }

    pub fn hint(&self, chapter_id: &str) -> ChapterHint {
        self.per_chapter_hints.get(chapter_id).cloned().unwrap_or_default()
    }
}

fn base_style(config: &Config) -> StyleProfile {
    StyleProfile {
        dialect_target: config.run.dialect_target.clone(),
        script_target: config.run.target_script,
        ..StyleProfile::default()
    }
}

fn estimated_tokens(document: &Document) -> usize {
    document
        .blocks()
        .filter(|b| b.needs_translation())
        .map(|b| estimate_tokens(&b.text))
        .sum()
}

/// Grouped segmentation for chapters made of many short blocks
fn chapter_hints(document: &Document) -> BTreeMap<String, ChapterHint> {
    let mut hints = BTreeMap::new();
    for chapter in &document.chapters {
        let tokens: Vec<usize> = chapter
            .sections
            .iter()
            .filter(|s| s.needs_translation())
            .map(|s| estimate_tokens(&s.text))
            .collect();
        if tokens.len() <= GROUPING_MIN_BLOCKS {
            continue;
        }
        let average = tokens.iter().sum::<usize>() / tokens.len();
        if average < GROUPING_MAX_AVG_TOKENS {
            debug!("Chapter {} has {} short blocks, grouping them", chapter.id, tokens.len());
            hints.insert(
                chapter.id.clone(),
                ChapterHint {
                    token_budget_override: None,
                    split_strategy: Some(SplitStrategy::Grouped),
                },
            );
        }
    }
    hints
}

fn term_kind(kind: Option<&str>) -> TermKind {
    match kind.map(|k| k.trim().to_lowercase()).as_deref() {
        Some("place") | Some("location") => TermKind::Place,
        Some("object") | Some("item") => TermKind::Object,
        Some("idiom") | Some("phrase") => TermKind::Idiom,
        Some("untranslatable") => TermKind::Untranslatable,
        _ => TermKind::Person,
    }
}

/// Pass 2: consolidate the analysis into a style profile and a glossary seed
pub fn consolidate(analysis: &ContentAnalysis, document: &Document, config: &Config) -> WorkPlan {
    let mut style = base_style(config);
    if let Some(genre) = analysis.genre.as_deref().filter(|g| !g.trim().is_empty()) {
        style.genre = genre.trim().to_string();
    }
    if let Some(register) = analysis.register.as_deref().filter(|r| !r.trim().is_empty()) {
        style.register = register.trim().to_lowercase();
    }
    style.tone = analysis.tone.clone().filter(|t| !t.trim().is_empty());
    style.audience = analysis.target_audience.clone().filter(|a| !a.trim().is_empty());

    let mut seen = HashSet::new();
    let mut seed = Vec::new();
    let mut add = |entry: GlossaryEntry| {
        if !entry.source_term.is_empty() && !entry.target_term.is_empty() && seen.insert(entry.source_term.to_lowercase()) {
            seed.push(entry);
        }
    };

    for character in &analysis.characters {
        if let Some(target) = &character.target_name {
            let mut entry = GlossaryEntry::new(&character.name, target, TermKind::Person);
            if let Some(register) = &character.speech_register {
                entry = entry.with_notes(&format!("speaks {}", register));
            }
            add(entry);
        }
    }
    for term in &analysis.untranslatable_terms {
        let target = term.transliteration.as_deref().unwrap_or(&term.term);
        let mut entry = GlossaryEntry::new(&term.term, target, TermKind::Untranslatable);
        if let Some(reason) = &term.reason {
            entry = entry.with_notes(reason);
        }
        add(entry);
    }
    for term in &analysis.terms {
        add(GlossaryEntry::new(&term.source, &term.target, term_kind(term.kind.as_deref())));
    }

    WorkPlan {
        style_profile: style,
        glossary_seed: seed,
        per_chapter_hints: chapter_hints(document),
        content_type: analysis.content_type.clone(),
        estimated_tokens: estimated_tokens(document),
    }
}

/// Runs the pre-scan
pub struct PreparationPass {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    cache: Arc<TranslationCache>,
}

impl PreparationPass {
    pub fn new(config: Arc<Config>, provider: Arc<dyn Provider>, cache: Arc<TranslationCache>) -> Self {
        Self { config, provider, cache }
    }

    /// Indices of the sampled chapters, in reading order
    ///
    /// First, middle and last chapter, plus `sample_ratio` of the others
    /// drawn with a generator seeded from the source hash, capped at
    /// `sample_cap`.
    pub fn sample_chapters(&self, document: &Document) -> Vec<usize> {
        let candidates: Vec<usize> = document
            .chapters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.translatable_count() > 0)
            .map(|(i, _)| i)
            .collect();
        let cap = self.config.preparation.sample_cap.max(1);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut picked: Vec<usize> = Vec::new();
        for position in [0, candidates.len() / 2, candidates.len() - 1] {
            if !picked.contains(&candidates[position]) {
                picked.push(candidates[position]);
            }
        }
        picked.truncate(cap);

        let rest: Vec<usize> = candidates.iter().copied().filter(|c| !picked.contains(c)).collect();
        let wanted = ((rest.len() as f64) * self.config.preparation.sample_ratio).ceil() as usize;
        let wanted = wanted.min(cap.saturating_sub(picked.len())).min(rest.len());
        if wanted > 0 {
            let mut rng = StdRng::seed_from_u64(seed_from(&document.source_hash()));
            picked.extend(sample(&mut rng, rest.len(), wanted).into_iter().map(|i| rest[i]));
        }
        picked.sort_unstable();
        picked
    }

    /// Plan cache key: source, model and every run option the plan depends on
    pub fn plan_key(&self, document: &Document) -> CacheKey {
        let run = &self.config.run;
        let mut hasher = Sha256::new();
        let parts = [
            "plan".to_string(),
            document.source_hash(),
            self.provider.model().to_string(),
            run.prompt_version.to_string(),
            run.target_language.to_lowercase(),
            run.target_script.map(|s| s.to_string()).unwrap_or_default(),
            run.dialect_target.clone().unwrap_or_default(),
        ];
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        CacheKey::from_raw(&format!("{:x}", hasher.finalize()))
    }

    fn excerpts(&self, document: &Document, indices: &[usize]) -> Vec<Excerpt> {
        let limit = self.config.preparation.excerpt_chars;
        indices
            .iter()
            .filter_map(|&i| document.chapters.get(i))
            .map(|chapter| Excerpt {
                title: chapter.title.clone(),
                text: excerpt_text(chapter, limit),
            })
            .collect()
    }

    /// Build the work plan
    ///
    /// Fatal provider errors abort; any other failure falls back to the
    /// heuristic plan, which is not cached.
    pub async fn run(&self, document: &Document, cancel: &CancellationToken) -> Result<WorkPlan, TranslationError> {
        if !self.config.preparation.enabled {
            debug!("Preparation pass disabled, using heuristic plan");
            return Ok(WorkPlan::heuristic(document, &self.config));
        }

        let key = self.plan_key(document);
        if let Some(value) = self.cache.get_plan(&key) {
            match serde_json::from_value::<WorkPlan>(value) {
                Ok(plan) => {
                    info!("Reusing cached work plan ({} glossary entries)", plan.glossary_seed.len());
                    return Ok(plan);
                }
                Err(e) => warn!("Ignoring unreadable cached work plan: {}", e),
            }
        }

        let sampled = self.sample_chapters(document);
        if sampled.is_empty() {
            return Ok(WorkPlan::heuristic(document, &self.config));
        }
        info!("Preparation pass: analysing {} of {} chapters", sampled.len(), document.chapters.len());

        let prompt = AnalysisPromptBuilder::new(
            &get_language_name(&self.config.run.source_language),
            &get_language_name(&self.config.run.target_language),
        )
        .build(&self.excerpts(document, &sampled));
        let params = GenerationParams {
            // deterministic answers for a given source
            temperature: 0.0,
            max_output_tokens: self.config.provider.max_output_tokens,
            timeout: self.config.provider.timeout(),
        };

        let analysis = match self.analyse(&prompt, &params, cancel).await {
            Ok(analysis) => analysis,
            Err(TranslationError::Cancelled) => return Err(TranslationError::Cancelled),
            Err(e) if e.kind().is_fatal() => return Err(e),
            Err(e) => {
                warn!("Preparation pass failed ({}), continuing with a heuristic plan", e);
                return Ok(WorkPlan::heuristic(document, &self.config));
            }
        };

        let plan = consolidate(&analysis, document, &self.config);
        info!(
            "Work plan: {} ({}), {} glossary entries, ~{} tokens",
            plan.content_type.as_deref().unwrap_or("unknown content"),
            plan.style_profile.genre,
            plan.glossary_seed.len(),
            plan.estimated_tokens
        );
        match serde_json::to_value(&plan) {
            Ok(value) => self.cache.put_plan(&key, value),
            Err(e) => warn!("Could not cache the work plan: {}", e),
        }
        Ok(plan)
    }
}

impl PreparationPass {
    /// One analysis call under the pool, the call timeout and the retry policy
    ///
    /// Only transient failures are retried; a refusal or an unreadable
    /// answer is final since the call already runs at temperature zero.
    async fn analyse(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<ContentAnalysis, TranslationError> {
        let provider_config = &self.config.provider;
        let pool = WorkerPool::new(provider_config.max_in_flight, provider_config.tokens_per_minute, cancel.clone());
        let policy = RetryPolicy::new(&self.config.retry, params.temperature);
        request_with_retry(self.provider.as_ref(), &pool, &policy, prompt, params, |completion| {
            parse_analysis(&completion.text)
        })
        .await
    }
}

fn seed_from(hash: &str) -> u64 {
    u64::from_str_radix(hash.get(..16).unwrap_or("0"), 16).unwrap_or(0)
}

fn excerpt_text(chapter: &Chapter, limit: usize) -> String {
    let mut text = String::new();
    for section in chapter.sections.iter().filter(|s| s.needs_translation()) {
        if text.chars().count() >= limit {
            break;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&section.text);
    }
    text.chars().take(limit).collect()
}
