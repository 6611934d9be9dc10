/*!
 * Properties that must hold for any document, checked over seeded random inputs
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use litwai::providers::mock::MockProvider;
use litwai::translation::concurrency::WorkerPool;
use litwai::translation::context::{GlossaryMemory, GlossarySnapshot, ProposalContext, StyleProfile, TermKind};
use litwai::translation::document::{BlockKind, Chapter, Document, Section};
use litwai::translation::pipeline::{ChapterContext, ResultSource, SegmentJob, SegmentOutcome, SegmentTranslator};
use litwai::translation::report::{SegmentStatus, UnresolvedReason};
use litwai::translation::segmenter::{Segmenter, SplitStrategy, estimate_tokens};
use litwai::translation::{EventBus, RunStatus, TranslationCache};

use crate::common::{self, chapter, document};

const WORDS: &[&str] = &[
    "river", "lantern", "quiet", "old", "harbour", "winter", "letter", "stone", "bridge", "morning", "she",
    "walked", "toward", "the", "gate", "and", "waited", "silver", "crow", "field",
];

fn sentence(rng: &mut StdRng, min_words: usize, max_words: usize) -> String {
    let count = rng.random_range(min_words..=max_words);
    let mut words: Vec<String> = (0..count)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())].to_string())
        .collect();
    let first = words[0].clone();
    let mut chars = first.chars();
    if let Some(c) = chars.next() {
        words[0] = c.to_uppercase().chain(chars).collect();
    }
    format!("{}.", words.join(" "))
}

fn random_section(rng: &mut StdRng) -> Section {
    match rng.random_range(0..10) {
        0 => Section::heading(sentence(rng, 1, 3)),
        1 => Section::new(BlockKind::Code, "fn main() { println!(\"x\"); }"),
        2 => Section::new(BlockKind::Passthrough, "* * *"),
        3 => Section::paragraph(format!("{}", rng.random_range(1000..9999))),
        4 => Section::new(BlockKind::Verse, sentence(rng, 3, 6)),
        5 => Section::new(BlockKind::ImageAlt, "A drawing of the harbour"),
        _ => {
            let sentences = rng.random_range(1..4);
            let text: Vec<String> = (0..sentences).map(|_| sentence(rng, 3, 10)).collect();
            Section::paragraph(text.join(" "))
        }
    }
}

fn random_document(seed: u64) -> Document {
    let mut rng = StdRng::seed_from_u64(seed);
    let chapters = rng.random_range(1..4);
    let chapters = (0..chapters)
        .map(|c| {
            let blocks = rng.random_range(1..=12);
            let sections = (0..blocks).map(|_| random_section(&mut rng)).collect();
            Chapter::new(format!("ch-{:03}", c + 1), format!("Chapter {}", c + 1), sections)
        })
        .collect();
    common::document(chapters)
}

#[tokio::test]
async fn test_run_randomDocuments_shouldPreserveStructureAndPassthroughBlocks() {
    let config = common::test_config();
    for seed in 0..8u64 {
        let source = random_document(seed);
        let provider = MockProvider::working();

        let outcome = common::translate(&config, &provider, &source).await;

        assert_eq!(outcome.status(), RunStatus::Completed, "seed {}", seed);
        assert_eq!(outcome.document.structure(), source.structure(), "seed {}", seed);
        assert_eq!(outcome.document.block_count(), source.block_count());
        for (original, translated) in source.blocks().zip(outcome.document.blocks()) {
            assert_eq!(original.kind, translated.kind);
            if original.needs_translation() {
                assert_eq!(translated.text, original.text.to_uppercase(), "seed {}", seed);
            } else {
                assert_eq!(translated.text, original.text, "seed {}", seed);
            }
        }
    }
}

#[tokio::test]
async fn test_run_twiceWithSharedCache_shouldReplayWithoutProviderCalls() {
    let config = common::test_config();
    let cache = Arc::new(TranslationCache::in_memory());
    let source = random_document(42);

    let first_provider = MockProvider::working();
    let first = common::translate_with_cache(&config, &first_provider, &source, cache.clone()).await;
    let second_provider = MockProvider::working();
    let second = common::translate_with_cache(&config, &second_provider, &source, cache.clone()).await;

    assert!(first_provider.calls() > 0);
    assert_eq!(second_provider.calls(), 0);
    assert_eq!(first.document, second.document);
    assert_eq!(second.report.stats.cache_hits, second.report.stats.segments);
    assert!(second.report.results.iter().all(|r| r.status == SegmentStatus::Cached));
}

#[tokio::test]
async fn test_translate_identicalConcurrentJobs_shouldCallProviderOnce() {
    let config = common::test_config();
    let provider = MockProvider::working().with_delay(Duration::from_millis(50));
    let events = EventBus::new("run-test", 256);
    let cancel = CancellationToken::new();
    let view = GlossarySnapshot::default().view_for_chapter(0, 1);
    let translator = Arc::new(SegmentTranslator::new(
        &config,
        Arc::new(provider.clone()),
        WorkerPool::new(8, None, cancel),
        Arc::new(TranslationCache::in_memory()),
        events,
        StyleProfile::default(),
    ));
    let source = chapter("ch-001", &["The lantern swung in the wind."]);
    let segment = Segmenter::new(0).segment(&source, 500, SplitStrategy::PerBlock).remove(0);
    let job = SegmentJob { segment, previous_id: None };
    let context = ChapterContext::new(0, view, 500);

    let outcomes = join_all((0..6).map(|_| {
        let translator = translator.clone();
        let job = job.clone();
        let context = context.clone();
        async move { translator.translate(&job, &context).await }
    }))
    .await;

    assert_eq!(provider.calls(), 1);
    let mut sources = Vec::new();
    for outcome in outcomes {
        let SegmentOutcome::Translated(done) = outcome else {
            panic!("expected a translation, got {:?}", outcome)
        };
        assert_eq!(done.translation, "THE LANTERN SWUNG IN THE WIND.");
        sources.push(done.source);
    }
    assert_eq!(sources.iter().filter(|s| **s == ResultSource::Provider).count(), 1);
    assert!(sources.iter().all(|s| *s != ResultSource::Cache));
}

#[tokio::test]
async fn test_run_manySegments_shouldRespectMaxInFlight() {
    let mut config = common::test_config();
    config.provider.max_in_flight = 2;
    config.run.max_chapters_in_flight = 3;
    let provider = MockProvider::working().with_delay(Duration::from_millis(20));
    let paragraphs: Vec<String> = (0..10).map(|i| format!("Paragraph number {} of the chapter.", i)).collect();
    let refs: Vec<&str> = paragraphs.iter().map(String::as_str).collect();
    let source = document(vec![chapter("ch-001", &refs), chapter("ch-002", &refs[..5]), chapter("ch-003", &refs[5..])]);

    let outcome = common::translate(&config, &provider, &source).await;

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert!(provider.max_in_flight() <= 2);
    assert!(provider.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_run_failingProvider_shouldStopAtMaxAttempts() {
    let config = common::test_config();
    let provider = MockProvider::failing();
    let source = document(vec![chapter("ch-001", &["The gate was shut.", "Nobody answered."])]);

    let outcome = common::translate(&config, &provider, &source).await;

    let max_attempts = config.retry.max_attempts;
    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(outcome.report.unresolved.len(), 2);
    assert!(outcome.report.unresolved.iter().all(|u| u.reason == UnresolvedReason::RetriesExhausted));
    assert!(outcome.report.unresolved.iter().all(|u| u.attempts <= max_attempts));
    assert!(provider.calls() <= 2 * max_attempts as usize);
    assert_eq!(outcome.document.chapters[0].sections[0].text, "[REVIEW] The gate was shut.");
}

#[tokio::test]
async fn test_glossary_randomProposals_shouldOnlyGrow() {
    let mut rng = StdRng::seed_from_u64(7);
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 1024));
    let terms = ["Марко", "Ана", "Ниш", "Сава", "Петар", "Јелена"];
    let mut first_seen: HashMap<String, String> = HashMap::new();
    let mut last_len = 0;

    for round in 0..60 {
        let term = terms[rng.random_range(0..terms.len())];
        let candidate = format!("{}-{}", WORDS[rng.random_range(0..WORDS.len())], rng.random_range(0..3));
        let context = ProposalContext {
            segment_id: format!("seg-{}", round),
            chapter_ordinal: round / 10,
            kind: TermKind::Person,
        };
        glossary.propose(term, &candidate, context).await.unwrap();
        first_seen.entry(term.to_string()).or_insert(candidate);

        let snapshot = glossary.snapshot();
        assert!(snapshot.len() >= last_len);
        last_len = snapshot.len();
        for (source, target) in &first_seen {
            assert_eq!(&snapshot.lookup(source).unwrap().target_term, target);
        }
    }
    assert_eq!(last_len, first_seen.len());
}

#[test]
fn test_resegment_randomParagraphs_shouldShrinkAndCoverTheParent() {
    let mut rng = StdRng::seed_from_u64(11);
    let segmenter = Segmenter::new(20);
    for _ in 0..40 {
        let sentences = rng.random_range(1..5);
        let text: Vec<String> = (0..sentences).map(|_| sentence(&mut rng, 8, 20)).collect();
        let text = text.join(" ");
        let parent = segmenter
            .segment(&chapter("ch-001", &[&text]), 5000, SplitStrategy::PerBlock)
            .remove(0);

        let children = segmenter.resegment(&parent, 5000).expect("multi-word text can be cut");

        assert!(children.len() >= 2, "{}", text);
        assert!(children.iter().all(|c| c.token_estimate < parent.token_estimate));
        assert!(children.iter().all(|c| c.token_estimate == estimate_tokens(&c.text)));
        let rebuilt: String = children.iter().map(|c| format!("{}{}", c.text, c.trailing)).collect();
        assert_eq!(rebuilt, parent.text);
        assert_eq!(children[0].context_before, parent.context_before);
    }
}
