/*!
 * End-to-end runs against a scripted provider
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use litwai::app_config::{Config, ProviderId};
use litwai::errors::ProviderError;
use litwai::providers::mock::{MockProvider, MockRequest};
use litwai::translation::document::Document;
use litwai::translation::events::EventKind;
use litwai::translation::report::{SegmentStatus, UnresolvedReason};
use litwai::translation::segmenter::segment_id;
use litwai::translation::{RunOutcome, RunStatus, TranslationCache, WorkPlan};

use crate::common::{self, chapter, document, texts};

#[tokio::test]
async fn test_run_happyPath_shouldTranslateEveryBlockOnce() {
    common::init_logging();
    let config = common::test_config();
    let provider = MockProvider::working();
    let cache = Arc::new(TranslationCache::in_memory());
    let source = document(vec![chapter("ch-001", &["Hello.", "World.", "Goodbye."])]);

    let outcome = common::translate_with_cache(&config, &provider, &source, cache.clone()).await;

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(texts(&outcome.document), vec!["HELLO.", "WORLD.", "GOODBYE."]);
    assert_eq!(outcome.report.stats.retries, 0);
    assert_eq!(outcome.report.stats.translated, 3);
    assert_eq!(provider.calls(), 3);
    assert_eq!(cache.stats().entries, 3);
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn test_run_transientFailures_shouldRetryAndSucceed() {
    let config = common::test_config();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let provider = MockProvider::working().with_responder(move |request| {
        if request.text == "World." && counter.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".to_string(),
            });
        }
        Ok(MockProvider::envelope(&MockProvider::default_translation(request), &[]))
    });
    let source = document(vec![chapter("ch-001", &["Hello.", "World.", "Goodbye."])]);

    let outcome = common::translate(&config, &provider, &source).await;

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(texts(&outcome.document), vec!["HELLO.", "WORLD.", "GOODBYE."]);
    let world = outcome
        .report
        .result(&segment_id("ch-001", 1, &[], "World."))
        .expect("result for the retried segment");
    assert_eq!(world.retries, 2);
    assert_eq!(world.status, SegmentStatus::Succeeded);
    assert_eq!(outcome.report.stats.retries, 2);
    assert!(outcome.report.unresolved.is_empty());
}

#[tokio::test]
async fn test_run_contextOverflow_shouldResegmentAndKeepBlockCount() {
    let config = common::test_config();
    let paragraph = "The storm had raged across the valley for three long days. Nobody in the village dared to open a single shutter.";
    let provider = MockProvider::working().with_overflow_above(80);
    let source = document(vec![chapter("ch-001", &[paragraph])]);

    let outcome = common::translate(&config, &provider, &source).await;

    assert_eq!(outcome.status(), RunStatus::Completed);
    assert_eq!(outcome.document.block_count(), source.block_count());
    assert_eq!(outcome.document.chapters[0].sections[0].text, paragraph.to_uppercase());
    assert_eq!(outcome.report.stats.segmenter_calls, 2);
    assert_eq!(outcome.report.stats.resegmented, 1);
    assert!(outcome.report.stats.segments >= 2);
    assert!(
        provider
            .translation_requests()
            .iter()
            .skip(1)
            .all(|r| r.text.chars().count() <= 80)
    );
}

#[tokio::test]
async fn test_run_conflictingNames_shouldKeepFirstTranslation() {
    let mut config = Config::for_target(ProviderId::HostedChat, "en");
    config.run.source_language = "ru".to_string();
    config.run.max_chapters_in_flight = 1;
    let provider = MockProvider::working().with_responder(|request| {
        let answer = match request.text.as_str() {
            "Иван вошёл в дом." => MockProvider::envelope("Ivan entered the house.", &[("Иван", "Ivan")]),
            "Иван сел у окна." => MockProvider::envelope("Ivan sat by the window.", &[("Иван", "Ivan")]),
            _ => MockProvider::envelope("Then John fell asleep.", &[("Иван", "John")]),
        };
        Ok(answer)
    });
    let source = document(vec![
        chapter("ch-001", &["Иван вошёл в дом.", "Иван сел у окна."]),
        chapter("ch-002", &["Потом Иван уснул."]),
    ]);
    let pipeline = common::pipeline(&config, &provider, Arc::new(TranslationCache::in_memory()));
    let mut events = pipeline.events().subscribe();

    let outcome = pipeline.run(&source, &WorkPlan::heuristic(&source, &config)).await.unwrap();

    assert_eq!(outcome.document.chapters[1].sections[0].text, "Then Ivan fell asleep.");
    assert!(texts(&outcome.document).iter().all(|t| !t.contains("John")));
    let conflicts: Vec<EventKind> = events
        .drain()
        .into_iter()
        .map(|e| e.kind)
        .filter(|k| matches!(k, EventKind::GlossaryConflict { .. }))
        .collect();
    assert_eq!(
        conflicts,
        vec![EventKind::GlossaryConflict {
            source_term: "Иван".to_string(),
            existing_target: "Ivan".to_string(),
            proposed_target: "John".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_run_refusedSegment_shouldCarryReviewMarker() {
    let config = common::test_config();
    let provider = MockProvider::working().with_responder(|request| {
        if request.text.starts_with("He drew the knife") {
            Ok(MockProvider::envelope("I'm sorry, but I can't help with that request.", &[]))
        } else {
            Ok(MockProvider::envelope(&MockProvider::default_translation(request), &[]))
        }
    });
    let source = document(vec![chapter(
        "ch-001",
        &["The cellar was cold.", "He drew the knife slowly.", "Then the lights went out."],
    )]);

    let outcome = common::translate(&config, &provider, &source).await;

    assert_eq!(outcome.status(), RunStatus::Completed);
    let blocks = texts(&outcome.document);
    assert_eq!(blocks[1], "[REVIEW] He drew the knife slowly.");
    assert_eq!(blocks[0], "THE CELLAR WAS COLD.");
    assert_eq!(outcome.report.stats.review_flagged, 1);
    assert_eq!(outcome.report.unresolved.len(), 1);
    assert_eq!(outcome.report.unresolved[0].reason, UnresolvedReason::Refused);
    assert_eq!(outcome.report.unresolved[0].block_index, 1);
    assert!(provider.translation_requests().iter().any(|r| r.is_rephrased()));
    assert!(!outcome.report.warnings.is_empty());
}

#[tokio::test]
async fn test_run_cancelledAfterFirstChapter_shouldPassThroughTheRest() {
    let mut config = common::test_config();
    config.run.max_chapters_in_flight = 1;
    let provider = MockProvider::working().with_delay(Duration::from_millis(50));
    let source = document(vec![
        chapter("ch-001", &["First light.", "The road east."]),
        chapter("ch-002", &["A second morning.", "Rain again."]),
        chapter("ch-003", &["The last evening."]),
    ]);
    let pipeline = common::pipeline(&config, &provider, Arc::new(TranslationCache::in_memory()));

    let cancel = pipeline.cancel_token().clone();
    let mut events = pipeline.events().subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event.kind, EventKind::ChapterCompleted { ordinal: 0, .. }) {
                cancel.cancel();
                break;
            }
        }
    });

    let plan = WorkPlan::heuristic(&source, &config);
    let outcome = tokio::time::timeout(Duration::from_secs(10), pipeline.run(&source, &plan))
        .await
        .expect("cancellation should finish promptly")
        .unwrap();
    watcher.await.unwrap();

    assert_eq!(outcome.status(), RunStatus::Cancelled);
    assert_eq!(outcome.document.chapters[0].sections[0].text, "FIRST LIGHT.");
    assert_eq!(outcome.document.chapters[1], source.chapters[1]);
    assert_eq!(outcome.document.chapters[2], source.chapters[2]);
    assert_eq!(outcome.report.stats.chapters_completed, 1);
    assert!(!outcome.report.unresolved.is_empty());
    assert!(
        outcome
            .report
            .unresolved
            .iter()
            .all(|u| u.reason == UnresolvedReason::Cancelled && u.chapter_id != "ch-001")
    );
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn test_run_cyrillicTarget_shouldProduceCyrillicOutput() {
    let mut config = common::test_config();
    config.run.target_script = Some(litwai::Script::Cyrillic);
    let source = document(vec![chapter("ch-001", &["Dobro jutro, Beograde."])]);
    let provider = MockProvider::working();

    let outcome = common::translate(&config, &provider, &source).await;

    assert_eq!(outcome.document.chapters[0].sections[0].text, "ДОБРО ЈУТРО, БЕОГРАДЕ.");
    assert_eq!(outcome.document.metadata.script.as_deref(), Some("Cyrl"));
    assert_eq!(provider.requests()[0].target_script.as_deref(), Some("cyrillic"));
}

async fn run_collecting_proposals(
    config: &Config,
    provider: &MockProvider,
    source: &Document,
    cache: Arc<TranslationCache>,
) -> (RunOutcome, Vec<String>) {
    let pipeline = common::pipeline(config, provider, cache);
    let mut events = pipeline.events().subscribe();
    let outcome = pipeline.run(source, &WorkPlan::heuristic(source, config)).await.unwrap();
    let proposed = events
        .drain()
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::GlossaryProposed { source_term, .. } => Some(source_term),
            _ => None,
        })
        .collect();
    (outcome, proposed)
}

#[tokio::test]
async fn test_run_differentCompletionOrder_shouldReplayFromCacheWithSameGlossary() {
    common::init_logging();
    let mut config = common::test_config();
    config.run.max_chapters_in_flight = 2;
    let responder = |request: &MockRequest| -> Result<String, ProviderError> {
        if request.text.starts_with("Later,") {
            Ok(MockProvider::envelope("Kasnije je otišao.", &[]))
        } else {
            Ok(MockProvider::envelope(&format!("{} (prevod)", request.text), &[]))
        }
    };
    let source = document(vec![
        chapter("ch-001", &["Marko Polo arrived.", "Later, Marko Polo left.", "Marko Polo smiled."]),
        chapter("ch-002", &["The tide came in."]),
        chapter("ch-003", &["Marko Polo waved from the ship."]),
    ]);
    let cache = Arc::new(TranslationCache::in_memory());

    // the first run finishes the name-less translation last
    let first_provider = MockProvider::working()
        .with_responder(responder)
        .with_delay_for(|request| match request.text.as_str() {
            t if t.starts_with("Later,") => Some(Duration::from_millis(300)),
            "Marko Polo smiled." => Some(Duration::from_millis(100)),
            _ => None,
        });
    let (first, first_proposed) = run_collecting_proposals(&config, &first_provider, &source, cache.clone()).await;
    let second_provider = MockProvider::working().with_responder(responder);
    let (second, second_proposed) = run_collecting_proposals(&config, &second_provider, &source, cache.clone()).await;

    assert_eq!(first.status(), RunStatus::Completed);
    assert!(first_proposed.contains(&"Marko Polo".to_string()));
    assert_eq!(first_proposed, second_proposed);
    assert_eq!(second_provider.calls(), 0);
    assert_eq!(second.report.stats.cache_hits, second.report.stats.segments);
    assert_eq!(first.document, second.document);
}
