/*!
 * Common test utilities for the litwai test suite
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use litwai::app_config::{Config, ProviderId};
use litwai::providers::mock::MockProvider;
use litwai::translation::document::{Chapter, Document, DocumentMetadata, Section};
use litwai::translation::{EventBus, RunOutcome, TranslationCache, TranslationPipeline, WorkPlan};

/// Route `log` output through the test harness; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// A short English book in the plain text format
pub fn create_test_book(dir: &Path, filename: &str) -> Result<PathBuf> {
    let content = "Chapter 1\n\nThe night was quiet.\n\nShe waited by the door.\n\nChapter 2\n\nMorning came late.\n";
    create_test_file(dir, filename, content)
}

/// English to Serbian with fast retries
pub fn test_config() -> Config {
    let mut config = Config::for_target(ProviderId::HostedChat, "sr");
    config.run.source_language = "en".to_string();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config
}

/// Config that passes validation without a credential
pub fn valid_config(cache_dir: &Path) -> Config {
    let mut config = Config::for_target(ProviderId::HostedChatAlt2, "sr");
    config.provider.model = "llama3.1".to_string();
    config.run.source_language = "en".to_string();
    config.cache.directory = cache_dir.to_path_buf();
    config.preparation.enabled = false;
    config
}

/// Chapter of plain paragraphs
pub fn chapter(id: &str, paragraphs: &[&str]) -> Chapter {
    Chapter::new(id, id, paragraphs.iter().map(|p| Section::paragraph(*p)).collect())
}

pub fn document(chapters: Vec<Chapter>) -> Document {
    Document::new(DocumentMetadata::default(), chapters)
}

/// Pipeline over a mock provider; the mock's counters stay readable through clones
pub fn pipeline(config: &Config, provider: &MockProvider, cache: Arc<TranslationCache>) -> TranslationPipeline {
    TranslationPipeline::new(
        Arc::new(config.clone()),
        Arc::new(provider.clone()),
        cache,
        EventBus::new("run-test", 4096),
        CancellationToken::new(),
    )
}

/// Translate with the heuristic plan and a fresh in-memory cache
pub async fn translate(config: &Config, provider: &MockProvider, source: &Document) -> RunOutcome {
    translate_with_cache(config, provider, source, Arc::new(TranslationCache::in_memory())).await
}

pub async fn translate_with_cache(
    config: &Config,
    provider: &MockProvider,
    source: &Document,
    cache: Arc<TranslationCache>,
) -> RunOutcome {
    let plan = WorkPlan::heuristic(source, config);
    pipeline(config, provider, cache)
        .run(source, &plan)
        .await
        .expect("pipeline run should not error")
}

/// Texts of every block in reading order
pub fn texts(document: &Document) -> Vec<String> {
    document.blocks().map(|b| b.text.clone()).collect()
}
