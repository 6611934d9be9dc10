/*!
 * Controller runs from an input file to the written output, report and event log
 */

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use litwai::app_controller::{Controller, TranslateRequest};
use litwai::file_utils::FileManager;
use litwai::errors::ProviderError;
use litwai::providers::mock::{MockProvider, MockRequest};
use litwai::translation::RunStatus;
use tokio_test::{assert_err, assert_ok};

use crate::common;

#[tokio::test]
async fn test_runWithProvider_withPlainTextBook_shouldWriteOutputReportAndEvents() -> Result<()> {
    common::init_logging();
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_book(temp_dir.path(), "book.txt")?;
    let events_path = temp_dir.path().join("events.ndjson");
    let controller = Controller::with_config(common::valid_config(&temp_dir.path().join("cache")))?;
    let mut request = TranslateRequest::new(&input);
    request.events = Some(events_path.clone());
    let provider = MockProvider::working();

    let outcome = controller
        .run_with_provider(&request, Arc::new(provider.clone()), CancellationToken::new())
        .await?;

    assert_eq!(outcome.status(), RunStatus::Completed);
    let output = temp_dir.path().join("book.sr.txt");
    assert!(FileManager::file_exists(&output));
    let written = fs::read_to_string(&output)?;
    assert!(written.contains("THE NIGHT WAS QUIET."));
    assert!(written.contains("MORNING CAME LATE."));

    let report: Value = serde_json::from_str(&fs::read_to_string(FileManager::report_path_for(&output))?)?;
    assert_eq!(report["status"], "completed");
    assert_eq!(report["stats"]["translated"], provider.calls() as u64);

    let lines: Vec<Value> = fs::read_to_string(&events_path)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.first().map(|e| e["type"].clone()), Some(Value::from("runStarted")));
    assert_eq!(lines.last().map(|e| e["type"].clone()), Some(Value::from("runCompleted")));
    let sequences: Vec<u64> = lines.iter().filter_map(|e| e["sequence"].as_u64()).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[tokio::test]
async fn test_runWithProvider_secondRun_shouldReuseThePersistentCache() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_book(temp_dir.path(), "book.txt")?;
    let config = common::valid_config(&temp_dir.path().join("cache"));
    let request = TranslateRequest::new(&input);

    let first = MockProvider::working();
    Controller::with_config(config.clone())?
        .run_with_provider(&request, Arc::new(first.clone()), CancellationToken::new())
        .await?;
    let second = MockProvider::working();
    let outcome = Controller::with_config(config)?
        .run_with_provider(&request, Arc::new(second.clone()), CancellationToken::new())
        .await?;

    assert!(first.calls() > 0);
    assert_eq!(second.calls(), 0);
    assert_eq!(outcome.report.stats.cache_hits, outcome.report.stats.segments);
    Ok(())
}

#[tokio::test]
async fn test_runWithProvider_withVerification_shouldPolishStrayMarkupAndReportIt() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_book(temp_dir.path(), "book.txt")?;
    let mut config = common::valid_config(&temp_dir.path().join("cache"));
    config.verification.enabled = true;
    let controller = Controller::with_config(config)?;
    let provider = MockProvider::working().with_responder(|request: &MockRequest| -> Result<String, ProviderError> {
        if request.is_translation() {
            let text = if request.text.contains("Morning") {
                "JUTRO JE <i>KASNILO</i>.".to_string()
            } else {
                MockProvider::default_translation(request)
            };
            Ok(MockProvider::envelope(&text, &[]))
        } else {
            Ok("ISSUES:\nmarkup: stray tags\nPOLISHED_TEXT:\nJUTRO JE KASNILO.\nEXPLANATION:\nRemoved tags.".to_string())
        }
    });

    let outcome = controller
        .run_with_provider(&TranslateRequest::new(&input), Arc::new(provider.clone()), CancellationToken::new())
        .await?;

    let output = temp_dir.path().join("book.sr.txt");
    let written = fs::read_to_string(&output)?;
    assert!(written.contains("JUTRO JE KASNILO."));
    assert!(!written.contains("<i>"));
    let verification = outcome.report.verification.as_ref().expect("verification ran");
    assert_eq!(verification.polished_blocks, 1);
    assert!(verification.score_before < 1.0);
    assert!(verification.valid);

    let report: Value = serde_json::from_str(&fs::read_to_string(FileManager::report_path_for(&output))?)?;
    assert_eq!(report["verification"]["polishedBlocks"], 1);
    assert_eq!(report["verification"]["result"]["score"], 1.0);
    Ok(())
}

#[tokio::test]
async fn test_runWithProvider_verificationDisabled_shouldLeaveReportWithoutIt() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_book(temp_dir.path(), "book.txt")?;
    let controller = Controller::with_config(common::valid_config(&temp_dir.path().join("cache")))?;

    let outcome = controller
        .run_with_provider(&TranslateRequest::new(&input), Arc::new(MockProvider::working()), CancellationToken::new())
        .await?;

    assert!(outcome.report.verification.is_none());
    let report: Value =
        serde_json::from_str(&fs::read_to_string(FileManager::report_path_for(&temp_dir.path().join("book.sr.txt")))?)?;
    assert!(report.get("verification").is_none());
    Ok(())
}

#[test]
fn test_runWithProvider_withMissingInput_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let controller = Controller::with_config(common::valid_config(temp_dir.path()))?;
    let request = TranslateRequest::new(temp_dir.path().join("missing.txt"));

    let result = tokio_test::block_on(async {
        controller
            .run_with_provider(&request, Arc::new(MockProvider::working()), CancellationToken::new())
            .await
    });

    let error = assert_err!(result);
    assert!(error.to_string().contains("does not exist"));
    Ok(())
}

#[test]
fn test_runWithProvider_withUnsupportedOutput_shouldFailBeforeCallingProvider() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_book(temp_dir.path(), "book.txt")?;
    let controller = Controller::with_config(common::valid_config(temp_dir.path()))?;
    let mut request = TranslateRequest::new(&input);
    request.output = Some(temp_dir.path().join("book.pdf"));
    let provider = MockProvider::working();

    let result = tokio_test::block_on(async {
        controller
            .run_with_provider(&request, Arc::new(provider.clone()), CancellationToken::new())
            .await
    });

    assert_err!(result);
    assert_eq!(provider.calls(), 0);
    Ok(())
}

#[test]
fn test_withConfig_withInvalidConfig_shouldFail() {
    let mut config = common::test_config();
    config.run.target_language = "abcd".to_string();
    assert!(Controller::with_config(config).is_err());
}

#[test]
fn test_writeDefaultConfig_shouldRefuseToOverwrite() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("litwai.json");

    assert_ok!(Controller::write_default_config(&path));
    let loaded = Controller::load_config(&path)?;
    assert_eq!(loaded.run.target_language, litwai::Config::default().run.target_language);

    assert_err!(Controller::write_default_config(&path));
    Ok(())
}

#[test]
fn test_outputPathFor_shouldPlaceOutputNextToInput() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let controller = Controller::with_config(common::valid_config(temp_dir.path()))?;

    let request = TranslateRequest::new(temp_dir.path().join("novel.json"));
    assert_eq!(controller.output_path_for(&request)?, temp_dir.path().join("novel.sr.json"));

    let mut explicit = TranslateRequest::new(temp_dir.path().join("novel.json"));
    explicit.output = Some(temp_dir.path().join("out.txt"));
    assert_eq!(controller.output_path_for(&explicit)?, temp_dir.path().join("out.txt"));
    Ok(())
}
