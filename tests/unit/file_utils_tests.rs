/*!
 * Tests for file system utilities
 */

use std::path::PathBuf;

use anyhow::Result;
use litwai::file_utils::{DocumentFormat, FileManager};

use crate::common;

#[test]
fn test_detect_format_shouldMapKnownExtensions() -> Result<()> {
    assert_eq!(FileManager::detect_format("book.JSON")?, DocumentFormat::Json);
    assert_eq!(FileManager::detect_format("book.txt")?, DocumentFormat::PlainText);
    assert_eq!(FileManager::detect_format("book.epub")?, DocumentFormat::Epub);
    assert_eq!(FileManager::detect_format("book.xhtml")?, DocumentFormat::Html);
    assert!(FileManager::detect_format("book.docx").is_err());
    assert!(FileManager::detect_format("book").is_err());
    Ok(())
}

#[test]
fn test_documentFormat_isSupported_shouldOnlyCoverBuiltIns() {
    assert!(DocumentFormat::Json.is_supported());
    assert!(DocumentFormat::PlainText.is_supported());
    assert!(!DocumentFormat::Epub.is_supported());
    assert_eq!(DocumentFormat::Fb2.extension(), "fb2");
}

#[test]
fn test_generate_output_path_shouldInsertTargetLanguage() {
    let path = FileManager::generate_output_path("/books/novel.txt", "/out", "sr-Latn", "txt");
    assert_eq!(path, PathBuf::from("/out/novel.sr-Latn.txt"));
}

#[test]
fn test_report_path_for_shouldSitNextToOutput() {
    let path = FileManager::report_path_for("/out/novel.sr.txt");
    assert_eq!(path, PathBuf::from("/out/novel.sr.txt.report.json"));
}

#[test]
fn test_write_atomic_shouldCreateParentsAndReplaceContent() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let target = dir.path().join("nested/deeper/out.txt");

    FileManager::write_atomic(&target, b"first")?;
    FileManager::write_atomic(&target, b"second")?;

    assert_eq!(FileManager::read_bytes(&target)?, b"second");
    let leftovers = std::fs::read_dir(target.parent().unwrap())?.count();
    assert_eq!(leftovers, 1);
    Ok(())
}

#[test]
fn test_append_line_shouldAppendNewlineTerminatedLines() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let log = dir.path().join("events/run.ndjson");

    FileManager::append_line(&log, "{\"a\":1}")?;
    FileManager::append_line(&log, "{\"b\":2}")?;

    let content = std::fs::read_to_string(&log)?;
    assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n");
    Ok(())
}

#[test]
fn test_file_and_dir_exists_shouldDistinguishKinds() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let file = common::create_test_file(dir.path(), "a.txt", "x")?;
    assert!(FileManager::file_exists(&file));
    assert!(!FileManager::dir_exists(&file));
    assert!(FileManager::dir_exists(dir.path()));
    assert!(!FileManager::file_exists(dir.path().join("missing.txt")));
    Ok(())
}

#[test]
fn test_read_bytes_withMissingFile_shouldNameThePath() {
    let err = FileManager::read_bytes("/definitely/not/here.txt").unwrap_err();
    assert!(err.to_string().contains("here.txt"));
}
