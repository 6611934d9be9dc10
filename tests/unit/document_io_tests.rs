/*!
 * Tests for the built-in document readers and writers
 */

use litwai::file_utils::DocumentFormat;
use litwai::translation::document::{
    BlockKind, Chapter, Document, DocumentMetadata, DocumentReader, DocumentWriter, JsonFormat, PlainTextFormat,
    Section, reader_for, writer_for,
};

fn kinds(document: &Document, chapter: usize) -> Vec<BlockKind> {
    document.chapters[chapter].sections.iter().map(|s| s.kind).collect()
}

#[test]
fn test_plainText_parse_withMixedBlocks_shouldClassifyEachBlock() {
    let text = "\
Chapter 1

It was late when the
train finally stopped.

> Do not open the door,
> the note said.

- bread

Roses are red
Violets are blue
Sugar is sweet

* * *

The end of the night.
";
    let doc = PlainTextFormat.parse(text.as_bytes(), None).unwrap();
    assert_eq!(doc.chapters.len(), 1);
    assert_eq!(
        kinds(&doc, 0),
        vec![
            BlockKind::Heading,
            BlockKind::Paragraph,
            BlockKind::Blockquote,
            BlockKind::ListItem,
            BlockKind::Verse,
            BlockKind::Passthrough,
            BlockKind::Paragraph,
        ]
    );
    let sections = &doc.chapters[0].sections;
    assert_eq!(sections[1].text, "It was late when the train finally stopped.");
    assert_eq!(sections[2].text, "Do not open the door, the note said.");
    assert_eq!(sections[4].text, "Roses are red\nViolets are blue\nSugar is sweet");
    assert_eq!(doc.metadata.original_format, "txt");
}

#[test]
fn test_plainText_parse_withRomanNumerals_shouldStartChapters() {
    let text = "I.\n\nFirst.\n\nII.\n\nSecond.\n";
    let doc = PlainTextFormat.parse(text.as_bytes(), None).unwrap();
    assert_eq!(doc.chapters.len(), 2);
    assert_eq!(doc.chapters[1].id, "ch-002");
    assert_eq!(doc.chapters[1].sections[1].text, "Second.");
}

#[test]
fn test_plainText_parse_withBomAndCrlf_shouldNormalize() {
    let text = "\u{feff}Chapter 1\r\n\r\nHello there.\r\n";
    let doc = PlainTextFormat.parse(text.as_bytes(), None).unwrap();
    assert_eq!(doc.chapters[0].title, "Chapter 1");
    assert_eq!(doc.chapters[0].sections[1].text, "Hello there.");
}

#[test]
fn test_plainText_parse_withInvalidUtf8_shouldFail() {
    assert!(PlainTextFormat.parse(&[0xff, 0xfe, 0x00], None).is_err());
}

#[test]
fn test_plainText_write_shouldSeparateChaptersAndQuote() {
    let doc = Document::new(
        DocumentMetadata::default(),
        vec![
            Chapter::new("ch-001", "One", vec![Section::heading("Chapter 1"), Section::paragraph("A.")]),
            Chapter::new(
                "ch-002",
                "Two",
                vec![Section::heading("Chapter 2"), Section::new(BlockKind::Blockquote, "Quoted.")],
            ),
        ],
    );
    let out = String::from_utf8(PlainTextFormat.write(&doc).unwrap()).unwrap();
    assert_eq!(out, "Chapter 1\n\nA.\n\n\nChapter 2\n\n> Quoted.\n");
}

#[test]
fn test_json_write_thenParse_shouldKeepAttributes() {
    let mut heading = Section::heading("Prologue");
    heading.attributes.insert("level".to_string(), "2".to_string());
    let doc = Document::new(
        DocumentMetadata {
            title: "Novel".to_string(),
            authors: vec!["A. Writer".to_string()],
            language: Some("en".to_string()),
            script: Some("Latn".to_string()),
            original_format: "json".to_string(),
        },
        vec![Chapter::new(
            "prologue",
            "Prologue",
            vec![heading, Section::new(BlockKind::Code, "fn main() {}")],
        )],
    );
    let bytes = JsonFormat.write(&doc).unwrap();
    assert_eq!(JsonFormat.parse(&bytes, None).unwrap(), doc);
}

#[test]
fn test_json_parse_withGarbage_shouldReportReaderError() {
    let err = JsonFormat.parse(b"[1, 2", None).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("json"));
}

#[test]
fn test_readerAndWriterFor_shouldCoverBuiltInFormats() {
    assert!(reader_for(DocumentFormat::Json).is_ok());
    assert!(reader_for(DocumentFormat::PlainText).is_ok());
    assert!(writer_for(DocumentFormat::PlainText).is_ok());
    assert!(reader_for(DocumentFormat::Fb2).is_err());
    assert!(writer_for(DocumentFormat::Html).is_err());
}
