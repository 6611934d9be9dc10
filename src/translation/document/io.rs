/*!
 * Reader and writer collaborators for the built-in formats.
 *
 * - `json`: the serde form of `Document`, lossless
 * - `txt`: plain text with chapter headings and blank-line paragraphs
 */

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::TranslationError;
use crate::file_utils::DocumentFormat;
use crate::translation::quality::script;

use super::model::{BlockKind, Chapter, Document, DocumentMetadata, Section};

/// Parses container bytes into a `Document`
pub trait DocumentReader: Send + Sync {
    fn parse(&self, bytes: &[u8], format_hint: Option<&str>) -> Result<Document, TranslationError>;
}

/// Produces container bytes from a translated `Document`
pub trait DocumentWriter: Send + Sync {
    fn write(&self, document: &Document) -> Result<Vec<u8>, TranslationError>;
}

/// Lossless JSON format
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormat;

impl DocumentReader for JsonFormat {
    fn parse(&self, bytes: &[u8], _format_hint: Option<&str>) -> Result<Document, TranslationError> {
        let mut document: Document = serde_json::from_slice(bytes).map_err(|e| TranslationError::Reader {
            chapter: 0,
            message: format!("invalid JSON document: {}", e),
        })?;
        if document.metadata.original_format.is_empty() {
            document.metadata.original_format = "json".to_string();
        }
        detect_language(&mut document);
        Ok(document)
    }
}

impl DocumentWriter for JsonFormat {
    fn write(&self, document: &Document) -> Result<Vec<u8>, TranslationError> {
        serde_json::to_vec_pretty(document).map_err(|e| TranslationError::Writer(e.to_string()))
    }
}

/// Plain text format
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextFormat;

static CHAPTER_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(chapter|глава|поглавље|poglavlje|part|део|дио|књига|книга|book)\s+([0-9]+|m{0,3}(?:cm|cd|d?c{0,3})(?:xc|xl|l?x{0,3})(?:ix|iv|v?i{0,3}))\.?(?:\s*[:.\-–—]\s*.{0,60})?$",
    )
    .expect("valid chapter regex")
});

static ROMAN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[IVXLCDM]{1,7}\.?$").expect("valid roman regex"));

static SCENE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\*\s*){3}$|^#$|^~+$").expect("valid scene break regex"));

fn is_chapter_marker(line: &str) -> bool {
    let line = line.trim();
    CHAPTER_MARKER.is_match(line) || ROMAN_HEADING.is_match(line)
}

fn looks_like_subtitle(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && line.chars().count() <= 80
        && !line.contains('\n')
        && !line.ends_with(['.', '!', '?', '…', ',', ';', ':'])
}

/// Short capitalised lines that rarely end a sentence read as verse
fn looks_like_verse(lines: &[&str]) -> bool {
    if lines.len() < 2 {
        return false;
    }
    let short = lines.iter().all(|l| l.trim().chars().count() <= 60);
    let capitalised = lines
        .iter()
        .filter(|l| l.trim().chars().next().is_some_and(|c| c.is_uppercase()))
        .count();
    let sentence_ends = lines
        .iter()
        .filter(|l| l.trim_end().ends_with(['.', '!', '?', '…']))
        .count();
    short && capitalised * 3 >= lines.len() * 2 && sentence_ends * 2 < lines.len()
}

fn paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

impl DocumentReader for PlainTextFormat {
    fn parse(&self, bytes: &[u8], format_hint: Option<&str>) -> Result<Document, TranslationError> {
        let text = std::str::from_utf8(bytes).map_err(|e| TranslationError::Reader {
            chapter: 0,
            message: format!("text is not UTF-8: {}", e),
        })?;
        let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");

        let mut chapters: Vec<Chapter> = Vec::new();
        let mut current: Option<Chapter> = None;
        let mut after_marker = false;

        for lines in paragraphs(&text) {
            let joined = lines.join("\n");
            let first = lines[0].trim();

            if lines.len() == 1 && is_chapter_marker(first) {
                if let Some(done) = current.take() {
                    chapters.push(done);
                }
                let id = format!("ch-{:03}", chapters.len() + 1);
                current = Some(Chapter::new(id, first, vec![Section::heading(first)]));
                after_marker = true;
                continue;
            }

            let chapter = current.get_or_insert_with(|| {
                Chapter::new(format!("ch-{:03}", chapters.len() + 1), "", Vec::new())
            });

            let section = if lines.len() == 1 && SCENE_BREAK.is_match(first) {
                Section::new(BlockKind::Passthrough, first)
            } else if after_marker && lines.len() == 1 && looks_like_subtitle(first) {
                chapter.title = format!("{} {}", chapter.title, first).trim().to_string();
                Section::heading(first)
            } else if looks_like_verse(&lines) {
                Section::new(BlockKind::Verse, joined)
            } else if lines.iter().all(|l| l.trim_start().starts_with('>')) {
                let quoted: Vec<&str> = lines
                    .iter()
                    .map(|l| l.trim_start().trim_start_matches('>').trim())
                    .collect();
                Section::new(BlockKind::Blockquote, quoted.join(" "))
            } else if lines.len() == 1 && (first.starts_with("- ") || first.starts_with("• ")) {
                Section::new(BlockKind::ListItem, first)
            } else {
                // unwrap hard-wrapped prose
                let unwrapped: Vec<&str> = lines.iter().map(|l| l.trim()).collect();
                Section::paragraph(unwrapped.join(" "))
            };
            chapter.sections.push(section);
            after_marker = false;
        }
        if let Some(done) = current.take() {
            chapters.push(done);
        }

        if chapters.is_empty() {
            return Err(TranslationError::Reader {
                chapter: 0,
                message: "document contains no text".to_string(),
            });
        }

        let mut document = Document::new(
            DocumentMetadata {
                title: format_hint
                    .filter(|h| !h.eq_ignore_ascii_case("txt"))
                    .unwrap_or_default()
                    .to_string(),
                original_format: "txt".to_string(),
                ..DocumentMetadata::default()
            },
            chapters,
        );
        detect_language(&mut document);
        Ok(document)
    }
}

impl DocumentWriter for PlainTextFormat {
    fn write(&self, document: &Document) -> Result<Vec<u8>, TranslationError> {
        let chapters: Vec<String> = document
            .chapters
            .iter()
            .map(|chapter| {
                chapter
                    .sections
                    .iter()
                    .map(|s| match s.kind {
                        BlockKind::Blockquote => format!("> {}", s.text),
                        _ => s.text.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .collect();
        let mut out = chapters.join("\n\n\n");
        out.push('\n');
        Ok(out.into_bytes())
    }
}

/// Fill in language and script when the reader found none
fn detect_language(document: &mut Document) {
    let sample: String = document
        .blocks()
        .filter(|b| b.kind.is_translatable())
        .take(50)
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if document.metadata.language.is_none() {
        document.metadata.language = script::guess_language(&sample).map(str::to_string);
    }
    if document.metadata.script.is_none() {
        document.metadata.script = script::ScriptStats::of(&sample)
            .dominant()
            .map(|s| s.iso_code().to_string());
    }
}

/// Reader for a container format
pub fn reader_for(format: DocumentFormat) -> Result<Box<dyn DocumentReader>, TranslationError> {
    match format {
        DocumentFormat::Json => Ok(Box::new(JsonFormat)),
        DocumentFormat::PlainText => Ok(Box::new(PlainTextFormat)),
        other => Err(TranslationError::Reader {
            chapter: 0,
            message: format!("no built-in reader for .{} files", other.extension()),
        }),
    }
}

/// Writer for a container format
pub fn writer_for(format: DocumentFormat) -> Result<Box<dyn DocumentWriter>, TranslationError> {
    match format {
        DocumentFormat::Json => Ok(Box::new(JsonFormat)),
        DocumentFormat::PlainText => Ok(Box::new(PlainTextFormat)),
        other => Err(TranslationError::Writer(format!(
            "no built-in writer for .{} files",
            other.extension()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = "Глава 1\n\nПочетак\n\nИван је дошао кући.\nБило је касно.\n\n* * *\n\nЊегош је писао.\n\nГлава 2\n\nКрај.\n";

    #[test]
    fn test_plainText_parse_shouldSplitChaptersAndDetectSerbian() {
        let doc = PlainTextFormat.parse(BOOK.as_bytes(), None).unwrap();
        assert_eq!(doc.chapters.len(), 2);
        assert_eq!(doc.chapters[0].id, "ch-001");
        assert_eq!(doc.chapters[0].title, "Глава 1 Почетак");
        let kinds: Vec<BlockKind> = doc.chapters[0].sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Heading,
                BlockKind::Heading,
                BlockKind::Paragraph,
                BlockKind::Passthrough,
                BlockKind::Paragraph
            ]
        );
        assert_eq!(doc.chapters[0].sections[2].text, "Иван је дошао кући. Било је касно.");
        assert_eq!(doc.metadata.language.as_deref(), Some("sr"));
        assert_eq!(doc.metadata.script.as_deref(), Some("Cyrl"));
    }

    #[test]
    fn test_plainText_parse_withoutMarkers_shouldProduceOneChapter() {
        let doc = PlainTextFormat.parse(b"First paragraph.\n\nSecond one.", None).unwrap();
        assert_eq!(doc.chapters.len(), 1);
        assert_eq!(doc.block_count(), 2);
    }

    #[test]
    fn test_plainText_parse_withEmptyInput_shouldFailWithReaderError() {
        let err = PlainTextFormat.parse(b"\n\n", None).unwrap_err();
        assert!(matches!(err, TranslationError::Reader { chapter: 0, .. }));
    }

    #[test]
    fn test_plainText_write_shouldKeepBlockOrder() {
        let doc = PlainTextFormat.parse(BOOK.as_bytes(), None).unwrap();
        let bytes = PlainTextFormat.write(&doc).unwrap();
        let reparsed = PlainTextFormat.parse(&bytes, None).unwrap();
        assert_eq!(doc.structure(), reparsed.structure());
    }

    #[test]
    fn test_readerFor_withEpub_shouldReportUnsupported() {
        assert!(reader_for(DocumentFormat::Epub).is_err());
    }
}
