/*!
 * Core document model for ebook translation.
 *
 * A `Document` is what readers produce and writers consume. The engine
 * never changes its shape: the translated document has the same chapters,
 * the same sections and the same block kinds as the source, only the text
 * of translatable blocks differs.
 */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A parsed ebook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document metadata
    pub metadata: DocumentMetadata,

    /// Chapters in reading order
    pub chapters: Vec<Chapter>,
}

/// Document metadata declared by the reader
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    /// Declared or detected language tag
    #[serde(default)]
    pub language: Option<String>,

    /// ISO 15924 script code, e.g. "Cyrl"
    #[serde(default)]
    pub script: Option<String>,

    /// Format the reader parsed, e.g. "txt"
    #[serde(default)]
    pub original_format: String,
}

/// One chapter; `id` is stable across runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,

    #[serde(default)]
    pub title: String,

    pub sections: Vec<Section>,
}

/// A typed unit of text inside a chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: BlockKind,

    pub text: String,

    /// Reader specific data the writer needs back (heading level, ids...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Sections are the blocks the segmenter works on
pub type Block = Section;

/// Block kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
    Heading,
    Paragraph,
    Blockquote,
    ListItem,
    Verse,
    /// Image alternative text, copied verbatim
    ImageAlt,
    /// Code listing, copied verbatim
    Code,
    /// Anything else the reader could not classify, copied verbatim
    Passthrough,
}

impl BlockKind {
    /// Whether blocks of this kind go to the model
    pub fn is_translatable(self) -> bool {
        matches!(
            self,
            BlockKind::Heading
                | BlockKind::Paragraph
                | BlockKind::Blockquote
                | BlockKind::ListItem
                | BlockKind::Verse
        )
    }

    /// Kinds that may share a segment with their neighbours
    pub fn is_groupable(self) -> bool {
        matches!(
            self,
            BlockKind::Paragraph | BlockKind::Blockquote | BlockKind::ListItem
        )
    }
}

impl Section {
    pub fn new(kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Paragraph, text)
    }

    pub fn heading(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Heading, text)
    }

    /// Whether this block must be sent to the model
    pub fn needs_translation(&self) -> bool {
        self.kind.is_translatable() && self.text.chars().any(|c| c.is_alphabetic())
    }
}

impl Chapter {
    pub fn new(id: impl Into<String>, title: impl Into<String>, sections: Vec<Section>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            sections,
        }
    }

    /// Blocks that need translation
    pub fn translatable_count(&self) -> usize {
        self.sections.iter().filter(|s| s.needs_translation()).count()
    }

    /// Same chapter with untouched text, used when a chapter is never started
    pub fn passthrough(&self) -> Self {
        self.clone()
    }
}

impl Document {
    pub fn new(metadata: DocumentMetadata, chapters: Vec<Chapter>) -> Self {
        Self { metadata, chapters }
    }

    /// All blocks in reading order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.chapters.iter().flat_map(|c| c.sections.iter())
    }

    pub fn block_count(&self) -> usize {
        self.chapters.iter().map(|c| c.sections.len()).sum()
    }

    /// Chapter and block kinds with the text stripped
    pub fn structure(&self) -> Vec<(String, Vec<BlockKind>)> {
        self.chapters
            .iter()
            .map(|c| (c.id.clone(), c.sections.iter().map(|s| s.kind).collect()))
            .collect()
    }

    /// Content hash of the whole source, used to key the preparation pass
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for chapter in &self.chapters {
            hasher.update(chapter.id.as_bytes());
            hasher.update([0u8]);
            for section in &chapter.sections {
                hasher.update(format!("{:?}", section.kind).as_bytes());
                hasher.update([0u8]);
                hasher.update(section.text.as_bytes());
                hasher.update([0u8]);
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Look up a chapter by id
    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }
}
