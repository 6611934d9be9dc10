/*!
 * Book-level verification of a finished translation.
 *
 * Every translatable block of the output is compared with its source
 * block. A block fails when source-language text was left in it, when it
 * still carries the review marker, or when markup that was not in the
 * source shows up in it. The book score is the share of translatable
 * characters that were translated, less a small penalty per markup
 * artifact.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app_config::Config;
use crate::language_utils::{AUTO, Script, language_codes_match, script_supported};
use crate::translation::document::Document;
use crate::translation::quality::output_check::{OutputIssue, OutputValidator};
use crate::translation::quality::script::{ScriptStats, guess_language};

/// Letters a script check needs before it is trusted
const MIN_SCRIPT_LETTERS: usize = 10;

/// Score lost per markup artifact
const MARKUP_PENALTY: f64 = 0.01;

/// Most score lost to markup artifacts
const MAX_MARKUP_PENALTY: f64 = 0.1;

/// Letters written in Russian but not in the other Cyrillic orthographies we target
const RUSSIAN_ONLY: &[char] = &['ы', 'э', 'ъ', 'ё', 'Ы', 'Э', 'Ъ', 'Ё'];

static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<>]+>|&[a-zA-Z]+;|&#[0-9]+;").expect("valid markup regex"));

/// What is wrong with a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FindingKind {
    /// Source-language text left in the output
    Untranslated,
    /// Tags or entities the source did not have
    MarkupArtifact,
    /// The pipeline gave up on the block
    ReviewMarked,
}

/// One problem in one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFinding {
    pub chapter_id: String,
    pub block_index: usize,
    pub kind: FindingKind,
    pub detail: String,
}

/// Result of checking a whole book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub blocks_checked: usize,
    pub total_chars: usize,
    pub untranslated_chars: usize,
    pub markup_artifacts: usize,
    pub score: f64,
    pub findings: Vec<BlockFinding>,
}

impl Verification {
    /// No untranslated text and a score of at least `min_score`
    pub fn is_valid(&self, min_score: f64) -> bool {
        self.score >= min_score
            && !self
                .findings
                .iter()
                .any(|f| matches!(f.kind, FindingKind::Untranslated | FindingKind::ReviewMarked))
    }

    /// Blocks a polish request could fix, in reading order, each once
    pub fn polishable_blocks(&self) -> Vec<(String, usize)> {
        let mut blocks: Vec<(String, usize)> = Vec::new();
        for finding in &self.findings {
            let key = (finding.chapter_id.clone(), finding.block_index);
            if finding.kind != FindingKind::ReviewMarked && !blocks.contains(&key) {
                blocks.push(key);
            }
        }
        blocks
    }

    /// Findings of one block
    pub fn findings_for(&self, chapter_id: &str, block_index: usize) -> Vec<&BlockFinding> {
        self.findings
            .iter()
            .filter(|f| f.chapter_id == chapter_id && f.block_index == block_index)
            .collect()
    }
}

/// Checks output blocks against their source for one language pair
#[derive(Debug, Clone)]
pub struct Verifier {
    source_language: String,
    target_language: String,
    target_script: Option<Script>,
    review_marker: String,
}

impl Verifier {
    pub fn new(source_language: &str, target_language: &str, target_script: Option<Script>, review_marker: &str) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            target_script,
            review_marker: review_marker.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.run.source_language,
            &config.run.target_language,
            config.run.target_script,
            &config.run.review_marker,
        )
    }

    /// Source language, with `auto` replaced by what the document declares
    pub fn resolve_source(&self, declared: Option<&str>) -> String {
        if self.source_language.eq_ignore_ascii_case(AUTO) {
            declared.unwrap_or(AUTO).to_string()
        } else {
            self.source_language.clone()
        }
    }

    /// Whether `source` is Russian text going into another Cyrillic language
    fn russian_into_cyrillic(&self, source_language: &str, source: &str) -> bool {
        let russian = if source_language.eq_ignore_ascii_case(AUTO) {
            guess_language(source) == Some("ru")
        } else {
            language_codes_match(source_language, "ru")
        };
        russian
            && !language_codes_match(&self.target_language, "ru")
            && script_supported(&self.target_language, Script::Cyrillic)
            && self.target_script != Some(Script::Latin)
    }

    /// Problems of one output block; empty when the block passes
    pub fn check_block(&self, source_language: &str, source: &str, output: &str) -> Vec<(FindingKind, String)> {
        let mut found = Vec::new();
        if output.trim_start().starts_with(&self.review_marker) {
            found.push((FindingKind::ReviewMarked, "block was left for review".to_string()));
            return found;
        }

        let validator = OutputValidator::new(source_language, &self.target_language, self.target_script);
        let letters = ScriptStats::of(output).letters();
        for issue in validator.check(source, output) {
            match issue {
                OutputIssue::EchoedSource => {
                    found.push((FindingKind::Untranslated, "block repeats the source".to_string()))
                }
                OutputIssue::WrongScript { .. } if letters >= MIN_SCRIPT_LETTERS => {
                    found.push((FindingKind::Untranslated, issue.to_string()))
                }
                _ => {}
            }
        }
        if found.is_empty()
            && self.russian_into_cyrillic(source_language, source)
            && output.chars().any(|c| RUSSIAN_ONLY.contains(&c))
        {
            found.push((FindingKind::Untranslated, "letters only Russian uses".to_string()));
        }

        for artifact in MARKUP.find_iter(output).map(|m| m.as_str()) {
            if !source.contains(artifact) {
                found.push((FindingKind::MarkupArtifact, artifact.to_string()));
            }
        }
        found
    }

    /// Check every translatable block of `translated` against `source`
    ///
    /// Both documents must have the same shape, which the pipeline
    /// guarantees for its output.
    pub fn verify(&self, source: &Document, translated: &Document) -> Verification {
        let source_language = self.resolve_source(source.metadata.language.as_deref());
        let mut result = Verification::default();

        for (source_chapter, chapter) in source.chapters.iter().zip(&translated.chapters) {
            for (index, (source_block, block)) in source_chapter.sections.iter().zip(&chapter.sections).enumerate() {
                if !source_block.needs_translation() {
                    continue;
                }
                result.blocks_checked += 1;
                let chars = block.text.chars().count();
                result.total_chars += chars;

                let found = self.check_block(&source_language, &source_block.text, &block.text);
                if found
                    .iter()
                    .any(|(kind, _)| matches!(kind, FindingKind::Untranslated | FindingKind::ReviewMarked))
                {
                    result.untranslated_chars += chars;
                }
                for (kind, detail) in found {
                    if kind == FindingKind::MarkupArtifact {
                        result.markup_artifacts += 1;
                    }
                    result.findings.push(BlockFinding {
                        chapter_id: chapter.id.clone(),
                        block_index: index,
                        kind,
                        detail,
                    });
                }
            }
        }

        result.score = score(result.total_chars, result.untranslated_chars, result.markup_artifacts);
        result
    }
}

fn score(total_chars: usize, untranslated_chars: usize, markup_artifacts: usize) -> f64 {
    let translated = if total_chars == 0 {
        1.0
    } else {
        1.0 - untranslated_chars as f64 / total_chars as f64
    };
    let penalty = (markup_artifacts as f64 * MARKUP_PENALTY).min(MAX_MARKUP_PENALTY);
    (translated - penalty).max(0.0)
}
