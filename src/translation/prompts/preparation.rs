/*!
 * Prompt and response schema for the preparation pre-scan.
 */

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::providers::Prompt;
use crate::translation::prompts::templates::extract_json_object;

const ANALYSIS_SYSTEM: &str = r#"You are a literary analyst preparing a book for translation from {source_language} into {target_language}.
Read the excerpts and describe the work so that every translator on the project makes the same choices.

Answer with ONLY a JSON object of this shape:
{
  "content_type": "novel | short stories | non-fiction | poetry | ...",
  "genre": "...",
  "tone": "...",
  "register": "formal | neutral | colloquial",
  "target_audience": "...",
  "characters": [
    {"name": "...", "target_name": "<name in {target_language}>", "role": "...", "speech_register": "..."}
  ],
  "untranslatable_terms": [
    {"term": "...", "transliteration": "...", "reason": "..."}
  ],
  "terms": [
    {"source": "...", "target": "...", "kind": "place | object | idiom"}
  ]
}
List only names and terms that appear in the excerpts."#;

/// A character and how their name is rendered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterNote {
    pub name: String,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub speech_register: Option<String>,
}

/// A culture-specific term kept in (transliterated) original form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UntranslatableTerm {
    pub term: String,
    #[serde(default)]
    pub transliteration: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TermNote {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Pass 1 result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub register: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub characters: Vec<CharacterNote>,
    #[serde(default)]
    pub untranslatable_terms: Vec<UntranslatableTerm>,
    #[serde(default)]
    pub terms: Vec<TermNote>,
}

/// One sampled chapter
#[derive(Debug, Clone)]
pub struct Excerpt {
    pub title: String,
    pub text: String,
}

pub struct AnalysisPromptBuilder {
    source_language: String,
    target_language: String,
}

impl AnalysisPromptBuilder {
    pub fn new(source_language: &str, target_language: &str) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
        }
    }

    pub fn build(&self, excerpts: &[Excerpt]) -> Prompt {
        let system = ANALYSIS_SYSTEM
            .replace("{source_language}", &self.source_language)
            .replace("{target_language}", &self.target_language);
        let mut user = String::new();
        for (i, excerpt) in excerpts.iter().enumerate() {
            user.push_str(&format!("## Excerpt {}: {}\n{}\n\n", i + 1, excerpt.title, excerpt.text));
        }
        Prompt {
            system,
            user: user.trim_end().to_string(),
        }
    }
}

/// Parse the analysis answer
pub fn parse_analysis(raw: &str) -> Result<ContentAnalysis, ProviderError> {
    let value = extract_json_object(raw)
        .ok_or_else(|| ProviderError::MalformedResponse("analysis is not a JSON object".to_string()))?;
    serde_json::from_value(value).map_err(|e| ProviderError::ParseError(e.to_string()))
}
