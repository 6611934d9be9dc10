/*!
 * Prompt and answer format for polishing a translated block.
 *
 * The polish answer is plain text in labelled sections rather than JSON:
 * editors tend to quote the text they fix, which breaks JSON escaping far
 * more often than it breaks a section label.
 */

use crate::language_utils::Script;
use crate::providers::Prompt;

const POLISH_SYSTEM: &str = r#"You are a professional literary editor reviewing a translation from {source_language} into {target_language}.

## Your Task
- Translate anything still written in {source_language}
- Remove tags, entities and markers that are not part of the text
- Keep the meaning, tone, names and paragraph breaks of the current translation
- Change nothing that is already correct

## Answer Format
ISSUES:
<one issue per line as TYPE: description, or nothing>
POLISHED_TEXT:
<the corrected translation, or UNCHANGED>
EXPLANATION:
<one or two sentences>"#;

const UNCHANGED: &str = "UNCHANGED";

/// What the editor sent back
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolishAnswer {
    /// `(type, description)` pairs from the ISSUES section
    pub issues: Vec<(String, String)>,
    /// `None` when the editor left the text as it was
    pub polished: Option<String>,
}

pub struct PolishPromptBuilder {
    source_language: String,
    target_language: String,
    target_script: Option<Script>,
}

impl PolishPromptBuilder {
    pub fn new(source_language: &str, target_language: &str) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            target_script: None,
        }
    }

    pub fn with_target_script(mut self, script: Option<Script>) -> Self {
        self.target_script = script;
        self
    }

    pub fn build(&self, source: &str, translation: &str, problems: &[String]) -> Prompt {
        let mut system = POLISH_SYSTEM
            .replace("{source_language}", &self.source_language)
            .replace("{target_language}", &self.target_language);
        if let Some(script) = self.target_script {
            system.push_str(&format!("\n\nWrite the polished text in the {} script only.", script));
        }

        let mut user = format!("## Original\n{}\n\n## Current Translation\n{}", source, translation);
        if !problems.is_empty() {
            user.push_str("\n\n## Known Problems");
            for problem in problems {
                user.push_str(&format!("\n- {}", problem));
            }
        }
        Prompt { system, user }
    }
}

/// Text between `start` and `end`, or to the end of `text`
fn section<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    let body = match rest.find(end) {
        Some(to) => &rest[..to],
        None => rest,
    };
    Some(body.trim())
}

/// Parse an editor answer; anything unreadable counts as unchanged
pub fn parse_polish(raw: &str) -> PolishAnswer {
    let issues = section(raw, "ISSUES:", "POLISHED_TEXT:")
        .map(|body| {
            body.lines()
                .filter_map(|line| line.trim().split_once(':'))
                .map(|(kind, description)| (kind.trim().to_lowercase(), description.trim().to_string()))
                .filter(|(kind, _)| !kind.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let polished = section(raw, "POLISHED_TEXT:", "EXPLANATION:")
        .filter(|body| !body.is_empty() && *body != UNCHANGED)
        .map(str::to_string);
    PolishAnswer { issues, polished }
}
