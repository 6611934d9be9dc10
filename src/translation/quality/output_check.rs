/*!
 * Checks run on every model answer before it is accepted.
 *
 * An answer is malformed when it is empty, when it repeats the source
 * while the languages differ, or when too few of its letters are in the
 * requested script. Serbian answers in the wrong script are converted
 * instead of being retried.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::ProviderError;
use crate::language_utils::{AUTO, Script, language_codes_match};
use crate::translation::quality::script::{ScriptStats, convert, guess_language};

/// Minimum share of letters that must be in the target script
pub const SCRIPT_THRESHOLD: f64 = 0.6;

/// Shortest source, in letters, that counts as echoed
const MIN_ECHO_LETTERS: usize = 3;

static MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<BLOCK_\d+>>|<<END>>").expect("valid marker regex"));

/// Why an answer was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum OutputIssue {
    Empty,
    EchoedSource,
    WrongScript { expected: Script, share: f64 },
}

impl std::fmt::Display for OutputIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIssue::Empty => write!(f, "empty output"),
            OutputIssue::EchoedSource => write!(f, "output repeats the source"),
            OutputIssue::WrongScript { expected, share } => {
                write!(f, "only {:.0}% of letters are {}", share * 100.0, expected)
            }
        }
    }
}

/// Validates answers for one language pair
#[derive(Debug, Clone)]
pub struct OutputValidator {
    source_language: String,
    target_language: String,
    target_script: Option<Script>,
}

impl OutputValidator {
    pub fn new(source_language: &str, target_language: &str, target_script: Option<Script>) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            target_script,
        }
    }

    pub fn target_script(&self) -> Option<Script> {
        self.target_script
    }

    /// Whether an unchanged answer would be wrong
    fn languages_differ(&self, source: &str) -> bool {
        let source_language = if self.source_language.eq_ignore_ascii_case(AUTO) {
            match guess_language(source) {
                Some(guess) => guess,
                // unknown source language: only the script check applies
                None => return true,
            }
        } else {
            self.source_language.as_str()
        };
        !language_codes_match(source_language, &self.target_language)
    }

    fn is_serbian_target(&self) -> bool {
        language_codes_match(&self.target_language, "sr")
    }

    /// Every issue found in `output`
    pub fn check(&self, source: &str, output: &str) -> Vec<OutputIssue> {
        let source = strip_markers(source);
        let output = strip_markers(output);
        let mut issues = Vec::new();

        if output.trim().is_empty() {
            issues.push(OutputIssue::Empty);
            return issues;
        }

        if ScriptStats::of(&source).letters() >= MIN_ECHO_LETTERS
            && normalize(&source) == normalize(&output)
            && self.languages_differ(&source)
        {
            issues.push(OutputIssue::EchoedSource);
        }

        if let Some(expected) = self.target_script {
            let share = ScriptStats::of(&output).share(expected);
            if share < SCRIPT_THRESHOLD {
                issues.push(OutputIssue::WrongScript { expected, share });
            }
        }
        issues
    }

    /// Accept `output`, converting a wrong-script Serbian answer when that fixes it
    pub fn validate(&self, source: &str, output: &str) -> Result<String, ProviderError> {
        let issues = self.check(source, output);
        let Some(first) = issues.first() else {
            return Ok(output.to_string());
        };

        if let (true, Some(expected)) = (
            issues.iter().all(|i| matches!(i, OutputIssue::WrongScript { .. })),
            self.target_script,
        ) {
            if self.is_serbian_target() {
                let converted = convert_outside_markers(output, expected);
                if self.check(source, &converted).is_empty() {
                    debug!("Converted Serbian output to {} instead of retrying", expected);
                    return Ok(converted);
                }
            }
        }
        Err(ProviderError::MalformedResponse(first.to_string()))
    }
}

fn strip_markers(text: &str) -> String {
    MARKERS.replace_all(text, " ").into_owned()
}

/// Script conversion that leaves `<<BLOCK_n>>` markers untouched
fn convert_outside_markers(text: &str, script: Script) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for marker in MARKERS.find_iter(text) {
        out.push_str(&convert(&text[last..marker.start()], script));
        out.push_str(marker.as_str());
        last = marker.end();
    }
    out.push_str(&convert(&text[last..], script));
    out
}

/// Collapse whitespace for comparisons
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteStyle {
    /// «...»
    Guillemets,
    /// „...“
    LowHigh,
    /// “...”
    Curly,
}

impl QuoteStyle {
    fn detect(text: &str) -> Option<Self> {
        if text.contains('«') {
            Some(QuoteStyle::Guillemets)
        } else if text.contains('„') {
            Some(QuoteStyle::LowHigh)
        } else if text.contains('“') || text.contains('”') {
            Some(QuoteStyle::Curly)
        } else {
            None
        }
    }

    fn pair(self) -> (char, char) {
        match self {
            QuoteStyle::Guillemets => ('«', '»'),
            QuoteStyle::LowHigh => ('„', '“'),
            QuoteStyle::Curly => ('“', '”'),
        }
    }
}

/// Light clean-up of an accepted block translation
///
/// Quotes follow the style of the source, the first letter is capitalised
/// when the source block starts with a capital, and the source's trailing
/// newlines are kept.
pub fn enhance(source: &str, translated: &str) -> String {
    let mut result = translated.trim_end_matches(['\n', '\r']).to_string();

    if let (Some(wanted), Some(found)) = (QuoteStyle::detect(source), QuoteStyle::detect(&result)) {
        if wanted != found {
            result = requote(&result, found, wanted);
        }
    }

    let source_capital = source.chars().find(|c| c.is_alphabetic()).is_some_and(|c| c.is_uppercase());
    if source_capital {
        if let Some((index, c)) = result.char_indices().find(|(_, c)| c.is_alphabetic()) {
            if c.is_lowercase() {
                let upper: String = c.to_uppercase().collect();
                result.replace_range(index..index + c.len_utf8(), &upper);
            }
        }
    }

    let trailing = source.len() - source.trim_end_matches(['\n', '\r']).len();
    result.push_str(&source[source.len() - trailing..]);
    result
}

fn requote(text: &str, from: QuoteStyle, to: QuoteStyle) -> String {
    let (from_open, from_close) = from.pair();
    let (to_open, to_close) = to.pair();
    text.chars()
        .map(|c| {
            if c == from_open {
                to_open
            } else if c == from_close {
                to_close
            } else {
                c
            }
        })
        .collect()
}
