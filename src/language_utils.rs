use anyhow::{Result, anyhow};
use isolang::Language;
use serde::{Deserialize, Serialize};

/// Language utilities for BCP-47-like language tags
///
/// Tags look like `sr`, `sr-Latn`, `pt-BR` or `zh-Hant-TW`. Only the primary
/// subtag is checked against ISO 639; script and region subtags are kept
/// as given. The special value `auto` means "detect from the document".
pub const AUTO: &str = "auto";

/// Writing systems the engine can enforce on output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Latin,
    Cyrillic,
}

impl Script {
    /// ISO 15924 code
    pub fn iso_code(self) -> &'static str {
        match self {
            Script::Latin => "Latn",
            Script::Cyrillic => "Cyrl",
        }
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Script::Latin => write!(f, "latin"),
            Script::Cyrillic => write!(f, "cyrillic"),
        }
    }
}

impl std::str::FromStr for Script {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "latin" | "latn" => Ok(Script::Latin),
            "cyrillic" | "cyrl" => Ok(Script::Cyrillic),
            other => Err(anyhow!("Unknown script: {}", other)),
        }
    }
}

/// A parsed language tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTag {
    /// Lowercase ISO 639-1 or 639-3 code
    pub primary: String,

    /// Script subtag, when it names a script we know
    pub script: Option<Script>,

    /// Region subtag as written
    pub region: Option<String>,
}

/// Languages with an established Cyrillic orthography
const CYRILLIC_LANGUAGES: &[&str] = &[
    "ru", "uk", "be", "bg", "sr", "mk", "kk", "ky", "mn", "tg", "tt", "ba", "cv", "ce", "os",
    "bs", "cnr", "rue", "sah", "udm", "kv", "ab", "av",
];

/// Parse a tag and validate its primary subtag
pub fn parse_language_tag(tag: &str) -> Result<LanguageTag> {
    let trimmed = tag.trim();
    let mut parts = trimmed.split(['-', '_']);
    let primary = parts
        .next()
        .map(|p| p.to_lowercase())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("Empty language tag"))?;

    let valid = match primary.len() {
        2 => Language::from_639_1(&primary).is_some(),
        3 => Language::from_639_3(&primary).is_some(),
        _ => false,
    };
    if !valid {
        return Err(anyhow!("Invalid language code: {}", tag));
    }

    let mut script = None;
    let mut region = None;
    for part in parts {
        match part.len() {
            4 => script = part.parse::<Script>().ok(),
            2 | 3 => region = Some(part.to_uppercase()),
            _ => {}
        }
    }

    Ok(LanguageTag { primary, script, region })
}

/// Validate a tag, accepting `auto` when `allow_auto` is set
pub fn validate_language_tag(tag: &str, allow_auto: bool) -> Result<()> {
    if allow_auto && tag.trim().eq_ignore_ascii_case(AUTO) {
        return Ok(());
    }
    parse_language_tag(tag).map(|_| ())
}

/// Get the English name of a language, falling back to the tag itself
pub fn get_language_name(tag: &str) -> String {
    if tag.trim().eq_ignore_ascii_case(AUTO) {
        return "the source language".to_string();
    }
    let Ok(parsed) = parse_language_tag(tag) else {
        return tag.to_string();
    };
    let language = match parsed.primary.len() {
        2 => Language::from_639_1(&parsed.primary),
        _ => Language::from_639_3(&parsed.primary),
    };
    let name = language
        .map(|l| l.to_name().to_string())
        .unwrap_or_else(|| parsed.primary.clone());

    match parsed.script {
        Some(Script::Latin) => format!("{} (Latin script)", name),
        Some(Script::Cyrillic) => format!("{} (Cyrillic script)", name),
        None => name,
    }
}

/// Whether text in this language may be written in the given script
pub fn script_supported(tag: &str, script: Script) -> bool {
    let Ok(parsed) = parse_language_tag(tag) else {
        return false;
    };
    let primary = match parsed.primary.len() {
        3 => Language::from_639_3(&parsed.primary)
            .and_then(|l| l.to_639_1())
            .map(|c| c.to_string())
            .unwrap_or(parsed.primary),
        _ => parsed.primary,
    };
    match script {
        Script::Cyrillic => CYRILLIC_LANGUAGES.contains(&primary.as_str()),
        // every language in the table can be romanised
        Script::Latin => true,
    }
}

/// Check if two tags name the same primary language
pub fn language_codes_match(a: &str, b: &str) -> bool {
    match (parse_language_tag(a), parse_language_tag(b)) {
        (Ok(a), Ok(b)) => {
            let to_part3 = |t: &LanguageTag| match t.primary.len() {
                2 => Language::from_639_1(&t.primary).map(|l| l.to_639_3().to_string()),
                _ => Some(t.primary.clone()),
            };
            to_part3(&a) == to_part3(&b)
        }
        _ => false,
    }
}
