/*!
 * Style profile for a run.
 *
 * Produced once by the preparation pass and then read-only. Its digest is
 * part of every cache key, so two runs with different styles never share
 * translations.
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::language_utils::Script;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleProfile {
    /// e.g. "literary fiction", "fantasy"
    #[serde(default = "default_genre")]
    pub genre: String,

    /// "formal", "neutral" or "colloquial"
    #[serde(default = "default_register")]
    pub register: String,

    #[serde(default)]
    pub tone: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,

    /// Regional variant of the target language, e.g. "ekavian"
    #[serde(default)]
    pub dialect_target: Option<String>,

    #[serde(default)]
    pub script_target: Option<Script>,
}

fn default_genre() -> String {
    "literary fiction".to_string()
}

fn default_register() -> String {
    "neutral".to_string()
}

impl Default for StyleProfile {
    fn default() -> Self {
        Self {
            genre: default_genre(),
            register: default_register(),
            tone: None,
            audience: None,
            dialect_target: None,
            script_target: None,
        }
    }
}

impl StyleProfile {
    /// Stable digest over every field
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let fields = [
            self.genre.as_str(),
            self.register.as_str(),
            self.tone.as_deref().unwrap_or(""),
            self.audience.as_deref().unwrap_or(""),
            self.dialect_target.as_deref().unwrap_or(""),
            self.script_target.map(|s| s.iso_code()).unwrap_or(""),
        ];
        for field in fields {
            hasher.update(field.trim().to_lowercase().as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Style guidance lines for the system prompt
    pub fn guidance(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Genre: {}", self.genre),
            format!("Register: {}", self.register),
        ];
        if let Some(tone) = &self.tone {
            lines.push(format!("Tone: {}", tone));
        }
        if let Some(audience) = &self.audience {
            lines.push(format!("Audience: {}", audience));
        }
        if let Some(dialect) = &self.dialect_target {
            lines.push(format!("Dialect: {}", dialect));
        }
        if let Some(script) = self.script_target {
            lines.push(format!("Write in {} script only", script));
        }
        lines
    }
}
