use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::TranslationError;
use crate::language_utils::{self, Script};

/// Application configuration module
///
/// Everything a run needs is in `Config`. The binary loads it from JSON,
/// applies CLI overrides, validates it once and then hands an immutable
/// copy to the engine.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Back-end selection and limits
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Languages, script and run-wide knobs
    #[serde(default)]
    pub run: RunConfig,

    /// Durable translation cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Preparation pre-scan
    #[serde(default)]
    pub preparation: PreparationConfig,

    /// Back-ends tried in order when the primary one fails
    #[serde(default)]
    pub fallbacks: Vec<ProviderConfig>,

    /// Check and polish pass after the run
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Recognized back-ends
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ProviderId {
    // @provider: OpenAI-compatible chat completions
    #[default]
    HostedChat,
    // @provider: Anthropic messages
    HostedChatAlt1,
    // @provider: Ollama chat
    HostedChatAlt2,
    // @provider: llama.cpp style binary run as a subprocess
    LocalInference,
    // @provider: HTTP inference worker on another host
    RemoteInference,
}

impl ProviderId {
    // @returns: Human readable back-end name
    pub fn display_name(&self) -> &str {
        match self {
            Self::HostedChat => "OpenAI-compatible",
            Self::HostedChatAlt1 => "Anthropic",
            Self::HostedChatAlt2 => "Ollama",
            Self::LocalInference => "local inference",
            Self::RemoteInference => "remote inference",
        }
    }

    // @returns: Whether the back-end needs a credential
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::HostedChat | Self::HostedChatAlt1)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::HostedChat => "hostedChat",
            Self::HostedChatAlt1 => "hostedChatAlt1",
            Self::HostedChatAlt2 => "hostedChatAlt2",
            Self::LocalInference => "localInference",
            Self::RemoteInference => "remoteInference",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hostedchat" | "openai" => Ok(Self::HostedChat),
            "hostedchatalt1" | "anthropic" => Ok(Self::HostedChatAlt1),
            "hostedchatalt2" | "ollama" => Ok(Self::HostedChatAlt2),
            "localinference" | "local" | "llamacpp" => Ok(Self::LocalInference),
            "remoteinference" | "remote" => Ok(Self::RemoteInference),
            _ => Err(anyhow!("Invalid provider: {}", s)),
        }
    }
}

/// Opaque credential that never shows up in logs
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***")
    }
}

/// Provider configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    // @field: Back-end selection
    #[serde(default)]
    pub provider_id: ProviderId,

    // @field: Back-end specific model identifier
    #[serde(default = "String::new")]
    pub model: String,

    // @field: Base endpoint, empty means the back-end default
    #[serde(default = "String::new")]
    pub base_url: String,

    // @field: API key or bearer token
    #[serde(default)]
    pub credential: Secret,

    // @field: Context window, discovered from the adapter when omitted
    #[serde(default)]
    pub max_context_tokens: Option<usize>,

    // @field: Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    // @field: Completion budget per call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,

    // @field: Concurrent provider calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    // @field: Rate budget, unlimited when omitted
    #[serde(default)]
    pub tokens_per_minute: Option<u32>,

    // @field: Per call timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    // @field: Inference binary for localInference
    #[serde(default)]
    pub executable: Option<PathBuf>,

    // @field: CPU threads for localInference
    #[serde(default = "default_threads")]
    pub threads: usize,

    // @field: Layers offloaded to the GPU for localInference, 0 disables
    #[serde(default)]
    pub gpu_layers: u32,

    // @field: Extra arguments appended to the localInference command line
    #[serde(default)]
    pub extra_args: Vec<String>,

    // @field: API version header for hostedChatAlt1
    #[serde(default = "default_anthropic_version")]
    pub api_version: String,
}

impl ProviderConfig {
    // @param provider_id: Back-end
    // @returns: Provider config with back-end defaults
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            model: default_model(provider_id),
            base_url: default_base_url(provider_id),
            ..Self::default()
        }
    }

    // @returns: Base URL, falling back to the back-end default
    pub fn endpoint(&self) -> String {
        if self.base_url.trim().is_empty() {
            default_base_url(self.provider_id)
        } else {
            self.base_url.trim_end_matches('/').to_string()
        }
    }

    // @returns: Credential from config or LITWAI_API_KEY
    pub fn resolve_credential(&self) -> Secret {
        if !self.credential.is_empty() {
            return self.credential.clone();
        }
        std::env::var("LITWAI_API_KEY")
            .map(Secret::new)
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: ProviderId::default(),
            model: String::new(),
            base_url: String::new(),
            credential: Secret::default(),
            max_context_tokens: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_in_flight: default_max_in_flight(),
            tokens_per_minute: None,
            timeout_seconds: default_timeout_seconds(),
            executable: None,
            threads: default_threads(),
            gpu_layers: 0,
            extra_args: Vec::new(),
            api_version: default_anthropic_version(),
        }
    }
}

/// Run configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// BCP-47-like tag or `auto`
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// BCP-47-like tag, required
    #[serde(default = "String::new")]
    pub target_language: String,

    /// Enforced output script
    #[serde(default)]
    pub target_script: Option<Script>,

    /// Regional variant the translation should follow, e.g. "ekavian"
    #[serde(default)]
    pub dialect_target: Option<String>,

    /// Chapters translated at the same time
    #[serde(default = "default_max_chapters_in_flight")]
    pub max_chapters_in_flight: usize,

    /// Bumping this invalidates every cached translation
    #[serde(default = "default_prompt_version")]
    pub prompt_version: u32,

    /// Prefix for segments that need human review
    #[serde(default = "default_review_marker")]
    pub review_marker: String,

    /// Characters of neighbouring text passed as context
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,

    /// Upper bound on how long cancellation may take
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,

    /// Transliterate the finished document into the target script
    #[serde(default)]
    pub convert_output_script: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_language: default_source_language(),
            target_language: String::new(),
            target_script: None,
            dialect_target: None,
            max_chapters_in_flight: default_max_chapters_in_flight(),
            prompt_version: default_prompt_version(),
            review_marker: default_review_marker(),
            context_chars: default_context_chars(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
            convert_output_script: false,
        }
    }
}

/// Translation cache configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Whether caching is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding one JSON file per key
    #[serde(default = "default_cache_dir")]
    pub directory: PathBuf,

    /// Record lifetime, forever when omitted
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            ttl_seconds: None,
        }
    }
}

/// Retry and backoff configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Relative jitter, 0.3 means ±30%
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Total attempts for transient failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retries for malformed output before the strict prompt
    #[serde(default = "default_malformed_retries")]
    pub malformed_retries: u32,

    /// Temperature reduction per malformed retry
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            max_attempts: default_max_attempts(),
            malformed_retries: default_malformed_retries(),
            temperature_step: default_temperature_step(),
        }
    }
}

/// Preparation pass configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PreparationConfig {
    /// Whether to run the pre-scan at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum sampled chapters
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,

    /// Share of the remaining chapters sampled at random
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,

    /// Characters sent per sampled chapter
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_cap: default_sample_cap(),
            sample_ratio: default_sample_ratio(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

/// Verification and polish pass configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// Check the translated book once the run completes
    #[serde(default)]
    pub enabled: bool,

    /// Ask the provider to repair blocks that fail a check
    #[serde(default = "default_true")]
    pub polish: bool,

    /// Book score under which the verification marks the book invalid
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Most blocks sent for polishing in one run
    #[serde(default = "default_max_polished_blocks")]
    pub max_polished_blocks: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            polish: true,
            min_score: default_min_score(),
            max_polished_blocks: default_max_polished_blocks(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_output_tokens() -> usize {
    4000
}

fn default_max_in_flight() -> usize {
    4
}

fn default_timeout_seconds() -> u64 {
    180
}

fn default_threads() -> usize {
    4
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

fn default_source_language() -> String {
    language_utils::AUTO.to_string()
}

fn default_max_chapters_in_flight() -> usize {
    2
}

fn default_prompt_version() -> u32 {
    1
}

fn default_review_marker() -> String {
    "[REVIEW]".to_string()
}

fn default_context_chars() -> usize {
    300
}

fn default_cancel_grace_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("litwai")
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.3
}

fn default_max_attempts() -> u32 {
    6
}

fn default_malformed_retries() -> u32 {
    3
}

fn default_temperature_step() -> f32 {
    0.1
}

fn default_sample_cap() -> usize {
    8
}

fn default_sample_ratio() -> f64 {
    0.1
}

fn default_excerpt_chars() -> usize {
    4000
}

fn default_min_score() -> f64 {
    0.95
}

fn default_max_polished_blocks() -> usize {
    50
}

fn default_base_url(provider_id: ProviderId) -> String {
    match provider_id {
        ProviderId::HostedChat => "https://api.openai.com/v1".to_string(),
        ProviderId::HostedChatAlt1 => "https://api.anthropic.com".to_string(),
        ProviderId::HostedChatAlt2 => "http://localhost:11434".to_string(),
        ProviderId::LocalInference => String::new(),
        ProviderId::RemoteInference => "http://localhost:8089".to_string(),
    }
}

fn default_model(provider_id: ProviderId) -> String {
    match provider_id {
        ProviderId::HostedChat => "gpt-4o-mini".to_string(),
        ProviderId::HostedChatAlt1 => "claude-3-5-haiku-latest".to_string(),
        ProviderId::HostedChatAlt2 => "llama3.1".to_string(),
        // a path to a GGUF file for the local binary
        ProviderId::LocalInference => String::new(),
        ProviderId::RemoteInference => String::new(),
    }
}

impl Config {
    /// Config for a provider and target language with everything else defaulted
    pub fn for_target(provider_id: ProviderId, target_language: &str) -> Self {
        Self {
            provider: ProviderConfig::new(provider_id),
            run: RunConfig {
                target_language: target_language.to_string(),
                ..RunConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> std::result::Result<(), TranslationError> {
        let invalid = |msg: String| Err(TranslationError::Configuration(msg));

        if self.run.target_language.trim().is_empty() {
            return invalid("targetLanguage is required".to_string());
        }
        language_utils::validate_language_tag(&self.run.target_language, false)
            .map_err(|e| TranslationError::Configuration(e.to_string()))?;
        language_utils::validate_language_tag(&self.run.source_language, true)
            .map_err(|e| TranslationError::Configuration(e.to_string()))?;

        if let Some(script) = self.run.target_script {
            if !language_utils::script_supported(&self.run.target_language, script) {
                return invalid(format!(
                    "Target script {} is incompatible with language {}",
                    script, self.run.target_language
                ));
            }
        }

        Self::validate_provider(&self.provider, "provider")?;
        for (i, fallback) in self.fallbacks.iter().enumerate() {
            Self::validate_provider(fallback, &format!("fallbacks[{}]", i))?;
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return invalid(format!(
                "temperature must be within 0..2, got {}",
                self.provider.temperature
            ));
        }
        if self.provider.max_output_tokens == 0
            || self.provider.max_in_flight == 0
            || self.provider.timeout_seconds == 0
            || self.run.max_chapters_in_flight == 0
            || self.retry.max_attempts == 0
            || self.provider.max_context_tokens == Some(0)
            || self.provider.tokens_per_minute == Some(0)
        {
            return invalid("numeric limits must be greater than zero".to_string());
        }
        if self.run.review_marker.trim().is_empty() {
            return invalid("reviewMarker must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.verification.min_score) {
            return invalid(format!(
                "verification.minScore must be within 0..1, got {}",
                self.verification.min_score
            ));
        }

        Ok(())
    }

    fn validate_provider(provider: &ProviderConfig, label: &str) -> std::result::Result<(), TranslationError> {
        let invalid = |msg: String| Err(TranslationError::Configuration(msg));

        if provider.provider_id.requires_credential() && provider.resolve_credential().is_empty() {
            return invalid(format!(
                "A credential is required for the {} provider ({})",
                provider.provider_id.display_name(),
                label
            ));
        }
        if provider.model.trim().is_empty() {
            return invalid(format!("{}: model is required", label));
        }
        if provider.provider_id == ProviderId::LocalInference && provider.executable.is_none() {
            return invalid(format!("{}: executable is required for localInference", label));
        }
        if provider.max_context_tokens == Some(0) || provider.timeout_seconds == 0 {
            return invalid(format!("{}: numeric limits must be greater than zero", label));
        }
        Ok(())
    }
}
