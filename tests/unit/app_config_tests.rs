/*!
 * Tests for configuration loading and validation
 */

use litwai::app_config::{Config, LogLevel, ProviderConfig, ProviderId, Secret};
use litwai::language_utils::Script;

fn local_config() -> Config {
    let mut config = Config::for_target(ProviderId::HostedChatAlt2, "sr");
    config.provider.model = "llama3.1".to_string();
    config
}

#[test]
fn test_config_fromPartialJson_shouldFillDefaults() {
    let json = r#"{
        "provider": { "providerId": "hostedChatAlt2", "model": "llama3.1" },
        "run": { "targetLanguage": "de", "targetScript": "latin" }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.provider.provider_id, ProviderId::HostedChatAlt2);
    assert_eq!(config.run.target_language, "de");
    assert_eq!(config.run.source_language, "auto");
    assert_eq!(config.run.target_script, Some(Script::Latin));
    assert_eq!(config.run.review_marker, "[REVIEW]");
    assert_eq!(config.run.max_chapters_in_flight, 2);
    assert_eq!(config.retry.max_attempts, 6);
    assert_eq!(config.retry.base_delay_ms, 2000);
    assert!(config.cache.enabled);
    assert_eq!(config.log_level, LogLevel::Info);
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_serialize_shouldUseCamelCaseKeys() {
    let json = serde_json::to_string(&local_config()).unwrap();
    assert!(json.contains("\"targetLanguage\":\"sr\""));
    assert!(json.contains("\"maxInFlight\""));
    assert!(json.contains("\"reviewMarker\""));
}

#[test]
fn test_validate_withInvalidTargetTag_shouldFail() {
    let mut config = local_config();
    config.run.target_language = "xx-invalid".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withCyrillicForGerman_shouldFail() {
    let mut config = local_config();
    config.run.target_language = "de".to_string();
    config.run.target_script = Some(Script::Cyrillic);
    assert!(config.validate().is_err());

    config.run.target_language = "sr".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_withZeroLimits_shouldFail() {
    let mut config = local_config();
    config.provider.max_in_flight = 0;
    assert!(config.validate().is_err());

    let mut config = local_config();
    config.run.max_chapters_in_flight = 0;
    assert!(config.validate().is_err());

    let mut config = local_config();
    config.retry.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withEmptyReviewMarker_shouldFail() {
    let mut config = local_config();
    config.run.review_marker = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_localInferenceWithoutExecutable_shouldFail() {
    let mut config = local_config();
    config.provider = ProviderConfig::new(ProviderId::LocalInference);
    config.provider.model = "/models/book.gguf".to_string();
    assert!(config.validate().is_err());

    config.provider.executable = Some("/usr/local/bin/llama-cli".into());
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_hostedChatWithCredential_shouldPass() {
    let mut config = Config::for_target(ProviderId::HostedChat, "fr");
    config.provider.credential = Secret::new("sk-test");
    assert!(config.validate().is_ok());
}

#[test]
fn test_secret_debugAndDisplay_shouldNotLeak() {
    let secret = Secret::new("sk-very-secret");
    assert_eq!(format!("{:?}", secret), "***");
    assert_eq!(format!("{}", secret), "***");
    assert_eq!(secret.expose(), "sk-very-secret");
}

#[test]
fn test_providerConfig_endpoint_shouldTrimTrailingSlash() {
    let mut provider = ProviderConfig::new(ProviderId::HostedChatAlt2);
    provider.base_url = "http://gpu-box:11434/".to_string();
    assert_eq!(provider.endpoint(), "http://gpu-box:11434");
}
