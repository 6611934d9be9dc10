/*!
 * Tests for language tags and script handling
 */

use litwai::language_utils::{
    Script, get_language_name, language_codes_match, parse_language_tag, script_supported, validate_language_tag,
};
use litwai::translation::quality::script::{ScriptStats, guess_language, to_cyrillic, to_latin, transliterate};
use litwai::translation::quality::{convert, matches_script};

#[test]
fn test_parseLanguageTag_withUnderscoreAndRegion_shouldNormalize() {
    let tag = parse_language_tag("pt_br").unwrap();
    assert_eq!(tag.primary, "pt");
    assert_eq!(tag.region.as_deref(), Some("BR"));
    assert_eq!(tag.script, None);
}

#[test]
fn test_parseLanguageTag_withThreeLetterCode_shouldAccept() {
    assert_eq!(parse_language_tag("srp").unwrap().primary, "srp");
    assert!(parse_language_tag("abcd").is_err());
}

#[test]
fn test_validateLanguageTag_shouldTrimAndIgnoreCase() {
    assert!(validate_language_tag(" AUTO ", true).is_ok());
    assert!(validate_language_tag("SR-Cyrl", false).is_ok());
}

#[test]
fn test_getLanguageName_shouldFallBackToTag() {
    assert_eq!(get_language_name("sr-Cyrl"), "Serbian (Cyrillic script)");
    assert_eq!(get_language_name("auto"), "the source language");
    assert_eq!(get_language_name("12-ab"), "12-ab");
}

#[test]
fn test_scriptSupported_shouldFollowOrthography() {
    assert!(script_supported("ru", Script::Cyrillic));
    assert!(script_supported("mk", Script::Cyrillic));
    assert!(!script_supported("fr", Script::Cyrillic));
    assert!(!script_supported("garbage", Script::Latin));
}

#[test]
fn test_languageCodesMatch_shouldIgnoreScriptSubtags() {
    assert!(language_codes_match("sr-Latn", "sr-Cyrl"));
    assert!(language_codes_match("de", "deu"));
    assert!(!language_codes_match("en", "invalid"));
}

#[test]
fn test_script_parseAndDisplay_shouldAcceptIsoCodes() {
    assert_eq!("Cyrl".parse::<Script>().unwrap(), Script::Cyrillic);
    assert_eq!("latin".parse::<Script>().unwrap(), Script::Latin);
    assert!("greek".parse::<Script>().is_err());
    assert_eq!(Script::Cyrillic.to_string(), "cyrillic");
    assert_eq!(Script::Latin.iso_code(), "Latn");
}

#[test]
fn test_serbianTransliteration_shouldRoundTripNames() {
    let cyrillic = "Ђорђе, Љиљана и Џон су ишли у Чачак.";
    let latin = to_latin(cyrillic);
    assert_eq!(latin, "Đorđe, Ljiljana i Džon su išli u Čačak.");
    assert_eq!(to_cyrillic(&latin), cyrillic);
}

#[test]
fn test_convert_shouldOnlyActOnTheWrongDominantScript() {
    assert_eq!(convert("Пера", Script::Latin), "Pera");
    assert_eq!(convert("Pera i Мика", Script::Latin), "Pera i Мика");
    assert_eq!(transliterate("Pera i Мика", Script::Latin), "Pera i Mika");
}

#[test]
fn test_matchesScript_andStats_shouldCountLettersOnly() {
    assert!(matches_script("Добро јутро, 2024!", Script::Cyrillic, 0.9));
    assert!(!matches_script("Dobro jutro", Script::Cyrillic, 0.9));
    assert_eq!(ScriptStats::of("Dobro jutro").dominant(), Some(Script::Latin));
    assert_eq!(guess_language("漢字の本"), Some("zh"));
}
