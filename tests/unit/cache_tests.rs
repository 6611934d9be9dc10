/*!
 * Tests for translation cache functionality
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use litwai::app_config::CacheConfig;
use litwai::translation::cache::{CacheKey, CacheKeyParts, CacheRecord, Singleflight, TranslationCache, source_hash};

use crate::common;

fn key(segment_id: &str, target_language: &str) -> CacheKey {
    CacheKey::compute(CacheKeyParts {
        model: "gpt-4o-mini",
        prompt_version: 1,
        target_language,
        segment_id,
        style_digest: "style",
        glossary_digest: "glossary",
    })
}

fn record(key: &CacheKey, translation: &str) -> CacheRecord {
    CacheRecord {
        key: key.clone(),
        model: "gpt-4o-mini".to_string(),
        provider_id: "hostedChat".to_string(),
        prompt_version: 1,
        source_hash: source_hash("Hello."),
        translation: translation.to_string(),
        created_at: Utc::now(),
        named_entities: BTreeMap::from([("Ivan".to_string(), "Иван".to_string())]),
        tokens_in: 12,
        tokens_out: 9,
    }
}

fn config(dir: &std::path::Path) -> CacheConfig {
    CacheConfig {
        enabled: true,
        directory: dir.to_path_buf(),
        ttl_seconds: None,
    }
}

#[test]
fn test_cacheKey_withDifferentTargetLanguage_shouldDiffer() {
    assert_ne!(key("seg", "sr"), key("seg", "hr"));
    assert_eq!(key("seg", "sr"), key("seg", "SR"));
    assert_eq!(key("seg", "sr").as_str().len(), 64);
}

#[test]
fn test_get_shouldCountHitsAndMisses() {
    let cache = TranslationCache::in_memory();
    let k = key("seg-1", "sr");
    assert!(cache.get(&k).is_none());
    cache.put(record(&k, "Здраво."));
    assert_eq!(cache.get(&k).map(|r| r.translation.clone()).as_deref(), Some("Здраво."));

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn test_open_afterFlush_shouldReplayRecordsAndEntities() {
    let dir = common::create_temp_dir().unwrap();
    let k = key("seg-1", "sr");
    {
        let cache = TranslationCache::open(&config(dir.path())).unwrap();
        cache.put(record(&k, "Здраво."));
        cache.flush().await;
    }

    let reopened = TranslationCache::open(&config(dir.path())).unwrap();
    let found = reopened.get(&k).unwrap();
    assert_eq!(found.translation, "Здраво.");
    assert_eq!(found.named_entities.get("Ivan").map(String::as_str), Some("Иван"));
    assert_eq!(found.tokens_out, 9);
}

#[tokio::test]
async fn test_open_withExpiredRecords_shouldSkipThem() {
    let dir = common::create_temp_dir().unwrap();
    let k = key("seg-old", "sr");
    {
        let cache = TranslationCache::open(&config(dir.path())).unwrap();
        let mut old = record(&k, "Старо.");
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        cache.put(old);
        cache.flush().await;
    }

    let mut with_ttl = config(dir.path());
    with_ttl.ttl_seconds = Some(60);
    let cache = TranslationCache::open(&with_ttl).unwrap();
    assert!(cache.get(&k).is_none());
}

#[tokio::test]
async fn test_open_withUnreadableRecord_shouldIgnoreIt() {
    let dir = common::create_temp_dir().unwrap();
    common::create_test_file(dir.path(), "broken.json", "{ not json").unwrap();
    let cache = TranslationCache::open(&config(dir.path())).unwrap();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_plans_shouldPersistUnderTheirKey() {
    let dir = common::create_temp_dir().unwrap();
    let plan_key = CacheKey::from_raw("plan:book-hash");
    {
        let cache = TranslationCache::open(&config(dir.path())).unwrap();
        cache.put_plan(&plan_key, json!({ "contentType": "novel" }));
        cache.flush().await;
    }
    let cache = TranslationCache::open(&config(dir.path())).unwrap();
    assert_eq!(cache.get_plan(&plan_key), Some(json!({ "contentType": "novel" })));
}

#[test]
fn test_open_whenDisabled_shouldNeverStore() {
    let cache = TranslationCache::open(&CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    })
    .unwrap();
    let k = key("seg", "sr");
    cache.put(record(&k, "x"));
    assert!(!cache.is_enabled());
    assert!(cache.get(&k).is_none());
    assert_eq!(cache.stats().writes, 0);
}

#[tokio::test]
async fn test_singleflight_shouldReleaseKeyAfterLeaderFinishes() {
    let flight: Arc<Singleflight<u32>> = Arc::new(Singleflight::new());
    let first = flight.clone();
    let leader = tokio::spawn(async move {
        first
            .run("k", || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                7
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (value, was_leader) = flight.run("k", || async { 8 }).await;
    assert_eq!(value, 7);
    assert!(!was_leader);
    assert_eq!(leader.await.unwrap(), (7, true));
    assert_eq!(flight.in_flight(), 0);

    let (again, was_leader) = flight.run("k", || async { 9 }).await;
    assert_eq!((again, was_leader), (9, true));
}
