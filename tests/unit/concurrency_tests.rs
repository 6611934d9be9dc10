/*!
 * Tests for the worker pool and token bucket
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use litwai::app_config::ProviderId;
use litwai::errors::TranslationError;
use litwai::translation::concurrency::{ProviderProfile, TokenBucket, WorkerPool};

#[tokio::test]
async fn test_run_manyTasks_shouldNeverExceedPermits() {
    let pool = WorkerPool::new(3, None, CancellationToken::new());
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let pool = pool.clone();
            let current = current.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                pool.run(10, async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(pool.available(), 3);
}

#[tokio::test]
async fn test_run_cancelledWhileWaiting_shouldReturnCancelled() {
    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(1, None, cancel.clone());
    let busy = pool.clone();
    let holder = tokio::spawn(async move {
        busy.run(1, tokio::time::sleep(Duration::from_secs(30))).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waiter = pool.clone();
    let queued = tokio::spawn(async move { waiter.run(1, async { 1 }).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    assert!(matches!(queued.await.unwrap(), Err(TranslationError::Cancelled)));
    assert!(matches!(holder.await.unwrap(), Err(TranslationError::Cancelled)));
    assert!(pool.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_tokenBucket_whenEmpty_shouldWaitForRefill() {
    let bucket = TokenBucket::per_minute(60);
    let start = Instant::now();
    bucket.acquire(60).await;
    assert!(start.elapsed() < Duration::from_secs(1));

    bucket.acquire(30).await;
    assert!(start.elapsed() >= Duration::from_secs(29));
}

#[tokio::test(start_paused = true)]
async fn test_tokenBucket_oversizedRequest_shouldWaitForFullBucketOnly() {
    let bucket = TokenBucket::per_minute(60);
    bucket.acquire(60).await;
    let start = Instant::now();
    bucket.acquire(10_000).await;
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(59));
    assert!(waited <= Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn test_run_withTokenBudget_shouldThrottleCalls() {
    let pool = WorkerPool::new(4, Some(600), CancellationToken::new());
    let start = Instant::now();
    for _ in 0..3 {
        pool.run(300, async {}).await.unwrap();
    }
    // 600 tokens up front, the third call waits 30s for its 300
    assert!(start.elapsed() >= Duration::from_secs(29));
}

#[test]
fn test_providerProfile_shouldSerializeLocalInference() {
    let local = ProviderProfile::for_provider(ProviderId::LocalInference);
    assert_eq!(local.max_concurrent_requests, 1);
    assert_eq!(local.effective_concurrent_requests(None), 1);
    assert_eq!(local.effective_concurrent_requests(Some(0)), 1);
    let hosted = ProviderProfile::for_provider(ProviderId::HostedChat);
    assert_eq!(hosted.effective_concurrent_requests(Some(6)), 6);
}
