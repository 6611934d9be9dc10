/*!
 * Run report: per-segment results, unresolved segments and run statistics.
 */

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::translation::quality::verifier::Verification;

/// Final state of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentStatus {
    /// Translated by the provider
    Succeeded,
    /// Served from the cache or a concurrent identical request
    Cached,
    /// Replaced by the review-marked source text
    Flagged,
    /// Left untranslated because the run stopped
    Cancelled,
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Outcome of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub segment_id: String,
    pub chapter_id: String,
    pub block_index: usize,
    pub translation: String,
    pub provider_id: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub retries: u32,
    pub duration_ms: u64,
    pub status: SegmentStatus,
}

/// A segment an operator has to look at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedSegment {
    pub segment_id: String,
    pub chapter_id: String,
    pub block_index: usize,
    pub reason: UnresolvedReason,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why a segment is unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnresolvedReason {
    RetriesExhausted,
    Refused,
    Malformed,
    ContextOverflow,
    Cancelled,
}

impl From<ErrorKind> for UnresolvedReason {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Refusal => UnresolvedReason::Refused,
            ErrorKind::Malformed => UnresolvedReason::Malformed,
            ErrorKind::ContextOverflow => UnresolvedReason::ContextOverflow,
            ErrorKind::Cancelled => UnresolvedReason::Cancelled,
            _ => UnresolvedReason::RetriesExhausted,
        }
    }
}

/// Counters for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub chapters: usize,
    pub chapters_completed: usize,
    pub segments: usize,
    pub translated: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub shared_waits: usize,
    pub retries: u64,
    pub resegmented: usize,
    pub segmenter_calls: usize,
    /// Segments that failed and were flagged for review
    pub review_flagged: usize,
    /// Output blocks that carry the review marker
    #[serde(default)]
    pub flagged_blocks: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl RunStats {
    /// Share of segments that never reached the provider
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    /// Human readable summary
    pub fn summary(&self, duration: std::time::Duration) -> String {
        let secs = duration.as_secs_f64().max(0.001);
        let tokens = self.tokens_in + self.tokens_out;
        format!(
            "Chapters: {}/{} | Segments: {} ({} translated, {} cached, {} flagged) | Cache hit rate: {:.1}% | Retries: {} | Resegmented: {} | Tokens: {} in, {} out ({:.0}/min) | Time: {:.1}s",
            self.chapters_completed,
            self.chapters,
            self.segments,
            self.translated,
            self.cache_hits + self.shared_waits,
            self.review_flagged,
            self.cache_hit_rate() * 100.0,
            self.retries,
            self.resegmented,
            self.tokens_in,
            self.tokens_out,
            tokens as f64 / secs * 60.0,
            secs
        )
    }
}

/// Outcome of the verification and polish pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Book score before any block was polished
    pub score_before: f64,
    pub polished_blocks: usize,
    /// Polish requests that failed or came back unusable
    pub polish_rejected: usize,
    /// Whether the book meets the configured minimum score
    pub valid: bool,
    /// State of the book as written
    pub result: Verification,
}

/// Everything written next to the output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
    pub results: Vec<TranslationResult>,
    pub unresolved: Vec<UnresolvedSegment>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

impl RunReport {
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Result for a segment id
    pub fn result(&self, segment_id: &str) -> Option<&TranslationResult> {
        self.results.iter().find(|r| r.segment_id == segment_id)
    }
}

/// Collects results while a run is in progress
#[derive(Debug, Default)]
pub struct ReportCollector {
    inner: Mutex<Collected>,
}

#[derive(Debug, Default)]
struct Collected {
    stats: RunStats,
    results: Vec<TranslationResult>,
    unresolved: Vec<UnresolvedSegment>,
    warnings: Vec<String>,
}

impl ReportCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished segment and keep the counters in step
    pub fn record_result(&self, result: TranslationResult) {
        let mut inner = self.inner.lock();
        inner.stats.segments += 1;
        inner.stats.retries += u64::from(result.retries);
        inner.stats.tokens_in += result.tokens_in;
        inner.stats.tokens_out += result.tokens_out;
        match result.status {
            SegmentStatus::Succeeded => inner.stats.translated += 1,
            SegmentStatus::Flagged => inner.stats.review_flagged += 1,
            SegmentStatus::Cached | SegmentStatus::Cancelled => {}
        }
        inner.results.push(result);
    }

    pub fn record_unresolved(&self, unresolved: UnresolvedSegment) {
        self.inner.lock().unresolved.push(unresolved);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.inner.lock().warnings.push(message.into());
    }

    /// Apply a change to the counters
    pub fn update(&self, f: impl FnOnce(&mut RunStats)) {
        f(&mut self.inner.lock().stats);
    }

    pub fn stats(&self) -> RunStats {
        self.inner.lock().stats.clone()
    }

    /// Build the final report; results are ordered by chapter and block
    pub fn finish(&self, run_id: &str, status: RunStatus, started_at: DateTime<Utc>, chapter_order: &[String]) -> RunReport {
        let inner = self.inner.lock();
        let position = |chapter_id: &str| {
            chapter_order
                .iter()
                .position(|c| c == chapter_id)
                .unwrap_or(usize::MAX)
        };
        let mut results = inner.results.clone();
        results.sort_by_key(|r| (position(&r.chapter_id), r.block_index));
        let mut unresolved = inner.unresolved.clone();
        unresolved.sort_by_key(|u| (position(&u.chapter_id), u.block_index));

        RunReport {
            run_id: run_id.to_string(),
            status,
            started_at,
            finished_at: Utc::now(),
            stats: inner.stats.clone(),
            results,
            unresolved,
            warnings: inner.warnings.clone(),
            verification: None,
        }
    }
}
