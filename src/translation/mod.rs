/*!
 * Translation engine for literary ebooks.
 *
 * The engine is split into several submodules:
 *
 * - `document`: Document model and the built-in readers and writers
 * - `segmenter`: Splits chapters into budget-sized segments
 * - `prompts`: Prompt templates, response parsing and the analysis schema
 * - `context`: Glossary memory, entity detection and the style profile
 * - `cache`: Content-addressed translation cache and singleflight
 * - `retry`: Retry and backoff policy
 * - `concurrency`: Worker pool with in-flight and token-rate limits
 * - `quality`: Output checks, script handling, seam repair and verification
 * - `events`: Progress event bus
 * - `report`: Run report and statistics
 * - `pipeline`: Preparation, translation, finalization and verification of a run
 */

// Re-export main types for easier usage
pub use self::cache::TranslationCache;
pub use self::document::{Chapter, Document, DocumentMetadata, Section};
pub use self::events::{Event, EventBus, EventKind};
pub use self::pipeline::{PreparationPass, RunOutcome, TranslationPipeline, VerificationPass, WorkPlan};
pub use self::report::{RunReport, RunStats, RunStatus, VerificationReport};

// Submodules
pub mod cache;
pub mod concurrency;
pub mod context;
pub mod document;
pub mod events;
pub mod pipeline;
pub mod prompts;
pub mod quality;
pub mod report;
pub mod retry;
pub mod segmenter;
