/*!
 * # LitwAI - Literary translation with AI
 *
 * A Rust library for translating whole ebooks with large language models.
 *
 * ## Features
 *
 * - Split chapters into segments that fit the model's context window
 * - Translate using various AI providers:
 *   - Ollama (local LLM)
 *   - OpenAI compatible chat APIs
 *   - Anthropic API
 *   - A local llama.cpp style executable
 * - Keep names and terms consistent across the book with a shared glossary
 * - Content-addressed cache so an interrupted run resumes without paying twice
 * - Retries with backoff, rephrased prompts for refusals and a review marker
 *   for anything that still fails
 * - Serbian Cyrillic/Latin output with deterministic conversion
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `translation`: The translation engine:
 *   - `translation::document`: Document model, readers and writers
 *   - `translation::segmenter`: Budget-aware segmentation
 *   - `translation::pipeline`: Preparation pass, translation pass and finalizer
 *   - `translation::cache`: Translation cache
 *   - `translation::events`: Progress events
 * - `file_utils`: File system operations
 * - `app_controller`: Main application controller
 * - `language_utils`: BCP-47 language tag and script utilities
 * - `providers`: Client implementations for various LLM providers
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use errors::{AppError, ErrorKind, ProviderError, TranslationError};
pub use language_utils::{Script, get_language_name, language_codes_match};
pub use translation::{Document, RunOutcome, TranslationPipeline};
