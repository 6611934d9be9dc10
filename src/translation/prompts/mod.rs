/*!
 * Prompt engineering for literary translation.
 *
 * This module provides:
 * - The translation system prompt and JSON user request
 * - Rephrased and strict variants used by the retry policy
 * - The response envelope parser
 * - The preparation analysis prompt and schema
 * - The polish request and its answer format
 */

pub mod polish;
pub mod preparation;
pub mod templates;

pub use polish::{PolishAnswer, PolishPromptBuilder, parse_polish};
pub use preparation::{AnalysisPromptBuilder, ContentAnalysis, Excerpt, parse_analysis};
pub use templates::{
    PromptTemplate, PromptVariant, ResponseEnvelope, SegmentRequest, TranslationPromptBuilder, looks_like_refusal,
    parse_envelope,
};
