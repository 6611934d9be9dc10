/*!
 * Quality checks for model output.
 *
 * This module provides:
 * - **Output checks**: empty, echoed and wrong-script answers are rejected
 * - **Script**: letter statistics and Serbian Cyrillic/Latin conversion
 * - **Seams**: repair where the parts of a split block are joined
 * - **Verifier**: book-level check for untranslated text and markup
 */

pub mod output_check;
pub mod script;
pub mod seams;
pub mod verifier;

pub use output_check::{OutputIssue, OutputValidator, enhance};
pub use script::{ScriptStats, convert, matches_script, transliterate};
pub use seams::{SeamPart, join_parts, join_seam};
pub use verifier::{BlockFinding, FindingKind, Verification, Verifier};
