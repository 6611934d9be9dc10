/*!
 * Translation pipeline.
 *
 * A run goes through these stages:
 * 1. **Preparation Pass**: sample the book once and build a `WorkPlan`
 *    (style profile, glossary seed, per-chapter hints)
 * 2. **Translation Pass**: every segment goes from cache lookup to an
 *    accepted translation under the retry policy
 * 3. **Glossary Pass**: once a chapter is complete its names are proposed
 *    to the glossary, chapter by chapter in reading order
 * 4. **Finalizer**: resolved slots are put back together into chapters
 *    with the source structure
 * 5. **Verification Pass** (optional): the finished book is scored and
 *    blocks with untranslated text or stray markup are polished
 *
 * The orchestrator drives the stages and owns the chapter window.
 */

pub mod finalizer;
pub mod glossary_pass;
pub mod orchestrator;
pub mod preparation_pass;
mod request;
pub mod translation_pass;
pub mod verification_pass;

// Re-export types used externally
pub use finalizer::{ChapterFinalizer, ChapterSlots, FinalizedChapter, SlotText};
pub use glossary_pass::GlossaryPass;
pub use orchestrator::{RunOutcome, TranslationPipeline};
pub use preparation_pass::{ChapterHint, PreparationPass, WorkPlan};
pub use translation_pass::{
    ChapterContext, ResultSource, SegmentJob, SegmentOutcome, SegmentTranslator, TranslatedSegment,
};
pub use verification_pass::VerificationPass;
