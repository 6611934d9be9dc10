/*!
 * Run-wide translation memory.
 *
 * - Glossary of canonical term translations with a single writer
 * - Proper-noun detection that feeds the glossary
 * - Style profile shared by every prompt in a run
 */

pub mod entities;
pub mod glossary;
pub mod style;

pub use entities::EntityDetector;
pub use glossary::{
    GlossaryEntry, GlossaryMemory, GlossarySnapshot, GlossaryView, ProposalContext, ProposalOutcome, TermKind,
    enforce_canonical,
};
pub use style::StyleProfile;
