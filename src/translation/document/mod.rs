/*!
 * Document model and the built-in reader/writer collaborators.
 */

pub mod io;
pub mod model;

// Re-export types used by other modules
pub use io::{DocumentReader, DocumentWriter, JsonFormat, PlainTextFormat, reader_for, writer_for};
pub use model::{Block, BlockKind, Chapter, Document, DocumentMetadata, Section};
