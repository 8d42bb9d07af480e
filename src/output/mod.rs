//! Output module for the corpus and for progress reporting
//!
//! This module handles:
//! - Writing deduplicated documents to the corpus directory
//! - Progress notifications emitted by the scheduler
//! - Statistics printed by the `status` command

mod progress;
pub mod stats;
mod writer;

pub use progress::{ProgressEvent, ProgressSink, RecordingSink, TracingSink};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
pub use writer::{
    content_hash, normalize_text, scan_corpus, ContentWriter, CorpusStats, SaveOutcome, WriteError, WriteResult,
};
