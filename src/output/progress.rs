//! One-way progress notifications
//!
//! The scheduler reports session and batch milestones to a [`ProgressSink`].
//! Delivery failures are logged by the caller and otherwise ignored.

use std::sync::Mutex;
use std::time::Duration;

/// A milestone reported by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SessionStarted {
        session_id: i64,
        pending: u64,
    },
    BatchCompleted {
        batch: u64,
        processed: u64,
        saved: u64,
        duplicates: u64,
        failed: u64,
        /// URLs finished per second since the session started
        rate: f64,
    },
    SessionFinished {
        session_id: i64,
        processed: u64,
        saved: u64,
        elapsed: Duration,
        corpus_files: u64,
    },
}

/// Receiver of progress notifications
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: &ProgressEvent) -> anyhow::Result<()>;
}

/// Logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        match event {
            ProgressEvent::SessionStarted {
                session_id,
                pending,
            } => {
                tracing::info!("Session {} started with {} eligible URLs", session_id, pending);
            }
            ProgressEvent::BatchCompleted {
                batch,
                processed,
                saved,
                duplicates,
                failed,
                rate,
            } => {
                tracing::info!(
                    "Batch {}: {} processed, {} saved, {} duplicates, {} failed ({:.2} URLs/sec)",
                    batch,
                    processed,
                    saved,
                    duplicates,
                    failed,
                    rate
                );
            }
            ProgressEvent::SessionFinished {
                session_id,
                processed,
                saved,
                elapsed,
                corpus_files,
            } => {
                tracing::info!(
                    "Session {} finished in {:.1}s: {} processed, {} saved, corpus now {} files",
                    session_id,
                    elapsed.as_secs_f64(),
                    processed,
                    saved,
                    corpus_files
                );
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn notify(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
