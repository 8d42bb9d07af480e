//! Batch scheduler
//!
//! A single async loop claims batches from the state store, drops records
//! of unhealthy sources, and fans the rest out to worker tasks bounded by a
//! semaphore. Nothing a batch claimed is left in `processing` when the batch
//! returns: records whose task was cancelled at the deadline fail with a
//! batch timeout, records whose task panicked fail with the panic message.
//! Both go through the store's guarded transition.

use crate::crawler::worker::{UrlOutcome, UrlReport, WorkerContext};
use crate::output::{CorpusStats, ProgressEvent, ProgressSink};
use crate::storage::{
    SessionStatus, SessionTotals, StatusUpdate, Storage, StorageError, StorageResult, UrlRecord,
};
use crate::{CrawlError, Disposition, HarvestError};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;

/// Where the scheduling loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Claiming,
    Dispatching,
    Collecting,
    Done,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `empty-poll-limit` consecutive claims returned nothing
    QueueDrained,
    /// `max-duration` elapsed
    DurationExhausted,
    /// `target-documents` new documents were saved
    TargetReached,
    /// A shutdown signal arrived
    Shutdown,
}

/// Aggregate result of a session
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub session_id: i64,
    pub batches: u64,
    pub processed: u64,
    pub saved: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub failed_permanent: u64,
    pub blocked: u64,
    /// Records excluded by the circuit breaker before dispatch
    pub skipped_unhealthy: u64,
    pub elapsed: Duration,
    pub corpus: CorpusStats,
    pub stop_reason: Option<StopReason>,
}

impl SessionSummary {
    fn record(&mut self, outcome: &UrlOutcome) {
        self.processed += 1;
        match outcome {
            UrlOutcome::Saved => self.saved += 1,
            UrlOutcome::Duplicate => self.duplicates += 1,
            UrlOutcome::Failed { disposition, .. } => match disposition {
                Disposition::Retryable => self.failed += 1,
                Disposition::Permanent => self.failed_permanent += 1,
                Disposition::Blocked => self.blocked += 1,
            },
        }
    }

    /// Counters persisted on the session record
    pub fn totals(&self) -> SessionTotals {
        SessionTotals {
            processed: self.processed,
            saved: self.saved,
            duplicates: self.duplicates,
            failed: self.failed + self.failed_permanent + self.blocked + self.skipped_unhealthy,
        }
    }

    /// URLs finished per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct BatchTally {
    processed: u64,
    saved: u64,
    duplicates: u64,
    failed: u64,
    domains: HashSet<String>,
}

impl BatchTally {
    fn record(&mut self, report: &UrlReport) {
        self.processed += 1;
        match report.outcome {
            UrlOutcome::Saved => self.saved += 1,
            UrlOutcome::Duplicate => self.duplicates += 1,
            UrlOutcome::Failed { .. } => self.failed += 1,
        }
        if let Some(domain) = &report.domain {
            self.domains.insert(domain.clone());
        }
    }
}

/// A dispatched record whose outcome has not been written yet
#[derive(Debug, Clone)]
struct Claim {
    url: String,
    source: String,
}

/// What became of one joined worker task
#[derive(Debug)]
enum Absorbed {
    /// The worker wrote its own outcome
    Recorded,
    /// The task was aborted; its record stays outstanding
    Cancelled,
    /// The store failed in a way that must halt the session
    Fatal(StorageError),
    /// The worker panicked before writing an outcome
    Panicked {
        url_hash: String,
        source: String,
        message: String,
    },
}

/// Runs a store call on the blocking pool
async fn store<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Database(format!("store task failed: {}", e)))?
}

/// Resolves once the shutdown flag is set; never resolves if the sender is gone
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives harvest sessions
pub struct Scheduler {
    context: Arc<WorkerContext>,
    sink: Arc<dyn ProgressSink>,
    shutdown: watch::Receiver<bool>,
    phase: SessionPhase,
}

impl Scheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `context` - Shared pipeline components
    /// * `sink` - Receiver of progress notifications
    /// * `shutdown` - Set to `true` to end the session early
    pub fn new(
        context: Arc<WorkerContext>,
        sink: Arc<dyn ProgressSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            context,
            sink,
            shutdown,
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::trace!("Scheduler phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.context.storage)
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn notify(&self, event: ProgressEvent) {
        if let Err(e) = self.sink.notify(&event) {
            tracing::warn!("Progress notification failed: {:#}", e);
        }
    }

    /// Runs one session and records it in the store
    ///
    /// # Returns
    ///
    /// * `Ok(SessionSummary)` - The session ended normally (budget, drained
    ///   queue or shutdown); individual URL failures are included here
    /// * `Err(HarvestError)` - The state store failed
    pub async fn run(&mut self, config_hash: &str) -> Result<SessionSummary, HarvestError> {
        let storage = self.storage();
        let hash = config_hash.to_string();
        let session_id = store(move || storage.create_session(&hash)).await?;

        let result = self.run_session(session_id).await;

        let (status, totals) = match &result {
            Ok(summary) if summary.stop_reason == Some(StopReason::Shutdown) => {
                (SessionStatus::Interrupted, summary.totals())
            }
            Ok(summary) => (SessionStatus::Completed, summary.totals()),
            Err(_) => (SessionStatus::Failed, SessionTotals::default()),
        };

        let storage = self.storage();
        let finished = store(move || storage.finish_session(session_id, status, &totals)).await;
        match (result, finished) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Err(finish_error)) => {
                tracing::error!("Could not record failed session {}: {}", session_id, finish_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn run_session(&mut self, session_id: i64) -> Result<SessionSummary, HarvestError> {
        let crawler = self.context.config.crawler.clone();
        let started = Instant::now();
        let session_deadline = started + crawler.max_duration();
        let mut summary = SessionSummary {
            session_id,
            ..SessionSummary::default()
        };
        let mut empty_polls = 0;

        let storage = self.storage();
        let stats = store(move || storage.progress_stats()).await?;
        tracing::info!(
            "Session {} started: {} pending, {} awaiting retry, {} completed",
            session_id,
            stats.overall.pending,
            stats.overall.failed,
            stats.overall.completed
        );
        self.notify(ProgressEvent::SessionStarted {
            session_id,
            pending: stats.overall.pending + stats.overall.failed,
        });

        let stop = loop {
            if let Some(reason) = self.stop_reason(&summary, session_deadline) {
                break reason;
            }

            self.set_phase(SessionPhase::Claiming);
            let storage = self.storage();
            let (limit, max_attempts) = (crawler.batch_size, crawler.max_attempts);
            let batch = store(move || storage.claim_batch(limit, max_attempts)).await?;

            if batch.is_empty() {
                empty_polls += 1;
                self.set_phase(SessionPhase::Idle);
                if empty_polls >= crawler.empty_poll_limit {
                    break StopReason::QueueDrained;
                }
                tracing::debug!(
                    "Nothing to claim ({}/{})",
                    empty_polls,
                    crawler.empty_poll_limit
                );
                self.pause(crawler.empty_poll_pause(), session_deadline).await;
                continue;
            }

            empty_polls = 0;
            summary.batches += 1;
            tracing::debug!("Claimed batch {} with {} URLs", summary.batches, batch.len());

            let dispatch = self.exclude_unhealthy(batch, &mut summary).await?;
            let tally = self
                .run_batch(dispatch, session_deadline, &mut summary)
                .await?;

            summary.elapsed = started.elapsed();
            self.notify(ProgressEvent::BatchCompleted {
                batch: summary.batches,
                processed: tally.processed,
                saved: tally.saved,
                duplicates: tally.duplicates,
                failed: tally.failed,
                rate: summary.rate(),
            });

            self.set_phase(SessionPhase::Idle);
            if let Some(reason) = self.stop_reason(&summary, session_deadline) {
                break reason;
            }

            let extended = tally
                .domains
                .iter()
                .any(|domain| self.context.politeness.requires_extended_pause(domain));
            let pause = if extended {
                let secs =
                    fastrand::u64(crawler.extended_pause_min_secs..=crawler.extended_pause_max_secs);
                tracing::info!("Batch touched a sensitive domain; pausing {}s", secs);
                Duration::from_secs(secs)
            } else {
                crawler.batch_pause()
            };
            self.pause(pause, session_deadline).await;
        };

        self.set_phase(SessionPhase::Done);
        summary.stop_reason = Some(stop);
        summary.elapsed = started.elapsed();

        let writer = Arc::clone(&self.context.writer);
        summary.corpus = tokio::task::spawn_blocking(move || writer.corpus_stats())
            .await
            .unwrap_or_default();

        tracing::info!(
            "Session {} ended ({:?}): {} processed, {} saved, {} duplicates, {} failed, {} permanent, {} blocked, {} skipped",
            session_id,
            stop,
            summary.processed,
            summary.saved,
            summary.duplicates,
            summary.failed,
            summary.failed_permanent,
            summary.blocked,
            summary.skipped_unhealthy
        );
        self.notify(ProgressEvent::SessionFinished {
            session_id,
            processed: summary.processed,
            saved: summary.saved,
            elapsed: summary.elapsed,
            corpus_files: summary.corpus.files,
        });

        Ok(summary)
    }

    fn stop_reason(&self, summary: &SessionSummary, deadline: Instant) -> Option<StopReason> {
        if self.shutdown_requested() {
            return Some(StopReason::Shutdown);
        }
        if Instant::now() >= deadline {
            return Some(StopReason::DurationExhausted);
        }
        match self.context.config.crawler.target_documents {
            Some(target) if summary.saved >= target => Some(StopReason::TargetReached),
            _ => None,
        }
    }

    /// Sleeps for `duration`, waking early at the deadline or on shutdown
    async fn pause(&self, duration: Duration, deadline: Instant) {
        let until = (Instant::now() + duration).min(deadline);
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep_until(until) => {}
            _ = shutdown_signalled(&mut shutdown) => {}
        }
    }

    /// Writes an outcome for a record the scheduler finalizes itself
    ///
    /// # Returns
    ///
    /// `false` when the record had already left `processing`
    async fn finalize(&self, url_hash: String, update: StatusUpdate) -> StorageResult<bool> {
        let storage = self.storage();
        match store(move || storage.update_status(&url_hash, &update)).await {
            Ok(()) => Ok(true),
            Err(StorageError::InvalidTransition { from, .. }) => {
                tracing::trace!("Record already finalized as {}", from);
                Ok(false)
            }
            Err(StorageError::UrlNotFound(hash)) => {
                tracing::warn!("Claimed record {} disappeared", hash);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Marks records of unhealthy sources `failed_permanent` without dispatching them
    async fn exclude_unhealthy(
        &self,
        batch: Vec<UrlRecord>,
        summary: &mut SessionSummary,
    ) -> Result<Vec<UrlRecord>, HarvestError> {
        let breaker = &self.context.breaker;
        let (healthy, unhealthy): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|record| breaker.is_source_healthy(&record.source));

        for record in unhealthy {
            let error = CrawlError::SourceUnhealthy {
                source_name: record.source.clone(),
            };
            let update = StatusUpdate::failure(error.disposition().target_status(), error.to_string());
            if self.finalize(record.url_hash, update).await? {
                summary.skipped_unhealthy += 1;
            }
        }

        if summary.skipped_unhealthy > 0 {
            tracing::debug!(
                "{} records of unhealthy sources skipped so far",
                summary.skipped_unhealthy
            );
        }
        Ok(healthy)
    }

    /// Processes one batch to completion or deadline
    async fn run_batch(
        &mut self,
        records: Vec<UrlRecord>,
        session_deadline: Instant,
        summary: &mut SessionSummary,
    ) -> Result<BatchTally, HarvestError> {
        let crawler = self.context.config.crawler.clone();
        let grace = crawler.grace_timeout();
        let mut deadline =
            (Instant::now() + crawler.batch_timeout()).min(session_deadline + grace);

        self.set_phase(SessionPhase::Dispatching);
        let mut outstanding: HashMap<String, Claim> = records
            .iter()
            .map(|r| {
                let claim = Claim {
                    url: r.url.clone(),
                    source: r.source.clone(),
                };
                (r.url_hash.clone(), claim)
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(crawler.num_threads));
        let mut tasks = JoinSet::new();
        let mut owners: HashMap<task::Id, String> = HashMap::with_capacity(records.len());
        for record in records {
            let url_hash = record.url_hash.clone();
            let context = Arc::clone(&self.context);
            let semaphore = Arc::clone(&semaphore);
            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StorageError::Database(e.to_string()))?;
                context.process(record).await
            });
            owners.insert(handle.id(), url_hash);
        }

        self.set_phase(SessionPhase::Collecting);
        let mut tally = BatchTally::default();
        let mut fatal: Option<StorageError> = None;
        let mut panicked = Vec::new();
        let mut cancelled = false;
        let mut shutdown = self.shutdown.clone();
        let mut watching = true;

        if *shutdown.borrow() {
            deadline = deadline.min(Instant::now() + grace);
        }

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => match joined {
                    None => break,
                    Some(joined) => match absorb(joined, &owners, &mut outstanding, &mut tally, summary) {
                        Absorbed::Recorded | Absorbed::Cancelled => {}
                        Absorbed::Panicked { url_hash, source, message } => {
                            panicked.push((url_hash, source, message));
                        }
                        Absorbed::Fatal(error) => {
                            if fatal.is_none() {
                                fatal = Some(error);
                            }
                            tasks.abort_all();
                        }
                    },
                },
                _ = tokio::time::sleep_until(deadline), if !cancelled => {
                    cancelled = true;
                    tracing::warn!(
                        "Batch deadline reached with {} URLs in flight; cancelling",
                        outstanding.len()
                    );
                    tasks.abort_all();
                }
                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => {
                        tracing::info!("Shutdown requested; draining in-flight work for up to {:?}", grace);
                        deadline = deadline.min(Instant::now() + grace);
                    }
                    Ok(()) => {}
                    Err(_) => watching = false,
                },
            }
        }

        if let Some(error) = fatal {
            tracing::error!("State store failure during batch: {}", error);
            return Err(error.into());
        }

        for (url_hash, source, message) in panicked {
            let error = CrawlError::Unexpected(format!("worker panicked: {}", message));
            self.fail_unreported(url_hash, &source, error, &mut tally, summary)
                .await?;
        }

        // Aborted tasks never wrote their outcome
        for (url_hash, claim) in outstanding {
            let error = CrawlError::BatchTimeout;
            self.fail_unreported(url_hash, &claim.source, error, &mut tally, summary)
                .await?;
        }

        Ok(tally)
    }

    /// Marks a record whose worker wrote no outcome as failed and counts it
    async fn fail_unreported(
        &self,
        url_hash: String,
        source: &str,
        error: CrawlError,
        tally: &mut BatchTally,
        summary: &mut SessionSummary,
    ) -> StorageResult<()> {
        let disposition = error.disposition();
        let message = error.to_string();
        let update = StatusUpdate::failure(disposition.target_status(), message.clone());
        if self.finalize(url_hash, update).await? {
            self.context.breaker.record_outcome(source, false);
            tally.processed += 1;
            tally.failed += 1;
            summary.record(&UrlOutcome::Failed {
                disposition,
                message,
            });
        }
        Ok(())
    }
}

/// Folds one finished task into the batch bookkeeping
///
/// A panicked task is traced back to its record through `owners` and taken
/// out of `outstanding`, so it is not mistaken for a batch timeout.
fn absorb(
    joined: Result<(task::Id, StorageResult<UrlReport>), JoinError>,
    owners: &HashMap<task::Id, String>,
    outstanding: &mut HashMap<String, Claim>,
    tally: &mut BatchTally,
    summary: &mut SessionSummary,
) -> Absorbed {
    match joined {
        Ok((_, Ok(report))) => {
            outstanding.remove(&report.url_hash);
            tally.record(&report);
            summary.record(&report.outcome);
            Absorbed::Recorded
        }
        Ok((id, Err(error @ (StorageError::InvalidTransition { .. } | StorageError::UrlNotFound(_))))) => {
            let url = owners
                .get(&id)
                .and_then(|hash| outstanding.remove(hash))
                .map(|claim| claim.url);
            tracing::warn!(
                "Worker outcome for {} not recorded: {}",
                url.as_deref().unwrap_or("<unknown>"),
                error
            );
            Absorbed::Recorded
        }
        Ok((_, Err(error))) => Absorbed::Fatal(error),
        Err(e) if e.is_cancelled() => Absorbed::Cancelled,
        Err(e) => {
            let id = e.id();
            let message = match e.try_into_panic() {
                Ok(payload) => panic_message(payload),
                Err(e) => e.to_string(),
            };
            let Some((url_hash, claim)) = owners
                .get(&id)
                .and_then(|hash| outstanding.remove_entry(hash))
            else {
                tracing::error!("Worker task {} panicked: {}", id, message);
                return Absorbed::Recorded;
            };
            tracing::error!("Worker for {} panicked: {}", claim.url, message);
            Absorbed::Panicked {
                url_hash,
                source: claim.source,
                message,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_by_disposition() {
        let mut summary = SessionSummary::default();
        summary.record(&UrlOutcome::Saved);
        summary.record(&UrlOutcome::Duplicate);
        for disposition in [Disposition::Retryable, Disposition::Permanent, Disposition::Blocked] {
            summary.record(&UrlOutcome::Failed {
                disposition,
                message: String::new(),
            });
        }
        summary.skipped_unhealthy = 2;

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.failed_permanent, 1);
        assert_eq!(summary.blocked, 1);

        let totals = summary.totals();
        assert_eq!(totals.saved, 1);
        assert_eq!(totals.duplicates, 1);
        assert_eq!(totals.failed, 5);
    }

    #[test]
    fn test_rate() {
        let mut summary = SessionSummary::default();
        assert_eq!(summary.rate(), 0.0);
        summary.processed = 10;
        summary.elapsed = Duration::from_secs(4);
        assert!((summary.rate() - 2.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_shutdown_signalled() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_signalled(&mut rx).await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_signalled_ignores_closed_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let result =
            tokio::time::timeout(Duration::from_secs(1), shutdown_signalled(&mut rx)).await;
        assert!(result.is_err());
    }

    fn claimed(url_hash: &str) -> HashMap<String, Claim> {
        let claim = Claim {
            url: "https://example.com/story".to_string(),
            source: "news".to_string(),
        };
        HashMap::from([(url_hash.to_string(), claim)])
    }

    async fn exploding() -> StorageResult<UrlReport> {
        panic!("robots exploded")
    }

    #[tokio::test]
    async fn test_panicked_worker_is_attributed_to_its_record() {
        let mut tasks = JoinSet::new();
        let handle = tasks.spawn(exploding());
        let owners = HashMap::from([(handle.id(), "hash1".to_string())]);
        let mut outstanding = claimed("hash1");
        let mut tally = BatchTally::default();
        let mut summary = SessionSummary::default();

        let joined = tasks.join_next_with_id().await.unwrap();
        let absorbed = absorb(joined, &owners, &mut outstanding, &mut tally, &mut summary);

        match absorbed {
            Absorbed::Panicked {
                url_hash,
                source,
                message,
            } => {
                assert_eq!(url_hash, "hash1");
                assert_eq!(source, "news");
                assert!(message.contains("robots exploded"));
            }
            other => panic!("expected a panicked worker, got {:?}", other),
        }
        assert!(outstanding.is_empty());
        assert_eq!(summary.processed, 0);
    }

    #[tokio::test]
    async fn test_aborted_worker_stays_outstanding() {
        let mut tasks: JoinSet<StorageResult<UrlReport>> = JoinSet::new();
        let handle = tasks.spawn(std::future::pending());
        let owners = HashMap::from([(handle.id(), "hash1".to_string())]);
        let mut outstanding = claimed("hash1");
        let mut tally = BatchTally::default();
        let mut summary = SessionSummary::default();

        tasks.abort_all();
        let joined = tasks.join_next_with_id().await.unwrap();
        let absorbed = absorb(joined, &owners, &mut outstanding, &mut tally, &mut summary);

        assert!(matches!(absorbed, Absorbed::Cancelled));
        assert!(outstanding.contains_key("hash1"));
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
