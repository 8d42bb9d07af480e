//! Harvest coordinator
//!
//! Wires the store, politeness engine, fetcher, extractor, writer and circuit
//! breaker together and runs the startup sequence: recover state left by an
//! earlier process, discover URLs, then hand over to the scheduler.

use crate::config::Config;
use crate::crawler::breaker::CircuitBreaker;
use crate::crawler::discovery::discover_all;
use crate::crawler::fetcher::{build_http_client, Fetcher};
use crate::crawler::scheduler::{Scheduler, SessionSummary};
use crate::crawler::worker::WorkerContext;
use crate::extract::{Extractor, HtmlExtractor};
use crate::output::{ContentWriter, ProgressSink};
use crate::politeness::PolitenessEngine;
use crate::storage::Storage;
use crate::HarvestError;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// What startup recovery found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Sessions left `running` that are now `interrupted`
    pub interrupted_sessions: usize,
    /// Records moved from `processing` back to `pending`
    pub reset_records: usize,
}

/// Main harvest coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    client: Client,
    politeness: Arc<PolitenessEngine>,
    context: Arc<WorkerContext>,
}

impl Coordinator {
    /// Creates a coordinator using the default HTML extractor
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration, overrides applied
    /// * `storage` - The opened state store
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - All components were built
    /// * `Err(HarvestError)` - The HTTP client or output directory failed
    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self, HarvestError> {
        let extractor = Arc::new(HtmlExtractor::new(&config.extraction));
        Self::with_extractor(config, storage, extractor)
    }

    /// Creates a coordinator with a custom extractor
    pub fn with_extractor(
        config: Config,
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, HarvestError> {
        let config = Arc::new(config);
        let client = build_http_client(&config)?;
        let politeness = Arc::new(PolitenessEngine::new(Arc::clone(&config), client.clone()));
        let fetcher = Fetcher::new(client.clone(), Arc::clone(&politeness), &config);
        let writer = Arc::new(ContentWriter::from_config(&config)?);
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
        ));

        tracing::debug!(
            "Corpus directory {} holds {} documents",
            writer.output_dir().display(),
            writer.document_count()
        );

        let context = Arc::new(WorkerContext {
            config: Arc::clone(&config),
            storage: Arc::clone(&storage),
            politeness: Arc::clone(&politeness),
            fetcher,
            extractor,
            writer,
            breaker,
        });

        Ok(Self {
            config,
            storage,
            client,
            politeness,
            context,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn politeness(&self) -> &PolitenessEngine {
        &self.politeness
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.context.breaker
    }

    /// Repairs state left behind by a process that did not shut down cleanly
    pub async fn recover(&self) -> Result<Recovery, HarvestError> {
        let storage = Arc::clone(&self.storage);
        let recovery = tokio::task::spawn_blocking(move || {
            Ok::<_, HarvestError>(Recovery {
                interrupted_sessions: storage.mark_interrupted_sessions()?,
                reset_records: storage.reset_stuck_processing()?,
            })
        })
        .await
        .map_err(|e| HarvestError::Task(e.to_string()))??;

        if recovery.interrupted_sessions > 0 || recovery.reset_records > 0 {
            tracing::warn!(
                "Recovered from unclean shutdown: {} sessions interrupted, {} records reset to pending",
                recovery.interrupted_sessions,
                recovery.reset_records
            );
        }
        Ok(recovery)
    }

    /// Adds start URLs and sitemap URLs of every source to the store
    ///
    /// A completed discovery pass is the re-check for sources the circuit
    /// breaker has tripped: their failure counters are cleared so the next
    /// session dispatches them again.
    ///
    /// # Returns
    ///
    /// Newly added URL counts per source
    pub async fn discover(&self) -> Result<BTreeMap<String, usize>, HarvestError> {
        let added = discover_all(
            &self.config,
            &self.client,
            &self.politeness,
            Arc::clone(&self.storage),
        )
        .await?;

        for source in added.keys() {
            self.context.breaker.reset(source);
        }
        Ok(added)
    }

    /// Runs one scheduling session until budget, drain or shutdown
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Recorded on the session for auditing
    /// * `sink` - Progress notification receiver
    /// * `shutdown` - Set to `true` to stop early
    pub async fn run_session(
        &self,
        config_hash: &str,
        sink: Arc<dyn ProgressSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionSummary, HarvestError> {
        let mut scheduler = Scheduler::new(Arc::clone(&self.context), sink, shutdown);
        scheduler.run(config_hash).await
    }
}

/// Runs the full `run` sequence: recovery, discovery, then one session
///
/// # Returns
///
/// * `Ok(SessionSummary)` - The session ended normally
/// * `Err(HarvestError)` - Startup or the state store failed
pub async fn run_harvest(
    coordinator: &Coordinator,
    config_hash: &str,
    sink: Arc<dyn ProgressSink>,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionSummary, HarvestError> {
    coordinator.recover().await?;

    let added = coordinator.discover().await?;
    let new_urls: usize = added.values().sum();
    tracing::info!(
        "Discovery added {} new URLs across {} sources",
        new_urls,
        added.len()
    );

    if *shutdown.borrow() {
        tracing::info!("Shutdown requested during discovery");
    }

    coordinator.run_session(config_hash, sink, shutdown).await
}
