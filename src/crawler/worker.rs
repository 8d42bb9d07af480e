//! The per-URL pipeline
//!
//! robots check → politeness turn → fetch → extract → save →
//! state update → circuit breaker. Every failure along the way becomes a
//! [`CrawlError`] that is classified once and written back to the store.
//! Only store failures escape.

use crate::config::Config;
use crate::crawler::breaker::CircuitBreaker;
use crate::crawler::fetcher::{FetchedBody, Fetcher};
use crate::extract::{Extraction, Extractor};
use crate::output::{ContentWriter, SaveOutcome};
use crate::politeness::PolitenessEngine;
use crate::storage::{StatusUpdate, Storage, StorageResult, UrlRecord};
use crate::url::domain_of;
use crate::{CrawlError, Disposition, UrlError};
use std::sync::Arc;
use url::Url;

/// How one URL ended
#[derive(Debug, Clone, PartialEq)]
pub enum UrlOutcome {
    Saved,
    Duplicate,
    Failed {
        disposition: Disposition,
        message: String,
    },
}

impl UrlOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Saved | Self::Duplicate)
    }
}

/// Result of processing one claimed record
#[derive(Debug, Clone)]
pub struct UrlReport {
    pub url_hash: String,
    pub source: String,
    /// Politeness key, when the URL could be parsed
    pub domain: Option<String>,
    pub outcome: UrlOutcome,
}

/// Everything a worker task needs, shared between tasks
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub storage: Arc<dyn Storage>,
    pub politeness: Arc<PolitenessEngine>,
    pub fetcher: Fetcher,
    pub extractor: Arc<dyn Extractor>,
    pub writer: Arc<ContentWriter>,
    pub breaker: Arc<CircuitBreaker>,
}

impl WorkerContext {
    /// Runs the full pipeline for a record in `processing`
    ///
    /// # Returns
    ///
    /// * `Ok(UrlReport)` - The record was moved to its outcome status
    /// * `Err(StorageError)` - The outcome could not be written back
    pub async fn process(self: Arc<Self>, record: UrlRecord) -> StorageResult<UrlReport> {
        let url = Url::parse(&record.url).ok();
        let domain = url.as_ref().and_then(|u| domain_of(u).ok());

        let result = match (&url, &domain) {
            (Some(url), Some(domain)) => self.fetch_and_save(&record, url, domain).await,
            _ => Err(CrawlError::InvalidUrl(UrlError::Parse(record.url.clone()))),
        };

        let (update, outcome) = match result {
            Ok(saved) => {
                let outcome = if saved.duplicate {
                    UrlOutcome::Duplicate
                } else {
                    UrlOutcome::Saved
                };
                let update = StatusUpdate::completed(
                    saved.content_hash,
                    saved.file_path.to_string_lossy().into_owned(),
                );
                (update, outcome)
            }
            Err(error) => {
                let disposition = error.disposition();
                let message = error.to_string();
                tracing::debug!("{} -> {:?}: {}", record.url, disposition, message);
                (
                    StatusUpdate::failure(disposition.target_status(), message.clone()),
                    UrlOutcome::Failed {
                        disposition,
                        message,
                    },
                )
            }
        };

        let storage = Arc::clone(&self.storage);
        let url_hash = record.url_hash.clone();
        tokio::task::spawn_blocking(move || storage.update_status(&url_hash, &update))
            .await
            .map_err(|e| crate::storage::StorageError::Database(e.to_string()))??;

        self.breaker
            .record_outcome(&record.source, outcome.is_success());

        Ok(UrlReport {
            url_hash: record.url_hash,
            source: record.source,
            domain,
            outcome,
        })
    }

    async fn fetch_and_save(
        &self,
        record: &UrlRecord,
        url: &Url,
        domain: &str,
    ) -> Result<SaveOutcome, CrawlError> {
        let source = self.config.source(&record.source).cloned().ok_or_else(|| {
            CrawlError::Unexpected(format!("source '{}' is not configured", record.source))
        })?;

        let agent = self.config.user_agent.crawler_name.as_str();
        if !self.politeness.can_fetch(url, agent).await {
            return Err(CrawlError::RobotsBlocked {
                url: url.to_string(),
            });
        }

        // The turn wait holds the worker permit and sits outside the per-URL
        // timeout. A record still waiting when the batch deadline fires is
        // failed with a batch timeout and its attempt stays counted.
        self.politeness.await_turn(domain).await;

        let work = async {
            let identity = self.politeness.rotate_identity();
            let page = self.fetcher.fetch(url, domain, &identity).await?;

            let extractor = Arc::clone(&self.extractor);
            let task_source = source.clone();
            let page_url = page.final_url.clone();
            let extraction: Extraction = tokio::task::spawn_blocking(move || match &page.body {
                FetchedBody::Html(html) => extractor.extract(html, &task_source, &page_url),
                FetchedBody::Pdf(bytes) => extractor.extract_pdf(bytes, &task_source, &page_url),
            })
            .await
            .map_err(|e| CrawlError::Unexpected(format!("extraction task failed: {}", e)))?
            .map_err(|source| CrawlError::Extraction {
                url: url.to_string(),
                source,
            })?;

            let writer = Arc::clone(&self.writer);
            let source_name = source.name.clone();
            let document_url = url.to_string();
            let saved = tokio::task::spawn_blocking(move || {
                writer.save(
                    &extraction.text,
                    &source_name,
                    &document_url,
                    &extraction.metadata,
                )
            })
            .await
            .map_err(|e| CrawlError::Unexpected(format!("save task failed: {}", e)))??;

            Ok::<SaveOutcome, CrawlError>(saved)
        };

        match tokio::time::timeout(self.config.crawler.url_timeout(), work).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}
