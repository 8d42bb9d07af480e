//! Text extraction collaborator
//!
//! The scheduler only sees the [`Extractor`] trait. The default
//! [`HtmlExtractor`] tries an ordered list of strategies until one yields
//! enough text; sites that need special handling plug in their own
//! implementation.

mod strategy;

pub use strategy::{ExtractionStrategy, ParagraphStrategy, SelectorStrategy, SemanticStrategy};

use crate::config::{ExtractionConfig, SourceConfig};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use thiserror::Error;

/// Text and metadata pulled out of one document
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// Why a document produced no usable text
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no extractable content")]
    NoContent,

    #[error("content too short: {words} words (minimum {minimum})")]
    TooShort { words: usize, minimum: usize },

    #[error("unsupported content: {0}")]
    Unsupported(String),

    #[error("extraction failed: {0}")]
    Failed(String),
}

impl ExtractionError {
    /// True when retrying can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// Turns fetched bytes into corpus text
///
/// Implementations are synchronous and may be slow; the worker runs them on
/// the blocking pool.
pub trait Extractor: Send + Sync {
    /// Extracts text from an HTML page
    fn extract(
        &self,
        raw: &str,
        source: &SourceConfig,
        url: &str,
    ) -> Result<Extraction, ExtractionError>;

    /// Extracts text from a PDF document
    fn extract_pdf(
        &self,
        _bytes: &[u8],
        _source: &SourceConfig,
        _url: &str,
    ) -> Result<Extraction, ExtractionError> {
        Err(ExtractionError::Unsupported("application/pdf".to_string()))
    }
}

/// Default extractor built on `scraper`
pub struct HtmlExtractor {
    min_word_count: usize,
}

impl HtmlExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            min_word_count: config.min_word_count,
        }
    }

    /// The strategies tried for a source, in order
    fn strategies(&self, source: &SourceConfig) -> Vec<Box<dyn ExtractionStrategy>> {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = Vec::with_capacity(3);
        if !source.content_selectors.is_empty() {
            strategies.push(Box::new(SelectorStrategy::new(&source.content_selectors)));
        }
        strategies.push(Box::new(SemanticStrategy));
        strategies.push(Box::new(ParagraphStrategy));
        strategies
    }
}

impl Extractor for HtmlExtractor {
    fn extract(
        &self,
        raw: &str,
        source: &SourceConfig,
        url: &str,
    ) -> Result<Extraction, ExtractionError> {
        let document = Html::parse_document(raw);
        let mut best_words = None;

        for strategy in self.strategies(source) {
            let Some(text) = strategy.extract(&document) else {
                continue;
            };

            let words = text.split_whitespace().count();
            if words >= self.min_word_count {
                tracing::trace!("{} extracted {} words from {}", strategy.name(), words, url);

                let mut metadata = BTreeMap::new();
                if let Some(title) = page_title(&document) {
                    metadata.insert("title".to_string(), title);
                }
                metadata.insert("extractor".to_string(), strategy.name().to_string());
                metadata.insert("words".to_string(), words.to_string());

                return Ok(Extraction { text, metadata });
            }

            best_words = best_words.max(Some(words));
        }

        match best_words {
            Some(words) if words > 0 => Err(ExtractionError::TooShort {
                words,
                minimum: self.min_word_count,
            }),
            _ => Err(ExtractionError::NoContent),
        }
    }
}

/// Extracts the page title, preferring `og:title`
fn page_title(document: &Html) -> Option<String> {
    let og = Selector::parse("meta[property='og:title'][content]").ok()?;
    let title = document
        .select(&og)
        .filter_map(|e| e.value().attr("content"))
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty());
    if title.is_some() {
        return title;
    }

    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}
