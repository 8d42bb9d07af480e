//! Per-source circuit breaker
//!
//! Counts consecutive failures per source. Once a source reaches the
//! threshold it stays excluded until [`CircuitBreaker::reset`] is called,
//! which the coordinator does for every source a discovery pass covers.
//! There is no timed half-open state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tracks source health for the scheduler
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: Mutex<HashMap<String, u32>>,
}

impl CircuitBreaker {
    /// Creates a breaker that trips after `threshold` consecutive failures
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the outcome of one URL from `source`
    ///
    /// A success resets the counter; a failure increments it.
    ///
    /// # Returns
    ///
    /// The consecutive failure count after this outcome
    pub fn record_outcome(&self, source: &str, success: bool) -> u32 {
        let mut failures = self.failures();

        if success {
            failures.remove(source);
            return 0;
        }

        let count = failures.entry(source.to_string()).or_insert(0);
        *count = count.saturating_add(1);

        if *count == self.threshold {
            tracing::warn!(
                "Source {} reached {} consecutive failures; excluding it from scheduling",
                source,
                count
            );
        }
        *count
    }

    /// Returns false once the source's consecutive failures reach the threshold
    pub fn is_source_healthy(&self, source: &str) -> bool {
        self.failures()
            .get(source)
            .map_or(true, |count| *count < self.threshold)
    }

    /// Clears a source's failure counter after an external re-check
    pub fn reset(&self, source: &str) {
        if self.failures().remove(source).is_some() {
            tracing::info!("Circuit breaker reset for source {}", source);
        }
    }

    /// Current consecutive failure counts, sorted by source
    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.failures()
            .iter()
            .map(|(source, count)| (source.clone(), *count))
            .collect()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
