//! Statistics for the `status` command
//!
//! This module gathers progress from the state store and the corpus
//! directory and prints it.

use crate::output::CorpusStats;
use crate::state::UrlStatus;
use crate::storage::{ProgressStats, SessionRecord, StatusCounts, Storage};
use crate::HarvestError;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Record counts, overall and per source
    pub progress: ProgressStats,

    /// The most recent session, if any ran
    pub latest_session: Option<SessionRecord>,

    /// Files and bytes in the output directory
    pub corpus: CorpusStats,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The state store to query
/// * `corpus` - Corpus size measured by the writer
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    corpus: CorpusStats,
) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        progress: storage.progress_stats()?,
        latest_session: storage.latest_session()?,
        corpus,
    })
}

fn format_counts(counts: &StatusCounts) -> String {
    UrlStatus::all_statuses()
        .iter()
        .filter(|status| counts.get(**status) > 0)
        .map(|status| format!("{}={}", status, counts.get(*status)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    let overall = &stats.progress.overall;

    println!("=== Harvest Status ===\n");

    println!("Overview:");
    println!("  Total URLs: {}", overall.total());
    println!(
        "  Corpus: {} files, {:.1} MiB",
        stats.corpus.files,
        stats.corpus.bytes as f64 / (1024.0 * 1024.0)
    );
    println!();

    println!("URLs by Status:");
    for status in UrlStatus::all_statuses() {
        let count = overall.get(status);
        let percentage = if overall.total() > 0 {
            count as f64 / overall.total() as f64 * 100.0
        } else {
            0.0
        };
        println!("  {:<17} {:>8} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.progress.by_source.is_empty() {
        println!("Sources ({}):", stats.progress.by_source.len());
        for (source, counts) in &stats.progress.by_source {
            println!(
                "  {}: {} URLs, {:.1}% completed [{}]",
                source,
                counts.total(),
                counts.completion_percentage(),
                format_counts(counts)
            );
        }
        println!();
    }

    match &stats.latest_session {
        Some(session) => {
            println!("Latest Session:");
            println!("  Id: {}", session.id);
            println!("  Status: {}", session.status.to_db_string());
            println!("  Started: {}", session.started_at);
            if let Some(finished) = &session.finished_at {
                println!("  Finished: {}", finished);
            }
            println!(
                "  Processed: {}, saved: {}, duplicates: {}, failed: {}",
                session.totals.processed,
                session.totals.saved,
                session.totals.duplicates,
                session.totals.failed
            );
        }
        None => println!("No sessions recorded yet."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, StatusUpdate};

    #[test]
    fn test_load_statistics() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .add_urls(&["http://a/1".to_string(), "http://a/2".to_string()], "news_a")
            .unwrap();
        let claimed = storage.claim_batch(1, 3).unwrap();
        storage
            .update_status(
                &claimed[0].url_hash,
                &StatusUpdate::failure(UrlStatus::Blocked, "robots.txt"),
            )
            .unwrap();
        storage.create_session("hash").unwrap();

        let stats = load_statistics(&storage, CorpusStats::default()).unwrap();
        assert_eq!(stats.progress.overall.total(), 2);
        assert_eq!(stats.progress.overall.blocked, 1);
        assert!(stats.latest_session.is_some());
    }

    #[test]
    fn test_format_counts_skips_zero() {
        let mut counts = StatusCounts::default();
        counts.add(UrlStatus::Completed, 4);
        counts.add(UrlStatus::FailedPermanent, 1);
        assert_eq!(format_counts(&counts), "completed=4, failed_permanent=1");
    }
}
