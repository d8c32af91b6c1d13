//! Statistics generation from the image catalog
//!
//! This module provides functionality for extracting and displaying
//! catalog statistics from the storage layer.

use crate::state::DownloadStatus;
use crate::storage::ImageStore;
use crate::TrawlError;
use std::collections::HashMap;

/// Number of recent failures shown by [`print_statistics`]
const RECENT_FAILURES: usize = 10;

/// Catalog statistics summary
#[derive(Debug, Clone)]
pub struct CatalogStatistics {
    /// Total number of catalogued images
    pub total_records: u64,

    /// Images whose bytes are on disk
    pub downloaded: u64,

    /// Count of records by download status
    pub by_status: HashMap<DownloadStatus, u64>,

    /// Count of records by source
    pub by_source: HashMap<String, u64>,

    /// Most recent failures as (url, error) pairs
    pub recent_failures: Vec<(String, String)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The catalog to query
///
/// # Returns
///
/// * `Ok(CatalogStatistics)` - Successfully loaded statistics
/// * `Err(TrawlError)` - Failed to query statistics
pub fn load_statistics(storage: &impl ImageStore) -> Result<CatalogStatistics, TrawlError> {
    let total_records = storage.count_total()?;
    let downloaded = storage.count_downloaded()?;

    let mut by_status = HashMap::new();
    for status in DownloadStatus::all_states() {
        let count = storage.count_by_status(status)?;
        if count > 0 {
            by_status.insert(status, count);
        }
    }

    let by_source = storage.count_by_source()?;
    let recent_failures = storage.recent_failures(RECENT_FAILURES)?;

    Ok(CatalogStatistics {
        total_records,
        downloaded,
        by_status,
        by_source,
        recent_failures,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Total images: {}", stats.total_records);
    println!("  Downloaded: {}", stats.downloaded);
    println!();

    println!("Images by Status:");
    for status in DownloadStatus::all_states() {
        let count = stats.by_status.get(&status).copied().unwrap_or(0);
        println!(
            "  {}: {} ({:.1}%)",
            status,
            count,
            percentage(count, stats.total_records)
        );
    }
    println!();

    if !stats.by_source.is_empty() {
        println!("Images by Source:");
        let mut source_counts: Vec<_> = stats.by_source.iter().collect();
        source_counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (source, count) in source_counts {
            println!("  {}: {}", source, count);
        }
        println!();
    }

    if !stats.recent_failures.is_empty() {
        println!("Recent Failures ({}):", stats.recent_failures.len());
        for (url, error) in &stats.recent_failures {
            println!("  - {}: {}", url, error);
        }
        println!();
    }

    println!(
        "Download Rate: {:.1}% ({} / {} images on disk)",
        percentage(stats.downloaded, stats.total_records),
        stats.downloaded,
        stats.total_records
    );
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}
