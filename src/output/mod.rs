//! Output module for catalog and run reports
//!
//! This module handles:
//! - Catalog statistics for `--stats`
//! - Printing the final status of a crawl run

pub mod stats;

pub use stats::{load_statistics, print_statistics, CatalogStatistics};

use crate::crawler::RunStatusReport;

/// Prints a run's final status to stdout
///
/// # Arguments
///
/// * `report` - The status reported by the run registry
pub fn print_run_report(report: &RunStatusReport) {
    let counters = &report.counters;

    println!("=== Crawl Run {} ===\n", report.run_id);
    println!("  Source: {}", report.source);
    println!("  Query: {}", report.query);
    println!("  State: {:?}", report.state);
    println!("  Units completed: {}", report.units_completed);
    println!("  Last cursor: {}", report.cursor);
    println!("  Started: {}", report.started_at.to_rfc3339());
    if let Some(finished) = report.finished_at {
        let elapsed = (finished - report.started_at).num_seconds();
        println!("  Finished: {} ({}s)", finished.to_rfc3339(), elapsed);
    }
    println!();

    println!("Counters:");
    println!("  URLs found: {}", counters.found);
    println!("  Unique candidates: {}", counters.unique);
    println!("  Verified images: {}", counters.verified);
    println!("  Records saved: {}", counters.saved);
    println!("  Downloaded: {}", counters.downloaded);
    println!("  Errors: {}", counters.errors);
    println!("  Retries: {}", counters.retries);

    if let Some(error) = &report.last_error {
        println!();
        println!("Last error: {}", error);
    }
}
