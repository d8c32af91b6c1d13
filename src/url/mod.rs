//! URL handling module for Image Trawler
//!
//! This module turns fetched page content into candidate image URLs:
//! pattern-driven extraction, redirector resolution, noise filtering and
//! order-preserving deduplication.

mod extract;
mod normalize;

// Re-export main types and functions
pub use extract::{unescape_url, Extractor};
pub use normalize::{canonicalize_url, ImageCandidate, Normalizer};

use crate::config::ExtractionConfig;

/// Builds the extractor and normalizer described by an extraction config
pub fn pipeline(config: &ExtractionConfig) -> (Extractor, Normalizer) {
    (
        Extractor::new(&config.patterns),
        Normalizer::new(&config.wrapper_params, &config.noise),
    )
}
