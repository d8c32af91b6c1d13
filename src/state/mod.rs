//! State module for tracking download and request progress
//!
//! # Components
//!
//! - `DownloadStatus`: lifecycle of a catalogued image (pending, downloading, completed, failed)
//! - `SourceState`: per-source request timing used by the rate limiter

mod download_status;
mod source_state;

// Re-export main types
pub use download_status::DownloadStatus;
pub use source_state::SourceState;
