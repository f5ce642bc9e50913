//! geofetch core library
//!
//! Bulk download engine for object-storage-backed geospatial data
//! repositories: bounded-concurrency scheduling, optional multipart
//! byte-range transfers for large objects, retry with exponential
//! backoff, live progress aggregation, and a crash-consistent manifest
//! for resumable batches.
//!
//! # Architecture
//!
//! - [`descriptor`] - validated object metadata from the repository lister
//! - [`download`] - scheduler, transfer strategy, range fetcher, retry
//! - [`manifest`] - persisted record of completed downloads
//! - [`progress`] - shared counters and the progress bar task
//!
//! Listing, authentication, and URL-format conversion are upstream
//! collaborators: the engine consumes a ready batch of descriptors.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod descriptor;
pub mod download;
pub mod manifest;
pub mod progress;

// Re-export commonly used types
pub use descriptor::{Descriptor, DescriptorError};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadEngine, DownloadError, DownloadStats, EngineConfig, EngineError,
    FailureType, Part, PartStatus, RangeFetcher, RetryDecision, RetryPolicy, TransferReport,
    classify_error, plan_parts, uses_multipart,
};
pub use manifest::{MANIFEST_FILE_NAME, ManifestError, ManifestStore};
pub use progress::{ProgressTracker, human_readable_size, spawn_progress_bar};
