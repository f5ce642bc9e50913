//! Concurrent download engine for object-storage repositories.
//!
//! The engine downloads a batch of remote objects under a bounded
//! concurrency budget, optionally splitting large objects into parallel
//! byte-range transfers, with retry/backoff on transient failures and a
//! resumability manifest that lets an interrupted batch continue.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use geofetch::{
//!     Descriptor, DownloadEngine, EngineConfig, ManifestStore, ProgressTracker, RangeFetcher,
//!     RetryPolicy,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptors = vec![Descriptor::new(
//!     "repo/data/scene.tif",
//!     52_428_800,
//!     "2025-06-01 12:00:00",
//!     "https://data.example.org/repo/data/scene.tif",
//! )?];
//!
//! let config = EngineConfig {
//!     output_dir: PathBuf::from("./downloads"),
//!     ..EngineConfig::default()
//! };
//! let manifest = Arc::new(ManifestStore::load(&config.output_dir, "repo").await);
//! let progress = Arc::new(ProgressTracker::new());
//! let engine = DownloadEngine::new(config, RetryPolicy::default(), RangeFetcher::new())?;
//!
//! let stats = engine
//!     .run(&descriptors, &manifest, &progress, &CancellationToken::new())
//!     .await?;
//! println!("Completed: {}", stats.completed());
//! # Ok(())
//! # }
//! ```

pub mod constants;
mod engine;
mod error;
mod fetcher;
mod retry;
mod strategy;

pub use engine::{DownloadEngine, DownloadStats, EngineConfig, EngineError};
pub use error::DownloadError;
pub use fetcher::RangeFetcher;
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use strategy::{Part, PartStatus, TransferReport, plan_parts, uses_multipart};
