//! Download engine: bounded-concurrency scheduling over object transfers.
//!
//! The engine consumes an ordered batch of [`Descriptor`]s, skips objects
//! the manifest already records as complete (after re-verifying the file
//! on disk), and dispatches the remainder across a semaphore-bounded pool
//! of tokio tasks. Each task runs one transfer to a terminal state;
//! failures are isolated and never abort sibling jobs. A run-scoped
//! cancellation token stops dispatch and aborts in-flight fetches.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::{
    DEFAULT_MAX_CONCURRENT, DEFAULT_MULTIPART_COUNT, DEFAULT_MULTIPART_THRESHOLD,
    DEFAULT_PART_CONCURRENCY,
};
use super::fetcher::RangeFetcher;
use super::retry::RetryPolicy;
use super::strategy::{TransferContext, transfer_object};
use crate::descriptor::Descriptor;
use crate::manifest::ManifestStore;
use crate::progress::{ProgressTracker, spawn_progress_bar};

/// Minimum allowed job concurrency.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed job concurrency.
const MAX_CONCURRENCY: usize = 100;

/// Error type for engine construction and fatal setup failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid job-level concurrency value.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Invalid part-level concurrency value.
    #[error("invalid part concurrency value {value}: must be at least 1")]
    InvalidPartConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The output directory could not be created. Aborts the run before
    /// any job is scheduled.
    #[error("cannot create output directory {path}: {source}")]
    Setup {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Run configuration consumed by the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent object downloads (job-level bound K).
    pub max_concurrent: usize,
    /// Number of parts to split large objects into; 0 disables splitting.
    pub multipart_count: u32,
    /// Cap on outstanding range requests across all jobs. Deliberately a
    /// separate budget from `max_concurrent`.
    pub part_concurrency: usize,
    /// Objects at or below this size are fetched in a single stream.
    pub multipart_threshold: u64,
    /// Suppress progress rendering (counters still accumulate).
    pub quiet: bool,
    /// Directory the repository layout is recreated under.
    pub output_dir: PathBuf,
    /// Repository path prefix stripped from keys before joining onto
    /// `output_dir`.
    pub strip_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            multipart_count: DEFAULT_MULTIPART_COUNT,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            quiet: false,
            output_dir: PathBuf::from("."),
            strip_prefix: None,
        }
    }
}

/// Statistics from one download run.
///
/// `completed` counts objects that reached a verified final state,
/// including objects skipped because the manifest and the file on disk
/// already agreed. Atomic counters allow updates from concurrent tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects that reached Completed status (skips included).
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Objects whose transfer failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Objects skipped because a previous run already completed them.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Fetch retry attempts made across all jobs and parts.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Total objects processed (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bounded-concurrency download scheduler.
///
/// # Concurrency model
///
/// - Each object transfer runs in its own tokio task.
/// - A job-level semaphore permit is acquired before a task is spawned
///   and released when the job reaches a terminal state (RAII).
/// - Multipart fetches additionally draw from a global part-level
///   semaphore shared across all jobs.
/// - The manifest store and progress tracker are the only resources
///   shared across workers; both serialize or atomically order access
///   internally.
#[derive(Debug)]
pub struct DownloadEngine {
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    part_semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    fetcher: RangeFetcher,
}

impl DownloadEngine {
    /// Creates an engine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] when `max_concurrent`
    /// is outside 1-100 and [`EngineError::InvalidPartConcurrency`] when
    /// `part_concurrency` is 0.
    pub fn new(
        config: EngineConfig,
        retry_policy: RetryPolicy,
        fetcher: RangeFetcher,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.max_concurrent) {
            return Err(EngineError::InvalidConcurrency {
                value: config.max_concurrent,
            });
        }
        if config.part_concurrency == 0 {
            return Err(EngineError::InvalidPartConcurrency {
                value: config.part_concurrency,
            });
        }

        debug!(
            max_concurrent = config.max_concurrent,
            multipart_count = config.multipart_count,
            part_concurrency = config.part_concurrency,
            max_retries = retry_policy.max_attempts(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            part_semaphore: Arc::new(Semaphore::new(config.part_concurrency)),
            config,
            retry_policy,
            fetcher,
        })
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Downloads every descriptor in the batch, in input order, under the
    /// configured concurrency bound.
    ///
    /// Skips a descriptor only when the manifest records it complete AND
    /// the destination file exists with exactly the listed size; a stale
    /// manifest entry is re-scheduled. Individual job failures do not
    /// error this method - they are counted in the returned stats.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Setup`] when the output directory cannot be
    /// created (no job is scheduled in that case) and
    /// [`EngineError::SemaphoreClosed`] if the job semaphore is closed.
    #[instrument(skip_all, fields(objects = descriptors.len(), output_dir = %self.config.output_dir.display()))]
    pub async fn run(
        &self,
        descriptors: &[Descriptor],
        manifest: &Arc<ManifestStore>,
        progress: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, EngineError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| EngineError::Setup {
                path: self.config.output_dir.clone(),
                source: e,
            })?;

        let stats = Arc::new(DownloadStats::new());
        let ctx = TransferContext {
            fetcher: self.fetcher.clone(),
            policy: self.retry_policy.clone(),
            progress: Arc::clone(progress),
            stats: Arc::clone(&stats),
            part_semaphore: Arc::clone(&self.part_semaphore),
            cancel: cancel.clone(),
            multipart_count: self.config.multipart_count,
            multipart_threshold: self.config.multipart_threshold,
        };

        info!(objects = descriptors.len(), "starting download run");

        // Rendering is the engine's concern: quiet suppresses the bar
        // while the shared counters keep accumulating for the caller.
        let (mut bar_handle, bar_stop) =
            spawn_progress_bar(self.config.quiet, Arc::clone(progress), descriptors.len());

        let mut handles = Vec::new();

        for descriptor in descriptors {
            if cancel.is_cancelled() {
                info!("cancellation requested; stopping dispatch");
                break;
            }

            let dest = match descriptor.destination(
                &self.config.output_dir,
                self.config.strip_prefix.as_deref(),
            ) {
                Ok(dest) => dest,
                Err(e) => {
                    // Path-safety failures are job-level: report and move on.
                    warn!(key = descriptor.key(), error = %e, "rejecting unsafe destination");
                    stats.increment_failed();
                    progress.mark_file_failed();
                    continue;
                }
            };

            if self.already_downloaded(descriptor, &dest, manifest).await {
                debug!(key = descriptor.key(), "already downloaded; skipping");
                stats.increment_skipped();
                stats.increment_completed();
                progress.mark_file_completed();
                continue;
            }

            progress.add_total_bytes(descriptor.size());

            // Blocks while K jobs are in flight; dispatch stays in input
            // order even though completions are unordered.
            let permit = tokio::select! {
                permit = self.semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            // Stop the renderer before bailing out.
                            bar_stop.store(true, Ordering::SeqCst);
                            if let Some(handle) = bar_handle.take() {
                                let _ = handle.await;
                            }
                            return Err(EngineError::SemaphoreClosed);
                        }
                    }
                }
                () = cancel.cancelled() => {
                    info!("cancellation requested; stopping dispatch");
                    break;
                }
            };

            let ctx = ctx.clone();
            let descriptor = descriptor.clone();
            let manifest = Arc::clone(manifest);
            let stats = Arc::clone(&stats);
            let progress = Arc::clone(progress);

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                match transfer_object(&ctx, &descriptor, &dest).await {
                    Ok(report) => {
                        info!(
                            key = descriptor.key(),
                            bytes = report.bytes_written,
                            parts = report.parts.len(),
                            "download completed"
                        );
                        // Manifest persistence is best-effort: the file on
                        // disk is complete either way.
                        if let Err(e) = manifest.record_completed(descriptor.key()).await {
                            warn!(key = descriptor.key(), error = %e, "failed to persist manifest entry");
                        }
                        stats.increment_completed();
                        progress.mark_file_completed();
                    }
                    Err(e) => {
                        warn!(key = descriptor.key(), error = %e, "download failed");
                        stats.increment_failed();
                        progress.mark_file_failed();
                    }
                }
            }));
        }

        debug!(jobs = handles.len(), "waiting for downloads to settle");
        for handle in handles {
            // Task panics are logged but don't fail the batch.
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
            }
        }

        bar_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = bar_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "progress bar task panicked");
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            retried = stats.retried(),
            "download run complete"
        );

        // All tasks are done, so we hold the only reference. Fall back to
        // copying the counters if that ever stops being true.
        match Arc::try_unwrap(stats) {
            Ok(stats) => Ok(stats),
            Err(shared) => {
                let copy = DownloadStats::new();
                copy.completed.store(shared.completed(), Ordering::SeqCst);
                copy.failed.store(shared.failed(), Ordering::SeqCst);
                copy.skipped.store(shared.skipped(), Ordering::SeqCst);
                copy.retried.store(shared.retried(), Ordering::SeqCst);
                Ok(copy)
            }
        }
    }

    /// True when the manifest records the key complete and the file on
    /// disk exists with exactly the listed size. Anything else (missing
    /// file, size drift, stale entry) re-schedules the object.
    async fn already_downloaded(
        &self,
        descriptor: &Descriptor,
        dest: &std::path::Path,
        manifest: &ManifestStore,
    ) -> bool {
        if !manifest.is_completed(descriptor.key()).await {
            return false;
        }
        match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len() == descriptor.size(),
            Err(_) => false,
        }
    }
}
