//! Per-object transfer strategy: whole-file vs. multipart.
//!
//! Small objects (or runs with splitting disabled) use a single streamed
//! GET. Large objects are split into contiguous byte ranges of
//! `ceil(size / M)` bytes each, the destination file is pre-allocated to
//! its final size, and the parts are fetched concurrently under a global
//! part-level semaphore - writes land at disjoint offsets, so the parts
//! merge implicitly with no reassembly step. A job succeeds only when
//! every part is done and the byte counts sum to the object size; a
//! failed job leaves its partial file on disk so a later resume detects
//! the size mismatch and re-fetches.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::DownloadStats;
use super::error::DownloadError;
use super::fetcher::RangeFetcher;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::descriptor::Descriptor;
use crate::progress::ProgressTracker;

/// Status of one byte-range part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Fetch in flight.
    InProgress,
    /// Fetched and written, byte count verified.
    Done,
    /// Exhausted its retry budget.
    Failed,
}

/// One contiguous byte range of an object, fetched as an independent
/// range request. `start` and `end` are inclusive offsets.
#[derive(Debug, Clone)]
pub struct Part {
    /// First byte offset covered by this part.
    pub start: u64,
    /// Last byte offset covered by this part (inclusive).
    pub end: u64,
    /// Current status.
    pub status: PartStatus,
    /// Bytes written so far.
    pub bytes_written: u64,
}

impl Part {
    /// Length of the part's span in bytes.
    #[must_use]
    pub fn span(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Outcome of one completed object transfer.
#[derive(Debug)]
pub struct TransferReport {
    /// The parts the object was split into; empty for single-stream
    /// transfers.
    pub parts: Vec<Part>,
    /// Total bytes written, equal to the object size.
    pub bytes_written: u64,
}

/// Shared per-run state handed to every transfer.
///
/// Cheap to clone: everything heavy is behind an `Arc` (the reqwest
/// client inside the fetcher included).
#[derive(Debug, Clone)]
pub(crate) struct TransferContext {
    pub fetcher: RangeFetcher,
    pub policy: RetryPolicy,
    pub progress: Arc<ProgressTracker>,
    pub stats: Arc<DownloadStats>,
    pub part_semaphore: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub multipart_count: u32,
    pub multipart_threshold: u64,
}

/// Splits `[0, size)` into at most `multipart_count` contiguous parts of
/// `ceil(size / multipart_count)` bytes; the last part absorbs the
/// remainder. Returns an empty plan for a zero size or count.
#[must_use]
pub fn plan_parts(size: u64, multipart_count: u32) -> Vec<Part> {
    if size == 0 || multipart_count == 0 {
        return Vec::new();
    }

    let part_size = size.div_ceil(u64::from(multipart_count));
    let mut parts = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + part_size).min(size) - 1;
        parts.push(Part {
            start,
            end,
            status: PartStatus::Pending,
            bytes_written: 0,
        });
        start = end + 1;
    }
    parts
}

/// Returns true when an object of `size` bytes should be split.
#[must_use]
pub fn uses_multipart(size: u64, multipart_count: u32, threshold: u64) -> bool {
    multipart_count > 1 && size > threshold
}

/// Transfers one object to `dest`, choosing single-stream or multipart.
///
/// The caller resolves and traversal-checks `dest`; this function creates
/// intermediate directories, performs the transfer with per-attempt
/// retries, and verifies the final byte count.
pub(crate) async fn transfer_object(
    ctx: &TransferContext,
    descriptor: &Descriptor,
    dest: &Path,
) -> Result<TransferReport, DownloadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    if uses_multipart(descriptor.size(), ctx.multipart_count, ctx.multipart_threshold) {
        transfer_multipart(ctx, descriptor, dest).await
    } else {
        transfer_single(ctx, descriptor, dest).await
    }
}

/// Single streamed GET into the destination path.
async fn transfer_single(
    ctx: &TransferContext,
    descriptor: &Descriptor,
    dest: &Path,
) -> Result<TransferReport, DownloadError> {
    let url = descriptor.download_url().to_string();
    let expected = descriptor.size();

    let fetcher = ctx.fetcher.clone();
    let progress = Arc::clone(&ctx.progress);
    let dest_buf = dest.to_path_buf();
    let fetch_url = url.clone();

    let bytes_written = fetch_with_retry(ctx, &url, move || {
        let fetcher = fetcher.clone();
        let progress = Arc::clone(&progress);
        let url = fetch_url.clone();
        let dest = dest_buf.clone();
        async move { fetcher.fetch_whole(&url, &dest, expected, &progress).await }
    })
    .await?;

    debug!(key = descriptor.key(), bytes = bytes_written, "single-stream transfer complete");
    Ok(TransferReport {
        parts: Vec::new(),
        bytes_written,
    })
}

/// N-way multipart transfer into a pre-allocated destination file.
async fn transfer_multipart(
    ctx: &TransferContext,
    descriptor: &Descriptor,
    dest: &Path,
) -> Result<TransferReport, DownloadError> {
    let size = descriptor.size();
    let url = descriptor.download_url().to_string();

    // Pre-size the file so parts can write at arbitrary offsets without
    // coordination.
    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;
    file.set_len(size)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;
    drop(file);

    let mut parts = plan_parts(size, ctx.multipart_count);
    debug!(
        key = descriptor.key(),
        size,
        parts = parts.len(),
        "starting multipart transfer"
    );

    let mut handles = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter_mut().enumerate() {
        part.status = PartStatus::InProgress;
        let (start, end) = (part.start, part.end);

        let ctx = ctx.clone();
        let url = url.clone();
        let dest = dest.to_path_buf();

        handles.push(tokio::spawn(async move {
            // Outstanding range requests across all jobs share one budget,
            // separate from the job-level concurrency bound.
            let _permit = tokio::select! {
                permit = ctx.part_semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => return (index, Err(DownloadError::cancelled(&url))),
                    }
                }
                () = ctx.cancel.cancelled() => {
                    return (index, Err(DownloadError::cancelled(&url)));
                }
            };

            let fetcher = ctx.fetcher.clone();
            let progress = Arc::clone(&ctx.progress);
            let fetch_url = url.clone();
            let fetch_dest = dest.clone();

            let result = fetch_with_retry(&ctx, &url, move || {
                let fetcher = fetcher.clone();
                let progress = Arc::clone(&progress);
                let url = fetch_url.clone();
                let dest = fetch_dest.clone();
                async move { fetcher.fetch_range(&url, &dest, start, end, &progress).await }
            })
            .await;

            (index, result)
        }));
    }

    let mut first_error: Option<DownloadError> = None;
    for handle in handles {
        match handle.await {
            Ok((index, Ok(bytes))) => {
                parts[index].status = PartStatus::Done;
                parts[index].bytes_written = bytes;
            }
            Ok((index, Err(e))) => {
                parts[index].status = PartStatus::Failed;
                warn!(key = descriptor.key(), part = index, error = %e, "part failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Err(e) => {
                warn!(key = descriptor.key(), error = %e, "part task panicked");
                if first_error.is_none() {
                    first_error = Some(DownloadError::io(dest, std::io::Error::other(e)));
                }
            }
        }
    }

    // A single failed part fails the whole job; the partially written
    // file stays on disk so a resume sees the size mismatch and retries.
    if let Some(e) = first_error {
        return Err(e);
    }

    let bytes_written: u64 = parts.iter().map(|p| p.bytes_written).sum();
    if bytes_written != size {
        return Err(DownloadError::size_mismatch(&url, size, bytes_written));
    }

    debug!(key = descriptor.key(), bytes = bytes_written, "multipart transfer complete");
    Ok(TransferReport {
        parts,
        bytes_written,
    })
}

/// Runs one fetch operation with retry/backoff until it succeeds, the
/// retry budget is exhausted, or the run is cancelled.
///
/// Each invocation of `attempt_fn` is one HTTP GET. Failed attempts have
/// already rolled back their progress deltas (see the fetcher), so
/// retries start from a clean counter.
async fn fetch_with_retry<F, Fut>(
    ctx: &TransferContext,
    url: &str,
    attempt_fn: F,
) -> Result<u64, DownloadError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64, DownloadError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            result = attempt_fn() => result,
            () = ctx.cancel.cancelled() => Err(DownloadError::cancelled(url)),
        };

        match outcome {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                let failure_type = classify_error(&e);
                let retry_after = retry_after_delay(&e);

                match ctx.policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        // Prefer a server-mandated Retry-After over our
                        // own backoff.
                        let delay = retry_after.unwrap_or(backoff_delay);
                        info!(
                            url = %url,
                            attempt = next_attempt,
                            max_attempts = ctx.policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "retrying fetch"
                        );
                        ctx.stats.increment_retried();

                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = ctx.cancel.cancelled() => {
                                return Err(DownloadError::cancelled(url));
                            }
                        }
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(url = %url, %reason, "not retrying fetch");
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Extracts a delay from a 429 response's Retry-After header.
///
/// Only the delta-seconds form is honored; HTTP-date values are ignored
/// and fall back to exponential backoff.
fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    let DownloadError::HttpStatus {
        status: 429,
        retry_after: Some(value),
        ..
    } = error
    else {
        return None;
    };
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assert_partition_complete(size: u64, parts: &[Part]) {
        assert_eq!(parts[0].start, 0, "first part must start at zero");
        assert_eq!(
            parts[parts.len() - 1].end,
            size - 1,
            "last part must end at size - 1"
        );
        for window in parts.windows(2) {
            assert_eq!(
                window[0].end + 1,
                window[1].start,
                "parts must be contiguous"
            );
        }
        let total: u64 = parts.iter().map(Part::span).sum();
        assert_eq!(total, size, "part spans must sum to the object size");
    }

    #[test]
    fn test_plan_parts_even_split() {
        let size = 50 * 1024 * 1024;
        let parts = plan_parts(size, 4);

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].span(), 13_107_200); // ~12.5 MB each
        assert_partition_complete(size, &parts);
        assert!(parts.iter().all(|p| p.status == PartStatus::Pending));
    }

    #[test]
    fn test_plan_parts_uneven_split_last_part_absorbs_remainder() {
        let parts = plan_parts(100, 3);

        // ceil(100 / 3) = 34: spans 34, 34, 32.
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].span(), 34);
        assert_eq!(parts[1].span(), 34);
        assert_eq!(parts[2].span(), 32);
        assert_partition_complete(100, &parts);
    }

    #[test]
    fn test_plan_parts_partition_complete_across_sizes() {
        for size in [1, 2, 7, 99, 100, 101, 1024, 10_485_760, 52_428_801] {
            for count in [2, 3, 4, 8, 16] {
                let parts = plan_parts(size, count);
                assert!(parts.len() <= count as usize);
                assert_partition_complete(size, &parts);
            }
        }
    }

    #[test]
    fn test_plan_parts_more_parts_than_bytes() {
        // 3 bytes over 8 parts: ceil gives 1-byte parts, only 3 of them.
        let parts = plan_parts(3, 8);
        assert_eq!(parts.len(), 3);
        assert_partition_complete(3, &parts);
    }

    #[test]
    fn test_plan_parts_zero_size_or_count_is_empty() {
        assert!(plan_parts(0, 4).is_empty());
        assert!(plan_parts(100, 0).is_empty());
    }

    #[test]
    fn test_uses_multipart_decision() {
        let threshold = 10 * 1024 * 1024;

        // Above threshold with splitting enabled.
        assert!(uses_multipart(50 * 1024 * 1024, 4, threshold));
        // At or below the threshold stays single-stream.
        assert!(!uses_multipart(5 * 1024 * 1024, 4, threshold));
        assert!(!uses_multipart(threshold, 4, threshold));
        // Splitting disabled.
        assert!(!uses_multipart(50 * 1024 * 1024, 0, threshold));
        assert!(!uses_multipart(50 * 1024 * 1024, 1, threshold));
    }

    #[test]
    fn test_retry_after_delay_parses_delta_seconds() {
        let error = DownloadError::http_status_with_retry_after(
            "https://example.org/a.tif",
            429,
            Some("7".to_string()),
        );
        assert_eq!(retry_after_delay(&error), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_after_delay_ignores_http_dates_and_other_statuses() {
        let dated = DownloadError::http_status_with_retry_after(
            "https://example.org/a.tif",
            429,
            Some("Wed, 21 Oct 2026 07:28:00 GMT".to_string()),
        );
        assert_eq!(retry_after_delay(&dated), None);

        let not_rate_limited = DownloadError::http_status_with_retry_after(
            "https://example.org/a.tif",
            503,
            Some("7".to_string()),
        );
        assert_eq!(retry_after_delay(&not_rate_limited), None);
    }

    #[test]
    fn test_part_span() {
        let part = Part {
            start: 10,
            end: 19,
            status: PartStatus::Pending,
            bytes_written: 0,
        };
        assert_eq!(part.span(), 10);
    }
}
