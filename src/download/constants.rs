//! Tuning constants shared across the download module.

/// Connect timeout for HTTP requests, in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for HTTP requests, in seconds. Generous because single
/// objects can be gigabytes.
pub const READ_TIMEOUT_SECS: u64 = 600;

/// Default number of concurrent object downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default number of parts large objects are split into (0 disables).
pub const DEFAULT_MULTIPART_COUNT: u32 = 8;

/// Default cap on outstanding range requests across all jobs.
///
/// This budget is independent of the job-level concurrency bound so
/// multipart fetches cannot oversubscribe the remote service.
pub const DEFAULT_PART_CONCURRENCY: usize = 16;

/// Objects at or below this size are fetched in a single stream (10 MiB).
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 10 * 1024 * 1024;
