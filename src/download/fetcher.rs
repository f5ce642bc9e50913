//! Byte-range fetcher: one HTTP GET per invocation.
//!
//! The fetcher performs either a whole-file GET (expects 200, body length
//! must equal the object size) or a ranged GET (`Range: bytes=a-b`,
//! expects 206, body length must equal the span), streaming the body to
//! the destination file at a known offset so concurrent parts never need
//! coordination. Progress deltas are reported per chunk and rolled back
//! when an attempt fails, so a retry never double-counts bytes.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{RANGE, RETRY_AFTER};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::progress::ProgressTracker;

/// HTTP fetcher for whole-file and range-restricted GETs.
///
/// Created once per run and shared by every worker, taking advantage of
/// reqwest's connection pooling across parts and objects.
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    client: Client,
}

impl Default for RangeFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeFetcher {
    /// Creates a fetcher with default timeouts (30s connect, 10min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a fetcher with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied
    /// configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches the entire object into `dest`, truncating any previous
    /// content.
    ///
    /// Returns the byte count written, which is guaranteed to equal
    /// `expected` on success.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network failures, non-200 statuses,
    /// IO errors, or a body length that disagrees with `expected`.
    #[instrument(skip(self, progress), fields(url = %url))]
    pub async fn fetch_whole(
        &self,
        url: &str,
        dest: &Path,
        expected: u64,
        progress: &ProgressTracker,
    ) -> Result<u64, DownloadError> {
        let response = self.send_get(url, None).await?;
        if response.status().as_u16() != 200 {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let written = stream_body(file, response, url, dest, expected, progress).await?;
        debug!(bytes = written, path = %dest.display(), "whole-file fetch complete");
        Ok(written)
    }

    /// Fetches the inclusive byte range `[start, end]` into `dest` at
    /// offset `start`.
    ///
    /// The destination file must already exist and be pre-sized; parts of
    /// one object write to disjoint offsets of the same file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network failures, any status other
    /// than 206, IO errors, or a body length that disagrees with the
    /// requested span.
    #[instrument(skip(self, progress), fields(url = %url, start, end))]
    pub async fn fetch_range(
        &self,
        url: &str,
        dest: &Path,
        start: u64,
        end: u64,
        progress: &ProgressTracker,
    ) -> Result<u64, DownloadError> {
        let span = end - start + 1;
        let range_header = format!("bytes={start}-{end}");

        let response = self.send_get(url, Some(&range_header)).await?;
        // A 200 here means the server ignored the Range header; writing
        // the full body at this offset would corrupt sibling parts.
        if response.status().as_u16() != 206 {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let written = stream_body(file, response, url, dest, span, progress).await?;
        debug!(bytes = written, start, end, "range fetch complete");
        Ok(written)
    }

    async fn send_get(
        &self,
        url: &str,
        range_header: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(range) = range_header {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status,
                retry_after,
            ));
        }

        Ok(response)
    }
}

/// Streams a response body into `file`, enforcing the expected span.
///
/// Reports each chunk to the progress tracker and rolls every reported
/// byte back on any error path, including a final length mismatch, so the
/// caller can retry the attempt from a clean counter.
async fn stream_body(
    file: File,
    response: reqwest::Response,
    url: &str,
    dest: &Path,
    expected: u64,
    progress: &ProgressTracker,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    let result = async {
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
            let chunk_len = chunk.len() as u64;

            // Refuse to write past the requested span; a longer body would
            // clobber bytes owned by a sibling part.
            if written + chunk_len > expected {
                return Err(DownloadError::size_mismatch(
                    url,
                    expected,
                    written + chunk_len,
                ));
            }

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(dest, e))?;
            written += chunk_len;
            progress.add_bytes(chunk_len);
        }

        writer.flush().await.map_err(|e| DownloadError::io(dest, e))?;

        if written != expected {
            return Err(DownloadError::size_mismatch(url, expected, written));
        }
        Ok(written)
    }
    .await;

    if result.is_err() {
        progress.remove_bytes(written);
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_whole_writes_body_and_reports_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.bin");
        let progress = ProgressTracker::new();

        let fetcher = RangeFetcher::new();
        let url = format!("{}/a.bin", server.uri());
        let written = fetcher
            .fetch_whole(&url, &dest, 11, &progress)
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(progress.bytes_transferred(), 11);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_fetch_whole_short_body_is_size_mismatch_and_rolls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("short.bin");
        let progress = ProgressTracker::new();

        let fetcher = RangeFetcher::new();
        let url = format!("{}/short.bin", server.uri());
        let result = fetcher.fetch_whole(&url, &dest, 100, &progress).await;

        assert!(matches!(
            result,
            Err(DownloadError::SizeMismatch {
                expected: 100,
                actual: 3,
                ..
            })
        ));
        assert_eq!(
            progress.bytes_transferred(),
            0,
            "failed attempt must roll back its progress"
        );
    }

    #[tokio::test]
    async fn test_fetch_whole_http_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        let url = format!("{}/missing.bin", server.uri());
        let result = fetcher
            .fetch_whole(&url, &dir.path().join("missing.bin"), 1, &progress)
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_range_writes_at_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r.bin"))
            .and(header("Range", "bytes=4-7"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"WXYZ"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("r.bin");
        // Pre-sized file, as the strategy would create it.
        tokio::fs::write(&dest, vec![0u8; 10]).await.unwrap();

        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        let url = format!("{}/r.bin", server.uri());
        let written = fetcher
            .fetch_range(&url, &dest, 4, 7, &progress)
            .await
            .unwrap();

        assert_eq!(written, 4);
        let content = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(&content[4..8], b"WXYZ");
        assert_eq!(&content[0..4], &[0u8; 4]);
        assert_eq!(&content[8..], &[0u8; 2]);
    }

    #[tokio::test]
    async fn test_fetch_range_rejects_200_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/full.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 10]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("full.bin");
        tokio::fs::write(&dest, vec![0u8; 10]).await.unwrap();

        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        let url = format!("{}/full.bin", server.uri());
        let result = fetcher.fetch_range(&url, &dest, 0, 3, &progress).await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 200, .. })
        ));
        // The pre-sized file must be untouched.
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![0u8; 10]);
    }

    #[tokio::test]
    async fn test_fetch_range_overlong_body_is_size_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/long.bin"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 16]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("long.bin");
        tokio::fs::write(&dest, vec![0u8; 32]).await.unwrap();

        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        let url = format!("{}/long.bin", server.uri());
        let result = fetcher.fetch_range(&url, &dest, 0, 3, &progress).await;

        assert!(matches!(result, Err(DownloadError::SizeMismatch { .. })));
        assert_eq!(progress.bytes_transferred(), 0);
    }

    #[tokio::test]
    async fn test_fetch_whole_connection_error_is_network() {
        let dir = TempDir::new().unwrap();
        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        // Port 1 is essentially never listening.
        let result = fetcher
            .fetch_whole(
                "http://127.0.0.1:1/nope.bin",
                &dir.path().join("nope.bin"),
                1,
                &progress,
            )
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::Network { .. }) | Err(DownloadError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_after_header_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited.bin"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let progress = ProgressTracker::new();
        let fetcher = RangeFetcher::new();
        let url = format!("{}/limited.bin", server.uri());
        let result = fetcher
            .fetch_whole(&url, &dir.path().join("limited.bin"), 1, &progress)
            .await;

        match result {
            Err(DownloadError::HttpStatus {
                status: 429,
                retry_after,
                ..
            }) => assert_eq!(retry_after.as_deref(), Some("7")),
            other => panic!("expected 429 with Retry-After, got {other:?}"),
        }
    }
}
