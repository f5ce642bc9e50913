//! Progress aggregation and the optional progress bar task.
//!
//! Every in-flight fetch reports byte deltas to a shared
//! [`ProgressTracker`] through atomic counters; a single rendering task
//! polls the tracker and drives one indicatif bar. In quiet mode the
//! counters still accumulate but nothing is rendered, which keeps the
//! engine usable headlessly without a second code path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Thread-safe counters for one download run.
///
/// `add_bytes` / `remove_bytes` are called from concurrent fetch tasks;
/// a failed attempt removes the bytes it reported so the retry does not
/// double-count them. Totals remain available to the caller after the
/// run regardless of whether anything was rendered.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_bytes: AtomicU64,
    bytes_transferred: AtomicU64,
    files_completed: AtomicUsize,
    files_failed: AtomicUsize,
}

impl ProgressTracker {
    /// Creates a tracker with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to the expected byte total for the run.
    pub fn add_total_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Records bytes written by a fetch attempt.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Rolls back bytes reported by a failed fetch attempt.
    pub fn remove_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Records one completed file.
    pub fn mark_file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Records one failed file.
    pub fn mark_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Expected total bytes for the run.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    /// Files completed so far.
    #[must_use]
    pub fn files_completed(&self) -> usize {
        self.files_completed.load(Ordering::SeqCst)
    }

    /// Files failed so far.
    #[must_use]
    pub fn files_failed(&self) -> usize {
        self.files_failed.load(Ordering::SeqCst)
    }
}

/// Formats a byte count as a human-readable size, e.g. `1.23 GB`.
#[must_use]
pub fn human_readable_size(size_bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

    if size_bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{size_bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

/// Spawns the progress bar task when rendering is enabled.
///
/// Returns (handle, stop) so the caller can signal stop and await the
/// handle. When `quiet` is true, returns (None, stop) with stop already
/// true - the tracker keeps counting either way.
pub fn spawn_progress_bar(
    quiet: bool,
    tracker: Arc<ProgressTracker>,
    total_files: usize,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if quiet {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar_inner(tracker, total_files, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar_inner(
    tracker: Arc<ProgressTracker>,
    total_files: usize,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(tracker.total_bytes());
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            // Total can grow while jobs are still being admitted.
            bar.set_length(tracker.total_bytes());
            bar.set_position(tracker.bytes_transferred());

            let done = tracker.files_completed() + tracker.files_failed();
            bar.set_message(format!("[{}/{}] files", done.min(total_files), total_files));

            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        bar.finish_and_clear();
    })
}
