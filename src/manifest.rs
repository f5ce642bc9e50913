//! Resumability manifest persisted alongside downloaded files.
//!
//! The manifest records which object keys have fully completed and
//! size-verified, so an interrupted batch can be re-run without
//! re-fetching finished files. It lives at the root of the output
//! directory as `.download_manifest.json` and is rewritten atomically
//! (temp file + rename) after every successful job. A missing, corrupt,
//! or foreign manifest degrades to an empty one - resume is best-effort
//! and never fatal.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the manifest inside the output directory.
pub const MANIFEST_FILE_NAME: &str = ".download_manifest.json";

/// Errors from persisting the manifest.
///
/// Load failures are intentionally not represented here: loading always
/// succeeds by degrading to an empty manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Writing or renaming the manifest file failed.
    #[error("IO error persisting manifest at {path}: {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing the manifest to JSON failed.
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk manifest schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestData {
    repository: String,
    downloaded: BTreeSet<String>,
}

/// Shared, serialized-access store of completed download keys.
///
/// One instance is shared by all workers of a run. The inner mutex
/// guarantees at most one writer at a time, so concurrent completions
/// never interleave writes to the manifest file.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    state: Mutex<ManifestData>,
}

impl ManifestStore {
    /// Loads the manifest from `output_dir`, or starts empty.
    ///
    /// A missing file is the normal first-run case. A file that cannot be
    /// read or parsed, or that belongs to a different repository, is
    /// discarded with a warning - the run then re-downloads everything.
    pub async fn load(output_dir: &Path, repository: impl Into<String>) -> Self {
        let repository = repository.into();
        let path = output_dir.join(MANIFEST_FILE_NAME);

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<ManifestData>(&bytes) {
                Ok(parsed) if parsed.repository == repository => {
                    debug!(
                        path = %path.display(),
                        completed = parsed.downloaded.len(),
                        "loaded download manifest"
                    );
                    parsed
                }
                Ok(parsed) => {
                    warn!(
                        path = %path.display(),
                        found = %parsed.repository,
                        expected = %repository,
                        "manifest belongs to a different repository; starting fresh"
                    );
                    ManifestData {
                        repository,
                        downloaded: BTreeSet::new(),
                    }
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "manifest is corrupt; starting fresh"
                    );
                    ManifestData {
                        repository,
                        downloaded: BTreeSet::new(),
                    }
                }
            },
            Err(_) => ManifestData {
                repository,
                downloaded: BTreeSet::new(),
            },
        };

        Self {
            path,
            state: Mutex::new(data),
        }
    }

    /// Returns true when `key` is recorded as fully downloaded.
    pub async fn is_completed(&self, key: &str) -> bool {
        self.state.lock().await.downloaded.contains(key)
    }

    /// Number of keys recorded as completed.
    pub async fn completed_count(&self) -> usize {
        self.state.lock().await.downloaded.len()
    }

    /// Records `key` as completed and persists the manifest.
    ///
    /// The file is written to a temporary sibling and atomically renamed
    /// over the manifest, so a crash mid-write never leaves a truncated
    /// manifest behind.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when serialization or the write/rename
    /// fails. The in-memory entry is kept either way, so the current run
    /// still skips the key on a later pass.
    pub async fn record_completed(&self, key: &str) -> Result<(), ManifestError> {
        let mut state = self.state.lock().await;
        state.downloaded.insert(key.to_string());
        // Persist while holding the lock: updates are serialized and the
        // file always reflects a consistent snapshot.
        self.persist(&state).await
    }

    async fn persist(&self, data: &ManifestData) -> Result<(), ManifestError> {
        let json = serde_json::to_vec_pretty(data)?;
        let tmp_path = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| ManifestError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ManifestError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}
