//! Object descriptors produced by the repository lister.
//!
//! A [`Descriptor`] identifies one remote object to download: its
//! repository-relative key, its size in bytes, and the URL it can be
//! fetched from. Descriptors are validated at construction so that the
//! rest of the engine can rely on a well-formed key and URL; the loose
//! dictionaries emitted by object-storage listings never reach the
//! download path unchecked.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors produced when validating descriptor metadata.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The object key is empty.
    #[error("descriptor has an empty key")]
    EmptyKey,

    /// The object key contains a path traversal segment or is absolute.
    #[error("unsafe key {key:?}: keys must be relative and free of '..' segments")]
    UnsafeKey {
        /// The offending key.
        key: String,
    },

    /// The source URL is not a parseable absolute URL.
    #[error("invalid download URL for key {key:?}: {url}")]
    InvalidUrl {
        /// The key the URL belongs to.
        key: String,
        /// The unparseable URL string.
        url: String,
    },
}

/// Metadata for one remote object, as reported by the lister.
///
/// Immutable once constructed. The listing JSON consumed by the CLI
/// deserializes directly into this type; validation runs during
/// deserialization via [`RawDescriptor`], so a listing containing a
/// traversal key is rejected before any job is scheduled.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawDescriptor")]
pub struct Descriptor {
    key: String,
    size: u64,
    last_modified: String,
    download_url: String,
}

/// Unvalidated wire shape of a listing entry.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    key: String,
    size: u64,
    #[serde(default)]
    last_modified: String,
    download_url: String,
}

impl TryFrom<RawDescriptor> for Descriptor {
    type Error = DescriptorError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        Descriptor::new(raw.key, raw.size, raw.last_modified, raw.download_url)
    }
}

impl Descriptor {
    /// Creates a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::EmptyKey`] for an empty key,
    /// [`DescriptorError::UnsafeKey`] for absolute keys or keys containing
    /// `..` segments, and [`DescriptorError::InvalidUrl`] when the
    /// download URL does not parse as an absolute URL.
    pub fn new(
        key: impl Into<String>,
        size: u64,
        last_modified: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Result<Self, DescriptorError> {
        let key = key.into();
        let download_url = download_url.into();

        if key.is_empty() {
            return Err(DescriptorError::EmptyKey);
        }
        if !is_safe_key(&key) {
            return Err(DescriptorError::UnsafeKey { key });
        }
        if Url::parse(&download_url).is_err() {
            return Err(DescriptorError::InvalidUrl {
                key,
                url: download_url,
            });
        }

        Ok(Self {
            key,
            size,
            last_modified: last_modified.into(),
            download_url,
        })
    }

    /// Repository-relative object key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object size in bytes, as reported by the listing.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last-modified timestamp string from the listing.
    #[must_use]
    pub fn last_modified(&self) -> &str {
        &self.last_modified
    }

    /// URL the object is fetched from.
    #[must_use]
    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    /// Resolves the destination path for this object under `output_dir`.
    ///
    /// When `strip_prefix` is set and the key starts with it, the prefix
    /// (and a following `/`) is removed before joining, so downloading
    /// `account/repo/data/a.tif` with prefix `account/repo` lands at
    /// `<output_dir>/data/a.tif`. The key is re-checked for traversal
    /// segments after stripping; an empty remainder is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::UnsafeKey`] if the stripped key would
    /// escape `output_dir`.
    pub fn destination(
        &self,
        output_dir: &Path,
        strip_prefix: Option<&str>,
    ) -> Result<PathBuf, DescriptorError> {
        let relative = match strip_prefix {
            Some(prefix) => self
                .key
                .strip_prefix(prefix)
                .map_or(self.key.as_str(), |rest| rest.trim_start_matches('/')),
            None => self.key.as_str(),
        };

        if relative.is_empty() || !is_safe_key(relative) {
            return Err(DescriptorError::UnsafeKey {
                key: self.key.clone(),
            });
        }

        Ok(output_dir.join(relative))
    }
}

/// Returns true when a key is relative and contains no `..` segments.
fn is_safe_key(key: &str) -> bool {
    let path = Path::new(key);
    path.components().all(|component| {
        matches!(component, Component::Normal(_) | Component::CurDir)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn descriptor(key: &str) -> Result<Descriptor, DescriptorError> {
        Descriptor::new(
            key,
            1024,
            "2025-06-01 12:00:00",
            "https://data.example.org/bucket/file.tif",
        )
    }

    #[test]
    fn test_new_valid_descriptor() {
        let desc = descriptor("repo/data/scene.tif").unwrap();
        assert_eq!(desc.key(), "repo/data/scene.tif");
        assert_eq!(desc.size(), 1024);
        assert_eq!(desc.last_modified(), "2025-06-01 12:00:00");
        assert!(desc.download_url().starts_with("https://"));
    }

    #[test]
    fn test_new_empty_key_rejected() {
        let result = descriptor("");
        assert!(matches!(result, Err(DescriptorError::EmptyKey)));
    }

    #[test]
    fn test_new_traversal_key_rejected() {
        for key in ["../escape.tif", "a/../../b.tif", ".."] {
            let result = descriptor(key);
            assert!(
                matches!(result, Err(DescriptorError::UnsafeKey { .. })),
                "key {key:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_new_absolute_key_rejected() {
        let result = descriptor("/etc/passwd");
        assert!(matches!(result, Err(DescriptorError::UnsafeKey { .. })));
    }

    #[test]
    fn test_new_invalid_url_rejected() {
        let result = Descriptor::new("a/b.tif", 1, "", "not a url");
        assert!(matches!(result, Err(DescriptorError::InvalidUrl { .. })));
    }

    #[test]
    fn test_destination_preserves_key_structure() {
        let desc = descriptor("a/b/c.tif").unwrap();
        let dest = desc.destination(Path::new("/tmp/out"), None).unwrap();
        assert_eq!(dest, PathBuf::from("/tmp/out/a/b/c.tif"));
    }

    #[test]
    fn test_destination_strips_repository_prefix() {
        let desc = descriptor("account/repo/data/c.tif").unwrap();
        let dest = desc
            .destination(Path::new("/tmp/out"), Some("account/repo"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/tmp/out/data/c.tif"));
    }

    #[test]
    fn test_destination_ignores_non_matching_prefix() {
        let desc = descriptor("other/data/c.tif").unwrap();
        let dest = desc
            .destination(Path::new("/tmp/out"), Some("account/repo"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/tmp/out/other/data/c.tif"));
    }

    #[test]
    fn test_destination_rejects_prefix_consuming_whole_key() {
        let desc = descriptor("account/repo").unwrap();
        let result = desc.destination(Path::new("/tmp/out"), Some("account/repo"));
        assert!(matches!(result, Err(DescriptorError::UnsafeKey { .. })));
    }

    #[test]
    fn test_deserialize_valid_listing_entry() {
        let json = r#"{
            "key": "repo/data/scene.tif",
            "size": 52428800,
            "last_modified": "2025-06-01 12:00:00",
            "download_url": "https://data.example.org/repo/data/scene.tif"
        }"#;
        let desc: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.size(), 52_428_800);
    }

    #[test]
    fn test_deserialize_rejects_traversal_key() {
        let json = r#"{
            "key": "../escape.tif",
            "size": 1,
            "download_url": "https://data.example.org/escape.tif"
        }"#;
        let result: Result<Descriptor, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_missing_last_modified_defaults_empty() {
        let json = r#"{
            "key": "repo/a.tif",
            "size": 10,
            "download_url": "https://data.example.org/repo/a.tif"
        }"#;
        let desc: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.last_modified(), "");
    }
}
