//! Bundle manifest: relative path to content digest
//!
//! The manifest is serialized as a compact JSON object with keys in sorted
//! order, so the same file tree always produces byte-identical manifest
//! bytes regardless of directory iteration order.

use crate::digest::{bytes_digest, DIGEST_HEX_LEN};
use crate::error::{PassError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the manifest file inside a bundle.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Name of the detached signature file inside a bundle.
pub const SIGNATURE_FILE: &str = "signature";

/// A regular file captured from a bundle source directory.
///
/// `data` holds the exact bytes that were digested, so the archive can be
/// written from the same bytes the manifest describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// POSIX-style path relative to the bundle root
    pub path: String,
    /// File contents at enumeration time
    pub data: Vec<u8>,
}

/// Mapping from bundle-relative path to hex content digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Create an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from captured source files.
    #[must_use]
    pub fn from_files(files: &[SourceFile]) -> Self {
        let mut manifest = Self::new();
        for file in files {
            manifest.insert(file.path.clone(), bytes_digest(&file.data));
        }
        manifest
    }

    /// Insert or replace an entry, returning the previous digest.
    pub fn insert(&mut self, path: String, digest: String) -> Option<String> {
        self.entries.insert(path, digest)
    }

    /// Digest recorded for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(path, digest)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(path, digest)| (path.as_str(), digest.as_str()))
    }

    /// Whether `data` matches the digest recorded for `path`.
    #[must_use]
    pub fn verify_entry(&self, path: &str, data: &[u8]) -> bool {
        self.get(path)
            .is_some_and(|expected| expected == bytes_digest(data))
    }

    /// Serialize to the deterministic on-disk form.
    ///
    /// # Errors
    ///
    /// Returns `PassError::Manifest` if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| PassError::Manifest(format!("failed to serialize manifest: {e}")))
    }

    /// Parse a serialized manifest.
    ///
    /// # Errors
    ///
    /// Returns `PassError::Manifest` if the bytes are not a JSON object of
    /// string values or a value is not a lowercase hex digest.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| PassError::Manifest(format!("failed to parse manifest: {e}")))?;
        if let Some((path, _)) = manifest.iter().find(|(_, digest)| !is_hex_digest(digest)) {
            return Err(PassError::Manifest(format!(
                "malformed digest for {}",
                path
            )));
        }
        Ok(manifest)
    }
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Whether a bundle-relative path names an artifact produced by signing.
#[must_use]
pub fn is_reserved(relative: &str) -> bool {
    relative == MANIFEST_FILE || relative == SIGNATURE_FILE
}

/// Recursively read every eligible regular file under `root`.
///
/// Hidden entries (any component starting with `.`), symlinks and other
/// non-regular files are skipped, as are `manifest.json` and `signature`
/// at the root left over from a previous run. Files are returned sorted by
/// relative path.
///
/// # Errors
///
/// Returns `PassError::Io` on read failure, or `PassError::Manifest` if a
/// path is not valid UTF-8.
pub async fn collect_files(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PassError::io(&dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PassError::io(&dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                PassError::Manifest(format!("non UTF-8 path: {}", path.display()))
            })?;
            if name.starts_with('.') {
                continue;
            }

            let relative = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };

            // file_type() does not follow symlinks
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PassError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push((path, relative));
            } else if file_type.is_file() {
                if is_reserved(&relative) {
                    continue;
                }
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| PassError::io(&path, e))?;
                debug!("Collected {} [{}B]", relative, data.len());
                files.push(SourceFile {
                    path: relative,
                    data,
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
