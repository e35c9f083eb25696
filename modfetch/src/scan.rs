//! Discovery of artifacts already present in a download directory.
//!
//! The index is built with a single non-recursive pass and is read-only
//! afterwards, so it can be shared across download tasks behind an `Arc`.
//! It is advisory: a matching name and size is taken as "already
//! downloaded" without hashing.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{DownloadError, DownloadResult};

/// File name to size index of a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingFileIndex {
    files: HashMap<String, u64>,
}

impl ExistingFileIndex {
    /// An index with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan `dir` for regular files whose extension is in `extensions`.
    ///
    /// Extensions match case-insensitively and may be given with or without
    /// the leading dot. A missing directory yields an empty index.
    pub async fn scan(dir: &Path, extensions: &[String]) -> DownloadResult<Self> {
        let accepted: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "Download directory does not exist yet");
                return Ok(Self::empty());
            }
            Err(e) => return Err(DownloadError::io(dir, e)),
        };

        let mut files = HashMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DownloadError::io(dir, e))?
        {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::trace!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let accepted_ext = path
                .extension()
                .map(|ext| accepted.contains(&normalize_extension(&ext.to_string_lossy())))
                .unwrap_or(false);
            if !accepted_ext {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            files.insert(name, metadata.len());
        }

        tracing::info!(dir = %dir.display(), count = files.len(), "Scanned existing downloads");
        Ok(Self { files })
    }

    /// Size of the file named `name`, if present.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.files.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Whether a file with exactly this name and size exists.
    pub fn matches(&self, name: &str, size: u64) -> bool {
        self.get(name) == Some(size)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FromIterator<(String, u64)> for ExistingFileIndex {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Lowercase without the leading dot.
fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}
