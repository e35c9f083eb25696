//! Part manifest of a segmented archive.
//!
//! The CDN serves `<base>/definition.json.gz`, a gzip-compressed JSON
//! document describing how the archive is split:
//!
//! ```text
//! {
//!   "Author": "...", "OriginalFileName": "List.wabbajack",
//!   "Size": 30, "Hash": "<base64 xxh64>", "ServerAssignedUniqueId": "...",
//!   "Parts": [ { "Index": 0, "Offset": 0, "Size": 10, "Hash": "..." }, ... ]
//! }
//! ```

use std::io::Read;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{DownloadError, DownloadResult};
use crate::hash::HashValue;

/// One part of a segmented archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartDescriptor {
    pub index: u64,
    /// Byte offset of this part within the assembled file.
    pub offset: u64,
    pub size: u64,
    pub hash: HashValue,
}

impl PartDescriptor {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Layout and checksums of a segmented archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartManifest {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub original_file_name: Option<String>,
    pub size: u64,
    pub hash: HashValue,
    #[serde(default)]
    pub parts: Vec<PartDescriptor>,
    #[serde(default)]
    pub server_assigned_unique_id: Option<String>,
}

impl PartManifest {
    /// Decode a gzip-compressed JSON manifest.
    pub fn from_gzip(data: &[u8]) -> DownloadResult<Self> {
        let mut json = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut json)
            .map_err(|e| DownloadError::InvalidManifest(format!("gzip decode failed: {}", e)))?;
        Self::from_json(&json)
    }

    /// Decode an uncompressed JSON manifest.
    pub fn from_json(json: &[u8]) -> DownloadResult<Self> {
        serde_json::from_slice(json)
            .map_err(|e| DownloadError::InvalidManifest(format!("unable to parse definition: {}", e)))
    }

    /// Name the server stores the archive under.
    pub fn munged_name(&self) -> Option<String> {
        match (&self.original_file_name, &self.server_assigned_unique_id) {
            (Some(name), Some(id)) => Some(format!("{}_{}", name, id)),
            _ => None,
        }
    }

    /// Check that the parts tile `[0, size)` exactly and have unique indices.
    ///
    /// Parts may be listed in any order.
    pub fn validate(&self) -> DownloadResult<()> {
        let mut parts: Vec<&PartDescriptor> = self.parts.iter().collect();
        parts.sort_by_key(|p| (p.offset, p.index));

        let mut cursor = 0u64;
        for part in &parts {
            if part.offset < cursor {
                return Err(DownloadError::InvalidManifest(format!(
                    "part {} at offset {} overlaps previous part ending at {}",
                    part.index, part.offset, cursor
                )));
            }
            if part.offset > cursor {
                return Err(DownloadError::InvalidManifest(format!(
                    "gap of {} bytes before part {} at offset {}",
                    part.offset - cursor,
                    part.index,
                    part.offset
                )));
            }
            cursor = part.offset.checked_add(part.size).ok_or_else(|| {
                DownloadError::InvalidManifest(format!("part {} size overflows", part.index))
            })?;
        }

        if cursor != self.size {
            return Err(DownloadError::InvalidManifest(format!(
                "parts cover {} bytes but the file is {} bytes",
                cursor, self.size
            )));
        }

        let mut indices: Vec<u64> = self.parts.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        if let Some(pair) = indices.windows(2).find(|w| w[0] == w[1]) {
            return Err(DownloadError::InvalidManifest(format!(
                "duplicate part index {}",
                pair[0]
            )));
        }

        Ok(())
    }
}
