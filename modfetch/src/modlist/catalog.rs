//! Catalog of published modlists.
//!
//! The catalog is assembled in two steps: `repositories.json` maps a
//! repository name to the URL of its modlist index, and every index is a
//! JSON array of [`ModListMetadata`]. Indexes are fetched concurrently.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::format_size;
use crate::error::{DownloadError, DownloadResult};
use crate::hash::HashValue;
use crate::http::HttpTransport;

/// Official list of modlist repositories.
pub const REPOSITORIES_URL: &str =
    "https://raw.githubusercontent.com/wabbajack-tools/mod-lists/master/repositories.json";

/// Published description of one modlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModListMetadata {
    pub title: String,
    pub description: String,
    pub author: String,
    pub maintainers: Vec<String>,
    pub game: String,
    pub official: bool,
    pub tags: Vec<String>,
    pub nsfw: bool,
    pub utility_list: bool,
    pub force_down: bool,
    pub links: Links,
    pub download_metadata: Option<DownloadMetadata>,
    pub version: String,
    #[serde(rename = "repositoryName")]
    pub repository_name: String,
}

impl ModListMetadata {
    /// Archive hash, if the repository published download metadata.
    pub fn hash(&self) -> Option<HashValue> {
        self.download_metadata.as_ref().map(|m| m.hash)
    }

    /// Short multi-line description for listings.
    pub fn summary(&self) -> String {
        let size = self
            .download_metadata
            .as_ref()
            .map(|m| format_size(m.total_size()))
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "Author: {}\nVersion: {}\nSize: {}",
            self.author, self.version, size
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Links {
    pub image: String,
    pub readme: String,
    /// Base URL of the segmented `.wabbajack` archive.
    pub download: String,
    #[serde(rename = "machineURL")]
    pub machine_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DownloadMetadata {
    pub hash: HashValue,
    /// Size of the `.wabbajack` file.
    pub size: u64,
    pub number_of_archives: u64,
    pub size_of_archives: u64,
    pub number_of_installed_files: u64,
    pub size_of_installed_files: u64,
}

impl DownloadMetadata {
    /// The modlist file plus every archive it downloads.
    pub fn total_size(&self) -> u64 {
        self.size.saturating_add(self.size_of_archives)
    }
}

/// Fetch every repository's modlists, sorted by title.
///
/// A repository whose index cannot be fetched is logged and left out; only
/// a failure to read `repositories_url` itself is an error.
///
/// # Arguments
///
/// * `transport` - HTTP transport for the index requests
/// * `repositories_url` - URL of `repositories.json`
/// * `max_concurrency` - Repository indexes fetched at once
/// * `stall_timeout` - Longest pause allowed inside a response body
/// * `cancel` - Stops the fetch
pub async fn fetch_catalog(
    transport: &dyn HttpTransport,
    repositories_url: &str,
    max_concurrency: usize,
    stall_timeout: Duration,
    cancel: &CancellationToken,
) -> DownloadResult<Vec<ModListMetadata>> {
    tracing::debug!(url = repositories_url, "Downloading repository index");
    let repositories: BTreeMap<String, String> = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        index = get_json(transport, repositories_url, stall_timeout) => index?,
    };

    let fetches = stream::iter(repositories)
        .map(|(name, url)| async move {
            let result = get_json::<Vec<ModListMetadata>>(transport, &url, stall_timeout).await;
            (name, url, result)
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect::<Vec<_>>();

    let results = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        results = fetches => results,
    };

    let mut lists = Vec::new();
    for (name, url, result) in results {
        match result {
            Ok(entries) => {
                tracing::trace!(repository = %name, count = entries.len(), "Fetched repository");
                lists.extend(entries.into_iter().map(|mut entry| {
                    if entry.repository_name.is_empty() {
                        entry.repository_name = name.clone();
                    }
                    entry
                }));
            }
            Err(e) => {
                tracing::warn!(repository = %name, url = %url, error = %e, "Failed to fetch repository");
            }
        }
    }

    lists.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.title.cmp(&b.title))
    });
    tracing::info!(count = lists.len(), "Found modlists within repositories");
    Ok(lists)
}

async fn get_json<T: DeserializeOwned>(
    transport: &dyn HttpTransport,
    url: &str,
    stall_timeout: Duration,
) -> DownloadResult<T> {
    let response = transport.get(url).await?.error_for_status(url)?;
    let body = response.bytes(url, stall_timeout).await?;
    serde_json::from_slice(&body).map_err(|e| DownloadError::InvalidResponse {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
