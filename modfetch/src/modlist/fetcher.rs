//! Segmented download of modlist archives.
//!
//! Modlist archives are large and served by the CDN as independently
//! addressable parts. The fetcher reads the part manifest, downloads parts
//! concurrently, verifies each against its own hash and writes it at its
//! offset in a pre-sized file, then verifies the whole file.
//!
//! # Phases
//!
//! ```text
//! NotStarted ──► DefinitionFetched ──► PartsDownloading ──► Verifying ──► Complete
//!      │                 │                    │                 │
//!      └─────────────────┴────────────────────┴─────────────────┴──► Failed
//! ```
//!
//! An existing file whose hash already matches skips straight to `Complete`.
//! A failed fetch leaves a partially written file behind; nothing is
//! recorded for resumption.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::stream::{self, TryStreamExt};
use tokio::io::AsyncReadExt;
use percent_encoding::percent_decode_str;
use tokio_util::sync::CancellationToken;

use crate::config::DownloaderConfig;
use crate::error::{DownloadError, DownloadResult};
use crate::hash::{ensure_match, hash_copy, hash_file, HashValue};
use crate::http::HttpTransport;
use crate::io::{IdleTimeoutReader, ProgressObserver, StreamOrigin};
use crate::modlist::{ModListMetadata, PartDescriptor, PartManifest};
use crate::retry::RetryPolicy;

/// Manifest path relative to the archive's download link.
const DEFINITION_PATH: &str = "definition.json.gz";

/// Part path prefix relative to the archive's download link.
const PARTS_PATH: &str = "parts";

/// Lifecycle of one segmented fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    NotStarted,
    DefinitionFetched,
    PartsDownloading,
    Verifying,
    Complete,
    Failed,
}

impl fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchPhase::NotStarted => "not started",
            FetchPhase::DefinitionFetched => "definition fetched",
            FetchPhase::PartsDownloading => "downloading parts",
            FetchPhase::Verifying => "verifying",
            FetchPhase::Complete => "complete",
            FetchPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observer notified on every phase transition.
pub type PhaseObserver = Arc<dyn Fn(FetchPhase) + Send + Sync>;

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Location of the archive.
    pub path: PathBuf,
    /// True when an existing verified file was reused.
    pub reused_existing: bool,
    /// Bytes transferred from the network for parts.
    pub bytes_downloaded: u64,
}

/// Downloads segmented archives from the modlist CDN.
pub struct SegmentedArchiveFetcher {
    transport: Arc<dyn HttpTransport>,
    config: DownloaderConfig,
    retry: RetryPolicy,
    progress: Option<ProgressObserver>,
    phase_observer: Option<PhaseObserver>,
}

impl SegmentedArchiveFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, config: DownloaderConfig) -> Self {
        let retry = config.retry_policy();
        Self {
            transport,
            config,
            retry,
            progress: None,
            phase_observer: None,
        }
    }

    /// Report cumulative bytes written across all parts.
    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn with_phase_observer(mut self, observer: PhaseObserver) -> Self {
        self.phase_observer = Some(observer);
        self
    }

    /// Fetch the archive described by catalog metadata.
    pub async fn fetch_modlist(
        &self,
        metadata: &ModListMetadata,
        cancel: &CancellationToken,
    ) -> DownloadResult<FetchOutcome> {
        self.fetch(&metadata.links.download, metadata.hash(), cancel)
            .await
    }

    /// Fetch the archive at `download_link` into the modlist directory.
    ///
    /// # Arguments
    ///
    /// * `download_link` - Base URL of the archive on the CDN
    /// * `expected_hash` - Known hash used to recognize an existing file
    /// * `cancel` - Stops the fetch at the next suspension point
    pub async fn fetch(
        &self,
        download_link: &str,
        expected_hash: Option<HashValue>,
        cancel: &CancellationToken,
    ) -> DownloadResult<FetchOutcome> {
        self.set_phase(FetchPhase::NotStarted);
        let result = self.run(download_link, expected_hash, cancel).await;
        match &result {
            Ok(_) => self.set_phase(FetchPhase::Complete),
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!(link = download_link, error = %e, "Modlist download failed");
                }
                self.set_phase(FetchPhase::Failed);
            }
        }
        result
    }

    async fn run(
        &self,
        download_link: &str,
        expected_hash: Option<HashValue>,
        cancel: &CancellationToken,
    ) -> DownloadResult<FetchOutcome> {
        let file_name = archive_file_name(download_link).ok_or_else(|| DownloadError::InvalidResponse {
            url: download_link.to_string(),
            reason: "download link has no file name".to_string(),
        })?;
        let dir = &self.config.modlist_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::io(dir, e))?;
        let path = dir.join(&file_name);

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tracing::debug!(file = %file_name, "Starting modlist download");

        if let Some(expected) = expected_hash {
            if self.existing_file_matches(&path, expected, cancel).await? {
                tracing::info!(file = %file_name, "Existing modlist verified, skipping download");
                return Ok(FetchOutcome {
                    path,
                    reused_existing: true,
                    bytes_downloaded: 0,
                });
            }
        }

        let base = download_link.trim_end_matches('/');
        let manifest = self.fetch_manifest(base, cancel).await?;
        manifest.validate()?;
        self.set_phase(FetchPhase::DefinitionFetched);
        tracing::debug!(
            file = %file_name,
            size = manifest.size,
            parts = manifest.parts.len(),
            "Part manifest retrieved"
        );

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        file.set_len(manifest.size)
            .await
            .map_err(|e| DownloadError::io(&path, e))?;
        let file = Arc::new(file.into_std().await);

        self.set_phase(FetchPhase::PartsDownloading);
        let written = Mutex::new(0u64);
        stream::iter(manifest.parts.iter().map(Ok::<_, DownloadError>))
            .try_for_each_concurrent(self.config.max_concurrent_downloads.max(1), |part| {
                let file = Arc::clone(&file);
                let path = path.as_path();
                let written = &written;
                async move {
                    self.retry
                        .execute("Part download", cancel, || {
                            self.download_part(base, part, Arc::clone(&file), path, cancel)
                        })
                        .await?;
                    self.report_progress(written, part.size);
                    Ok(())
                }
            })
            .await?;

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        if self.config.check_hash {
            self.set_phase(FetchPhase::Verifying);
            let computed = hash_file(&path, self.config.buffer_size, cancel).await?;
            ensure_match(computed, manifest.hash, &file_name)?;
            tracing::trace!(file = %file_name, "Verified modlist hash");
        }

        tracing::info!(file = %file_name, "Downloaded modlist successfully");
        Ok(FetchOutcome {
            path,
            reused_existing: false,
            bytes_downloaded: manifest.size,
        })
    }

    async fn existing_file_matches(
        &self,
        path: &Path,
        expected: HashValue,
        cancel: &CancellationToken,
    ) -> DownloadResult<bool> {
        if !self.config.discover_existing_files {
            return Ok(false);
        }
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(false),
        }

        tracing::trace!(path = %path.display(), "Discovered existing file, checking integrity");
        let computed = hash_file(path, self.config.buffer_size, cancel).await?;
        if computed == expected {
            Ok(true)
        } else {
            tracing::trace!(
                path = %path.display(),
                "Existing file is corrupted or outdated, downloading again"
            );
            Ok(false)
        }
    }

    async fn fetch_manifest(&self, base: &str, cancel: &CancellationToken) -> DownloadResult<PartManifest> {
        let url = format!("{}/{}", base, DEFINITION_PATH);
        tracing::trace!(url = %url, "Getting part manifest");
        let data = self
            .retry
            .execute("Definition download", cancel, || async {
                let response = self.transport.get(&url).await?.error_for_status(&url)?;
                response.bytes(&url, self.config.stall_timeout).await
            })
            .await?;
        PartManifest::from_gzip(&data)
    }

    async fn download_part(
        &self,
        base: &str,
        part: &PartDescriptor,
        file: Arc<File>,
        path: &Path,
        cancel: &CancellationToken,
    ) -> DownloadResult<()> {
        let url = format!("{}/{}/{}", base, PARTS_PATH, part.index);
        tracing::trace!(index = part.index, "Downloading part");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.transport.get(&url) => response?,
        };
        let response = response.error_for_status(&url)?;

        // One byte past the declared size is enough to detect an oversized body.
        let mut reader =
            IdleTimeoutReader::new(response.body, self.config.stall_timeout).take(part.size.saturating_add(1));
        let mut data = Vec::with_capacity(initial_capacity(part.size, self.config.buffer_size));
        let (received, computed) = hash_copy(
            &mut reader,
            &mut data,
            StreamOrigin::Remote(&url),
            path,
            self.config.buffer_size,
            cancel,
        )
        .await?;

        if received != part.size {
            return Err(DownloadError::Request {
                url,
                reason: format!("expected {} bytes, received {}", part.size, received),
            });
        }
        if self.config.check_hash {
            ensure_match(computed, part.hash, &format!("part {}", part.index))?;
            tracing::trace!(index = part.index, "Verified part");
        }

        write_at(file, path, part.offset, data).await?;
        tracing::trace!(index = part.index, offset = part.offset, "Part written to disk");
        Ok(())
    }

    fn report_progress(&self, written: &Mutex<u64>, bytes: u64) {
        let mut total = written.lock().unwrap_or_else(|e| e.into_inner());
        *total += bytes;
        if let Some(observer) = &self.progress {
            observer(*total);
        }
    }

    fn set_phase(&self, phase: FetchPhase) {
        tracing::trace!(%phase, "Modlist fetch phase");
        if let Some(observer) = &self.phase_observer {
            observer(phase);
        }
    }
}

/// File name for a download link.
///
/// The last path segment is percent-decoded and cut at its last `_`, which
/// separates the original name from the server-assigned id.
pub fn archive_file_name(download_link: &str) -> Option<String> {
    let decoded = percent_decode_str(download_link).decode_utf8_lossy();
    let segment = decoded.trim_end_matches('/').rsplit('/').next()?;
    let name = match segment.rfind('_') {
        Some(end) if end > 0 => &segment[..end],
        _ => segment,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Buffer preallocation for a part body, never more than one copy buffer.
fn initial_capacity(declared: u64, buffer_size: usize) -> usize {
    usize::try_from(declared).map_or(buffer_size, |size| size.min(buffer_size))
}

/// Write `data` at `offset` without moving a shared cursor.
async fn write_at(file: Arc<File>, path: &Path, offset: u64, data: Vec<u8>) -> DownloadResult<()> {
    tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
        .await
        .map_err(|e| DownloadError::io(path, io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(|e| DownloadError::io(path, e))
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write part"));
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{MockReply, MockTransport};
    use bytes::Bytes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    const LINK: &str = "https://cdn.example/Test%20List.wabbajack_0a1b-2c3d";
    const BASE: &str = "https://cdn.example/Test%20List.wabbajack_0a1b-2c3d";

    fn payload() -> Vec<u8> {
        (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect()
    }

    /// Manifest splitting `data` into `part_size` chunks.
    fn manifest_for(data: &[u8], part_size: usize) -> PartManifest {
        let parts = data
            .chunks(part_size)
            .enumerate()
            .map(|(i, chunk)| PartDescriptor {
                index: i as u64,
                offset: (i * part_size) as u64,
                size: chunk.len() as u64,
                hash: HashValue::of(chunk),
            })
            .collect();
        PartManifest {
            author: Some("tester".into()),
            original_file_name: Some("Test List.wabbajack".into()),
            size: data.len() as u64,
            hash: HashValue::of(data),
            parts,
            server_assigned_unique_id: Some("0a1b-2c3d".into()),
        }
    }

    fn gzip(manifest: &PartManifest) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_string(manifest).unwrap().as_bytes())
            .unwrap();
        encoder.finish().unwrap()
    }

    fn part_url(index: usize) -> String {
        format!("{}/parts/{}", BASE, index)
    }

    fn cdn(data: &[u8], part_size: usize) -> MockTransport {
        let manifest = manifest_for(data, part_size);
        let mut transport = MockTransport::new().route(
            format!("{}/definition.json.gz", BASE),
            MockReply::body(gzip(&manifest)),
        );
        for (i, chunk) in data.chunks(part_size).enumerate() {
            transport = transport.route(part_url(i), MockReply::body(chunk.to_vec()));
        }
        transport
    }

    fn config(dir: &Path, concurrency: usize) -> DownloaderConfig {
        DownloaderConfig::default()
            .with_modlist_dir(dir)
            .with_max_concurrent_downloads(concurrency)
            .with_backoff(Duration::ZERO, 1, Duration::ZERO)
            .with_stall_timeout(Duration::from_secs(5))
            .with_buffer_size(512)
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(archive_file_name(LINK).as_deref(), Some("Test List.wabbajack"));
        assert_eq!(
            archive_file_name("https://cdn.example/a_b_c/").as_deref(),
            Some("a_b")
        );
        assert_eq!(
            archive_file_name("https://cdn.example/plain.wabbajack").as_deref(),
            Some("plain.wabbajack")
        );
        assert_eq!(archive_file_name("https://cdn.example/_id"), Some("_id".to_string()));
    }

    #[tokio::test]
    async fn test_parts_reassemble_at_every_concurrency() {
        let data = payload();
        let part_size = 1024;
        let part_count = data.len().div_ceil(part_size);

        for concurrency in 1..=part_count {
            let temp = TempDir::new().unwrap();
            let transport = Arc::new(cdn(&data, part_size));
            let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), concurrency));
            let cancel = CancellationToken::new();

            let outcome = fetcher.fetch(LINK, None, &cancel).await.unwrap();

            assert_eq!(outcome.path, temp.path().join("Test List.wabbajack"));
            assert!(!outcome.reused_existing);
            assert_eq!(std::fs::read(&outcome.path).unwrap(), data, "concurrency {}", concurrency);
            for i in 0..part_count {
                assert_eq!(transport.count(&part_url(i)), 1);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parts_finishing_in_reverse_order_reassemble() {
        let data = payload();
        let part_size = 1024;
        let part_count = data.len().div_ceil(part_size);

        for concurrency in [2, part_count] {
            let temp = TempDir::new().unwrap();
            let manifest = manifest_for(&data, part_size);
            let mut transport = MockTransport::new().route(
                format!("{}/definition.json.gz", BASE),
                MockReply::body(gzip(&manifest)),
            );
            // Later parts answer sooner, so they complete first.
            for (i, chunk) in data.chunks(part_size).enumerate() {
                let delay = Duration::from_millis(100 * (part_count - i) as u64);
                transport = transport.route(
                    part_url(i),
                    MockReply::Paced(vec![(delay, Bytes::copy_from_slice(chunk))]),
                );
            }
            let fetcher = SegmentedArchiveFetcher::new(Arc::new(transport), config(temp.path(), concurrency));
            let cancel = CancellationToken::new();

            let outcome = fetcher.fetch(LINK, None, &cancel).await.unwrap();

            let written = std::fs::read(&outcome.path).unwrap();
            assert_eq!(HashValue::of(&written), manifest.hash, "concurrency {}", concurrency);
            assert_eq!(written, data);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_manifest_is_retried() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let definition = gzip(&manifest_for(&data, 5000));
        let (head, tail) = definition.split_at(4);
        let transport = Arc::new(
            MockTransport::new()
                .route(
                    format!("{}/definition.json.gz", BASE),
                    MockReply::Paced(vec![
                        (Duration::ZERO, Bytes::copy_from_slice(head)),
                        (Duration::from_secs(24 * 3600), Bytes::copy_from_slice(tail)),
                    ]),
                )
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(definition.clone()))
                .route(part_url(0), MockReply::body(data[..5000].to_vec()))
                .route(part_url(1), MockReply::body(data[5000..].to_vec())),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let outcome = fetcher.fetch(LINK, None, &cancel).await.unwrap();

        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(transport.count(&format!("{}/definition.json.gz", BASE)), 2);
    }

    #[tokio::test]
    async fn test_oversized_part_body_is_rejected() {
        let data = b"0123456789".to_vec();
        let temp = TempDir::new().unwrap();
        let manifest = manifest_for(&data, 10);
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest)))
                .route(part_url(0), MockReply::body(vec![b'x'; 4096])),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport, config(temp.path(), 1));
        let cancel = CancellationToken::new();

        let err = fetcher.fetch(LINK, None, &cancel).await.unwrap_err();

        match err {
            DownloadError::Request { reason, .. } => {
                assert_eq!(reason, "expected 10 bytes, received 11")
            }
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_capacity_ignores_declared_size() {
        assert_eq!(initial_capacity(100, 512), 100);
        assert_eq!(initial_capacity(1 << 50, 512), 512);
        assert_eq!(initial_capacity(u64::MAX, 4096), 4096);
    }

    #[tokio::test]
    async fn test_verified_existing_file_skips_network() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("Test List.wabbajack"), &data).unwrap();
        let transport = Arc::new(cdn(&data, 1024));
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let outcome = fetcher
            .fetch(LINK, Some(HashValue::of(&data)), &cancel)
            .await
            .unwrap();

        assert!(outcome.reused_existing);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_outdated_existing_file_is_replaced() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("Test List.wabbajack"), b"stale").unwrap();
        let transport = Arc::new(cdn(&data, 4096));
        let fetcher = SegmentedArchiveFetcher::new(transport, config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let outcome = fetcher
            .fetch(LINK, Some(HashValue::of(&data)), &cancel)
            .await
            .unwrap();

        assert!(!outcome.reused_existing);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_corrupt_part_is_not_retried() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let manifest = manifest_for(&data, 5000);
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest)))
                .route(part_url(0), MockReply::body(data[..5000].to_vec()))
                .route(part_url(1), MockReply::body(vec![0u8; 5000])),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 1));
        let cancel = CancellationToken::new();

        let err = fetcher.fetch(LINK, None, &cancel).await.unwrap_err();

        match err {
            DownloadError::HashMismatch { name, .. } => assert_eq!(name, "part 1"),
            other => panic!("expected HashMismatch, got {other:?}"),
        }
        assert_eq!(transport.count(&part_url(1)), 1);
    }

    #[tokio::test]
    async fn test_transient_part_failure_is_retried() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let manifest = manifest_for(&data, 5000);
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest)))
                .route(part_url(0), MockReply::Status(503))
                .route(part_url(0), MockReply::Fail("connection reset".into()))
                .route(part_url(0), MockReply::body(data[..5000].to_vec()))
                .route(part_url(1), MockReply::body(data[5000..].to_vec())),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let outcome = fetcher.fetch(LINK, None, &cancel).await.unwrap();

        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(transport.count(&part_url(0)), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_part_is_retried() {
        let data = b"0123456789".to_vec();
        let temp = TempDir::new().unwrap();
        let manifest = manifest_for(&data, 10);
        let stalled = vec![
            (Duration::ZERO, Bytes::from_static(b"0123")),
            (Duration::from_secs(6), Bytes::from_static(b"456")),
            (Duration::ZERO, Bytes::from_static(b"789")),
        ];
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest)))
                .route(part_url(0), MockReply::Paced(stalled))
                .route(part_url(0), MockReply::body(data.clone())),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 1));
        let cancel = CancellationToken::new();

        let outcome = fetcher.fetch(LINK, None, &cancel).await.unwrap();

        assert_eq!(std::fs::read(&outcome.path).unwrap(), data);
        assert_eq!(transport.count(&part_url(0)), 2);
    }

    #[tokio::test]
    async fn test_invalid_layout_rejected_before_parts() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let mut manifest = manifest_for(&data, 5000);
        manifest.parts[1].offset += 1;
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest))),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let err = fetcher.fetch(LINK, None, &cancel).await.unwrap_err();

        assert!(matches!(err, DownloadError::InvalidManifest(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_whole_file_mismatch_is_fatal() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let mut manifest = manifest_for(&data, 5000);
        manifest.hash = HashValue::new(1);
        let transport = Arc::new(
            MockTransport::new()
                .route(format!("{}/definition.json.gz", BASE), MockReply::body(gzip(&manifest)))
                .route(part_url(0), MockReply::body(data[..5000].to_vec()))
                .route(part_url(1), MockReply::body(data[5000..].to_vec())),
        );
        let fetcher = SegmentedArchiveFetcher::new(transport, config(temp.path(), 2));
        let cancel = CancellationToken::new();

        let err = fetcher.fetch(LINK, None, &cancel).await.unwrap_err();
        match err {
            DownloadError::HashMismatch { name, .. } => assert_eq!(name, "Test List.wabbajack"),
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_phases_and_progress_are_reported() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(cdn(&data, 2500));
        let phases = Arc::new(Mutex::new(Vec::new()));
        let reports = Arc::new(Mutex::new(Vec::new()));

        let phase_sink = Arc::clone(&phases);
        let report_sink = Arc::clone(&reports);
        let fetcher = SegmentedArchiveFetcher::new(transport, config(temp.path(), 2))
            .with_phase_observer(Arc::new(move |p| phase_sink.lock().unwrap().push(p)))
            .with_progress(Arc::new(move |n| report_sink.lock().unwrap().push(n)));
        let cancel = CancellationToken::new();

        fetcher.fetch(LINK, None, &cancel).await.unwrap();

        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                FetchPhase::NotStarted,
                FetchPhase::DefinitionFetched,
                FetchPhase::PartsDownloading,
                FetchPhase::Verifying,
                FetchPhase::Complete,
            ]
        );
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 4);
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*reports.last().unwrap(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_reports_failed_phase() {
        let data = payload();
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(cdn(&data, 2500));
        let phases = Arc::new(Mutex::new(Vec::new()));
        let phase_sink = Arc::clone(&phases);
        let fetcher = SegmentedArchiveFetcher::new(transport.clone(), config(temp.path(), 2))
            .with_phase_observer(Arc::new(move |p| phase_sink.lock().unwrap().push(p)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch(LINK, None, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(transport.requests().is_empty());
        assert_eq!(phases.lock().unwrap().last(), Some(&FetchPhase::Failed));
    }
}
