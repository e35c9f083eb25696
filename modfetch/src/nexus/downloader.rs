//! Concurrent download of the archives a modlist needs.
//!
//! Every descriptor becomes one task in a [`JoinSet`]. A semaphore bounds
//! how many transfers run at once and tasks are admitted in submission
//! order. Each item is retried on its own; the first item that still fails
//! cancels a session token derived from the caller's token, which stops
//! admission and makes every in-flight sibling unwind.
//!
//! ```text
//!                      ┌── permit ──► task 0 ──┐
//! descriptors ─► admit ├── permit ──► task 1 ──┼─► join all ─► summary / first error
//!                      └── (waits) ─► task 2 ──┘
//!                                      │
//!                         failure ─► session.cancel()
//! ```
//!
//! Per item:
//!
//! 1. Skip when the declared size exceeds the configured maximum
//! 2. Skip when a file with the same name and size already exists
//! 3. Resolve the download URL, bounded by the resolution timeout
//! 4. Re-check existing files under the resolved name when it differs
//! 5. Stream the body to `<name>.part`, hashing and verifying in the same
//!    pass, then rename it to its final name
//!
//! A transfer that fails for any reason removes its `.part` file, so only
//! verified archives ever carry an accepted name.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{format_size, DownloaderConfig};
use crate::error::{DownloadError, DownloadResult, ErrorKind};
use crate::hash::{ensure_match, hash_copy};
use crate::http::{file_name_from_url, HttpTransport};
use crate::io::{copy_stream, IdleTimeoutReader, ProgressObserver, ProgressReader, StreamOrigin};
use crate::nexus::{DownloadDescriptor, DownloadEvent, EventObserver, LinkResolver, SkipReason};
use crate::retry::RetryPolicy;
use crate::scan::ExistingFileIndex;

/// Totals of a finished download session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    /// Bytes written for downloaded items.
    pub bytes: u64,
}

/// Suffix of files still being downloaded.
const PARTIAL_SUFFIX: &str = ".part";

/// Outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Downloaded { bytes: u64 },
    Skipped,
}

/// Downloads many archives concurrently into one directory.
#[derive(Clone)]
pub struct ConcurrentFileDownloader {
    transport: Arc<dyn HttpTransport>,
    resolver: Arc<dyn LinkResolver>,
    config: Arc<DownloaderConfig>,
    retry: RetryPolicy,
    observer: Option<EventObserver>,
    probe_head: bool,
}

impl ConcurrentFileDownloader {
    /// # Arguments
    ///
    /// * `transport` - HTTP transport used for the archive bodies
    /// * `resolver` - Turns descriptors into download URLs
    /// * `config` - Directory, limits, timeouts and retry settings
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        resolver: Arc<dyn LinkResolver>,
        config: DownloaderConfig,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            transport,
            resolver,
            config: Arc::new(config),
            retry,
            observer: None,
            probe_head: false,
        }
    }

    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Send a HEAD request after resolution to learn the served file name and size.
    pub fn with_head_probe(mut self, probe: bool) -> Self {
        self.probe_head = probe;
        self
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Download `descriptors[start..]`.
    ///
    /// Returns only after every spawned task has finished. When an item
    /// fails, the error of the first failing item is returned wrapped in
    /// [`DownloadError::Item`]; when `cancel` fires first,
    /// [`DownloadError::Cancelled`] is returned.
    pub async fn download_all(
        &self,
        descriptors: &[DownloadDescriptor],
        start: usize,
        cancel: &CancellationToken,
    ) -> DownloadResult<DownloadSummary> {
        let dir = &self.config.download_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DownloadError::io(dir, e))?;

        let existing = if self.config.discover_existing_files {
            ExistingFileIndex::scan(dir, &self.config.accepted_extensions).await?
        } else {
            ExistingFileIndex::empty()
        };
        let existing = Arc::new(existing);
        tracing::info!(
            total = descriptors.len(),
            start,
            existing = existing.len(),
            dir = %dir.display(),
            "Starting downloads"
        );

        let session = cancel.child_token();
        let failure: Arc<Mutex<Option<DownloadError>>> = Arc::new(Mutex::new(None));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_downloads.max(1)));
        let mut tasks = JoinSet::new();

        for (index, descriptor) in descriptors.iter().enumerate().skip(start) {
            let permit = tokio::select! {
                biased;
                _ = session.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if session.is_cancelled() {
                break;
            }

            let this = self.clone();
            let descriptor = descriptor.clone();
            let existing = Arc::clone(&existing);
            let session = session.clone();
            let failure = Arc::clone(&failure);
            tasks.spawn(async move {
                let _permit = permit;
                match this.download_one(index, &descriptor, &existing, &session).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) if e.is_cancelled() => {
                        tracing::debug!(index, file = %descriptor.file_name, "Download cancelled");
                        None
                    }
                    Err(e) => {
                        record_failure(&failure, &session, e.for_item(&descriptor.file_name));
                        None
                    }
                }
            });
        }

        let mut summary = DownloadSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(ItemOutcome::Downloaded { bytes })) => {
                    summary.downloaded += 1;
                    summary.bytes += bytes;
                }
                Ok(Some(ItemOutcome::Skipped)) => summary.skipped += 1,
                Ok(None) => {}
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {}
            }
        }

        let failed = failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(err) = failed {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tracing::info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            size = %format_size(summary.bytes),
            "Downloads finished"
        );
        Ok(summary)
    }

    async fn download_one(
        &self,
        index: usize,
        descriptor: &DownloadDescriptor,
        existing: &ExistingFileIndex,
        cancel: &CancellationToken,
    ) -> DownloadResult<ItemOutcome> {
        let name: Arc<str> = Arc::from(descriptor.file_name.as_str());
        self.emit(DownloadEvent::Started {
            index,
            name: Arc::clone(&name),
            size: descriptor.size,
        });
        tracing::debug!(index, file = %name, size = %format_size(descriptor.size), "Downloading");

        let limit = self.config.max_file_size;
        if descriptor.size > limit {
            tracing::trace!(
                file = %name,
                size = descriptor.size,
                limit,
                "File exceeds the maximum file size, skipping"
            );
            return Ok(self.skip(index, name, SkipReason::TooLarge {
                size: descriptor.size,
                limit,
            }));
        }
        if existing.matches(&descriptor.file_name, descriptor.size) {
            tracing::trace!(file = %name, "File already exists, skipping");
            return Ok(self.skip(index, name, SkipReason::AlreadyPresent));
        }

        let url = self
            .retry
            .execute(&format!("Resolving {}", name), cancel, || {
                self.resolve(descriptor, cancel)
            })
            .await?;

        let (file_name, served_size) = self.served_name(&url, descriptor, cancel).await?;
        if file_name != descriptor.file_name {
            tracing::trace!(declared = %name, resolved = %file_name, "Resolved file name differs");
            let present = match served_size {
                Some(size) => existing.matches(&file_name, size),
                None => existing.contains(&file_name),
            };
            if present {
                tracing::trace!(file = %file_name, "File already exists under resolved name, skipping");
                return Ok(self.skip(index, name, SkipReason::ResolvedNameExists { file_name }));
            }
        }

        let path = self.destination(&file_name, &url)?;
        let bytes = self
            .retry
            .execute(&format!("Downloading {}", name), cancel, || {
                self.transfer(index, &name, descriptor, &url, &path, cancel)
            })
            .await?;

        tracing::info!(file = %file_name, bytes, "Downloaded file '{}' successfully", file_name);
        self.emit(DownloadEvent::Completed {
            index,
            name,
            path,
            bytes,
        });
        Ok(ItemOutcome::Downloaded { bytes })
    }

    async fn resolve(
        &self,
        descriptor: &DownloadDescriptor,
        cancel: &CancellationToken,
    ) -> DownloadResult<String> {
        let timeout = self.config.resolve_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            resolved = tokio::time::timeout(timeout, self.resolver.resolve(descriptor)) => match resolved {
                Ok(result) => result,
                Err(_) => Err(DownloadError::Timeout {
                    url: descriptor.mod_page_url(),
                    timeout,
                }),
            },
        }
    }

    /// File name and size the server will deliver, as far as known.
    ///
    /// A failed HEAD request only loses the extra information, except for
    /// throttling, which ends the session like it does for the download.
    async fn served_name(
        &self,
        url: &str,
        descriptor: &DownloadDescriptor,
        cancel: &CancellationToken,
    ) -> DownloadResult<(String, Option<u64>)> {
        let mut name = file_name_from_url(url).unwrap_or_else(|| descriptor.file_name.clone());
        let mut size = None;
        if !self.probe_head {
            return Ok((name, size));
        }

        let head = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            head = self.transport.head(url) => head,
        };
        match head {
            Ok(info) if (200..300).contains(&info.status) => {
                if let Some(suggested) = info.file_name {
                    name = suggested;
                }
                size = info.content_length;
            }
            Ok(info) if info.status == 429 => return Err(DownloadError::from_status(429, url)),
            Ok(info) => tracing::trace!(url, status = info.status, "HEAD request rejected"),
            Err(e) if e.kind() == ErrorKind::Throttled => return Err(e),
            Err(e) => tracing::trace!(url, error = %e, "HEAD request failed"),
        }
        Ok((name, size))
    }

    fn destination(&self, file_name: &str, url: &str) -> DownloadResult<PathBuf> {
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains(['/', '\\'])
        {
            return Err(DownloadError::InvalidResponse {
                url: url.to_string(),
                reason: format!("unusable file name {:?}", file_name),
            });
        }
        Ok(self.config.download_dir.join(file_name))
    }

    async fn transfer(
        &self,
        index: usize,
        name: &Arc<str>,
        descriptor: &DownloadDescriptor,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let partial = partial_path(path);
        let result = self
            .write_body(index, name, descriptor, url, &partial, cancel)
            .await;
        let result = match result {
            Ok(bytes) => tokio::fs::rename(&partial, path)
                .await
                .map(|_| bytes)
                .map_err(|e| DownloadError::io(path, e)),
            Err(e) => Err(e),
        };
        if result.is_err() {
            remove_partial(&partial).await;
        }
        result
    }

    async fn write_body(
        &self,
        index: usize,
        name: &Arc<str>,
        descriptor: &DownloadDescriptor,
        url: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> DownloadResult<u64> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.transport.get(url) => response?,
        };
        let response = response.error_for_status(url)?;
        let total = response.content_length;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let mut reader = ProgressReader::new(
            IdleTimeoutReader::new(response.body, self.config.stall_timeout),
            self.progress_observer(index, name, total),
        );
        let origin = StreamOrigin::Remote(url);

        if self.config.check_hash {
            let (copied, computed) = hash_copy(
                &mut reader,
                &mut file,
                origin,
                path,
                self.config.buffer_size,
                cancel,
            )
            .await?;
            ensure_match(computed, descriptor.hash, &descriptor.file_name)?;
            tracing::trace!(file = %name, hash = %computed, "Verified file hash");
            Ok(copied)
        } else {
            copy_stream(
                &mut reader,
                &mut file,
                origin,
                path,
                self.config.buffer_size,
                None,
                cancel,
            )
            .await
        }
    }

    fn progress_observer(&self, index: usize, name: &Arc<str>, total: Option<u64>) -> ProgressObserver {
        let observer = self.observer.clone();
        let name = Arc::clone(name);
        Arc::new(move |bytes| {
            if let Some(observer) = &observer {
                observer(&DownloadEvent::Progress {
                    index,
                    name: Arc::clone(&name),
                    bytes,
                    total,
                });
            }
        })
    }

    fn skip(&self, index: usize, name: Arc<str>, reason: SkipReason) -> ItemOutcome {
        self.emit(DownloadEvent::Skipped {
            index,
            name,
            reason,
        });
        ItemOutcome::Skipped
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

/// `<path>.part`, where a download is written until it is verified.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed incomplete download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove incomplete download"),
    }
}

/// Keep the first failure and stop the session.
fn record_failure(slot: &Mutex<Option<DownloadError>>, session: &CancellationToken, err: DownloadError) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        tracing::error!(error = %err, kind = err.kind().label(), "Download failed, stopping remaining downloads");
        *slot = Some(err);
        session.cancel();
    } else {
        tracing::debug!(error = %err, "Additional download failure");
    }
}
