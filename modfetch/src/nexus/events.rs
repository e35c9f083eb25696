//! Progress events emitted by the concurrent downloader.

use std::path::PathBuf;
use std::sync::Arc;

/// Why an artifact was not downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Declared size exceeds the configured limit.
    TooLarge { size: u64, limit: u64 },
    /// A file with the declared name and size already exists.
    AlreadyPresent,
    /// The resolved file name differs from the declared one and already exists.
    ResolvedNameExists { file_name: String },
}

/// Lifecycle event of one artifact, keyed by its position and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started {
        index: usize,
        name: Arc<str>,
        size: u64,
    },
    Skipped {
        index: usize,
        name: Arc<str>,
        reason: SkipReason,
    },
    /// Cumulative bytes received for the current attempt.
    Progress {
        index: usize,
        name: Arc<str>,
        bytes: u64,
        total: Option<u64>,
    },
    Completed {
        index: usize,
        name: Arc<str>,
        path: PathBuf,
        bytes: u64,
    },
}

impl DownloadEvent {
    pub fn index(&self) -> usize {
        match self {
            DownloadEvent::Started { index, .. }
            | DownloadEvent::Skipped { index, .. }
            | DownloadEvent::Progress { index, .. }
            | DownloadEvent::Completed { index, .. } => *index,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DownloadEvent::Started { name, .. }
            | DownloadEvent::Skipped { name, .. }
            | DownloadEvent::Progress { name, .. }
            | DownloadEvent::Completed { name, .. } => name,
        }
    }
}

/// Receives events from every download task; must be cheap and thread-safe.
pub type EventObserver = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;
