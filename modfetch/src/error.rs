//! Error types for the download engine.
//!
//! Every failure the engine can surface is a [`DownloadError`]. Errors are
//! grouped into an [`ErrorKind`] which drives the retry decision: only
//! [`ErrorKind::Transient`] errors are retried automatically.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::hash::HashValue;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Broad classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection failures, stalls, timeouts and generic HTTP failures.
    Transient,
    /// The remote asked us to slow down (HTTP 429).
    Throttled,
    /// The session was rejected or the resolver returned something unusable.
    Authorization,
    /// The filesystem refused access to the destination.
    Permission,
    /// Downloaded bytes do not match their declared hash or layout.
    Integrity,
    /// The caller asked to stop.
    Cancelled,
}

impl ErrorKind {
    /// Short label used in logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Permission => "permission",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Errors that can occur while fetching artifacts.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The connection stayed open but stopped delivering bytes.
    #[error("no data received for {} seconds", timeout.as_secs_f64())]
    Stalled { timeout: Duration },

    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out after {}s", timeout.as_secs())]
    Timeout { url: String, timeout: Duration },

    /// Transport-level failure (DNS, connect, reset, body read).
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Non-success HTTP status that is worth retrying.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// HTTP 429. Never retried, to protect the account from a ban.
    #[error("too many requests to {url}, stopping to avoid throttling")]
    TooManyRequests { url: String },

    /// HTTP 401/403: the session credential is missing or expired.
    #[error("session rejected by {url} (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    /// A response could not be interpreted (e.g. no `url` field).
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    /// The part manifest is malformed or its parts do not tile the file.
    #[error("invalid part manifest: {0}")]
    InvalidManifest(String),

    /// The modlist archive could not be read.
    #[error("invalid modlist archive {path}: {reason}")]
    InvalidModlist { path: PathBuf, reason: String },

    /// The filesystem denied access.
    #[error("permission denied for {}: {source}", path.display())]
    PermissionDenied { path: PathBuf, source: io::Error },

    /// Any other filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Computed hash differs from the expected one.
    #[error("hash mismatch for {name}: expected {expected}, computed {computed}")]
    HashMismatch {
        name: String,
        expected: HashValue,
        computed: HashValue,
    },

    /// The caller cancelled the operation.
    #[error("download cancelled")]
    Cancelled,

    /// A failure attributed to one artifact of a multi-item download.
    #[error("{name}: {source}")]
    Item {
        name: String,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Build an I/O error for `path`, promoting permission failures.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            DownloadError::PermissionDenied { path, source }
        } else {
            DownloadError::Io { path, source }
        }
    }

    /// Map a non-success HTTP status to its error class.
    pub fn from_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            429 => DownloadError::TooManyRequests { url },
            401 | 403 => DownloadError::Unauthorized { url, status },
            _ => DownloadError::HttpStatus { status, url },
        }
    }

    /// Attach the name of the artifact this error belongs to.
    pub fn for_item(self, name: impl Into<String>) -> Self {
        match self {
            DownloadError::Cancelled => DownloadError::Cancelled,
            DownloadError::Item { .. } => self,
            other => DownloadError::Item {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`DownloadError::Item`].
    pub fn root(&self) -> &DownloadError {
        match self {
            DownloadError::Item { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the artifact this error was attributed to, if any.
    pub fn item_name(&self) -> Option<&str> {
        match self {
            DownloadError::Item { name, .. } => Some(name),
            DownloadError::HashMismatch { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Stalled { .. }
            | DownloadError::Timeout { .. }
            | DownloadError::Request { .. }
            | DownloadError::HttpStatus { .. }
            | DownloadError::Io { .. } => ErrorKind::Transient,
            DownloadError::TooManyRequests { .. } => ErrorKind::Throttled,
            DownloadError::Unauthorized { .. } | DownloadError::InvalidResponse { .. } => {
                ErrorKind::Authorization
            }
            DownloadError::PermissionDenied { .. } => ErrorKind::Permission,
            DownloadError::HashMismatch { .. }
            | DownloadError::InvalidManifest(_)
            | DownloadError::InvalidModlist { .. } => ErrorKind::Integrity,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::Item { source, .. } => source.kind(),
        }
    }

    /// Whether retrying the identical operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether this error must stop the operation without a retry.
    ///
    /// Cancellation is neither retryable nor fatal: it is a clean stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Transient | ErrorKind::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
