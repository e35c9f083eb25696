//! modfetch - Download engine for Wabbajack modlists
//!
//! This library downloads modlist archives from the modlist CDN and the mod
//! archives a modlist references from Nexus Mods, with bounded concurrency,
//! retry with exponential backoff, stall detection and content hashing.
//!
//! # Architecture
//!
//! ```text
//! catalog ─► SegmentedArchiveFetcher ─► .wabbajack ─► extract_downloads
//!                                                           │
//!                                                           ▼
//!                         LinkResolver ◄── ConcurrentFileDownloader ──► download dir
//!                                                 │
//!                     RetryPolicy · IdleTimeoutReader · ProgressReader · StreamHasher
//! ```
//!
//! All network access goes through the [`http::HttpTransport`] trait;
//! [`http::ReqwestTransport`] is the production implementation.

pub mod config;
pub mod error;
pub mod hash;
pub mod http;
pub mod io;
pub mod logging;
pub mod modlist;
pub mod nexus;
pub mod retry;
pub mod scan;

pub use config::{format_size, DownloaderConfig};
pub use error::{DownloadError, DownloadResult, ErrorKind};
pub use hash::HashValue;
pub use http::{HttpTransport, ReqwestTransport};
pub use modlist::{ModListMetadata, SegmentedArchiveFetcher};
pub use nexus::{ConcurrentFileDownloader, DownloadDescriptor, DownloadEvent, LinkResolver};
pub use retry::RetryPolicy;
pub use scan::ExistingFileIndex;

/// Version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
