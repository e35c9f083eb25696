//! Download of the Nexus Mods archives a modlist references.
//!
//! - [`DownloadDescriptor`] identifies one archive and its expected size and hash
//! - [`LinkResolver`] turns a descriptor into a download URL
//! - [`ConcurrentFileDownloader`] downloads many archives under a concurrency limit
//! - [`DownloadEvent`] reports per-item progress to an observer

mod descriptor;
mod downloader;
mod events;
mod resolver;

pub use descriptor::{DownloadDescriptor, NEXUS_BASE_URL};
pub use downloader::{ConcurrentFileDownloader, DownloadSummary};
pub use events::{DownloadEvent, EventObserver, SkipReason};
pub use resolver::{parse_download_url, DirectLinks, LinkResolver, NexusApiResolver, GENERATE_DOWNLOAD_URL};
