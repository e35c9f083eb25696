//! Modlist archives: discovery, segmented download and extraction.
//!
//! - [`catalog`] lists published modlists from the repository index
//! - [`SegmentedArchiveFetcher`] downloads a `.wabbajack` archive part by part
//! - [`extract_downloads`] reads the Nexus downloads a modlist needs
//! - [`GameData`] maps modlist game names to Nexus Mods identifiers

pub mod catalog;
mod extract;
mod fetcher;
mod game;
mod manifest;

pub use catalog::{fetch_catalog, DownloadMetadata, Links, ModListMetadata, REPOSITORIES_URL};
pub use extract::{extract_downloads, extract_downloads_from, load_downloads, parse_modlist, MODLIST_ENTRY};
pub use fetcher::{archive_file_name, FetchOutcome, FetchPhase, PhaseObserver, SegmentedArchiveFetcher};
pub use game::{GameData, GAMES};
pub use manifest::{PartDescriptor, PartManifest};
