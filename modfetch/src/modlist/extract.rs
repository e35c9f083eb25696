//! Extraction of Nexus download descriptors from a modlist archive.
//!
//! A `.wabbajack` file is a zip archive with a JSON document in its
//! `modlist` entry. Each element of `Archives` looks like:
//!
//! ```text
//! {
//!   "Name": "SkyUI_5_2_SE-12604-5-2SE.7z",
//!   "Size": 2583330,
//!   "Hash": "ejsZTQOI370=",
//!   "Meta": "[General]\ngameName=skyrimse\nmodID=12604\nfileID=35407"
//! }
//! ```
//!
//! Keys may be PascalCase or lowercase. Entries without `Meta` (direct
//! links, game files) or naming unknown games are not Nexus downloads and
//! are skipped.

use std::io::{Read, Seek};
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{DownloadError, DownloadResult};
use crate::hash::HashValue;
use crate::modlist::GameData;
use crate::nexus::DownloadDescriptor;

/// Name of the zip entry holding the modlist JSON.
pub const MODLIST_ENTRY: &str = "modlist";

/// Read all Nexus downloads from a `.wabbajack` file.
pub fn extract_downloads(path: &Path) -> DownloadResult<Vec<DownloadDescriptor>> {
    let file = std::fs::File::open(path).map_err(|e| DownloadError::io(path, e))?;
    extract_downloads_from(std::io::BufReader::new(file), path)
}

/// Async wrapper running [`extract_downloads`] on the blocking pool.
pub async fn load_downloads(path: &Path) -> DownloadResult<Vec<DownloadDescriptor>> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_downloads(&owned))
        .await
        .map_err(|e| DownloadError::InvalidModlist {
            path: path.to_path_buf(),
            reason: format!("extraction task failed: {}", e),
        })?
}

/// Read all Nexus downloads from an open archive.
///
/// `origin` is only used for error messages.
pub fn extract_downloads_from<R: Read + Seek>(
    reader: R,
    origin: &Path,
) -> DownloadResult<Vec<DownloadDescriptor>> {
    let invalid = |reason: String| DownloadError::InvalidModlist {
        path: origin.to_path_buf(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(reader).map_err(|e| invalid(e.to_string()))?;
    let mut entry = archive
        .by_name(MODLIST_ENTRY)
        .map_err(|_| invalid("the archive does not contain a modlist".to_string()))?;

    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| invalid(format!("cannot read modlist entry: {}", e)))?;

    tracing::info!(path = %origin.display(), "Extracting downloads from modlist");
    let document: Value =
        serde_json::from_str(&text).map_err(|e| invalid(format!("modlist is not valid JSON: {}", e)))?;

    Ok(parse_modlist(&document))
}

/// Collect descriptors from a parsed modlist document.
pub fn parse_modlist(document: &Value) -> Vec<DownloadDescriptor> {
    let Some(object) = document.as_object() else {
        tracing::warn!("Modlist is not a JSON object");
        return Vec::new();
    };
    let Some(archives) = field(object, "Archives").and_then(Value::as_array) else {
        tracing::warn!("Modlist has no Archives entry, no downloads extracted");
        return Vec::new();
    };

    let downloads: Vec<DownloadDescriptor> = archives
        .iter()
        .filter_map(|archive| archive.as_object().and_then(parse_archive))
        .collect();

    tracing::info!(
        archives = archives.len(),
        downloads = downloads.len(),
        "Extracted Nexus downloads"
    );
    downloads
}

fn parse_archive(archive: &Map<String, Value>) -> Option<DownloadDescriptor> {
    let name = field(archive, "Name").and_then(Value::as_str);
    let hash = field(archive, "Hash").and_then(Value::as_str);
    let meta = field(archive, "Meta").and_then(Value::as_str);

    let (Some(name), Some(hash), Some(meta)) = (name, hash, meta) else {
        tracing::trace!(entry = ?archive.get("Name"), "Archive entry is not a Nexus download");
        return None;
    };

    let size = field(archive, "Size").and_then(parse_size).unwrap_or(0);

    let Some(ids) = MetaIds::parse(meta) else {
        tracing::trace!(name, meta, "Cannot extract game name, mod id and file id");
        return None;
    };
    let Some(game) = GameData::lookup(&ids.game_name) else {
        tracing::trace!(name, game = %ids.game_name, "Unsupported game");
        return None;
    };
    let hash = match HashValue::from_base64(hash) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::warn!(name, error = %e, "Skipping archive with unreadable hash");
            return None;
        }
    };

    Some(DownloadDescriptor::new(
        name,
        game,
        ids.mod_id,
        ids.file_id,
        size,
        hash,
    ))
}

/// Look up `key` in PascalCase, then lowercase.
fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object
        .get(key)
        .or_else(|| object.get(&key.to_ascii_lowercase()))
}

/// Sizes are numbers in current modlists and strings in some older ones.
fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Identifiers carried in an archive's `Meta` INI text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MetaIds {
    game_name: String,
    mod_id: String,
    file_id: String,
}

impl MetaIds {
    /// Parse the lines after the section header; `None` when all ids are missing.
    fn parse(meta: &str) -> Option<Self> {
        let mut ids = MetaIds {
            game_name: String::new(),
            mod_id: String::new(),
            file_id: String::new(),
        };

        for line in meta.lines().skip(1) {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "gamename" => ids.game_name = value,
                "modid" => ids.mod_id = value,
                "fileid" => ids.file_id = value,
                _ => {}
            }
        }

        if ids.game_name.is_empty() && ids.mod_id.is_empty() && ids.file_id.is_empty() {
            None
        } else {
            Some(ids)
        }
    }
}
