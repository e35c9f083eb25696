//! Download descriptors for Nexus Mods archives.

use std::fmt;

use crate::hash::HashValue;
use crate::modlist::GameData;

/// Base URL of the Nexus Mods website.
pub const NEXUS_BASE_URL: &str = "https://www.nexusmods.com";

/// One archive a modlist needs.
///
/// Built once when the modlist is parsed and never modified afterwards.
/// The declared size and hash are ground truth for skip and verification
/// decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    /// File name the modlist expects on disk.
    pub file_name: String,
    pub game: GameData,
    pub mod_id: String,
    pub file_id: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Declared content hash.
    pub hash: HashValue,
}

impl DownloadDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        game: GameData,
        mod_id: impl Into<String>,
        file_id: impl Into<String>,
        size: u64,
        hash: HashValue,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            game,
            mod_id: mod_id.into(),
            file_id: file_id.into(),
            size,
            hash,
        }
    }

    /// Numeric Nexus game id as sent in API forms.
    pub fn game_id(&self) -> String {
        self.game.nexus_game_id.to_string()
    }

    /// Files tab of the mod page, scrolled to this file.
    pub fn mod_page_url(&self) -> String {
        format!(
            "{}/{}/mods/{}?tab=files&file_id={}",
            NEXUS_BASE_URL, self.game.nexus_name, self.mod_id, self.file_id
        )
    }
}

impl fmt::Display for DownloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name)
    }
}
