//! Games known to the modlist format.
//!
//! Modlists name games by their archive name (`skyrimse`); Nexus Mods
//! addresses them by a domain name (`skyrimspecialedition`) and a numeric id.

/// One supported game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameData {
    /// Name used inside modlists.
    pub archive_name: &'static str,
    /// Nexus Mods domain name, used in page URLs.
    pub nexus_name: &'static str,
    /// Nexus Mods numeric game id.
    pub nexus_game_id: u64,
}

const fn game(archive_name: &'static str, nexus_name: &'static str, nexus_game_id: u64) -> GameData {
    GameData {
        archive_name,
        nexus_name,
        nexus_game_id,
    }
}

/// All games a modlist may reference.
pub const GAMES: &[GameData] = &[
    game("morrowind", "morrowind", 100),
    game("oblivion", "oblivion", 101),
    game("fallout3", "fallout3", 120),
    game("falloutnv", "newvegas", 130),
    game("skyrim", "skyrim", 110),
    game("skyrimse", "skyrimspecialedition", 1704),
    game("fallout4", "fallout4", 1151),
    game("enderal", "enderal", 2736),
    game("enderalse", "enderalspecialedition", 3685),
    game("dishonored", "dishonored", 802),
    game("witcher", "witcher", 150),
    game("witcher3", "witcher3", 952),
    game("stardewvalley", "stardewvalley", 1303),
    game("kingdomcomedeliverance", "kingdomcomedeliverance", 2298),
    game("mechwarrior5mercenaries", "mechwarrior5mercenaries", 3099),
    game("dragonsdogma", "dragonsdogma", 1249),
    game("valheim", "valheim", 3667),
    game("mountandblade2bannerlord", "mountandblade2bannerlord", 3174),
    game("finalfantasy7remake", "finalfantasy7remake", 4202),
    game("baldursgate3", "baldursgate3", 3474),
    game("Starfield", "starfield", 4187),
    game("7daystodie", "7daystodie", 1059),
    game("oblivionremastered", "oblivionremastered", 7587),
    game("site", "site", 2295),
];

impl GameData {
    /// Look up a game by its modlist archive name, ignoring ASCII case.
    pub fn lookup(archive_name: &str) -> Option<GameData> {
        let name = archive_name.trim();
        GAMES
            .iter()
            .find(|g| g.archive_name.eq_ignore_ascii_case(name))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_maps_to_nexus_domain() {
        let game = GameData::lookup("skyrimse").unwrap();
        assert_eq!(game.nexus_name, "skyrimspecialedition");
        assert_eq!(game.nexus_game_id, 1704);

        assert_eq!(GameData::lookup("falloutnv").unwrap().nexus_name, "newvegas");
    }

    #[test]
    fn test_lookup_ignores_case() {
        assert_eq!(GameData::lookup("starfield").unwrap().nexus_game_id, 4187);
        assert_eq!(GameData::lookup("SkyrimSE").unwrap().nexus_game_id, 1704);
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(GameData::lookup("minecraft").is_none());
    }

    #[test]
    fn test_table_has_unique_names() {
        let mut names: Vec<String> = GAMES.iter().map(|g| g.archive_name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), GAMES.len());
    }
}
