//! Per-game profiles and session configuration.
//!
//! A [`GameProfile`] is static data describing one game's document shape:
//! which unlock flags exist, which raw storage keys mirror them, which
//! counters live in `inventory` and `stats`, how the document is laid out
//! on the wire, and the copy shown by the leaderboard. [`SyncConfig`] holds the tunables shared by every game and
//! can be overridden from JSON at startup.

use serde::Deserialize;

/// An unlock flag and the value a fresh document starts with.
///
/// A flag that defaults to `true` can never be observed as `false`: the
/// sanitizer ORs the default in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockSpec {
    pub key: &'static str,
    pub default: bool,
}

/// How an extra `stats` counter merges with the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterPolicy {
    /// Highest value wins (personal bests).
    Max,
    /// Incoming value replaces the stored one.
    Replace,
}

/// An extra `stats` counter. Fresh documents start it at `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSpec {
    pub key: &'static str,
    pub policy: CounterPolicy,
    pub min: u64,
    pub max: u64,
}

/// A `stats` object of counters sharing one policy and range, e.g.
/// `bestNumbersMatched: {"1": .., "6": ..}`. Members start at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterGroupSpec {
    pub key: &'static str,
    pub members: &'static [&'static str],
    pub policy: CounterPolicy,
    pub max: u64,
}

/// Where unlock flags sit in the server document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockLayout {
    /// `unlocks: {"hotPink": true, ..}`
    Flat,
    /// `unlocks: {"<group>": {"neon": true, ..}, "<selected>": "neon"}`
    Nested {
        group: &'static str,
        selected: &'static str,
        default_selected: &'static str,
    },
}

/// How one game's document is shaped on its state endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub unlocks: UnlockLayout,
    /// Field name the server uses for `stats.bestScore`.
    pub best_score: &'static str,
    /// Top-level sections the server stores. Others are left off outbound
    /// documents.
    pub sections: &'static [&'static str],
    /// The server replaces whole sections, so every save sends the
    /// complete document rather than the changed fields.
    pub full_document: bool,
}

/// Static description of one game's synced document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameProfile {
    pub game_id: &'static str,
    pub state_endpoint: &'static str,
    pub unlocks: &'static [UnlockSpec],
    /// Raw storage key -> unlock key.
    pub legacy_flags: &'static [(&'static str, &'static str)],
    /// Purchase key -> unlock key granted while the purchase is owned.
    pub purchase_unlocks: &'static [(&'static str, &'static str)],
    pub inventory: &'static [&'static str],
    pub counters: &'static [CounterSpec],
    pub counter_groups: &'static [CounterGroupSpec],
    pub wire: WireFormat,
    pub default_display_name: &'static str,
    pub leaderboard_empty: &'static str,
    pub leaderboard_signed_out: &'static str,
}

pub const CAVEGROK: GameProfile = GameProfile {
    game_id: "cavegrok",
    state_endpoint: "/api/cavegrok/state",
    unlocks: &[
        UnlockSpec { key: "hotPink", default: false },
        UnlockSpec { key: "purple", default: false },
        UnlockSpec { key: "golden", default: false },
    ],
    legacy_flags: &[
        ("hotPinkShipUnlocked", "hotPink"),
        ("purpleShipUnlocked", "purple"),
        ("goldenShipUnlocked", "golden"),
    ],
    purchase_unlocks: &[
        ("hotPinkShip", "hotPink"),
        ("purpleShip", "purple"),
        ("goldenShip", "golden"),
    ],
    inventory: &["coins"],
    counters: &[],
    counter_groups: &[],
    wire: WireFormat {
        unlocks: UnlockLayout::Flat,
        best_score: "bestScore",
        sections: &[
            "unlocks",
            "purchases",
            "inventory",
            "progress",
            "stats",
            "achievements",
            "version",
        ],
        full_document: false,
    },
    default_display_name: "Explorer",
    leaderboard_empty: "No runs recorded yet. Be the first to descend!",
    leaderboard_signed_out: "Sign in to load the leaderboard.",
};

const MATCH_MAX: u64 = 1_000_000;
const DICEFLIP_MAX_LEVEL: u64 = 500;

pub const DICEFLIP: GameProfile = GameProfile {
    game_id: "diceflip",
    state_endpoint: "/api/diceflip/state",
    unlocks: &[
        UnlockSpec { key: "classic", default: true },
        UnlockSpec { key: "pastel", default: false },
        UnlockSpec { key: "neon", default: false },
        UnlockSpec { key: "galaxy", default: false },
    ],
    legacy_flags: &[],
    purchase_unlocks: &[],
    inventory: &[],
    counters: &[
        CounterSpec { key: "bestLevel", policy: CounterPolicy::Max, min: 1, max: DICEFLIP_MAX_LEVEL },
        CounterSpec { key: "totalGames", policy: CounterPolicy::Replace, min: 0, max: MATCH_MAX },
        CounterSpec { key: "bestMatches3", policy: CounterPolicy::Max, min: 0, max: MATCH_MAX },
        CounterSpec { key: "bestMatches4", policy: CounterPolicy::Max, min: 0, max: MATCH_MAX },
        CounterSpec { key: "bestMatches5", policy: CounterPolicy::Max, min: 0, max: MATCH_MAX },
        CounterSpec { key: "bestMatches6Plus", policy: CounterPolicy::Max, min: 0, max: MATCH_MAX },
    ],
    counter_groups: &[CounterGroupSpec {
        key: "bestNumbersMatched",
        members: &["1", "2", "3", "4", "5", "6"],
        policy: CounterPolicy::Max,
        max: MATCH_MAX,
    }],
    wire: WireFormat {
        unlocks: UnlockLayout::Nested {
            group: "skins",
            selected: "selectedSkin",
            default_selected: "classic",
        },
        best_score: "highestScore",
        sections: &["unlocks", "stats", "achievements", "version"],
        full_document: true,
    },
    default_display_name: "Player",
    leaderboard_empty: "No runs have been recorded yet. Be the first to roll!",
    leaderboard_signed_out: "Sign in with Google to track personal and global rankings.",
};

/// All games this crate knows how to sync.
pub const PROFILES: &[GameProfile] = &[CAVEGROK, DICEFLIP];

/// Look up a built-in profile by game id (case-sensitive, as used in URLs).
pub fn find_profile(game_id: &str) -> Option<&'static GameProfile> {
    PROFILES.iter().find(|p| p.game_id == game_id)
}

impl GameProfile {
    pub fn unlock(&self, key: &str) -> Option<&UnlockSpec> {
        self.unlocks.iter().find(|u| u.key == key)
    }

    pub fn counter(&self, key: &str) -> Option<&CounterSpec> {
        self.counters.iter().find(|c| c.key == key)
    }

    pub fn counter_group(&self, key: &str) -> Option<&CounterGroupSpec> {
        self.counter_groups.iter().find(|g| g.key == key)
    }

    pub fn has_inventory(&self, key: &str) -> bool {
        self.inventory.contains(&key)
    }

    /// Unlock key mirrored by a raw storage key, if any.
    pub fn legacy_unlock(&self, storage_key: &str) -> Option<&'static str> {
        self.legacy_flags
            .iter()
            .find(|(k, _)| *k == storage_key)
            .map(|(_, unlock)| *unlock)
    }
}

/// Session tunables. Every field has a default; JSON overrides use camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    pub identity_endpoint: String,
    pub scores_endpoint: String,
    /// Debounce for generic `schedule` calls.
    pub save_delay_ms: u32,
    /// Debounce for run-complete progress saves.
    pub run_delay_ms: u32,
    /// Debounce for unlocks discovered through storage mutations.
    pub storage_delay_ms: u32,
    pub leaderboard_limit: u32,
    /// Window during which an identical score is not resubmitted.
    pub submit_window_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            identity_endpoint: "/.auth/me".to_string(),
            scores_endpoint: "/api/scores".to_string(),
            save_delay_ms: 500,
            run_delay_ms: 600,
            storage_delay_ms: 400,
            leaderboard_limit: 25,
            submit_window_ms: 1500,
        }
    }
}

impl SyncConfig {
    /// Parse overrides; an empty string yields the defaults.
    pub fn from_json(json: &str) -> Result<Self, String> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| format!("Invalid sync config JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_builtin_profiles() {
        assert_eq!(find_profile("cavegrok").map(|p| p.game_id), Some("cavegrok"));
        assert_eq!(find_profile("diceflip").map(|p| p.game_id), Some("diceflip"));
        assert!(find_profile("CaveGrok").is_none());
        assert!(find_profile("chess").is_none());
    }

    #[test]
    fn legacy_keys_map_to_declared_unlocks() {
        for profile in PROFILES {
            for (storage_key, unlock) in profile.legacy_flags {
                assert!(profile.unlock(unlock).is_some(), "{storage_key} -> {unlock}");
            }
            for (_, unlock) in profile.purchase_unlocks {
                assert!(profile.unlock(unlock).is_some());
            }
        }
        assert_eq!(CAVEGROK.legacy_unlock("purpleShipUnlocked"), Some("purple"));
        assert_eq!(CAVEGROK.legacy_unlock("somethingElse"), None);
    }

    #[test]
    fn wire_formats_cover_declared_fields() {
        for profile in PROFILES {
            assert!(profile.wire.sections.contains(&"unlocks"));
            assert!(profile.wire.sections.contains(&"stats"));
            if let UnlockLayout::Nested { default_selected, .. } = profile.wire.unlocks {
                assert!(profile.unlock(default_selected).map(|u| u.default).unwrap_or(false));
            }
            for spec in profile.counters {
                assert!(spec.min <= spec.max, "{}", spec.key);
            }
        }
        assert_eq!(DICEFLIP.counter("bestLevel").map(|c| (c.min, c.max)), Some((1, 500)));
        assert_eq!(DICEFLIP.counter_group("bestNumbersMatched").map(|g| g.members.len()), Some(6));
        assert!(CAVEGROK.counter_group("bestNumbersMatched").is_none());
    }

    #[test]
    fn config_overrides_merge_with_defaults() {
        let config = SyncConfig::from_json(r#"{"saveDelayMs": 250, "leaderboardLimit": 10}"#).unwrap();
        assert_eq!(config.save_delay_ms, 250);
        assert_eq!(config.leaderboard_limit, 10);
        assert_eq!(config.run_delay_ms, 600);
        assert_eq!(config.identity_endpoint, "/.auth/me");
    }

    #[test]
    fn config_empty_is_default() {
        assert_eq!(SyncConfig::from_json("  ").unwrap(), SyncConfig::default());
        assert!(SyncConfig::from_json("{not json").is_err());
    }
}
