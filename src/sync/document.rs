//! The synced progress document and its partial-update counterpart.
//!
//! `StateDocument` is what the remote store holds per user and per game.
//! `StatePatch` carries only the fields a caller touched, so absent fields
//! are skipped entirely when it is serialized. Both serialize in a neutral
//! shape; [`crate::sync::wire`] maps that onto each game's server layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sync::profile::{GameProfile, UnlockLayout};
use crate::sync::wire;

pub const DOCUMENT_VERSION: u32 = 1;
/// Counter some games keep in place of `progress.lastLevel`.
pub const BEST_LEVEL: &str = "bestLevel";
pub const MIN_LEVEL: u32 = 1;
pub const MAX_LEVEL: u32 = 999;

/// A captured purchase. `purchased_at` is always an RFC 3339 UTC timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub owned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub purchased_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Highest level reached, 1..=999.
    pub last_level: u32,
}

impl Default for Progress {
    fn default() -> Self {
        Self { last_level: MIN_LEVEL }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub last_score: u64,
    pub best_score: u64,
    /// Game-specific counters declared by the profile.
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
    /// Counter groups, keyed by group then member.
    #[serde(flatten)]
    pub groups: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievements {
    /// Badge ids in the order they were first earned.
    pub unlocked: Vec<String>,
    pub milestones: BTreeMap<String, u64>,
}

/// Complete per-user document for one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub unlocks: BTreeMap<String, bool>,
    /// Active cosmetic for games with a nested unlock layout. Always an
    /// unlocked key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_unlock: Option<String>,
    pub purchases: BTreeMap<String, PurchaseRecord>,
    pub inventory: BTreeMap<String, u64>,
    pub progress: Progress,
    pub stats: Stats,
    pub achievements: Achievements,
    pub version: u32,
}

impl StateDocument {
    /// Fresh document with every profile-declared field at its default.
    pub fn defaults(profile: &GameProfile) -> Self {
        let unlocks = profile
            .unlocks
            .iter()
            .map(|u| (u.key.to_string(), u.default))
            .collect();
        let inventory = profile.inventory.iter().map(|k| (k.to_string(), 0)).collect();
        let counters = profile
            .counters
            .iter()
            .map(|c| (c.key.to_string(), c.min))
            .collect();
        let groups = profile
            .counter_groups
            .iter()
            .map(|g| {
                let members: BTreeMap<String, u64> =
                    g.members.iter().map(|m| (m.to_string(), 0)).collect();
                (g.key.to_string(), members)
            })
            .collect();
        let selected_unlock = match profile.wire.unlocks {
            UnlockLayout::Nested { default_selected, .. } => Some(default_selected.to_string()),
            UnlockLayout::Flat => None,
        };
        Self {
            unlocks,
            selected_unlock,
            purchases: BTreeMap::new(),
            inventory,
            progress: Progress::default(),
            stats: Stats {
                last_score: 0,
                best_score: 0,
                counters,
                groups,
            },
            achievements: Achievements::default(),
            version: DOCUMENT_VERSION,
        }
    }

    pub fn is_unlocked(&self, key: &str) -> bool {
        self.unlocks.get(key).copied().unwrap_or(false)
    }

    pub fn unlocked_count(&self) -> usize {
        self.unlocks.values().filter(|v| **v).count()
    }

    /// Furthest level reached, from `progress` or a `bestLevel` counter.
    pub fn highest_level(&self) -> u64 {
        let counted = self.stats.counters.get(BEST_LEVEL).copied().unwrap_or(0);
        counted.max(self.progress.last_level as u64)
    }

    pub fn owns(&self, purchase_key: &str) -> bool {
        self.purchases
            .get(purchase_key)
            .map(|p| p.owned)
            .unwrap_or(false)
    }

    /// The document as `profile`'s server stores it.
    pub fn to_json(&self, profile: &GameProfile) -> String {
        wire::encode_document(profile, self).to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_level: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<u64>,
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
    #[serde(flatten)]
    pub groups: BTreeMap<String, BTreeMap<String, u64>>,
}

impl StatsPatch {
    pub fn is_empty(&self) -> bool {
        self.last_score.is_none()
            && self.best_score.is_none()
            && self.counters.is_empty()
            && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementsPatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unlocked: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub milestones: BTreeMap<String, u64>,
}

impl AchievementsPatch {
    pub fn is_empty(&self) -> bool {
        self.unlocked.is_empty() && self.milestones.is_empty()
    }
}

/// Partial update. A `None` section was not touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocks: Option<BTreeMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_unlock: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchases: Option<BTreeMap<String, PurchaseRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievements: Option<AchievementsPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.unlocks.is_none()
            && self.selected_unlock.is_none()
            && self.purchases.is_none()
            && self.inventory.is_none()
            && self.progress.is_none()
            && self.stats.is_none()
            && self.achievements.is_none()
            && self.version.is_none()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
