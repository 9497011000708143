//! Applies sanitized patches to the in-memory document.
//!
//! Merge policy per field:
//!
//! ```text
//! unlocks.*              current || incoming   (never re-locks)
//! selectedUnlock         replace, if unlocked
//! purchases.*            keyed union, later record wins
//! inventory.*            replace
//! progress.lastLevel     max
//! stats.lastScore        replace
//! stats.bestScore        max
//! stats.<counter>        profile policy (max | replace)
//! stats.<group>.<member> group policy, per member
//! achievements.unlocked  union, capped
//! achievements.milestones replace per key
//! version                replace
//! ```
//!
//! The returned patch lists only what actually changed, carrying post-merge
//! values. It doubles as the outbound payload.

use std::collections::BTreeMap;

use crate::sync::document::{
    AchievementsPatch, ProgressPatch, StateDocument, StatePatch, StatsPatch,
};
use crate::sync::profile::{CounterPolicy, GameProfile};
use crate::sync::sanitize::MAX_BADGES;

/// Result of [`apply_patch`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedPatch {
    pub applied: StatePatch,
    pub unlocks_changed: bool,
}

pub fn apply_patch(
    state: &mut StateDocument,
    profile: &GameProfile,
    patch: StatePatch,
) -> AppliedPatch {
    let mut applied = StatePatch::default();

    if let Some(unlocks) = patch.unlocks {
        let mut changed = BTreeMap::new();
        for (key, incoming) in unlocks {
            if incoming && !state.is_unlocked(&key) {
                state.unlocks.insert(key.clone(), true);
                changed.insert(key, true);
            }
        }
        applied.unlocks = non_empty(changed);
    }

    if let Some(selected) = patch.selected_unlock {
        if state.is_unlocked(&selected) && state.selected_unlock.as_ref() != Some(&selected) {
            state.selected_unlock = Some(selected.clone());
            applied.selected_unlock = Some(selected);
        }
    }

    if let Some(purchases) = patch.purchases {
        let mut changed = BTreeMap::new();
        for (key, record) in purchases {
            if state.purchases.get(&key) != Some(&record) {
                state.purchases.insert(key.clone(), record.clone());
                changed.insert(key, record);
            }
        }
        applied.purchases = non_empty(changed);
    }

    if let Some(inventory) = patch.inventory {
        let mut changed = BTreeMap::new();
        for (key, value) in inventory {
            if state.inventory.get(&key) != Some(&value) {
                state.inventory.insert(key.clone(), value);
                changed.insert(key, value);
            }
        }
        applied.inventory = non_empty(changed);
    }

    if let Some(level) = patch.progress.and_then(|p| p.last_level) {
        let highest = state.progress.last_level.max(level);
        if highest != state.progress.last_level {
            state.progress.last_level = highest;
            applied.progress = Some(ProgressPatch {
                last_level: Some(highest),
            });
        }
    }

    if let Some(stats) = patch.stats {
        let changed = merge_stats(state, profile, stats);
        applied.stats = (!changed.is_empty()).then_some(changed);
    }

    if let Some(achievements) = patch.achievements {
        let changed = merge_achievements(state, achievements);
        applied.achievements = (!changed.is_empty()).then_some(changed);
    }

    if let Some(version) = patch.version {
        if version != state.version {
            state.version = version;
            applied.version = Some(version);
        }
    }

    AppliedPatch {
        unlocks_changed: applied.unlocks.is_some(),
        applied,
    }
}

fn merge_stats(state: &mut StateDocument, profile: &GameProfile, stats: StatsPatch) -> StatsPatch {
    let mut changed = StatsPatch::default();
    if let Some(last) = stats.last_score {
        if last != state.stats.last_score {
            state.stats.last_score = last;
            changed.last_score = Some(last);
        }
    }
    if let Some(best) = stats.best_score {
        if best > state.stats.best_score {
            state.stats.best_score = best;
            changed.best_score = Some(best);
        }
    }
    for (key, incoming) in stats.counters {
        let Some(spec) = profile.counter(&key) else {
            continue;
        };
        let current = state.stats.counters.get(&key).copied();
        let next = settle(spec.policy, current.unwrap_or(spec.min), incoming);
        if current != Some(next) {
            state.stats.counters.insert(key.clone(), next);
            changed.counters.insert(key, next);
        }
    }
    for (key, members) in stats.groups {
        let Some(spec) = profile.counter_group(&key) else {
            continue;
        };
        let stored = state.stats.groups.entry(key.clone()).or_default();
        let mut group_changed = BTreeMap::new();
        for (member, incoming) in members {
            let current = stored.get(&member).copied();
            let next = settle(spec.policy, current.unwrap_or(0), incoming);
            if current != Some(next) {
                stored.insert(member.clone(), next);
                group_changed.insert(member, next);
            }
        }
        if !group_changed.is_empty() {
            changed.groups.insert(key, group_changed);
        }
    }
    changed
}

fn settle(policy: CounterPolicy, current: u64, incoming: u64) -> u64 {
    match policy {
        CounterPolicy::Max => current.max(incoming),
        CounterPolicy::Replace => incoming,
    }
}

fn merge_achievements(state: &mut StateDocument, incoming: AchievementsPatch) -> AchievementsPatch {
    let mut changed = AchievementsPatch::default();
    for badge in incoming.unlocked {
        if state.achievements.unlocked.len() >= MAX_BADGES {
            break;
        }
        if !state.achievements.unlocked.contains(&badge) {
            state.achievements.unlocked.push(badge.clone());
            changed.unlocked.push(badge);
        }
    }
    for (key, value) in incoming.milestones {
        if state.achievements.milestones.get(&key) != Some(&value) {
            state.achievements.milestones.insert(key.clone(), value);
            changed.milestones.insert(key, value);
        }
    }
    changed
}

fn non_empty<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}
