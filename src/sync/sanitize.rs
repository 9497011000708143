//! Normalizes untrusted JSON into the strict document shape.
//!
//! Two tiers share the same field validators:
//! - [`sanitize`] builds a complete document; an invalid field takes its
//!   default.
//! - [`sanitize_patch`] builds a partial update; an invalid field is dropped
//!   so it cannot overwrite good local state.
//!
//! Neither tier fails. Input is read through [`wire::decode`] first, so
//! both the game's server layout and the neutral one are accepted.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::sync::document::{
    AchievementsPatch, MAX_LEVEL, MIN_LEVEL, ProgressPatch, PurchaseRecord, StateDocument,
    StatePatch, StatsPatch,
};
use crate::sync::profile::{GameProfile, UnlockLayout};
use crate::sync::validate;
use crate::sync::wire;

/// Largest integer a JS number holds exactly.
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;
pub const MAX_BADGES: usize = 200;
pub const MAX_LABEL_CHARS: usize = 64;
pub const MAX_MILESTONE: u64 = 1_000_000;

const SECTIONS: &[&str] = &[
    "unlocks",
    "purchases",
    "inventory",
    "progress",
    "stats",
    "achievements",
    "version",
];

/// Full-document tier. `None` or non-object input yields the defaults.
pub fn sanitize(profile: &GameProfile, raw: Option<&Value>, now: DateTime<Utc>) -> StateDocument {
    let mut doc = StateDocument::defaults(profile);
    if let Some(raw) = raw {
        overlay(&mut doc, profile, sanitize_patch(profile, raw, now));
    }
    doc
}

/// Partial tier: only present and valid fields survive.
pub fn sanitize_patch(profile: &GameProfile, raw: &Value, now: DateTime<Utc>) -> StatePatch {
    let Some(map) = unwrap_envelope(raw) else {
        return StatePatch::default();
    };
    let map = wire::decode(profile, map);
    StatePatch {
        unlocks: map.get("unlocks").and_then(|v| unlocks(profile, v)),
        selected_unlock: map.get(wire::SELECTED).and_then(|v| selected_unlock(profile, v)),
        purchases: map.get("purchases").and_then(|v| purchases(v, now)),
        inventory: map.get("inventory").and_then(|v| inventory(profile, v)),
        progress: map.get("progress").and_then(progress),
        stats: map.get("stats").and_then(|v| stats(profile, v)),
        achievements: map.get("achievements").and_then(achievements),
        version: map
            .get("version")
            .and_then(|v| validate::whole(v, 1..=u32::MAX as u64).ok())
            .map(|v| v as u32),
    }
}

/// `{"state": {...}}` responses carry the document one level down.
fn unwrap_envelope(raw: &Value) -> Option<&Map<String, Value>> {
    let map = raw.as_object()?;
    let has_section = SECTIONS.iter().any(|s| map.contains_key(*s));
    if !has_section {
        if let Some(Value::Object(inner)) = map.get("state") {
            return Some(inner);
        }
    }
    Some(map)
}

fn overlay(doc: &mut StateDocument, profile: &GameProfile, patch: StatePatch) {
    if let Some(unlocks) = patch.unlocks {
        for (key, value) in unlocks {
            let default = profile.unlock(&key).map(|u| u.default).unwrap_or(false);
            doc.unlocks.insert(key, value || default);
        }
    }
    if let Some(selected) = patch.selected_unlock.filter(|s| doc.is_unlocked(s)) {
        doc.selected_unlock = Some(selected);
    }
    if let Some(purchases) = patch.purchases {
        doc.purchases = purchases;
    }
    if let Some(inventory) = patch.inventory {
        doc.inventory.extend(inventory);
    }
    if let Some(level) = patch.progress.and_then(|p| p.last_level) {
        doc.progress.last_level = level;
    }
    if let Some(stats) = patch.stats {
        if let Some(last) = stats.last_score {
            doc.stats.last_score = last;
        }
        if let Some(best) = stats.best_score {
            doc.stats.best_score = best;
        }
        doc.stats.counters.extend(stats.counters);
        for (key, members) in stats.groups {
            doc.stats.groups.entry(key).or_default().extend(members);
        }
    }
    if let Some(achievements) = patch.achievements {
        doc.achievements.unlocked = achievements.unlocked;
        doc.achievements.milestones = achievements.milestones;
    }
    if let Some(version) = patch.version {
        doc.version = version;
    }
}

fn unlocks(profile: &GameProfile, raw: &Value) -> Option<BTreeMap<String, bool>> {
    let map = raw.as_object()?;
    let mut out = BTreeMap::new();
    for spec in profile.unlocks {
        let Some(value) = map.get(spec.key) else {
            continue;
        };
        match validate::flag(value) {
            Ok(flag) => {
                out.insert(spec.key.to_string(), flag);
            }
            Err(e) => debug!(unlock = spec.key, error = %e, "dropping invalid unlock"),
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Only games with a nested unlock layout track a selection, and only a
/// declared unlock can be selected.
fn selected_unlock(profile: &GameProfile, raw: &Value) -> Option<String> {
    if profile.wire.unlocks == UnlockLayout::Flat {
        return None;
    }
    let key = raw.as_str()?;
    match profile.unlock(key) {
        Some(spec) => Some(spec.key.to_string()),
        None => {
            debug!(unlock = key, "dropping unknown selection");
            None
        }
    }
}

fn purchases(raw: &Value, now: DateTime<Utc>) -> Option<BTreeMap<String, PurchaseRecord>> {
    let map = raw.as_object()?;
    let mut out = BTreeMap::new();
    for (key, value) in map {
        if let Err(e) = validate::purchase_key(key) {
            debug!(error = %e, "dropping purchase");
            continue;
        }
        out.insert(key.clone(), purchase_record(value, now));
    }
    (!out.is_empty()).then_some(out)
}

/// Any value becomes a record; a non-object is read as an empty one.
pub fn purchase_record(raw: &Value, now: DateTime<Utc>) -> PurchaseRecord {
    let empty = Map::new();
    let fields = raw.as_object().unwrap_or(&empty);
    let field = |name: &str| fields.get(name).filter(|v| !v.is_null());

    let owned = field("owned")
        .map(|v| validate::flag(v).unwrap_or(true))
        .unwrap_or(true);
    let purchased_at = field("purchasedAt")
        .and_then(|v| validate::timestamp(v).ok())
        .unwrap_or(now);

    PurchaseRecord {
        owned,
        provider: field("provider").and_then(|v| validate::text(v, 64).ok()),
        transaction_id: field("transactionId").and_then(|v| validate::text(v, 128).ok()),
        currency: field("currency")
            .and_then(|v| validate::text(v, 16).ok())
            .map(|c| c.to_uppercase()),
        amount: field("amount").and_then(|v| validate::amount(v).ok()),
        purchased_at: validate::format_timestamp(purchased_at),
    }
}

fn inventory(profile: &GameProfile, raw: &Value) -> Option<BTreeMap<String, u64>> {
    let map = raw.as_object()?;
    let mut out = BTreeMap::new();
    for key in profile.inventory {
        let Some(value) = map.get(*key) else {
            continue;
        };
        match validate::whole(value, 0..=MAX_SAFE_INTEGER) {
            Ok(n) => {
                out.insert(key.to_string(), n);
            }
            Err(e) => debug!(counter = *key, error = %e, "dropping invalid inventory counter"),
        }
    }
    (!out.is_empty()).then_some(out)
}

fn progress(raw: &Value) -> Option<ProgressPatch> {
    let value = raw.as_object()?.get("lastLevel")?;
    match validate::whole(value, MIN_LEVEL as u64..=MAX_LEVEL as u64) {
        Ok(level) => Some(ProgressPatch {
            last_level: Some(level as u32),
        }),
        Err(e) => {
            debug!(error = %e, "dropping invalid lastLevel");
            None
        }
    }
}

fn stats(profile: &GameProfile, raw: &Value) -> Option<StatsPatch> {
    let map = raw.as_object()?;
    let score = |name: &str| {
        map.get(name)
            .and_then(|v| validate::whole(v, 0..=MAX_SAFE_INTEGER).ok())
    };
    let mut patch = StatsPatch {
        last_score: score("lastScore"),
        best_score: score("bestScore"),
        ..StatsPatch::default()
    };
    for spec in profile.counters {
        if let Some(n) = map
            .get(spec.key)
            .and_then(|v| validate::whole(v, spec.min..=spec.max).ok())
        {
            patch.counters.insert(spec.key.to_string(), n);
        }
    }
    for group in profile.counter_groups {
        let Some(Value::Object(raw_members)) = map.get(group.key) else {
            continue;
        };
        let members: BTreeMap<String, u64> = group
            .members
            .iter()
            .filter_map(|m| {
                let n = validate::whole(raw_members.get(*m)?, 0..=group.max).ok()?;
                Some((m.to_string(), n))
            })
            .collect();
        if !members.is_empty() {
            patch.groups.insert(group.key.to_string(), members);
        }
    }
    (!patch.is_empty()).then_some(patch)
}

fn achievements(raw: &Value) -> Option<AchievementsPatch> {
    let map = raw.as_object()?;
    let mut patch = AchievementsPatch::default();
    if let Some(Value::Array(items)) = map.get("unlocked") {
        for item in items {
            let Ok(badge) = validate::label(item, MAX_LABEL_CHARS) else {
                continue;
            };
            if patch.unlocked.len() >= MAX_BADGES {
                break;
            }
            if !patch.unlocked.contains(&badge) {
                patch.unlocked.push(badge);
            }
        }
    }
    if let Some(Value::Object(milestones)) = map.get("milestones") {
        for (key, value) in milestones {
            if key.chars().count() > MAX_LABEL_CHARS {
                continue;
            }
            if let Ok(n) = validate::whole(value, 0..=MAX_MILESTONE) {
                patch.milestones.insert(key.clone(), n);
            }
        }
    }
    (!patch.is_empty()).then_some(patch)
}
