//! Per-game server layout.
//!
//! Documents and patches serialize in one neutral shape: flat `unlocks`,
//! a top-level `selectedUnlock`, and `stats.bestScore`. Each game's state
//! endpoint stores its own variant of that shape, described by
//! [`WireFormat`](crate::sync::profile::WireFormat). [`decode`] runs before
//! sanitizing and accepts either shape; the encoders run on the way out.

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::sync::document::{StateDocument, StatePatch};
use crate::sync::profile::{GameProfile, UnlockLayout};

const UNLOCKS: &str = "unlocks";
const STATS: &str = "stats";
const BEST_SCORE: &str = "bestScore";
/// Neutral-shape key for the active cosmetic.
pub const SELECTED: &str = "selectedUnlock";

/// Map a server-shaped document onto the neutral shape. Input that is
/// already neutral passes through borrowed.
pub fn decode<'a>(profile: &GameProfile, map: &'a Map<String, Value>) -> Cow<'a, Map<String, Value>> {
    let nested = match profile.wire.unlocks {
        UnlockLayout::Nested { group, selected, .. } => map
            .get(UNLOCKS)
            .and_then(Value::as_object)
            .filter(|u| u.contains_key(group) || u.contains_key(selected))
            .map(|u| (u, group, selected)),
        UnlockLayout::Flat => None,
    };
    let best_key = profile.wire.best_score;
    let rename_best = best_key != BEST_SCORE
        && map
            .get(STATS)
            .and_then(Value::as_object)
            .is_some_and(|s| s.contains_key(best_key) && !s.contains_key(BEST_SCORE));
    if nested.is_none() && !rename_best {
        return Cow::Borrowed(map);
    }

    let mut out = map.clone();
    if let Some((unlocks, group, selected)) = nested {
        let mut flags: Map<String, Value> = unlocks
            .iter()
            .filter(|(k, _)| k.as_str() != group && k.as_str() != selected)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(Value::Object(grouped)) = unlocks.get(group) {
            flags.extend(grouped.clone());
        }
        if let Some(choice) = unlocks.get(selected) {
            out.entry(SELECTED).or_insert_with(|| choice.clone());
        }
        out.insert(UNLOCKS.to_string(), Value::Object(flags));
    }
    if rename_best {
        if let Some(Value::Object(stats)) = out.get_mut(STATS) {
            if let Some(best) = stats.remove(best_key) {
                stats.insert(BEST_SCORE.to_string(), best);
            }
        }
    }
    Cow::Owned(out)
}

/// The complete document in the server's layout.
pub fn encode_document(profile: &GameProfile, doc: &StateDocument) -> Value {
    reshape(profile, serde_json::to_value(doc).unwrap_or(Value::Null))
}

/// Only the touched fields, in the server's layout.
pub fn encode_patch(profile: &GameProfile, patch: &StatePatch) -> Value {
    reshape(profile, patch.to_value())
}

fn reshape(profile: &GameProfile, mut value: Value) -> Value {
    let Some(map) = value.as_object_mut() else {
        return value;
    };
    let selected = map.remove(SELECTED);
    if let UnlockLayout::Nested { group, selected: selected_key, .. } = profile.wire.unlocks {
        let flags = map.remove(UNLOCKS);
        if flags.is_some() || selected.is_some() {
            let mut nested = Map::new();
            if let Some(flags) = flags {
                nested.insert(group.to_string(), flags);
            }
            if let Some(selected) = selected {
                nested.insert(selected_key.to_string(), selected);
            }
            map.insert(UNLOCKS.to_string(), Value::Object(nested));
        }
    }
    let best_key = profile.wire.best_score;
    if best_key != BEST_SCORE {
        if let Some(Value::Object(stats)) = map.get_mut(STATS) {
            if let Some(best) = stats.remove(BEST_SCORE) {
                stats.insert(best_key.to_string(), best);
            }
        }
    }
    map.retain(|key, _| profile.wire.sections.contains(&key.as_str()));
    value
}
