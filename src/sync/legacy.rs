//! Mirrors unlock flags into raw key-value storage keys older game builds
//! still read and write.
//!
//! The mirror is a one-way ratchet: a `"true"` in storage or an owned
//! purchase unlocks, nothing ever re-locks. Storage failures read as
//! absent.

use std::cell::Cell;
use std::collections::BTreeMap;

use tracing::warn;

use crate::sync::document::StateDocument;
use crate::sync::ports::KeyValueStore;
use crate::sync::profile::GameProfile;

pub struct LegacyBridge {
    profile: &'static GameProfile,
    syncing: Cell<bool>,
}

/// Held while the bridge writes its own keys. Mutations reported during
/// that window are the bridge's echo and are ignored.
pub struct SyncGuard<'a> {
    flag: &'a Cell<bool>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl LegacyBridge {
    pub fn new(profile: &'static GameProfile) -> Self {
        Self {
            profile,
            syncing: Cell::new(false),
        }
    }

    pub fn hold(&self) -> SyncGuard<'_> {
        self.syncing.set(true);
        SyncGuard {
            flag: &self.syncing,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.get()
    }

    /// Current stored value per unlock key.
    pub fn read_flags(&self, store: &dyn KeyValueStore) -> BTreeMap<&'static str, bool> {
        self.profile
            .legacy_flags
            .iter()
            .map(|(storage_key, unlock)| {
                let stored = match store.get(storage_key) {
                    Ok(value) => value.as_deref() == Some("true"),
                    Err(e) => {
                        warn!(key = *storage_key, error = %e, "legacy flag unreadable");
                        false
                    }
                };
                (*unlock, stored)
            })
            .collect()
    }

    /// Unlocks implied by stored flags or owned purchases that `state`
    /// does not have yet.
    pub fn missing_unlocks(
        &self,
        state: &StateDocument,
        stored: &BTreeMap<&'static str, bool>,
    ) -> BTreeMap<String, bool> {
        let from_storage = stored
            .iter()
            .filter(|(_, set)| **set)
            .map(|(unlock, _)| *unlock);
        let from_purchases = self
            .profile
            .purchase_unlocks
            .iter()
            .filter(|(purchase, _)| state.owns(purchase))
            .map(|(_, unlock)| *unlock);

        from_storage
            .chain(from_purchases)
            .filter(|unlock| !state.is_unlocked(unlock))
            .map(|unlock| (unlock.to_string(), true))
            .collect()
    }

    /// Write every mapped key as `"true"`/`"false"` from `state`.
    pub fn write_back(&self, store: &dyn KeyValueStore, state: &StateDocument) {
        let _guard = self.hold();
        for (storage_key, unlock) in self.profile.legacy_flags {
            let value = if state.is_unlocked(unlock) { "true" } else { "false" };
            if let Err(e) = store.set(storage_key, value) {
                warn!(key = *storage_key, error = %e, "legacy flag write failed");
            }
        }
    }

    /// Decide whether a reported storage write should unlock something.
    /// `None` value means the key was removed.
    pub fn classify_mutation(
        &self,
        key: &str,
        value: Option<&str>,
        state: &StateDocument,
    ) -> Option<&'static str> {
        if self.is_syncing() {
            return None;
        }
        let unlock = self.profile.legacy_unlock(key)?;
        let incoming = value == Some("true");
        if !incoming || state.is_unlocked(unlock) {
            return None;
        }
        Some(unlock)
    }
}
