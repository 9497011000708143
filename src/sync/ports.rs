//! Collaborators a session is built with.
//!
//! The browser build plugs in fetch, `localStorage`, `gloo` timers and JS
//! callbacks; tests plug in the recording fakes from `sync::testing`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::SyncError;
use crate::sync::document::StateDocument;
use crate::sync::identity::Identity;

/// JSON-over-HTTP. Implementations send credentials and bypass caches.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get_json(&self, url: &str) -> Result<Value, SyncError>;
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError>;
}

/// String key-value storage holding the legacy unlock flags.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;
}

/// Where state changes become visible to the player.
pub trait SyncView {
    fn unlocks_changed(&self, state: &StateDocument);
    fn state_changed(&self, state: &StateDocument);
    fn auth_changed(&self, identity: Option<&Identity>);
    /// Rendered leaderboard fragment.
    fn leaderboard(&self, html: &str);
}

/// Single-shot delayed callback. Firing must end in
/// `SyncSession::on_timer(ticket)`.
pub trait Scheduler {
    fn arm(&mut self, delay_ms: u32, ticket: u64);
    fn cancel(&mut self);
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}
