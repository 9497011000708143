//! Browser bindings: fetch, `localStorage`, `gloo` timers, window focus
//! and JS view hooks, plus the per-game session registry the exported
//! functions share.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use gloo::events::EventListener;
use gloo::timers::callback::Timeout;
use js_sys::{Function, Reflect};
use serde_json::Value;
use tracing::{debug, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::{Headers, RequestCache, RequestCredentials, RequestInit, Response, Storage};

use crate::error::SyncError;
use crate::sync::document::StateDocument;
use crate::sync::identity::Identity;
use crate::sync::ports::{Clock, KeyValueStore, Scheduler, SyncView, Transport};
use crate::sync::profile::{GameProfile, SyncConfig, find_profile};
use crate::sync::session::{Collaborators, SyncSession};

pub type BrowserSession = SyncSession<FetchTransport>;

thread_local! {
    static SESSIONS: RefCell<HashMap<String, Rc<BrowserSession>>> = RefCell::new(HashMap::new());
}

pub fn lookup_session(game_id: &str) -> Option<Rc<BrowserSession>> {
    SESSIONS.with(|sessions| sessions.borrow().get(game_id).cloned())
}

/// Build and register the session for `game_id`, hook window focus, and
/// start `init` in the background.
pub fn start_session(game_id: &str, hooks: JsValue, config_json: &str) -> Result<(), String> {
    let profile = find_profile(game_id).ok_or_else(|| format!("Unknown game: {}", game_id))?;
    let config = SyncConfig::from_json(config_json)?;
    let session = Rc::new(SyncSession::new(
        profile,
        config,
        Collaborators {
            transport: FetchTransport,
            store: Box::new(LocalStore),
            view: Box::new(JsView { hooks, profile }),
            scheduler: Box::new(GlooScheduler::new(profile.game_id)),
            clock: Box::new(SystemClock),
        },
    ));

    let replaced = SESSIONS.with(|sessions| {
        sessions
            .borrow_mut()
            .insert(profile.game_id.to_string(), Rc::clone(&session))
            .is_some()
    });
    if !replaced {
        watch_focus(profile.game_id);
    }
    spawn_local(async move { session.init().await });
    Ok(())
}

fn watch_focus(game_id: &'static str) {
    let Some(window) = web_sys::window() else {
        warn!(game = game_id, "no window; focus reconciliation disabled");
        return;
    };
    EventListener::new(&window, "focus", move |_event| {
        spawn_local(async move {
            if let Some(session) = lookup_session(game_id) {
                session.handle_focus().await;
            }
        });
    })
    .forget();
}

// ── Transport ──────────────────────────────────────────────────────

/// `window.fetch` with credentials included and caching disabled.
pub struct FetchTransport;

impl FetchTransport {
    fn request(method: &str) -> RequestInit {
        let init = RequestInit::new();
        init.set_method(method);
        init.set_credentials(RequestCredentials::Include);
        init.set_cache(RequestCache::NoStore);
        init
    }

    async fn send(&self, url: &str, init: &RequestInit) -> Result<Value, SyncError> {
        let window = web_sys::window().ok_or(SyncError::NoWindow)?;
        let response: Response = JsFuture::from(window.fetch_with_str_and_init(url, init))
            .await
            .map_err(transport_error)?
            .dyn_into()
            .map_err(transport_error)?;
        if !response.ok() {
            return Err(SyncError::Status(response.status()));
        }
        let text = JsFuture::from(response.text().map_err(transport_error)?)
            .await
            .map_err(transport_error)?;
        Ok(serde_json::from_str(&text.as_string().unwrap_or_default())?)
    }
}

impl Transport for FetchTransport {
    async fn get_json(&self, url: &str) -> Result<Value, SyncError> {
        let init = Self::request("GET");
        self.send(url, &init).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError> {
        let init = Self::request("POST");
        let headers = Headers::new().map_err(transport_error)?;
        headers
            .set("Content-Type", "application/json")
            .map_err(transport_error)?;
        init.set_headers(&headers);
        init.set_body(&JsValue::from_str(&body.to_string()));
        self.send(url, &init).await
    }
}

fn transport_error(err: JsValue) -> SyncError {
    SyncError::Transport(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

// ── Storage ────────────────────────────────────────────────────────

pub struct LocalStore;

impl LocalStore {
    fn storage() -> Result<Storage, SyncError> {
        let window = web_sys::window().ok_or(SyncError::NoWindow)?;
        window
            .local_storage()
            .map_err(storage_error)?
            .ok_or_else(|| SyncError::Storage("localStorage unavailable".to_string()))
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Self::storage()?.get_item(key).map_err(storage_error)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        Self::storage()?.set_item(key, value).map_err(storage_error)
    }
}

fn storage_error(err: JsValue) -> SyncError {
    SyncError::Storage(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

// ── Timers & clock ─────────────────────────────────────────────────

/// Holds at most one `gloo` timeout. Firing routes the ticket back to the
/// registered session for the game.
pub struct GlooScheduler {
    game_id: &'static str,
    pending: Option<Timeout>,
}

impl GlooScheduler {
    pub fn new(game_id: &'static str) -> Self {
        Self {
            game_id,
            pending: None,
        }
    }
}

impl Scheduler for GlooScheduler {
    fn arm(&mut self, delay_ms: u32, ticket: u64) {
        let game_id = self.game_id;
        let timeout = Timeout::new(delay_ms, move || {
            spawn_local(async move {
                match lookup_session(game_id) {
                    Some(session) => session.on_timer(ticket).await,
                    None => debug!(game = game_id, ticket, "timer fired without a session"),
                }
            });
        });
        if let Some(previous) = self.pending.replace(timeout) {
            previous.cancel();
        }
    }

    fn cancel(&mut self) {
        if let Some(timeout) = self.pending.take() {
            timeout.cancel();
        }
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── View ───────────────────────────────────────────────────────────

/// Calls optional functions on the `hooks` object passed to `init_game`:
/// `unlocksChanged(stateJson)`, `stateChanged(stateJson)`,
/// `authChanged(displayName | null)`, `leaderboard(html)`. State is passed
/// in the game's server layout.
pub struct JsView {
    hooks: JsValue,
    profile: &'static GameProfile,
}

impl JsView {
    fn call(&self, name: &str, arg: &JsValue) {
        let Ok(hook) = Reflect::get(&self.hooks, &JsValue::from_str(name)) else {
            return;
        };
        let Some(hook) = hook.dyn_ref::<Function>() else {
            return;
        };
        if let Err(e) = hook.call1(&JsValue::NULL, arg) {
            warn!(hook = name, error = ?e, "view hook threw");
        }
    }
}

impl SyncView for JsView {
    fn unlocks_changed(&self, state: &StateDocument) {
        self.call("unlocksChanged", &JsValue::from_str(&state.to_json(self.profile)));
    }

    fn state_changed(&self, state: &StateDocument) {
        self.call("stateChanged", &JsValue::from_str(&state.to_json(self.profile)));
    }

    fn auth_changed(&self, identity: Option<&Identity>) {
        let arg = identity
            .map(|i| JsValue::from_str(&i.display_name))
            .unwrap_or(JsValue::NULL);
        self.call("authChanged", &arg);
    }

    fn leaderboard(&self, html: &str) {
        self.call("leaderboard", &JsValue::from_str(html));
    }
}
