//! Recording fakes for every collaborator, plus a session harness.
//!
//! Each fake shares its log through `Rc` so a test can keep a handle after
//! the session takes ownership.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::SyncError;
use crate::sync::document::StateDocument;
use crate::sync::identity::Identity;
use crate::sync::ports::{Clock, KeyValueStore, Scheduler, SyncView, Transport};
use crate::sync::profile::{GameProfile, SyncConfig};
use crate::sync::session::{Collaborators, SyncSession};

// ── Transport ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

type Script = Vec<(&'static str, String, Result<Value, SyncError>)>;

/// Answers by method and URL prefix. Unscripted requests get a 404.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Rc<RefCell<Script>>,
    calls: Rc<RefCell<Vec<Call>>>,
}

impl MockTransport {
    /// Script (or re-script) the answer for `method` + `prefix`.
    pub fn respond(&self, method: &'static str, prefix: &str, answer: Result<Value, SyncError>) {
        let mut script = self.script.borrow_mut();
        script.retain(|(m, p, _)| !(*m == method && p == prefix));
        script.push((method, prefix.to_string(), answer));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, method: &str, prefix: &str) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.method == method && c.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn answer(&self, method: &'static str, url: &str, body: Option<Value>) -> Result<Value, SyncError> {
        self.calls.borrow_mut().push(Call {
            method,
            url: url.to_string(),
            body,
        });
        self.script
            .borrow()
            .iter()
            .find(|(m, p, _)| *m == method && url.starts_with(p.as_str()))
            .map(|(_, _, answer)| answer.clone())
            .unwrap_or(Err(SyncError::Status(404)))
    }
}

impl Transport for MockTransport {
    async fn get_json(&self, url: &str) -> Result<Value, SyncError> {
        self.answer("GET", url, None)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SyncError> {
        self.answer("POST", url, Some(body.clone()))
    }
}

// ── Storage ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<BTreeMap<String, String>>>,
    failing: Rc<Cell<bool>>,
}

impl MemoryStore {
    pub fn put(&self, key: &str, value: &str) {
        self.values.borrow_mut().insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    /// Make every access fail, as with disabled browser storage.
    pub fn fail(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        if self.failing.get() {
            return Err(SyncError::Storage("disabled".to_string()));
        }
        Ok(self.value(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        if self.failing.get() {
            return Err(SyncError::Storage("disabled".to_string()));
        }
        self.put(key, value);
        Ok(())
    }
}

// ── View ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ViewLog {
    pub unlock_refreshes: usize,
    pub state_refreshes: usize,
    /// Display name per auth refresh; `None` for signed out.
    pub auth: Vec<Option<String>>,
    pub leaderboard: Vec<String>,
}

#[derive(Clone, Default)]
pub struct RecordingView {
    log: Rc<RefCell<ViewLog>>,
}

impl RecordingView {
    pub fn log(&self) -> Rc<RefCell<ViewLog>> {
        Rc::clone(&self.log)
    }
}

impl SyncView for RecordingView {
    fn unlocks_changed(&self, _state: &StateDocument) {
        self.log.borrow_mut().unlock_refreshes += 1;
    }

    fn state_changed(&self, _state: &StateDocument) {
        self.log.borrow_mut().state_refreshes += 1;
    }

    fn auth_changed(&self, identity: Option<&Identity>) {
        self.log
            .borrow_mut()
            .auth
            .push(identity.map(|i| i.display_name.clone()));
    }

    fn leaderboard(&self, html: &str) {
        self.log.borrow_mut().leaderboard.push(html.to_string());
    }
}

// ── Timers & clock ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Armed { delay_ms: u32, ticket: u64 },
    Cancelled,
}

/// Records arm/cancel requests; tests fire tickets by hand.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    log: Rc<RefCell<Vec<TimerEvent>>>,
}

impl ManualScheduler {
    pub fn log(&self) -> Rc<RefCell<Vec<TimerEvent>>> {
        Rc::clone(&self.log)
    }
}

impl Scheduler for ManualScheduler {
    fn arm(&mut self, delay_ms: u32, ticket: u64) {
        self.log.borrow_mut().push(TimerEvent::Armed { delay_ms, ticket });
    }

    fn cancel(&mut self) {
        self.log.borrow_mut().push(TimerEvent::Cancelled);
    }
}

#[derive(Clone)]
pub struct FixedClock {
    millis: Rc<Cell<i64>>,
}

impl FixedClock {
    pub fn at(millis: i64) -> Self {
        Self {
            millis: Rc::new(Cell::new(millis)),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.millis.set(self.millis.get() + ms);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.get()).unwrap_or_default()
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub fn principal_response(user_id: &str) -> Value {
    json!({
        "clientPrincipal": {
            "userId": user_id,
            "userDetails": format!("{user_id}@example.com"),
            "identityProvider": "google",
            "claims": []
        }
    })
}

pub struct Harness {
    pub session: SyncSession<MockTransport>,
    pub transport: MockTransport,
    pub store: MemoryStore,
    pub view: Rc<RefCell<ViewLog>>,
    pub timers: Rc<RefCell<Vec<TimerEvent>>>,
    pub clock: FixedClock,
}

impl Harness {
    /// Session with nothing scripted and `init` not yet run.
    pub fn new(profile: &'static GameProfile) -> Self {
        let transport = MockTransport::default();
        let store = MemoryStore::default();
        let view = RecordingView::default();
        let scheduler = ManualScheduler::default();
        let clock = FixedClock::at(1_700_000_000_000);
        let harness_view = view.log();
        let timers = scheduler.log();
        let session = SyncSession::new(
            profile,
            SyncConfig::default(),
            Collaborators {
                transport: transport.clone(),
                store: Box::new(store.clone()),
                view: Box::new(view),
                scheduler: Box::new(scheduler),
                clock: Box::new(clock.clone()),
            },
        );
        Self {
            session,
            transport,
            store,
            view: harness_view,
            timers,
            clock,
        }
    }

    /// Initialized session signed in as `user_id` holding `state`. The
    /// call log is cleared afterwards.
    pub fn signed_in(profile: &'static GameProfile, user_id: &str, state: Value) -> Self {
        let harness = Self::new(profile);
        let config = SyncConfig::default();
        harness
            .transport
            .respond("GET", &config.identity_endpoint, Ok(principal_response(user_id)));
        harness
            .transport
            .respond("GET", profile.state_endpoint, Ok(json!({ "state": state })));
        harness
            .transport
            .respond("GET", &config.scores_endpoint, Ok(json!({"entries": []})));
        pollster::block_on(harness.session.init());
        harness.transport.clear_calls();
        harness
    }

    pub fn anonymous(profile: &'static GameProfile) -> Self {
        let harness = Self::new(profile);
        harness.transport.respond(
            "GET",
            &SyncConfig::default().identity_endpoint,
            Ok(json!({"clientPrincipal": null})),
        );
        pollster::block_on(harness.session.init());
        harness
    }

    /// Ticket of the most recently armed timer.
    pub fn last_ticket(&self) -> Option<u64> {
        self.timers.borrow().iter().rev().find_map(|e| match e {
            TimerEvent::Armed { ticket, .. } => Some(*ticket),
            TimerEvent::Cancelled => None,
        })
    }

    pub fn armed_count(&self) -> usize {
        self.timers
            .borrow()
            .iter()
            .filter(|e| matches!(e, TimerEvent::Armed { .. }))
            .count()
    }
}
