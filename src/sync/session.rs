//! One game's sync session: identity, document, persistence and leaderboard.
//!
//! All state lives in a single `RefCell`. Borrows are short and never span
//! an `.await` or a call into the view or storage, so page callbacks that
//! re-enter the session while a request is in flight are safe.

use std::cell::RefCell;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::sync::document::{BEST_LEVEL, StateDocument, StatePatch};
use crate::sync::identity::{Identity, Principal, Transition, classify};
use crate::sync::leaderboard::{self, LeaderboardView, ScoreBoard, SubmitGuard};
use crate::sync::legacy::LegacyBridge;
use crate::sync::merge::apply_patch;
use crate::sync::ports::{Clock, KeyValueStore, Scheduler, SyncView, Transport};
use crate::sync::profile::{GameProfile, SyncConfig};
use crate::sync::queue::PersistenceQueue;
use crate::sync::sanitize::{MAX_SAFE_INTEGER, sanitize, sanitize_patch};
use crate::sync::validate;
use crate::sync::wire;

/// Injected collaborators.
pub struct Collaborators<T> {
    pub transport: T,
    pub store: Box<dyn KeyValueStore>,
    pub view: Box<dyn SyncView>,
    pub scheduler: Box<dyn Scheduler>,
    pub clock: Box<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The patch changed nothing; no queue or network activity.
    Unchanged,
    /// Applied in memory; nobody is signed in to persist it for.
    LocalOnly,
    /// Applied and waiting on the debounce timer.
    Queued { ticket: u64 },
    /// Applied and persisted before returning.
    Saved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub immediate: bool,
    pub delay_ms: Option<u32>,
}

/// A finished run as reported by the game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub level: Option<f64>,
    pub score: Option<f64>,
    pub status: Option<String>,
}

/// Provider-neutral purchase capture.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCapture {
    pub purchase_key: String,
    pub unlock: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub purchased_at: Option<String>,
}

struct Inner {
    identity: Option<Identity>,
    state: StateDocument,
    queue: PersistenceQueue,
    leaderboard: LeaderboardView,
    leaderboard_loaded: bool,
    submit_guard: SubmitGuard,
}

pub struct SyncSession<T: Transport> {
    profile: &'static GameProfile,
    config: SyncConfig,
    transport: T,
    store: Box<dyn KeyValueStore>,
    view: Box<dyn SyncView>,
    clock: Box<dyn Clock>,
    bridge: LegacyBridge,
    inner: RefCell<Inner>,
}

impl<T: Transport> SyncSession<T> {
    pub fn new(profile: &'static GameProfile, config: SyncConfig, parts: Collaborators<T>) -> Self {
        Self {
            profile,
            config,
            transport: parts.transport,
            store: parts.store,
            view: parts.view,
            clock: parts.clock,
            bridge: LegacyBridge::new(profile),
            inner: RefCell::new(Inner {
                identity: None,
                state: StateDocument::defaults(profile),
                queue: PersistenceQueue::new(parts.scheduler),
                leaderboard: LeaderboardView::SignedOut,
                leaderboard_loaded: false,
                submit_guard: SubmitGuard::default(),
            }),
        }
    }

    pub fn profile(&self) -> &'static GameProfile {
        self.profile
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> StateDocument {
        self.inner.borrow().state.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.borrow().identity.clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.borrow().identity.is_some()
    }

    pub fn pending_payload(&self) -> Option<StatePatch> {
        self.inner.borrow().queue.pending().cloned()
    }

    pub fn leaderboard_view(&self) -> LeaderboardView {
        self.inner.borrow().leaderboard.clone()
    }

    pub fn leaderboard_html(&self) -> String {
        let inner = self.inner.borrow();
        let user_key = inner.identity.as_ref().map(|i| i.user_key.as_str());
        leaderboard::render(&inner.leaderboard, self.profile, user_key)
    }

    fn user_key(&self) -> Option<String> {
        self.inner.borrow().identity.as_ref().map(|i| i.user_key.clone())
    }

    // ── Identity ───────────────────────────────────────────────────

    /// Look up the principal once and load everything it owns.
    pub async fn init(&self) {
        match self.fetch_principal().await {
            Some(principal) => {
                self.adopt(principal);
                self.fetch_state().await;
                self.load_leaderboard().await;
            }
            None => {
                self.view.auth_changed(None);
                self.reconcile_legacy();
                self.refresh_views();
                self.set_leaderboard(LeaderboardView::SignedOut);
            }
        }
    }

    /// Re-check the principal after the window regains focus.
    pub async fn handle_focus(&self) -> Transition {
        let principal = self.fetch_principal().await;
        let transition = classify(self.inner.borrow().identity.as_ref(), principal.as_ref());
        debug!(game = self.profile.game_id, ?transition, "focus identity check");

        match (transition, principal) {
            (Transition::SignedOut, _) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.identity = None;
                    inner.queue.discard();
                    inner.state = StateDocument::defaults(self.profile);
                    inner.leaderboard_loaded = false;
                }
                self.view.auth_changed(None);
                self.reconcile_legacy();
                self.refresh_views();
                self.set_leaderboard(LeaderboardView::SignedOut);
            }
            (Transition::SignedIn | Transition::Switched, Some(principal)) => {
                self.adopt(principal);
                self.fetch_state().await;
                self.load_leaderboard().await;
            }
            _ => {}
        }
        transition
    }

    async fn fetch_principal(&self) -> Option<Principal> {
        match self.transport.get_json(&self.config.identity_endpoint).await {
            Ok(raw) => Principal::from_response(&raw),
            Err(e) => {
                warn!(game = self.profile.game_id, error = %e, "principal lookup failed");
                None
            }
        }
    }

    /// Switch to `principal`. Anything pending or loaded for the previous
    /// identity is dropped.
    fn adopt(&self, principal: Principal) {
        let identity = Identity::new(principal, self.profile.default_display_name);
        {
            let mut inner = self.inner.borrow_mut();
            inner.queue.discard();
            inner.state = StateDocument::defaults(self.profile);
            inner.leaderboard_loaded = false;
            inner.identity = Some(identity.clone());
        }
        self.view.auth_changed(Some(&identity));
    }

    // ── Document ───────────────────────────────────────────────────

    /// Load the remote document. Failures fall back to defaults.
    pub async fn fetch_state(&self) {
        let Some(user_key) = self.user_key() else {
            return;
        };
        let doc = match self.transport.get_json(self.profile.state_endpoint).await {
            Ok(raw) => sanitize(self.profile, Some(&raw), self.clock.now()),
            Err(e) => {
                warn!(game = self.profile.game_id, error = %e, "state load failed; using defaults");
                StateDocument::defaults(self.profile)
            }
        };
        if self.user_key().as_deref() != Some(user_key.as_str()) {
            debug!(game = self.profile.game_id, "dropping state fetched for a previous identity");
            return;
        }
        self.inner.borrow_mut().state = doc;
        self.reconcile_legacy();
        self.refresh_views();
    }

    /// Apply a patch locally and debounce its persistence.
    pub fn queue(&self, partial: &Value, delay_ms: u32) -> ScheduleOutcome {
        let patch = sanitize_patch(self.profile, partial, self.clock.now());
        self.queue_patch(patch, delay_ms)
    }

    /// Apply a patch locally, then persist it on the debounce timer or,
    /// with `immediate`, before returning. Only the immediate path fails.
    pub async fn schedule(
        &self,
        partial: &Value,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, SyncError> {
        let patch = sanitize_patch(self.profile, partial, self.clock.now());
        self.schedule_patch(patch, options).await
    }

    async fn schedule_patch(
        &self,
        patch: StatePatch,
        options: ScheduleOptions,
    ) -> Result<ScheduleOutcome, SyncError> {
        if !options.immediate {
            let delay = options.delay_ms.unwrap_or(self.config.save_delay_ms);
            return Ok(self.queue_patch(patch, delay));
        }
        if !self.apply_local(patch) {
            return Ok(ScheduleOutcome::Unchanged);
        }
        if !self.is_signed_in() {
            return Ok(ScheduleOutcome::LocalOnly);
        }
        self.save_now().await?;
        Ok(ScheduleOutcome::Saved)
    }

    fn queue_patch(&self, patch: StatePatch, delay_ms: u32) -> ScheduleOutcome {
        if !self.apply_local(patch) {
            return ScheduleOutcome::Unchanged;
        }
        let mut inner = self.inner.borrow_mut();
        if inner.identity.is_none() {
            return ScheduleOutcome::LocalOnly;
        }
        let ticket = inner.queue.arm(delay_ms);
        ScheduleOutcome::Queued { ticket }
    }

    /// Merge into memory and the pending payload. False when nothing
    /// changed.
    fn apply_local(&self, patch: StatePatch) -> bool {
        let (unlocks_changed, snapshot) = {
            let mut inner = self.inner.borrow_mut();
            let result = apply_patch(&mut inner.state, self.profile, patch);
            if result.applied.is_empty() {
                return false;
            }
            inner.queue.enqueue(result.applied);
            (result.unlocks_changed, inner.state.clone())
        };
        if unlocks_changed {
            self.bridge.write_back(self.store.as_ref(), &snapshot);
            self.view.unlocks_changed(&snapshot);
        }
        self.view.state_changed(&snapshot);
        true
    }

    /// Send whatever is pending right away.
    pub async fn save_now(&self) -> Result<(), SyncError> {
        let payload = self.inner.borrow_mut().queue.take_now();
        match payload {
            Some(payload) => self.flush(payload).await,
            None => Ok(()),
        }
    }

    /// Debounce timer callback.
    pub async fn on_timer(&self, ticket: u64) {
        let payload = self.inner.borrow_mut().queue.fire(ticket);
        if let Some(payload) = payload {
            // failures are logged inside flush and not retried
            let _ = self.flush(payload).await;
        }
    }

    /// POST the pending changes, or the whole document for games whose
    /// server replaces entire sections, then adopt the server's copy.
    async fn flush(&self, payload: StatePatch) -> Result<(), SyncError> {
        let Some(user_key) = self.user_key() else {
            debug!(game = self.profile.game_id, "signed out; dropping payload");
            return Ok(());
        };
        let body = if self.profile.wire.full_document {
            wire::encode_document(self.profile, &self.state())
        } else {
            wire::encode_patch(self.profile, &payload)
        };
        let response = match self.transport.post_json(self.profile.state_endpoint, &body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(game = self.profile.game_id, error = %e, "state save failed; keeping local state");
                return Err(e);
            }
        };
        if self.user_key().as_deref() != Some(user_key.as_str()) {
            debug!(game = self.profile.game_id, "dropping save response for a previous identity");
            return Ok(());
        }
        match response.get("state").filter(|v| v.is_object()) {
            Some(server) => {
                let doc = sanitize(self.profile, Some(server), self.clock.now());
                self.inner.borrow_mut().state = doc;
                self.reconcile_legacy();
                self.refresh_views();
            }
            None => debug!(game = self.profile.game_id, "save response carried no state"),
        }
        Ok(())
    }

    // ── Legacy storage ─────────────────────────────────────────────

    /// Raise unlocks from stored flags and owned purchases, then mirror
    /// the result back into storage.
    fn reconcile_legacy(&self) {
        let stored = self.bridge.read_flags(self.store.as_ref());
        let missing = self
            .bridge
            .missing_unlocks(&self.inner.borrow().state, &stored);
        if !missing.is_empty() {
            debug!(game = self.profile.game_id, count = missing.len(), "legacy flags raise unlocks");
            let patch = StatePatch {
                unlocks: Some(missing),
                ..StatePatch::default()
            };
            self.queue_patch(patch, 0);
        }
        let snapshot = self.state();
        self.bridge.write_back(self.store.as_ref(), &snapshot);
    }

    /// A page script wrote (`Some`) or removed (`None`) a storage key.
    pub fn handle_storage_mutation(&self, key: &str, value: Option<&str>) -> ScheduleOutcome {
        let unlock = self
            .bridge
            .classify_mutation(key, value, &self.inner.borrow().state);
        let Some(unlock) = unlock else {
            return ScheduleOutcome::Unchanged;
        };
        let patch = StatePatch {
            unlocks: Some(BTreeMap::from([(unlock.to_string(), true)])),
            ..StatePatch::default()
        };
        self.queue_patch(patch, self.config.storage_delay_ms)
    }

    fn refresh_views(&self) {
        let snapshot = self.state();
        self.view.unlocks_changed(&snapshot);
        self.view.state_changed(&snapshot);
    }

    // ── Leaderboard ────────────────────────────────────────────────

    pub async fn load_leaderboard(&self) {
        if !self.is_signed_in() {
            self.inner.borrow_mut().leaderboard_loaded = false;
            self.set_leaderboard(LeaderboardView::SignedOut);
            return;
        }
        self.set_leaderboard(LeaderboardView::Loading);

        let url = leaderboard::scores_url(
            &self.config.scores_endpoint,
            self.profile.game_id,
            self.config.leaderboard_limit,
        );
        match self.transport.get_json(&url).await {
            Ok(raw) => {
                let board = ScoreBoard::from_value(&raw);
                if let Some(best) = board.my_best {
                    self.raise_best(best);
                }
                self.inner.borrow_mut().leaderboard_loaded = true;
                self.set_leaderboard(LeaderboardView::Ranked(board.entries));
            }
            Err(e) => {
                warn!(game = self.profile.game_id, error = %e, "leaderboard load failed");
                self.inner.borrow_mut().leaderboard_loaded = false;
                self.set_leaderboard(LeaderboardView::Unavailable);
            }
        }
    }

    fn set_leaderboard(&self, view: LeaderboardView) {
        self.inner.borrow_mut().leaderboard = view;
        let html = self.leaderboard_html();
        self.view.leaderboard(&html);
    }

    /// Raise the local best score from an authoritative server value.
    fn raise_best(&self, best: u64) {
        let snapshot = {
            let mut inner = self.inner.borrow_mut();
            if best <= inner.state.stats.best_score {
                return;
            }
            inner.state.stats.best_score = best;
            inner.state.clone()
        };
        self.view.state_changed(&snapshot);
    }

    /// Submit a score. Returns the floored score when a POST was made.
    pub async fn submit_score(&self, value: f64, meta: Option<Value>) -> Option<u64> {
        if !self.is_signed_in() {
            return None;
        }
        let now = self.clock.now();
        let score = self
            .inner
            .borrow_mut()
            .submit_guard
            .admit(value, now, self.config.submit_window_ms)?;

        let mut body = json!({"gameId": self.profile.game_id, "score": score});
        if let Some(meta) = meta {
            body["meta"] = meta;
        }
        match self.transport.post_json(&self.config.scores_endpoint, &body).await {
            Ok(receipt) => {
                if let Some(best) = receipt
                    .get("bestScore")
                    .and_then(|v| validate::whole(v, 0..=MAX_SAFE_INTEGER).ok())
                {
                    self.raise_best(best);
                }
                let updated = receipt.get("updated").and_then(Value::as_bool).unwrap_or(false);
                let reload = updated || !self.inner.borrow().leaderboard_loaded;
                if reload {
                    self.load_leaderboard().await;
                }
            }
            Err(e) => warn!(game = self.profile.game_id, score, error = %e, "score submission failed"),
        }
        Some(score)
    }

    // ── Game events ────────────────────────────────────────────────

    /// Record a finished run and submit its score. Ignored when signed
    /// out.
    pub async fn handle_run_complete(&self, run: RunResult) -> Option<ScheduleOutcome> {
        if !self.is_signed_in() {
            return None;
        }
        let current_level = self.inner.borrow().state.progress.last_level;
        let level = run
            .level
            .filter(|l| l.is_finite() && *l >= 1.0)
            .map(f64::floor)
            .unwrap_or(current_level as f64);
        let score = run
            .score
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(f64::floor)
            .unwrap_or(0.0);

        let mut patch = json!({
            "progress": {"lastLevel": level},
            "stats": {"lastScore": score, "bestScore": score}
        });
        if let Some(spec) = self.profile.counter(BEST_LEVEL) {
            patch["stats"][BEST_LEVEL] = json!(level.min(spec.max as f64));
        }
        let outcome = self.queue(&patch, self.config.run_delay_ms);
        let status = run.status.as_deref().unwrap_or("complete");
        self.submit_score(score, Some(json!({ "status": status }))).await;
        Some(outcome)
    }

    /// Unlock and record a captured purchase, persisting immediately.
    pub async fn handle_purchase(&self, capture: PurchaseCapture) -> Result<ScheduleOutcome, SyncError> {
        let mut record = Map::new();
        record.insert("owned".to_string(), Value::Bool(true));
        let optional = [
            ("provider", capture.provider.map(Value::from)),
            ("transactionId", capture.transaction_id.map(Value::from)),
            ("amount", capture.amount.map(Value::from)),
            ("currency", capture.currency.map(Value::from)),
            ("purchasedAt", capture.purchased_at.map(Value::from)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                record.insert(key.to_string(), value);
            }
        }

        let mut unlocks = Map::new();
        unlocks.insert(capture.unlock, Value::Bool(true));
        let mut purchases = Map::new();
        purchases.insert(capture.purchase_key, Value::Object(record));
        let partial = json!({"unlocks": unlocks, "purchases": purchases});

        let options = ScheduleOptions {
            immediate: true,
            delay_ms: None,
        };
        self.schedule(&partial, options).await
    }
}
