//! `/api/{game}/*` document, game-event and identity routes.

use serde_json::{Value, json};

use crate::error::SyncError;
use crate::routes::util::{get_flag, get_number, get_param, parse_form_body, parse_query};
use crate::sync::identity::Transition;
use crate::sync::leaderboard::format_score;
use crate::sync::ports::Transport;
use crate::sync::session::{PurchaseCapture, RunResult, ScheduleOptions, ScheduleOutcome, SyncSession};

const PURCHASE_SYNC_FAILED: &str = "Purchase captured, but we could not sync to storage. Try refreshing.";

// ── GET /api/{game}/state ──────────────────────────────────────────

pub fn handle_state_get<T: Transport>(session: &SyncSession<T>) -> String {
    session.state().to_json(session.profile())
}

// ── POST /api/{game}/state ─────────────────────────────────────────

/// Body: JSON partial document. Query: `immediate`, `delay` (ms).
pub async fn handle_state_post<T: Transport>(session: &SyncSession<T>, query: &str, body: &str) -> String {
    let partial: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return json!({"error": format!("invalid JSON: {}", e)}).to_string(),
    };
    let params = parse_query(query);
    let options = ScheduleOptions {
        immediate: get_flag(&params, "immediate"),
        delay_ms: get_number(&params, "delay")
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.min(u32::MAX as f64) as u32),
    };
    outcome_json(session.schedule(&partial, options).await)
}

pub fn outcome_json(result: Result<ScheduleOutcome, SyncError>) -> String {
    let value = match result {
        Ok(ScheduleOutcome::Unchanged) => json!({"outcome": "unchanged"}),
        Ok(ScheduleOutcome::LocalOnly) => json!({"outcome": "localOnly"}),
        Ok(ScheduleOutcome::Queued { ticket }) => json!({"outcome": "queued", "ticket": ticket}),
        Ok(ScheduleOutcome::Saved) => json!({"outcome": "saved"}),
        Err(e) => json!({"outcome": "failed", "error": e.to_string()}),
    };
    value.to_string()
}

// ── POST /api/{game}/run ───────────────────────────────────────────

/// Body: `level={n}&score={n}&status={text}`. Returns the score summary.
pub async fn handle_run_post<T: Transport>(session: &SyncSession<T>, body: &str) -> String {
    let params = parse_form_body(body);
    let run = RunResult {
        level: get_number(&params, "level"),
        score: get_number(&params, "score"),
        status: get_param(&params, "status")
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    };
    session.handle_run_complete(run).await;
    render_summary(session)
}

// ── POST /api/{game}/purchase ──────────────────────────────────────

/// Body: JSON purchase capture.
pub async fn handle_purchase_post<T: Transport>(session: &SyncSession<T>, body: &str) -> String {
    let capture: PurchaseCapture = match serde_json::from_str(body) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting purchase payload");
            return purchase_status("error", "Invalid purchase payload.");
        }
    };
    let unlock = capture.unlock.clone();
    match session.handle_purchase(capture).await {
        Ok(_) => {
            let name = session
                .identity()
                .map(|i| i.display_name)
                .unwrap_or_else(|| session.profile().default_display_name.to_string());
            let unlocked = session.state().is_unlocked(&unlock);
            if unlocked {
                purchase_status("success", &format!("Thanks, {}! Your unlock is ready.", name))
            } else {
                purchase_status("success", &format!("Thanks, {}! Purchase recorded.", name))
            }
        }
        Err(_) => purchase_status("error", PURCHASE_SYNC_FAILED),
    }
}

fn purchase_status(variant: &str, message: &str) -> String {
    format!(
        r#"<p class="purchase-message purchase-{}">{}</p>"#,
        variant, message
    )
}

// ── POST /api/{game}/storage ───────────────────────────────────────

/// Body: `key={storage key}` plus `value={text}`; no `value` means the key
/// was removed.
pub fn handle_storage_post<T: Transport>(session: &SyncSession<T>, body: &str) -> String {
    let params = parse_form_body(body);
    let Some(key) = get_param(&params, "key") else {
        return "ignored".to_string();
    };
    match session.handle_storage_mutation(key, get_param(&params, "value")) {
        ScheduleOutcome::Unchanged => "ignored".to_string(),
        _ => "ok".to_string(),
    }
}

// ── POST /api/{game}/focus ─────────────────────────────────────────

pub async fn handle_focus_post<T: Transport>(session: &SyncSession<T>) -> String {
    let transition = session.handle_focus().await;
    if transition != Transition::Unchanged && transition != Transition::StillAnonymous {
        tracing::debug!(game = session.profile().game_id, ?transition, "identity changed on focus");
    }
    render_auth(session)
}

// ── GET /api/{game}/summary, /api/{game}/auth ──────────────────────

pub fn handle_summary_get<T: Transport>(session: &SyncSession<T>) -> String {
    render_summary(session)
}

pub fn handle_auth_get<T: Transport>(session: &SyncSession<T>) -> String {
    render_auth(session)
}

fn render_summary<T: Transport>(session: &SyncSession<T>) -> String {
    let state = session.state();
    let mut html = String::with_capacity(320);
    html.push_str(r#"<div class="score-summary">"#);
    html.push_str(&format!(
        r#"<p>Personal best: <strong id="personal-best">{}</strong></p>"#,
        format_score(state.stats.best_score)
    ));
    html.push_str(&format!(
        r#"<p>Highest level: <strong id="highest-level">{}</strong></p>"#,
        state.highest_level()
    ));
    html.push_str(&format!(
        r#"<p>Last score: <strong id="last-score">{}</strong></p>"#,
        format_score(state.stats.last_score)
    ));
    html.push_str(&format!(
        r#"<p>Unlocks: <strong id="unlock-count">{} / {}</strong></p>"#,
        state.unlocked_count(),
        session.profile().unlocks.len()
    ));
    html.push_str("</div>");
    html
}

fn render_auth<T: Transport>(session: &SyncSession<T>) -> String {
    match session.identity() {
        Some(identity) => format!(
            r#"<p class="auth-status" data-signed-in="true">Signed in as <strong>{}</strong>. Progress now syncs across devices.</p>"#,
            identity.display_name
        ),
        None => r#"<p class="auth-status" data-signed-in="false">Sign in with Google to sync purchases, unlocks, and leaderboard standings.</p>"#
            .to_string(),
    }
}
