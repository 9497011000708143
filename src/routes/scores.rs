//! `/api/{game}/leaderboard` and `/api/{game}/score`.

use serde_json::json;

use crate::routes::util::{get_number, get_param, parse_form_body};
use crate::sync::ports::Transport;
use crate::sync::session::SyncSession;

// ── GET /api/{game}/leaderboard ────────────────────────────────────

/// Reload from the scores endpoint and return the rendered fragment.
pub async fn handle_leaderboard_get<T: Transport>(session: &SyncSession<T>) -> String {
    session.load_leaderboard().await;
    session.leaderboard_html()
}

// ── POST /api/{game}/score ─────────────────────────────────────────

/// Body: `score={n}` with optional `status={text}` sent along as meta.
/// Returns `{submitted, score, bestScore}`.
pub async fn handle_score_post<T: Transport>(session: &SyncSession<T>, body: &str) -> String {
    let params = parse_form_body(body);
    let value = get_number(&params, "score").unwrap_or(f64::NAN);
    let meta = get_param(&params, "status")
        .filter(|s| !s.is_empty())
        .map(|status| json!({ "status": status }));
    let submitted = session.submit_score(value, meta).await;
    json!({
        "submitted": submitted.is_some(),
        "score": submitted,
        "bestScore": session.state().stats.best_score,
    })
    .to_string()
}
