//! Leaderboard entries, view states, HTML rendering and the resubmit guard.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::sync::identity::{normalize_identifier, sanitize_display_name};
use crate::sync::profile::GameProfile;
use crate::sync::sanitize::MAX_SAFE_INTEGER;
use crate::sync::validate;

pub const UNAVAILABLE: &str = "Leaderboard unavailable right now.";
pub const LOADING: &str = "Loading leaderboard...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub display_name: Option<String>,
    pub score: u64,
    pub user_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LeaderboardEntry {
    /// Lenient parse: every field is optional, bad values are dropped.
    pub fn from_value(raw: &Value) -> Self {
        let text = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        let score = ["bestScore", "score"]
            .iter()
            .filter_map(|k| raw.get(*k))
            .find_map(|v| validate::whole(v, 0..=MAX_SAFE_INTEGER).ok())
            .unwrap_or(0);
        Self {
            display_name: text("displayName"),
            score,
            user_id: text("userId"),
            updated_at: raw.get("updatedAt").and_then(|v| validate::timestamp(v).ok()),
        }
    }
}

/// Parsed `GET /api/scores` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreBoard {
    pub entries: Vec<LeaderboardEntry>,
    pub my_best: Option<u64>,
}

impl ScoreBoard {
    pub fn from_value(raw: &Value) -> Self {
        let entries = raw
            .get("entries")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(LeaderboardEntry::from_value).collect())
            .unwrap_or_default();
        Self {
            entries,
            my_best: raw
                .pointer("/myScore/bestScore")
                .and_then(|v| validate::whole(v, 0..=MAX_SAFE_INTEGER).ok()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardView {
    SignedOut,
    Loading,
    Unavailable,
    Ranked(Vec<LeaderboardEntry>),
}

pub fn scores_url(endpoint: &str, game_id: &str, limit: u32) -> String {
    format!("{}?gameId={}&limit={}", endpoint, game_id, limit)
}

/// `1234567` -> `1,234,567`.
pub fn format_score(score: u64) -> String {
    let digits = score.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub fn format_updated(at: DateTime<Utc>) -> String {
    format!("Updated {}", at.format("%Y-%m-%d %H:%M UTC"))
}

// ── Rendering ──────────────────────────────────────────────────────

/// Render a view for `profile`. `user_key` highlights the viewer's row.
pub fn render(view: &LeaderboardView, profile: &GameProfile, user_key: Option<&str>) -> String {
    match view {
        LeaderboardView::SignedOut => status(profile.leaderboard_signed_out),
        LeaderboardView::Loading => status(LOADING),
        LeaderboardView::Unavailable => status(UNAVAILABLE),
        LeaderboardView::Ranked(entries) if entries.is_empty() => status(profile.leaderboard_empty),
        LeaderboardView::Ranked(entries) => {
            let mut html = String::with_capacity(128 * entries.len());
            html.push_str(r#"<ol class="leaderboard-list">"#);
            for (index, entry) in entries.iter().enumerate() {
                html.push_str(&render_row(index + 1, entry, profile, user_key));
            }
            html.push_str("</ol>");
            html
        }
    }
}

fn status(message: &str) -> String {
    format!(r#"<p class="leaderboard-status">{}</p>"#, message)
}

fn render_row(rank: usize, entry: &LeaderboardEntry, profile: &GameProfile, user_key: Option<&str>) -> String {
    let name = entry
        .display_name
        .as_deref()
        .and_then(sanitize_display_name)
        .unwrap_or_else(|| profile.default_display_name.to_string());
    let is_me = match (user_key, entry.user_id.as_deref()) {
        (Some(me), Some(id)) => !me.is_empty() && normalize_identifier(id) == me,
        _ => false,
    };
    let class = if is_me { "score-row score-row-me" } else { "score-row" };

    let mut html = String::with_capacity(192);
    html.push_str(&format!(r#"<li class="{}">"#, class));
    html.push_str(&format!(r#"<span class="rank">{}</span>"#, rank));
    html.push_str(&format!(r#"<span class="player">{}</span>"#, name));
    html.push_str(&format!(r#"<span class="score">{}</span>"#, format_score(entry.score)));
    if let Some(at) = entry.updated_at {
        html.push_str(&format!("<small>{}</small>", format_updated(at)));
    }
    html.push_str("</li>");
    html
}

// ── Submission guard ───────────────────────────────────────────────

/// Suppresses resubmitting the same score within a short window.
#[derive(Debug, Default)]
pub struct SubmitGuard {
    last: Option<(u64, DateTime<Utc>)>,
}

impl SubmitGuard {
    /// Floor and admit `value`, or `None` when it is not a positive finite
    /// number or repeats the last score within `window_ms`.
    pub fn admit(&mut self, value: f64, now: DateTime<Utc>, window_ms: i64) -> Option<u64> {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        let score = value.floor() as u64;
        if let Some((last, at)) = self.last {
            if last == score && (now - at).num_milliseconds() < window_ms {
                return None;
            }
        }
        self.last = Some((score, now));
        Some(score)
    }
}
