//! In-page request bridge.
//!
//! Page scripts call `handle_request(method, path, query, body)`; the path
//! is matched with `matchit`, `{game}` picks the session, and the handler
//! answers with JSON or an HTML fragment.

pub mod scores;
pub mod state;
pub mod util;

use std::rc::Rc;

use crate::sync::ports::Transport;
use crate::sync::session::SyncSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StateGet,
    StatePost,
    Run,
    Purchase,
    Storage,
    Focus,
    Summary,
    Auth,
    Leaderboard,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    MethodNotAllowed,
}

impl RouteError {
    pub fn render(self) -> String {
        match self {
            RouteError::NotFound => not_found(),
            RouteError::MethodNotAllowed => method_not_allowed(),
        }
    }
}

/// Match `path` and `method` to a route and the game id it addresses.
pub fn resolve(method: &str, path: &str) -> Result<(Route, String), RouteError> {
    let mut router = matchit::Router::new();
    router.insert("/api/{game}/state", "state").ok();
    router.insert("/api/{game}/run", "run").ok();
    router.insert("/api/{game}/purchase", "purchase").ok();
    router.insert("/api/{game}/storage", "storage").ok();
    router.insert("/api/{game}/focus", "focus").ok();
    router.insert("/api/{game}/summary", "summary").ok();
    router.insert("/api/{game}/auth", "auth").ok();
    router.insert("/api/{game}/leaderboard", "leaderboard").ok();
    router.insert("/api/{game}/score", "score").ok();

    let matched = router.at(path).map_err(|_| RouteError::NotFound)?;
    let game = matched.params.get("game").unwrap_or_default().to_string();
    let route = match (*matched.value, method) {
        ("state", "GET") => Route::StateGet,
        ("state", "POST") => Route::StatePost,
        ("run", "POST") => Route::Run,
        ("purchase", "POST") => Route::Purchase,
        ("storage", "POST") => Route::Storage,
        ("focus", "POST") => Route::Focus,
        ("summary", "GET") => Route::Summary,
        ("auth", "GET") => Route::Auth,
        ("leaderboard", "GET") => Route::Leaderboard,
        ("score", "POST") => Route::Score,
        _ => return Err(RouteError::MethodNotAllowed),
    };
    Ok((route, game))
}

/// Run a resolved route against a session.
pub async fn dispatch<T: Transport>(
    session: &SyncSession<T>,
    route: Route,
    query: &str,
    body: &str,
) -> String {
    match route {
        Route::StateGet => state::handle_state_get(session),
        Route::StatePost => state::handle_state_post(session, query, body).await,
        Route::Run => state::handle_run_post(session, body).await,
        Route::Purchase => state::handle_purchase_post(session, body).await,
        Route::Storage => state::handle_storage_post(session, body),
        Route::Focus => state::handle_focus_post(session).await,
        Route::Summary => state::handle_summary_get(session),
        Route::Auth => state::handle_auth_get(session),
        Route::Leaderboard => scores::handle_leaderboard_get(session).await,
        Route::Score => scores::handle_score_post(session, body).await,
    }
}

/// Resolve, look up the session for the matched game, dispatch.
pub async fn handle<T, F>(method: &str, path: &str, query: &str, body: &str, lookup: F) -> String
where
    T: Transport,
    F: FnOnce(&str) -> Option<Rc<SyncSession<T>>>,
{
    let (route, game) = match resolve(method, path) {
        Ok(resolved) => resolved,
        Err(e) => return e.render(),
    };
    match lookup(&game) {
        Some(session) => dispatch(&session, route, query, body).await,
        None => unknown_game(&game),
    }
}

pub fn not_found() -> String {
    r#"<span class="sync-error">404 — route not found</span>"#.to_string()
}

pub fn method_not_allowed() -> String {
    r#"<span class="sync-error">405 — method not allowed</span>"#.to_string()
}

pub fn unknown_game(game: &str) -> String {
    let safe: String = game
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!(r#"<span class="sync-error">Unknown game: {}</span>"#, safe)
}
