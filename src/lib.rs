//! Arcade cloud sync, compiled to WASM.
//!
//! Keeps a per-game progress document (unlocks, purchases, inventory,
//! progress, stats, achievements) in step with the signed-in player's
//! server copy, mirrors unlocks into legacy `localStorage` flags, and
//! renders the leaderboard.
//!
//! Exports `init_game(gameId, hooks, configJson)` to start a session and
//! `handle_request(method, path, query, body)` for page scripts to talk to
//! it through `/api/{game}/...` routes.

pub mod error;
pub mod routes;
pub mod sync;

#[cfg(target_arch = "wasm32")]
mod web;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Start (or restart) the sync session for `game_id`.
///
/// `hooks` is an object of optional callbacks; `config_json` overrides
/// endpoint URLs and delays and may be empty.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_game(game_id: &str, hooks: JsValue, config_json: &str) -> Result<(), JsValue> {
    web::start_session(game_id, hooks, config_json).map_err(|e| JsValue::from_str(&e))
}

/// Process an HTTP-like request against a running session.
///
/// # Arguments
/// * `method`: HTTP method ("GET" or "POST")
/// * `path`: URL path (e.g., "/api/cavegrok/state")
/// * `query`: Query string (e.g., "?immediate=1")
/// * `body`: Request body: form data or JSON depending on the route
///
/// # Returns
/// JSON or an HTML fragment, depending on the route.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub async fn handle_request(method: String, path: String, query: String, body: String) -> String {
    routes::handle(&method, &path, &query, &body, web::lookup_session).await
}
