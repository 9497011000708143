//! Signed-in principal, the names derived from it, and identity transitions.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const NAME_CLAIMS: &[&str] = &[
    "name",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub typ: String,
    #[serde(default)]
    pub val: String,
}

/// The identity provider's view of the user, as returned by `/.auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_details: Option<String>,
    #[serde(default)]
    pub identity_provider: Option<String>,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

impl Principal {
    /// Extract `clientPrincipal` from an identity response. Anything that
    /// does not carry a usable id counts as signed out.
    pub fn from_response(raw: &Value) -> Option<Self> {
        let inner = raw.get("clientPrincipal").filter(|v| !v.is_null())?;
        let principal: Principal = match serde_json::from_value(inner.clone()) {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "ignoring malformed principal");
                return None;
            }
        };
        (!principal.user_key().is_empty()).then_some(principal)
    }

    pub fn claim(&self, types: &[&str]) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| types.iter().any(|t| t.eq_ignore_ascii_case(&c.typ)))
            .map(|c| c.val.as_str())
    }

    /// Normalized `userId`, falling back to `userDetails`.
    pub fn user_key(&self) -> String {
        let raw = self
            .user_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.user_details.as_deref())
            .unwrap_or("");
        normalize_identifier(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub principal: Principal,
    pub user_key: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(principal: Principal, default_name: &str) -> Self {
        let display_name = [
            principal.claim(NAME_CLAIMS),
            principal.user_details.as_deref(),
            principal.user_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(sanitize_display_name)
        .unwrap_or_else(|| default_name.to_string());
        Self {
            user_key: principal.user_key(),
            principal,
            display_name,
        }
    }
}

/// Lowercase, collapse anything outside `[a-z0-9_-]` to single dashes,
/// strip dashes at both ends.
pub fn normalize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Short public name: local part of an email, first word, safe chars only,
/// capitalized. `None` when nothing survives.
pub fn sanitize_display_name(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(at) = text.find('@') {
        if at > 0 {
            text = &text[..at];
        }
    }
    let word = text.split_whitespace().next().unwrap_or("");
    let cleaned: String = word
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let mut chars = cleaned.chars();
    let first = chars.next()?;
    Some(first.to_ascii_uppercase().to_string() + chars.as_str())
}

/// What a fresh principal lookup means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StillAnonymous,
    Unchanged,
    SignedOut,
    SignedIn,
    Switched,
}

pub fn classify(current: Option<&Identity>, next: Option<&Principal>) -> Transition {
    match (current, next) {
        (None, None) => Transition::StillAnonymous,
        (Some(_), None) => Transition::SignedOut,
        (None, Some(_)) => Transition::SignedIn,
        (Some(identity), Some(principal)) if identity.user_key == principal.user_key() => {
            Transition::Unchanged
        }
        (Some(_), Some(_)) => Transition::Switched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn principal(user_id: &str) -> Principal {
        Principal::from_response(&json!({
            "clientPrincipal": {"userId": user_id, "userDetails": "ada@example.com", "claims": []}
        }))
        .unwrap()
    }

    #[test]
    fn normalizes_identifiers() {
        assert_eq!(normalize_identifier("  AbC123  "), "abc123");
        assert_eq!(normalize_identifier("Ada Lovelace!!"), "ada-lovelace");
        assert_eq!(normalize_identifier("--x__y--"), "x__y");
        assert_eq!(normalize_identifier("a@@b..c"), "a-b-c");
        assert_eq!(normalize_identifier("***"), "");
    }

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_display_name("ada@example.com").as_deref(), Some("Ada"));
        assert_eq!(sanitize_display_name("  grace hopper ").as_deref(), Some("Grace"));
        assert_eq!(sanitize_display_name("@handle").as_deref(), Some("Handle"));
        assert_eq!(sanitize_display_name("o'brien").as_deref(), Some("Obrien"));
        assert_eq!(sanitize_display_name("!!!"), None);
        assert_eq!(sanitize_display_name(""), None);
    }

    #[test]
    fn parses_principal_response() {
        let raw = json!({
            "clientPrincipal": {
                "userId": "ABC-123",
                "userDetails": "ada@example.com",
                "identityProvider": "google",
                "claims": [{"typ": "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name", "val": "Ada Lovelace"}]
            }
        });
        let principal = Principal::from_response(&raw).unwrap();
        assert_eq!(principal.identity_provider.as_deref(), Some("google"));
        let identity = Identity::new(principal, "Explorer");
        assert_eq!(identity.user_key, "abc-123");
        assert_eq!(identity.display_name, "Ada");
    }

    #[test]
    fn missing_or_null_principal_is_signed_out() {
        assert!(Principal::from_response(&json!({"clientPrincipal": null})).is_none());
        assert!(Principal::from_response(&json!({})).is_none());
        assert!(Principal::from_response(&json!({"clientPrincipal": {"claims": 5}})).is_none());
        assert!(Principal::from_response(&json!({"clientPrincipal": {"userId": "  "}})).is_none());
    }

    #[test]
    fn display_name_falls_back_through_candidates() {
        let raw = json!({"clientPrincipal": {"userId": "u1", "userDetails": "!!!", "claims": [{"typ": "name", "val": "???"}]}});
        let identity = Identity::new(Principal::from_response(&raw).unwrap(), "Player");
        assert_eq!(identity.display_name, "U1");

        let raw = json!({"clientPrincipal": {"userId": "u1", "userDetails": "zoe@x.io"}});
        let identity = Identity::new(Principal::from_response(&raw).unwrap(), "Player");
        assert_eq!(identity.display_name, "Zoe");
    }

    #[test]
    fn user_key_falls_back_to_details() {
        let raw = json!({"clientPrincipal": {"userDetails": "Ada@Example.com"}});
        assert_eq!(Principal::from_response(&raw).unwrap().user_key(), "ada-example-com");
    }

    #[test]
    fn classifies_transitions() {
        let a = Identity::new(principal("a"), "Explorer");
        assert_eq!(classify(None, None), Transition::StillAnonymous);
        assert_eq!(classify(Some(&a), None), Transition::SignedOut);
        assert_eq!(classify(None, Some(&principal("a"))), Transition::SignedIn);
        assert_eq!(classify(Some(&a), Some(&principal("A"))), Transition::Unchanged);
        assert_eq!(classify(Some(&a), Some(&principal("b"))), Transition::Switched);
    }
}
