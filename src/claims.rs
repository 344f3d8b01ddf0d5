//! Normalizing identity claims out of a verified token payload.
//!
//! Provider payloads are heterogeneous JSON, so every field is read through a chain of extractors
//! tried in order. An extractor returns `None` for anything absent, empty, or of the wrong type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The decoded token payload: claim name to JSON value.
pub type RawClaims = Map<String, Value>;

/// Role reported when a token carries none.
pub const DEFAULT_ROLE: &str = "user";

const APP_METADATA: &str = "app_metadata";
const USER_METADATA: &str = "user_metadata";

/// Normalized identity of the caller of a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The token's `sub`
    pub user_id: String,
    /// The token's `role`, or [DEFAULT_ROLE]
    pub role: String,
    /// Email address, empty when unknown
    pub email: String,
    /// Lower-cased sign-in provider, e.g. `google`
    pub provider: String,
    /// Display name
    pub name: Option<String>,
    /// Avatar URL
    pub icon_url: Option<String>,
    /// Self-reported gender
    pub gender: Option<String>,
}

type Extractor = fn(&RawClaims) -> Option<String>;

const ROLE: &[Extractor] = &[role];
const PROVIDER: &[Extractor] = &[app_provider, user_provider, first_app_provider];
const EMAIL: &[Extractor] = &[email, user_email];
const NAME: &[Extractor] = &[user_full_name, user_name];
const ICON_URL: &[Extractor] = &[user_avatar_url, user_picture];
const GENDER: &[Extractor] = &[user_gender];

fn role(raw: &RawClaims) -> Option<String> {
    top_level(raw, "role")
}

fn app_provider(raw: &RawClaims) -> Option<String> {
    nested(raw, APP_METADATA, "provider").map(normalize_provider)
}

fn user_provider(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "provider").map(normalize_provider)
}

fn first_app_provider(raw: &RawClaims) -> Option<String> {
    first_in_array(raw, APP_METADATA, "providers").map(normalize_provider)
}

fn email(raw: &RawClaims) -> Option<String> {
    top_level(raw, "email")
}

fn user_email(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "email")
}

fn user_full_name(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "full_name")
}

fn user_name(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "name")
}

fn user_avatar_url(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "avatar_url")
}

fn user_picture(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "picture")
}

fn user_gender(raw: &RawClaims) -> Option<String> {
    nested(raw, USER_METADATA, "gender")
}

/// Builds [TokenClaims] from a payload. Never fails.
///
/// `user_id` is empty when `sub` is missing and `provider` is empty when no candidate is present;
/// the caller decides what either means.
pub fn extract(raw: &RawClaims) -> TokenClaims {
    TokenClaims {
        user_id: subject(raw).unwrap_or_default(),
        role: first_non_empty(ROLE, raw).unwrap_or_else(|| DEFAULT_ROLE.to_owned()),
        email: first_non_empty(EMAIL, raw).unwrap_or_default(),
        provider: first_non_empty(PROVIDER, raw).unwrap_or_default(),
        name: first_non_empty(NAME, raw),
        icon_url: first_non_empty(ICON_URL, raw),
        gender: first_non_empty(GENDER, raw),
    }
}

/// The `sub` claim, if it is a non-empty string.
pub fn subject(raw: &RawClaims) -> Option<String> {
    top_level(raw, "sub")
}

fn first_non_empty(chain: &[Extractor], raw: &RawClaims) -> Option<String> {
    chain
        .iter()
        .filter_map(|extract| extract(raw))
        .find(|value| !value.is_empty())
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_owned())
}

fn top_level(raw: &RawClaims, claim: &str) -> Option<String> {
    non_empty_str(raw.get(claim))
}

fn nested(raw: &RawClaims, object: &str, field: &str) -> Option<String> {
    non_empty_str(raw.get(object)?.as_object()?.get(field))
}

fn first_in_array(raw: &RawClaims, object: &str, field: &str) -> Option<String> {
    non_empty_str(raw.get(object)?.get(field)?.as_array()?.first())
}

fn normalize_provider(provider: String) -> String {
    provider.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawClaims {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn applies_defaults() {
        let claims = extract(&raw(json!({ "sub": "user-123", "exp": 2000000000 })));
        assert_eq!(
            claims,
            TokenClaims {
                user_id: "user-123".into(),
                role: "user".into(),
                email: String::new(),
                provider: String::new(),
                name: None,
                icon_url: None,
                gender: None,
            }
        );
    }

    #[test]
    fn app_metadata_provider_wins() {
        let claims = extract(&raw(json!({
            "sub": "u",
            "app_metadata": { "provider": "google", "providers": ["email"] },
            "user_metadata": { "provider": "github" },
        })));
        assert_eq!(claims.provider, "google");
    }

    #[test]
    fn falls_back_to_user_metadata_then_providers_array() {
        let claims = extract(&raw(json!({
            "sub": "u",
            "app_metadata": { "provider": "  " },
            "user_metadata": { "provider": "GitHub " },
        })));
        assert_eq!(claims.provider, "github");

        let claims = extract(&raw(json!({
            "sub": "u",
            "app_metadata": { "providers": ["apple", "google"] },
        })));
        assert_eq!(claims.provider, "apple");
    }

    #[test]
    fn tolerates_wrong_types() {
        let claims = extract(&raw(json!({
            "sub": 42,
            "role": ["admin"],
            "email": null,
            "app_metadata": "google",
            "user_metadata": { "provider": 7, "full_name": { "first": "Ada" }, "name": "Ada" },
        })));
        assert_eq!(claims.user_id, "");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.email, "");
        assert_eq!(claims.provider, "");
        assert_eq!(claims.name.as_deref(), Some("Ada"));

        let claims = extract(&raw(json!({
            "sub": "u",
            "app_metadata": { "providers": [true, "google"] },
        })));
        assert_eq!(claims.provider, "");
    }

    #[test]
    fn reads_profile_fields() {
        let claims = extract(&raw(json!({
            "sub": "u",
            "role": "authenticated",
            "user_metadata": {
                "email": "meta@example.com",
                "name": "Ada L",
                "full_name": "Ada Lovelace",
                "picture": "https://cdn.example.com/p.png",
                "gender": "female",
            },
        })));
        assert_eq!(claims.role, "authenticated");
        assert_eq!(claims.email, "meta@example.com");
        assert_eq!(claims.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(claims.icon_url.as_deref(), Some("https://cdn.example.com/p.png"));
        assert_eq!(claims.gender.as_deref(), Some("female"));
    }

    #[test]
    fn top_level_email_preferred() {
        let claims = extract(&raw(json!({
            "sub": "u",
            "email": "top@example.com",
            "user_metadata": { "email": "meta@example.com" },
        })));
        assert_eq!(claims.email, "top@example.com");
    }
}
