use std::env;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::Deserialize;

use crate::error::AuthError;

/// Settings for a [TokenVerifier](crate::TokenVerifier).
///
/// Every field has a default, so it can be embedded in a larger service config and deserialized
/// with only the provider's `base_url` (or an explicit `jwks_url`) filled in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Provider base URL. The key set is fetched from `base_url` + `jwks_path`.
    pub base_url: Option<String>,
    /// Path of the key set below `base_url`.
    pub jwks_path: String,
    /// Explicit key set URL. Takes precedence over `base_url`.
    pub jwks_url: Option<String>,
    /// The only signing algorithm accepted in token headers.
    pub algorithm: Algorithm,
    /// Required `iss` value, if any.
    pub issuer: Option<String>,
    /// Accepted `aud` values. Empty disables the audience check.
    pub audience: Vec<String>,
    /// Clock skew tolerated on `exp` and `nbf`.
    pub leeway_secs: u64,
    /// How long a fetched key set is considered fresh.
    pub cache_ttl_secs: u64,
    /// Upper bound on a single key set fetch.
    pub fetch_timeout_secs: u64,
    /// Minimum age of a key set before an unknown `kid` may trigger a refresh.
    pub min_refresh_interval_secs: u64,
    /// Provider reported when a token names none.
    pub default_provider: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            base_url: None,
            jwks_path: String::from("/auth/v1/.well-known/jwks.json"),
            jwks_url: None,
            algorithm: Algorithm::ES256,
            issuer: None,
            audience: Vec::new(),
            leeway_secs: 0,
            cache_ttl_secs: 600,
            fetch_timeout_secs: 10,
            min_refresh_interval_secs: 0,
            default_provider: String::from("oauth"),
        }
    }
}

impl VerifierConfig {
    /// Creates a config pointing at the provider's `base_url`, everything else defaulted.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        VerifierConfig {
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    /// Reads the config from `AUTH_*` environment variables, falling back to defaults.
    ///
    /// Recognized: `AUTH_BASE_URL`, `AUTH_JWKS_URL`, `AUTH_ISSUER`, `AUTH_AUDIENCE` (comma
    /// separated), `AUTH_LEEWAY_SECS`, `AUTH_JWKS_CACHE_TTL_SECS`, `AUTH_JWKS_FETCH_TIMEOUT_SECS`,
    /// `AUTH_JWKS_MIN_REFRESH_SECS` and `AUTH_DEFAULT_PROVIDER`.
    ///
    /// # Errors
    ///
    /// [AuthError::NotConfigured] if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let secs = |name: &str, default: u64| -> Result<u64, AuthError> {
            match var(name) {
                Some(raw) => u64::from_str(&raw)
                    .map_err(|e| AuthError::NotConfigured(format!("{}={:?}: {}", name, raw, e))),
                None => Ok(default),
            }
        };

        let defaults = VerifierConfig::default();
        Ok(VerifierConfig {
            base_url: var("AUTH_BASE_URL"),
            jwks_url: var("AUTH_JWKS_URL"),
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|aud| !aud.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            leeway_secs: secs("AUTH_LEEWAY_SECS", defaults.leeway_secs)?,
            cache_ttl_secs: secs("AUTH_JWKS_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            fetch_timeout_secs: secs("AUTH_JWKS_FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs)?,
            min_refresh_interval_secs: secs(
                "AUTH_JWKS_MIN_REFRESH_SECS",
                defaults.min_refresh_interval_secs,
            )?,
            default_provider: var("AUTH_DEFAULT_PROVIDER")
                .unwrap_or_else(|| defaults.default_provider.clone()),
            ..defaults
        })
    }

    /// The key set URL, or `None` when neither `jwks_url` nor `base_url` is set.
    pub fn jwks_endpoint(&self) -> Option<String> {
        if let Some(url) = self.jwks_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.trim().to_owned());
        }
        let base = self.base_url.as_deref()?.trim().trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        let path = self.jwks_path.trim();
        if path.starts_with('/') {
            Some(format!("{}{}", base, path))
        } else {
            Some(format!("{}/{}", base, path))
        }
    }

    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub(crate) fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub(crate) fn min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.min_refresh_interval_secs)
    }
}
