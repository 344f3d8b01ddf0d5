use std::sync::Arc;

use jsonwebtoken as jwt;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::claims::{self, RawClaims, TokenClaims};
use crate::config::VerifierConfig;
use crate::error::AuthError;
use crate::jwks::{HttpJwksFetcher, JwksCache, JwksFetcher};

/// TokenVerifier is the main entry point. Create one per identity provider with
/// [TokenVerifier::new] and share it across request handlers.
pub struct TokenVerifier {
    keys: Option<JwksCache>,
    validation: jwt::Validation,
    algorithm: jwt::Algorithm,
    default_provider: String,
}

impl TokenVerifier {
    /// Creates a verifier that fetches keys over HTTP from the configured endpoint.
    ///
    /// A config without an endpoint still builds; every [verify](Self::verify) then fails with
    /// [AuthError::NotConfigured].
    ///
    /// # Errors
    ///
    /// [AuthError::NotConfigured] if the HTTP client cannot be built.
    pub fn new(config: VerifierConfig) -> Result<Self, AuthError> {
        let fetcher: Option<Arc<dyn JwksFetcher>> = match config.jwks_endpoint() {
            Some(_) => Some(Arc::new(HttpJwksFetcher::new(config.fetch_timeout())?)),
            None => None,
        };
        Ok(Self::build(config, fetcher))
    }

    /// Creates a verifier that gets the key set from `fetcher` instead of HTTP.
    pub fn with_fetcher(config: VerifierConfig, fetcher: Arc<dyn JwksFetcher>) -> Self {
        Self::build(config, Some(fetcher))
    }

    fn build(config: VerifierConfig, fetcher: Option<Arc<dyn JwksFetcher>>) -> Self {
        let keys = config.jwks_endpoint().zip(fetcher).map(|(url, fetcher)| {
            JwksCache::new(url, fetcher, config.cache_ttl(), config.fetch_timeout())
                .with_min_refresh_interval(config.min_refresh_interval())
        });

        let mut validation = jwt::Validation::new(config.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
            validation.required_spec_claims.insert("iss".into());
        }
        if !config.audience.is_empty() {
            validation.set_audience(&config.audience);
            validation.required_spec_claims.insert("aud".into());
        }

        TokenVerifier {
            keys,
            validation,
            algorithm: config.algorithm,
            default_provider: config.default_provider,
        }
    }

    /// The key cache backing this verifier, if an endpoint is configured.
    pub fn key_cache(&self) -> Option<&JwksCache> {
        self.keys.as_ref()
    }

    /// Verifies a compact-serialized JWT and returns the caller's normalized claims.
    ///
    /// The header's `alg` must be the configured algorithm and its `kid` must name a key in the
    /// provider's key set (refreshed once if missing). The signature is checked before `exp`,
    /// `nbf`, `iss` and `aud`, and `sub` must be a non-empty string. A configured issuer or
    /// audience makes the matching claim mandatory.
    ///
    /// Because the signature is checked first, a forged token reports
    /// [AuthError::InvalidSignature] even when it is also expired. Only a validly signed token
    /// can report [AuthError::TokenExpired].
    ///
    /// ```rust,no_run
    /// use jwks_verifier::{TokenVerifier, VerifierConfig};
    ///
    /// # async fn run() -> Result<(), jwks_verifier::AuthError> {
    /// let verifier = TokenVerifier::new(VerifierConfig::with_base_url("https://abcd.example.co"))?;
    ///
    /// match verifier.verify("eyJ...").await {
    ///     Ok(claims) => println!("authenticated user_id=<{}>", claims.user_id),
    ///     Err(err) => println!("auth error: {:?}", err),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Any [AuthError]. Only [AuthError::is_retryable] errors are worth retrying.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let result = self.verify_inner(token).await;
        match &result {
            Ok(claims) => {
                debug!(user_id = %claims.user_id, provider = %claims.provider, "token verified")
            }
            Err(err) => debug!(kind = err.kind(), error = %err, "token rejected"),
        }
        result
    }

    /// Like [verify](Self::verify), for an `Authorization` header value of the form `Bearer <token>`.
    ///
    /// # Errors
    ///
    /// [AuthError::MalformedToken] if the scheme is not `Bearer`, otherwise as [verify](Self::verify).
    pub async fn verify_bearer(&self, header_value: &str) -> Result<TokenClaims, AuthError> {
        let header_value = header_value.trim();
        match header_value.split_once(' ') {
            Some((scheme, token))
                if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
            {
                self.verify(token.trim()).await
            }
            _ => Err(AuthError::MalformedToken("expected `Bearer <token>`".into())),
        }
    }

    async fn verify_inner(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| AuthError::NotConfigured("no JWKS endpoint or base URL".into()))?;

        let header =
            jwt::decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        if header.alg != self.algorithm {
            return Err(AuthError::UnexpectedAlgorithm(format!("{:?}", header.alg)));
        }
        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("missing kid in header".into()))?;

        let key = keys.get_key(&kid).await?;
        if key.algorithm() != header.alg {
            return Err(AuthError::UnexpectedAlgorithm(format!(
                "{:?} with a {} key",
                header.alg,
                key.curve().name()
            )));
        }

        let data = jwt::decode::<RawClaims>(token, key.decoding_key(), &self.validation)?;
        self.check_claim_types(&data.claims)?;

        let mut claims = claims::extract(&data.claims);
        if claims.user_id.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        if claims.provider.is_empty() {
            claims.provider = self.default_provider.clone();
        }
        Ok(claims)
    }

    /// `jsonwebtoken` only compares `iss` and `aud` values it can parse, so a configured check
    /// must also reject a claim of the wrong JSON type.
    fn check_claim_types(&self, raw: &RawClaims) -> Result<(), AuthError> {
        if self.validation.iss.is_some() && !raw.get("iss").map_or(false, Value::is_string) {
            return Err(AuthError::InvalidClaim("`iss` is not a string".into()));
        }
        if self.validation.aud.is_some() {
            let valid = match raw.get("aud") {
                Some(Value::String(_)) => true,
                Some(Value::Array(values)) => {
                    !values.is_empty() && values.iter().all(Value::is_string)
                }
                _ => false,
            };
            if !valid {
                return Err(AuthError::InvalidClaim(
                    "`aud` is not a string or array of strings".into(),
                ));
            }
        }
        Ok(())
    }
}
