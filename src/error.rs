use jsonwebtoken::errors::{Error as JwtError, ErrorKind};

/// The error type for everything that can go wrong while verifying a bearer token.
///
/// Variants keep the failure kinds apart so they can be logged and counted server-side.
/// Callers facing clients should collapse all of them into a single "unauthorized" response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No JWKS endpoint or provider base URL is configured, or the configuration could not be read
    #[error("verifier not configured: {0}")]
    NotConfigured(String),

    /// The JWKS endpoint did not answer within the configured timeout. Retryable.
    #[error("JWKS fetch timed out: {0}")]
    FetchTimeout(String),

    /// The JWKS endpoint could not be reached or answered with an error status. Retryable.
    #[error("JWKS fetch failed: {0}")]
    FetchFailed(String),

    /// The published key set is not a JSON document with a `keys` array
    #[error("malformed key set: {0}")]
    MalformedKeySet(String),

    /// A published key declares a curve this verifier does not support
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// A key coordinate is absent, not base64url, or too long for the curve
    #[error("malformed coordinate: {0}")]
    MalformedCoordinate(String),

    /// The published coordinates do not describe a point on the declared curve
    #[error("point is not on the curve")]
    PointNotOnCurve,

    /// The key set parsed but none of its entries could be used
    #[error("key set contains no usable keys")]
    NoUsableKeys,

    /// The token's `kid` is not in the key set, even after a refresh
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// The token is not a decodable compact JWT, or its header lacks a `kid`
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token header declares an algorithm other than the expected one
    #[error("unexpected algorithm: {0}")]
    UnexpectedAlgorithm(String),

    /// The signature does not match the resolved key
    #[error("invalid signature")]
    InvalidSignature,

    /// The `exp` claim is in the past
    #[error("token expired")]
    TokenExpired,

    /// The `nbf` claim is in the future
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// A required or configured claim (`exp`, `iss`, `aud`) is missing or does not match
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    /// The `sub` claim is missing, empty, or not a string
    #[error("missing subject")]
    MissingSubject,
}

impl AuthError {
    /// Whether retrying the same request later may succeed. Only network-layer failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::FetchTimeout(_) | AuthError::FetchFailed(_))
    }

    /// A stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::NotConfigured(_) => "not_configured",
            AuthError::FetchTimeout(_) => "fetch_timeout",
            AuthError::FetchFailed(_) => "fetch_failed",
            AuthError::MalformedKeySet(_) => "malformed_key_set",
            AuthError::UnsupportedCurve(_) => "unsupported_curve",
            AuthError::MalformedCoordinate(_) => "malformed_coordinate",
            AuthError::PointNotOnCurve => "point_not_on_curve",
            AuthError::NoUsableKeys => "no_usable_keys",
            AuthError::UnknownKeyId(_) => "unknown_key_id",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnexpectedAlgorithm(_) => "unexpected_algorithm",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::InvalidClaim(_) => "invalid_claim",
            AuthError::MissingSubject => "missing_subject",
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidAlgorithm => AuthError::UnexpectedAlgorithm(err.to_string()),
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::InvalidClaim(format!("missing required claim `{}`", claim))
            }
            ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience | ErrorKind::InvalidSubject => {
                AuthError::InvalidClaim(err.to_string())
            }
            _ => AuthError::MalformedToken(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(AuthError::FetchTimeout("10s".into()).is_retryable());
        assert!(AuthError::FetchFailed("refused".into()).is_retryable());
        assert!(!AuthError::InvalidSignature.is_retryable());
        assert!(!AuthError::NoUsableKeys.is_retryable());
        assert!(!AuthError::UnknownKeyId("kid-9".into()).is_retryable());
    }

    #[test]
    fn maps_jwt_errors_by_kind() {
        assert_eq!(
            AuthError::from(JwtError::from(ErrorKind::ExpiredSignature)),
            AuthError::TokenExpired
        );
        assert_eq!(
            AuthError::from(JwtError::from(ErrorKind::InvalidSignature)),
            AuthError::InvalidSignature
        );
        assert_eq!(
            AuthError::from(JwtError::from(ErrorKind::ImmatureSignature)),
            AuthError::TokenNotYetValid
        );
        match AuthError::from(JwtError::from(ErrorKind::MissingRequiredClaim("exp".into()))) {
            AuthError::InvalidClaim(msg) => assert!(msg.contains("exp")),
            other => panic!("unexpected mapping: {:?}", other),
        }
        assert_eq!(
            AuthError::from(JwtError::from(ErrorKind::InvalidToken)).kind(),
            "malformed_token"
        );
    }
}
