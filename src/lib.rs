#![warn(missing_docs)]
//!
//! This crate verifies bearer tokens issued by a third-party identity provider. It fetches and caches the provider's published [JSON Web Key Set](https://datatracker.ietf.org/doc/html/rfc7517#section-5), resolves the key named by a token's `kid`, checks the signature and temporal claims, and hands back a normalized [TokenClaims].
//!
//! The verifier never mints tokens and never mutates the key material it fetches. Only ES256 over P-256 keys is supported.
//!
//! ## Usage
//!
//! Add `jwks-verifier` to your dependencies in your project's Cargo.toml.
//!
//! ```toml
//! [dependencies]
//! jwks-verifier = "0.1"
//! ```
//!
//! Build one [TokenVerifier] at startup and share it between request handlers. All [AuthError] variants should reach clients as a plain "unauthorized"; the distinction is for your logs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jwks_verifier::{AuthError, TokenVerifier, VerifierConfig};
//!
//! # async fn run(authorization: &str) -> Result<(), AuthError> {
//! let verifier = Arc::new(TokenVerifier::new(VerifierConfig::from_env()?)?);
//!
//! match verifier.verify_bearer(authorization).await {
//!     Ok(claims) => println!("user_id=<{}> provider=<{}>", claims.user_id, claims.provider),
//!     Err(err) if err.is_retryable() => println!("key set unavailable: {}", err),
//!     Err(err) => println!("auth error: {:?}", err),
//! }
//! # Ok(())
//! # }
//! ```
//!
pub mod claims;
mod config;
mod error;
pub mod jwks;
pub mod key;
mod verifier;

#[cfg(test)]
mod test_support;

pub use claims::{RawClaims, TokenClaims};
pub use config::VerifierConfig;
pub use error::AuthError;
pub use jwks::{CacheStatus, HttpJwksFetcher, JwksCache, JwksFetcher, ResolvedKeySet};
pub use key::{Curve, PublicKey};
pub use verifier::TokenVerifier;
