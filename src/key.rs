//! Turns a published JWK's curve name and coordinates into a key that can verify signatures.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebkey as jwk;
use jsonwebtoken as jwt;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::AuthError;

/// Elliptic curves a published key may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256, used with ES256
    P256,
}

impl Curve {
    /// Parses a JWK `crv` value.
    ///
    /// # Errors
    ///
    /// [AuthError::UnsupportedCurve] for anything but `P-256`.
    pub fn from_name(name: &str) -> Result<Self, AuthError> {
        match name {
            "P-256" => Ok(Curve::P256),
            other => Err(AuthError::UnsupportedCurve(other.to_owned())),
        }
    }

    /// The JWK `crv` name.
    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
        }
    }

    /// Size in bytes of one coordinate.
    pub fn field_size(self) -> usize {
        match self {
            Curve::P256 => 32,
        }
    }

    /// The signature algorithm keys on this curve are used with.
    pub fn algorithm(self) -> jwt::Algorithm {
        match self {
            Curve::P256 => jwt::Algorithm::ES256,
        }
    }
}

/// A validated public key, ready to check token signatures.
#[derive(Clone)]
pub struct PublicKey {
    curve: Curve,
    point: p256::PublicKey,
    decoding_key: jwt::DecodingKey,
}

impl PublicKey {
    /// The curve the key lives on.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// The only algorithm this key verifies.
    pub fn algorithm(&self) -> jwt::Algorithm {
        self.curve.algorithm()
    }

    /// Uncompressed SEC1 encoding of the point.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.point.to_encoded_point(false).as_bytes().to_vec()
    }

    pub(crate) fn decoding_key(&self) -> &jwt::DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("curve", &self.curve.name())
            .field("sec1", &URL_SAFE_NO_PAD.encode(self.to_sec1_bytes()))
            .finish()
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.curve == other.curve && self.point == other.point
    }
}

/// Resolves a published key from its `crv` name and base64url-encoded big-endian coordinates.
///
/// Short coordinates are left-padded with zero bytes to the curve's field size, and the point is
/// checked against the curve equation so an attacker-chosen off-curve point is never used.
///
/// # Errors
///
/// [AuthError::UnsupportedCurve], [AuthError::MalformedCoordinate] or [AuthError::PointNotOnCurve].
pub fn resolve(curve: &str, x_b64: &str, y_b64: &str) -> Result<PublicKey, AuthError> {
    let curve = Curve::from_name(curve)?;
    let x = decode_coordinate("x", x_b64, curve.field_size())?;
    let y = decode_coordinate("y", y_b64, curve.field_size())?;

    let mut sec1 = Vec::with_capacity(1 + 2 * curve.field_size());
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);
    let point = p256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| AuthError::PointNotOnCurve)?;

    let mut key = jwk::JsonWebKey::new(jwk::Key::EC {
        curve: jwk::Curve::P256 {
            d: None,
            x: jwk::ByteArray::from_slice(&x),
            y: jwk::ByteArray::from_slice(&y),
        },
    });
    key.algorithm = Some(jwk::Algorithm::ES256);

    Ok(PublicKey {
        curve,
        point,
        decoding_key: key.key.to_decoding_key(),
    })
}

fn decode_coordinate(name: &str, encoded: &str, size: usize) -> Result<Vec<u8>, AuthError> {
    let trimmed = encoded.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(AuthError::MalformedCoordinate(format!("`{}` is empty", name)));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| AuthError::MalformedCoordinate(format!("`{}`: {}", name, e)))?;
    if bytes.len() > size {
        return Err(AuthError::MalformedCoordinate(format!(
            "`{}` is {} bytes, expected at most {}",
            name,
            bytes.len(),
            size
        )));
    }

    let mut padded = vec![0u8; size - bytes.len()];
    padded.extend_from_slice(&bytes);
    Ok(padded)
}
