//! Signing keys, tokens and fake fetchers shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::ecdsa::SigningKey;
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};

use crate::error::AuthError;
use crate::jwks::JwksFetcher;

pub(crate) struct TestKey {
    pub(crate) kid: String,
    signing_key: SigningKey,
}

impl TestKey {
    pub(crate) fn generate(kid: &str) -> Self {
        TestKey {
            kid: kid.to_owned(),
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    pub(crate) fn sec1_bytes(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub(crate) fn coordinates(&self) -> (String, String) {
        let sec1 = self.sec1_bytes();
        (
            URL_SAFE_NO_PAD.encode(&sec1[1..33]),
            URL_SAFE_NO_PAD.encode(&sec1[33..65]),
        )
    }

    pub(crate) fn jwk(&self) -> Value {
        let (x, y) = self.coordinates();
        json!({
            "kty": "EC",
            "crv": "P-256",
            "use": "sig",
            "alg": "ES256",
            "kid": self.kid,
            "x": x,
            "y": y,
        })
    }

    pub(crate) fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    pub(crate) fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        let der = self.signing_key.to_pkcs8_der().unwrap();
        let key = EncodingKey::from_ec_der(der.as_bytes());
        encode(header, claims, &key).unwrap()
    }
}

pub(crate) fn jwks_document(keys: &[&TestKey]) -> String {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() }).to_string()
}

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Serves a fixed (replaceable) body, counting fetches and optionally sleeping first.
pub(crate) struct FakeFetcher {
    body: Mutex<Result<String, AuthError>>,
    delay: Duration,
    count: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn new(body: String) -> Self {
        FakeFetcher {
            body: Mutex::new(Ok(body)),
            delay: Duration::ZERO,
            count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(err: AuthError) -> Self {
        FakeFetcher {
            body: Mutex::new(Err(err)),
            delay: Duration::ZERO,
            count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_body(&self, body: String) {
        *self.body.lock().unwrap() = Ok(body);
    }

    pub(crate) fn set_error(&self, err: AuthError) {
        *self.body.lock().unwrap() = Err(err);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl JwksFetcher for FakeFetcher {
    async fn fetch(&self, _jwks_url: &str) -> Result<String, AuthError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.body.lock().unwrap().clone()
    }
}
