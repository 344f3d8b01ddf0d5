//! Fetching and caching of the provider's published JSON Web Key Set.
//!
//! The cache serves keys from an immutable [ResolvedKeySet] snapshot that is swapped wholesale on
//! every successful refresh. Refreshes are single-flight: one fetch at a time runs on a spawned
//! task that owns the refresh lock, and callers queued behind it reuse its outcome instead of
//! fetching again. A caller that stops waiting does not cancel the fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::AuthError;
use crate::key::{self, Curve, PublicKey};

/// Source of the raw key set document.
#[async_trait::async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Returns the body served at `jwks_url`.
    ///
    /// # Errors
    ///
    /// [AuthError::FetchTimeout] or [AuthError::FetchFailed].
    async fn fetch(&self, jwks_url: &str) -> Result<String, AuthError>;
}

/// Fetches the key set with a plain `GET` over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// [AuthError::NotConfigured] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::NotConfigured(format!("http client: {}", e)))?;
        Ok(HttpJwksFetcher { client })
    }
}

#[async_trait::async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, jwks_url: &str) -> Result<String, AuthError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                AuthError::FetchTimeout(e.to_string())
            } else {
                AuthError::FetchFailed(e.to_string())
            }
        };

        let response = self.client.get(jwks_url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::FetchFailed(format!("{} returned status {}", jwks_url, status)));
        }
        response.text().await.map_err(classify)
    }
}

/// A key as published in the set. Every field is optional so one bad entry cannot fail the set.
#[derive(Debug, Deserialize)]
struct PublishedKey {
    kty: Option<String>,
    crv: Option<String>,
    kid: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    alg: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Deserialize)]
struct JwksDocument {
    keys: Vec<Value>,
}

/// An immutable snapshot of usable keys, indexed by key id.
#[derive(Debug, Clone)]
pub struct ResolvedKeySet {
    keys: HashMap<String, Arc<PublicKey>>,
    fetched_at: Instant,
}

impl ResolvedKeySet {
    /// Parses a key set document, skipping entries that cannot be used.
    ///
    /// # Errors
    ///
    /// [AuthError::MalformedKeySet] if the body is not `{"keys": [...]}`, and
    /// [AuthError::NoUsableKeys] if no entry survives.
    pub fn parse(body: &str) -> Result<Self, AuthError> {
        let document: JwksDocument =
            serde_json::from_str(body).map_err(|e| AuthError::MalformedKeySet(e.to_string()))?;

        let mut keys = HashMap::with_capacity(document.keys.len());
        for (index, entry) in document.keys.into_iter().enumerate() {
            match resolve_entry(entry) {
                Ok((kid, key)) => {
                    if keys.contains_key(&kid) {
                        warn!(index, %kid, "duplicate key id in JWKS, keeping the first entry");
                        continue;
                    }
                    keys.insert(kid, Arc::new(key));
                }
                Err(reason) => debug!(index, %reason, "skipping published key"),
            }
        }

        if keys.is_empty() {
            return Err(AuthError::NoUsableKeys);
        }
        Ok(ResolvedKeySet {
            keys,
            fetched_at: Instant::now(),
        })
    }

    /// Looks up a key by id.
    pub fn get(&self, kid: &str) -> Option<&Arc<PublicKey>> {
        self.keys.get(kid)
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false for a parsed set; provided for completeness with [len](Self::len).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ids of every usable key.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Time since the set was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

fn resolve_entry(entry: Value) -> Result<(String, PublicKey), String> {
    let published: PublishedKey = serde_json::from_value(entry).map_err(|e| e.to_string())?;

    let kid = published
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or("missing kid")?;
    if published.kty.as_deref() != Some("EC") {
        return Err(format!("{}: unsupported kty {:?}", kid, published.kty));
    }
    if let Some(key_use) = published.key_use.as_deref().filter(|u| *u != "sig") {
        return Err(format!("{}: not a signing key (use={})", kid, key_use));
    }
    let crv = published.crv.ok_or_else(|| format!("{}: missing crv", kid))?;
    let curve = Curve::from_name(&crv).map_err(|e| format!("{}: {}", kid, e))?;
    if let Some(alg) = published.alg.as_deref() {
        let expected = format!("{:?}", curve.algorithm());
        if alg != expected {
            return Err(format!("{}: alg {} does not match {}", kid, alg, crv));
        }
    }
    let x = published.x.ok_or_else(|| format!("{}: missing x", kid))?;
    let y = published.y.ok_or_else(|| format!("{}: missing y", kid))?;

    let key = key::resolve(&crv, &x, &y).map_err(|e| format!("{}: {}", kid, e))?;
    Ok((kid, key))
}

/// Lifecycle of the cache as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing fetched yet
    Empty,
    /// A set younger than the TTL is cached
    Fresh,
    /// The cached set is older than the TTL and will be refreshed on next use
    Stale,
    /// The last refresh failed; `serving_previous` tells whether an older set is still served
    Failed {
        /// Whether a previously fetched set continues to serve lookups
        serving_previous: bool,
    },
}

#[derive(Default)]
struct CacheState {
    current: Option<Arc<ResolvedKeySet>>,
    attempts: u64,
    last_error: Option<AuthError>,
}

/// What a refresh left behind: the set now being served, and the error if the refresh failed.
struct Refreshed {
    set: Option<Arc<ResolvedKeySet>>,
    error: Option<AuthError>,
}

impl Refreshed {
    /// The served set, or why there is none. No set and no error means the cache was
    /// invalidated after the refresh completed, which is worth retrying.
    fn into_result(self) -> Result<Arc<ResolvedKeySet>, AuthError> {
        match (self.error, self.set) {
            (Some(e), _) => Err(e),
            (None, Some(set)) => Ok(set),
            (None, None) => Err(AuthError::FetchFailed(
                "key set invalidated during refresh".into(),
            )),
        }
    }
}

impl CacheState {
    fn outcome(&self) -> Refreshed {
        Refreshed {
            set: self.current.clone(),
            error: self.last_error.clone(),
        }
    }
}

struct Shared {
    jwks_url: String,
    fetcher: Arc<dyn JwksFetcher>,
    fetch_timeout: Duration,
    state: RwLock<CacheState>,
}

impl Shared {
    async fn fetch_and_store(&self) -> Refreshed {
        info!(jwks_url = %self.jwks_url, "fetching JWKS");
        let fetch = self.fetcher.fetch(&self.jwks_url);
        let result = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(body)) => ResolvedKeySet::parse(&body),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AuthError::FetchTimeout(format!(
                "{} did not answer within {:?}",
                self.jwks_url, self.fetch_timeout
            ))),
        };

        let mut state = self.state.write().await;
        state.attempts += 1;
        match result {
            Ok(set) => {
                info!(jwks_url = %self.jwks_url, key_count = set.len(), "JWKS refreshed");
                state.current = Some(Arc::new(set));
                state.last_error = None;
            }
            Err(e) => {
                if state.current.is_some() {
                    warn!(
                        jwks_url = %self.jwks_url,
                        error = %e,
                        "JWKS refresh failed, serving previous key set"
                    );
                } else {
                    error!(
                        jwks_url = %self.jwks_url,
                        error = %e,
                        "JWKS fetch failed with no cached key set"
                    );
                }
                state.last_error = Some(e);
            }
        }
        state.outcome()
    }
}

/// Caches the provider's key set and resolves keys by id.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct JwksCache {
    shared: Arc<Shared>,
    refresh_lock: Arc<Mutex<()>>,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
}

impl JwksCache {
    /// Creates an empty cache for `jwks_url`. Nothing is fetched until the first lookup.
    pub fn new(
        jwks_url: impl Into<String>,
        fetcher: Arc<dyn JwksFetcher>,
        cache_ttl: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        JwksCache {
            shared: Arc::new(Shared {
                jwks_url: jwks_url.into(),
                fetcher,
                fetch_timeout,
                state: RwLock::new(CacheState::default()),
            }),
            refresh_lock: Arc::new(Mutex::new(())),
            cache_ttl,
            min_refresh_interval: Duration::ZERO,
        }
    }

    /// Sets how old a fresh set must be before an unknown key id may trigger a refresh.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// The endpoint the key set is fetched from.
    pub fn jwks_url(&self) -> &str {
        &self.shared.jwks_url
    }

    /// Resolves the key with id `kid`, refreshing the set when it is missing, stale, or lacks `kid`.
    ///
    /// At most one refresh is attempted per call. While a refresh is running, a stale set that
    /// contains `kid` is served without waiting.
    ///
    /// # Errors
    ///
    /// [AuthError::UnknownKeyId] if `kid` is absent after the refresh; otherwise the refresh's
    /// error when no cached set can answer.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<PublicKey>, AuthError> {
        let (current, observed) = self.snapshot().await;

        let refreshed = match current {
            Some(set) if self.is_fresh(&set) => {
                if let Some(key) = set.get(kid) {
                    debug!(kid, "JWKS cache hit");
                    return Ok(Arc::clone(key));
                }
                if set.age() < self.min_refresh_interval {
                    debug!(kid, "unknown key id, key set too young to refresh");
                    return Err(AuthError::UnknownKeyId(kid.to_owned()));
                }
                debug!(kid, "unknown key id, refreshing JWKS");
                self.refresh_after(observed).await
            }
            Some(set) => match set.get(kid) {
                Some(key) => match Arc::clone(&self.refresh_lock).try_lock_owned() {
                    Ok(guard) => self.refresh_locked(guard, observed).await,
                    Err(_) => {
                        debug!(kid, "serving stale key while JWKS refresh is in flight");
                        return Ok(Arc::clone(key));
                    }
                },
                None => self.refresh_after(observed).await,
            },
            None => self.refresh_after(observed).await,
        };

        if let Some(key) = refreshed.set.as_ref().and_then(|set| set.get(kid)) {
            return Ok(Arc::clone(key));
        }
        refreshed.into_result()?;
        Err(AuthError::UnknownKeyId(kid.to_owned()))
    }

    /// Fetches the key set now, unless a refresh completed while waiting for the lock.
    ///
    /// # Errors
    ///
    /// The fetch or parse error. The previously cached set, if any, keeps serving.
    pub async fn refresh(&self) -> Result<Arc<ResolvedKeySet>, AuthError> {
        let (_, observed) = self.snapshot().await;
        self.refresh_after(observed).await.into_result()
    }

    /// Reports where the cache is in its lifecycle.
    pub async fn status(&self) -> CacheStatus {
        let state = self.shared.state.read().await;
        match (&state.current, &state.last_error) {
            (current, Some(_)) => CacheStatus::Failed {
                serving_previous: current.is_some(),
            },
            (None, None) => CacheStatus::Empty,
            (Some(set), None) if self.is_fresh(set) => CacheStatus::Fresh,
            (Some(_), None) => CacheStatus::Stale,
        }
    }

    /// Drops the cached set so the next lookup fetches again.
    pub async fn invalidate(&self) {
        let mut state = self.shared.state.write().await;
        state.current = None;
        state.last_error = None;
        debug!(jwks_url = %self.shared.jwks_url, "JWKS cache invalidated");
    }

    async fn snapshot(&self) -> (Option<Arc<ResolvedKeySet>>, u64) {
        let state = self.shared.state.read().await;
        (state.current.clone(), state.attempts)
    }

    fn is_fresh(&self, set: &ResolvedKeySet) -> bool {
        set.age() < self.cache_ttl
    }

    async fn refresh_after(&self, observed: u64) -> Refreshed {
        let guard = Arc::clone(&self.refresh_lock).lock_owned().await;
        self.refresh_locked(guard, observed).await
    }

    /// Runs a refresh while holding `guard`, or reuses the outcome of one that finished after
    /// the caller took its snapshot at attempt `observed`.
    async fn refresh_locked(&self, guard: OwnedMutexGuard<()>, observed: u64) -> Refreshed {
        {
            let state = self.shared.state.read().await;
            if state.attempts != observed {
                return state.outcome();
            }
        }

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let _guard = guard;
            shared.fetch_and_store().await
        });
        match task.await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                let state = self.shared.state.read().await;
                Refreshed {
                    set: state.current.clone(),
                    error: Some(AuthError::FetchFailed(format!("refresh task aborted: {}", e))),
                }
            }
        }
    }
}
