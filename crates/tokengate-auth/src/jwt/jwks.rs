//! Key set sources and the refreshable key set store
//!
//! [`KeySetStore`] owns the current [`KeySet`] snapshot. Readers take an
//! `Arc<KeySet>` without locking; a refresh fetches a complete new set from its
//! [`KeySetSource`] and swaps it in atomically, so a reader sees either the old
//! set or the new one, never a mix.
//!
//! Refreshes happen:
//!
//! - in the background once the snapshot is older than
//!   [`RefreshPolicy::refresh_interval`] (see [`KeySetStore::spawn_refresh_task`]);
//! - on demand after a token names an unknown `kid`, at most once per
//!   [`RefreshPolicy::min_refresh_interval`].
//!
//! Only one fetch runs at a time. A failed fetch keeps the previous snapshot.
//!
//! # Security Considerations
//!
//! - HTTPS required for JWKS endpoints (HTTP only for loopback hosts)
//! - Rate limiting stops unknown `kid`s from hammering the provider

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::keys::{KeySet, parse_jwk_set};
use crate::error::JwksError;

/// Shortest pause of the background refresh loop
const MIN_BACKGROUND_WAIT: Duration = Duration::from_secs(1);

/// Where key sets come from
#[async_trait]
pub trait KeySetSource: Send + Sync + std::fmt::Debug {
    /// Fetch the provider's current key set
    async fn fetch(&self) -> Result<JwkSet, JwksError>;

    /// Human-readable location, for logs
    fn location(&self) -> &str;
}

/// Key set served over HTTP(S)
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tokengate_auth::jwt::HttpKeySetSource;
///
/// let source = HttpKeySetSource::new(
///     "https://idp.example.com/realms/demo/protocol/openid-connect/certs",
///     Duration::from_secs(10),
/// )?;
///
/// // Plain HTTP is refused outside loopback
/// assert!(HttpKeySetSource::new("http://idp.example.com/certs", Duration::from_secs(10)).is_err());
/// # Ok::<(), tokengate_auth::JwksError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for `endpoint`
    ///
    /// # Errors
    ///
    /// - [`JwksError::InsecureEndpoint`] unless the URL is HTTPS or HTTP on a loopback host
    /// - [`JwksError::Http`] if the HTTP client cannot be built
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, JwksError> {
        let endpoint = endpoint.into();
        if !is_secure_endpoint(&endpoint) {
            return Err(JwksError::InsecureEndpoint(endpoint));
        }

        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoint,
            http_client,
        })
    }

    /// JWKS endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// HTTPS anywhere; plain HTTP only towards the local machine
fn is_secure_endpoint(endpoint: &str) -> bool {
    let Ok(url) = url::Url::parse(endpoint) else {
        return false;
    };
    match url.scheme() {
        "https" => true,
        "http" => matches!(
            url.host_str(),
            Some("localhost" | "127.0.0.1" | "[::1]")
        ),
        _ => false,
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        debug!(jwks_uri = %self.endpoint, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %self.endpoint, error = %e, "Failed to fetch JWKS");
                JwksError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                jwks_uri = %self.endpoint,
                status = %status,
                "JWKS endpoint returned error status"
            );
            return Err(JwksError::Status(status));
        }

        let body = response.text().await?;
        parse_jwk_set(&body).inspect_err(|e| {
            error!(jwks_uri = %self.endpoint, error = %e, "Failed to parse JWKS JSON");
        })
    }

    fn location(&self) -> &str {
        &self.endpoint
    }
}

/// In-memory key set
///
/// Mostly for tests and for deployments that pin keys in configuration.
/// [`replace`](Self::replace) changes what the next fetch returns, which is
/// how key rotation is simulated.
#[derive(Debug)]
pub struct StaticKeySetSource {
    jwks: ArcSwapOption<JwkSet>,
}

impl StaticKeySetSource {
    /// Source that always returns `jwks`
    pub fn new(jwks: JwkSet) -> Self {
        Self {
            jwks: ArcSwapOption::from_pointee(jwks),
        }
    }

    /// Parse a `{"keys": [...]}` document
    ///
    /// # Errors
    ///
    /// Same as [`parse_jwk_set`].
    pub fn from_json(json: &str) -> Result<Self, JwksError> {
        parse_jwk_set(json).map(Self::new)
    }

    /// Return `jwks` from subsequent fetches
    pub fn replace(&self, jwks: JwkSet) {
        self.jwks.store(Some(Arc::new(jwks)));
    }

    /// Make subsequent fetches fail, as an unreachable provider would
    pub fn disable(&self) {
        self.jwks.store(None);
    }
}

#[async_trait]
impl KeySetSource for StaticKeySetSource {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        self.jwks
            .load_full()
            .map(|jwks| (*jwks).clone())
            .ok_or_else(|| JwksError::Unavailable("static key set disabled".to_string()))
    }

    fn location(&self) -> &str {
        "static"
    }
}

/// When the store refetches its key set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refetch once the snapshot is older than this (default: 10 minutes)
    pub refresh_interval: Duration,
    /// Never fetch more often than this (default: 5 seconds)
    pub min_refresh_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(5),
        }
    }
}

/// Owner of the current key set snapshot
#[derive(Debug)]
pub struct KeySetStore {
    source: Arc<dyn KeySetSource>,
    policy: RefreshPolicy,
    current: ArcSwap<KeySet>,
    /// Held for the duration of a fetch; stores when the last fetch started
    last_attempt: Mutex<Option<Instant>>,
}

impl KeySetStore {
    /// Fetch the initial key set and build a store around it
    ///
    /// # Errors
    ///
    /// Returns the source's error, or [`JwksError::Empty`] if the set has no keys.
    pub async fn load(
        source: Arc<dyn KeySetSource>,
        policy: RefreshPolicy,
    ) -> Result<Self, JwksError> {
        let started = Instant::now();
        let jwks = fetch_non_empty(source.as_ref()).await?;
        let initial = KeySet::with_version(jwks, 1);

        info!(
            source = %source.location(),
            key_count = initial.len(),
            version = initial.version(),
            "Loaded initial key set"
        );

        Ok(Self {
            source,
            policy,
            current: ArcSwap::from_pointee(initial),
            last_attempt: Mutex::new(Some(started)),
        })
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// Refresh policy
    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Whether the current snapshot is older than the refresh interval
    pub fn is_stale(&self) -> bool {
        age(&self.current.load()) >= self.policy.refresh_interval
    }

    /// Fetch and publish a new snapshot now
    ///
    /// Waits for a fetch already in flight, then fetches again.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the previous snapshot stays current.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, JwksError> {
        let mut last_attempt = self.last_attempt.lock().await;
        self.fetch_and_publish(&mut last_attempt).await
    }

    /// Refresh only if the snapshot is stale
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the previous snapshot stays current.
    pub async fn refresh_if_stale(&self) -> Result<Arc<KeySet>, JwksError> {
        if !self.is_stale() {
            return Ok(self.current());
        }

        let mut last_attempt = self.last_attempt.lock().await;
        // Whoever held the lock before us may have refreshed already
        if !self.is_stale() {
            debug!("Key set refreshed concurrently");
            return Ok(self.current());
        }
        self.fetch_and_publish(&mut last_attempt).await
    }

    /// React to a token whose `kid` was not in snapshot `seen_version`
    ///
    /// Returns `true` when a snapshot newer than `seen_version` is now current,
    /// meaning one more resolution attempt is worthwhile. Returns `false` when
    /// the refresh was rate limited or failed.
    pub async fn refresh_for_unknown_key(&self, seen_version: u64) -> bool {
        let mut last_attempt = self.last_attempt.lock().await;

        if self.current.load().version() != seen_version {
            debug!(seen_version, "Key set already refreshed since lookup");
            return true;
        }

        if let Some(last) = *last_attempt {
            let since_last = last.elapsed();
            if since_last < self.policy.min_refresh_interval {
                debug!(
                    since_last_ms = since_last.as_millis(),
                    "JWKS refresh rate limited, keeping current key set"
                );
                return false;
            }
        }

        match self.fetch_and_publish(&mut last_attempt).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    source = %self.source.location(),
                    error = %e,
                    "On-demand key set refresh failed, keeping previous snapshot"
                );
                false
            }
        }
    }

    /// Keep the snapshot fresh until the returned task is aborted
    pub fn spawn_refresh_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let age = age(&self.current.load());
                let wait = self
                    .policy
                    .refresh_interval
                    .saturating_sub(age)
                    .max(MIN_BACKGROUND_WAIT);
                tokio::time::sleep(wait).await;

                if let Err(e) = self.refresh_if_stale().await {
                    warn!(
                        source = %self.source.location(),
                        error = %e,
                        "Background key set refresh failed, keeping previous snapshot"
                    );
                    tokio::time::sleep(self.policy.min_refresh_interval.max(MIN_BACKGROUND_WAIT))
                        .await;
                }
            }
        })
    }

    /// Caller holds the fetch lock
    async fn fetch_and_publish(
        &self,
        last_attempt: &mut Option<Instant>,
    ) -> Result<Arc<KeySet>, JwksError> {
        *last_attempt = Some(Instant::now());

        let jwks = fetch_non_empty(self.source.as_ref()).await?;
        let next = Arc::new(KeySet::with_version(jwks, self.current.load().version() + 1));
        self.current.store(Arc::clone(&next));

        info!(
            source = %self.source.location(),
            key_count = next.len(),
            version = next.version(),
            "Published refreshed key set"
        );
        Ok(next)
    }
}

async fn fetch_non_empty(source: &dyn KeySetSource) -> Result<JwkSet, JwksError> {
    let jwks = source.fetch().await?;
    if jwks.keys.is_empty() {
        warn!(source = %source.location(), "Key set source returned no keys");
        return Err(JwksError::Empty);
    }
    Ok(jwks)
}

/// Snapshot age; a clock that went backwards counts as stale
fn age(key_set: &KeySet) -> Duration {
    SystemTime::now()
        .duration_since(key_set.fetched_at())
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jwks(kids: &[&str]) -> JwkSet {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({ "kty": "RSA", "kid": kid, "n": "sXch", "e": "AQAB" }))
            .collect();
        serde_json::from_value(json!({ "keys": keys })).unwrap()
    }

    /// Static source that counts fetches
    #[derive(Debug)]
    struct CountingSource {
        inner: StaticKeySetSource,
        fetches: AtomicUsize,
    }

    impl CountingSource {
        fn new(kids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                inner: StaticKeySetSource::new(jwks(kids)),
                fetches: AtomicUsize::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySetSource for CountingSource {
        async fn fetch(&self) -> Result<JwkSet, JwksError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch().await
        }

        fn location(&self) -> &str {
            "counting"
        }
    }

    fn eager() -> RefreshPolicy {
        RefreshPolicy {
            refresh_interval: Duration::from_secs(600),
            min_refresh_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.refresh_interval, Duration::from_secs(600));
        assert_eq!(policy.min_refresh_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_endpoint_security() {
        assert!(is_secure_endpoint("https://idp.example.com/certs"));
        assert!(is_secure_endpoint("http://localhost:8080/realms/r/protocol/openid-connect/certs"));
        assert!(is_secure_endpoint("http://127.0.0.1:9999/jwks"));
        assert!(!is_secure_endpoint("http://idp.example.com/certs"));
        // Prefix tricks do not count as localhost
        assert!(!is_secure_endpoint("http://localhost.evil.example.com/certs"));
        assert!(!is_secure_endpoint("ftp://localhost/certs"));
        assert!(!is_secure_endpoint("not a url"));
    }

    #[tokio::test]
    async fn test_load_publishes_version_one() {
        let source = CountingSource::new(&["a"]);
        let store = KeySetStore::load(source.clone(), eager()).await.unwrap();

        assert_eq!(store.current().version(), 1);
        assert!(store.current().find("a").is_some());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_load_rejects_empty_set() {
        let source = Arc::new(StaticKeySetSource::new(jwks(&[])));
        let result = KeySetStore::load(source, eager()).await;
        assert!(matches!(result, Err(JwksError::Empty)));
    }

    #[tokio::test]
    async fn test_refresh_swaps_snapshot_and_bumps_version() {
        let source = CountingSource::new(&["a"]);
        let store = KeySetStore::load(source.clone(), eager()).await.unwrap();
        let before = store.current();

        source.inner.replace(jwks(&["b"]));
        let after = store.refresh().await.unwrap();

        assert_eq!(after.version(), 2);
        assert!(after.find("b").is_some());
        // Old snapshot held by a reader is unaffected
        assert!(before.find("a").is_some());
        assert_eq!(before.version(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let source = CountingSource::new(&["a"]);
        let store = KeySetStore::load(source.clone(), eager()).await.unwrap();

        source.inner.disable();
        assert!(store.refresh().await.is_err());
        assert_eq!(store.current().version(), 1);

        source.inner.replace(jwks(&[]));
        assert!(matches!(store.refresh().await, Err(JwksError::Empty)));
        assert!(store.current().find("a").is_some());
    }

    #[tokio::test]
    async fn test_refresh_if_stale_skips_fresh_snapshot() {
        let source = CountingSource::new(&["a"]);
        let store = KeySetStore::load(source.clone(), eager()).await.unwrap();

        assert!(!store.is_stale());
        let current = store.refresh_if_stale().await.unwrap();
        assert_eq!(current.version(), 1);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_stale_fetches_stale_snapshot() {
        let source = CountingSource::new(&["a"]);
        let policy = RefreshPolicy {
            refresh_interval: Duration::ZERO,
            min_refresh_interval: Duration::ZERO,
        };
        let store = KeySetStore::load(source.clone(), policy).await.unwrap();

        assert!(store.is_stale());
        assert_eq!(store.refresh_if_stale().await.unwrap().version(), 2);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_refresh_is_rate_limited() {
        let source = CountingSource::new(&["a"]);
        let policy = RefreshPolicy {
            refresh_interval: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(60),
        };
        let store = KeySetStore::load(source.clone(), policy).await.unwrap();

        // The initial load counts as an attempt
        assert!(!store.refresh_for_unknown_key(1).await);
        assert!(!store.refresh_for_unknown_key(1).await);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_refresh_after_interval() {
        let source = CountingSource::new(&["a"]);
        let policy = RefreshPolicy {
            refresh_interval: Duration::from_secs(600),
            min_refresh_interval: Duration::from_secs(60),
        };
        let store = KeySetStore::load(source.clone(), policy).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        source.inner.replace(jwks(&["a", "rotated"]));

        assert!(store.refresh_for_unknown_key(1).await);
        assert!(store.current().find("rotated").is_some());
        assert_eq!(source.fetches(), 2);

        // Immediately again: rate limited
        assert!(!store.refresh_for_unknown_key(2).await);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_refresh_sees_concurrent_publish() {
        let source = CountingSource::new(&["a"]);
        let store = KeySetStore::load(source.clone(), eager()).await.unwrap();

        store.refresh().await.unwrap();
        // Caller looked the kid up in version 1; version 2 is already current
        assert!(store.refresh_for_unknown_key(1).await);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_unknown_key_refreshes_fetch_once() {
        let source = CountingSource::new(&["a"]);
        let store = Arc::new(KeySetStore::load(source.clone(), eager()).await.unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.refresh_for_unknown_key(1).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(source.fetches(), 2);
        assert_eq!(store.current().version(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_refreshes() {
        let source = CountingSource::new(&["a"]);
        let policy = RefreshPolicy {
            refresh_interval: Duration::ZERO,
            min_refresh_interval: Duration::ZERO,
        };
        let store = Arc::new(KeySetStore::load(source.clone(), policy).await.unwrap());

        let task = Arc::clone(&store).spawn_refresh_task();
        tokio::time::sleep(MIN_BACKGROUND_WAIT * 3 + Duration::from_millis(500)).await;
        task.abort();

        assert!(store.current().version() >= 3);
        assert!(source.fetches() >= 3);
    }
}
