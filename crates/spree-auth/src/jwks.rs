//! Signing key resolution and caching.
//!
//! [`SigningKeyCache`] maps key IDs to issuer public keys. It is filled lazily
//! from the issuer's JSON key-set endpoint: a lookup miss triggers a refresh,
//! and refreshes are throttled by a single-token bucket so a flood of unknown
//! key IDs costs at most one outbound request per refresh interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{AuthError, Result};
use crate::keys::{decode_rsa_components, RsaPublicKey};
use crate::AuthConfig;

/// Key-set document served by the issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// The published keys.
    pub keys: Vec<Jwk>,
}

/// A single published key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type; only `RSA` entries are used.
    pub kty: String,
    /// Algorithm (e.g., `RS256`).
    #[serde(default)]
    pub alg: Option<String>,
    /// Key use (e.g., `sig`).
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    /// Key ID.
    #[serde(default)]
    pub kid: Option<String>,
    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

impl JwkSet {
    /// Decode every usable RSA entry into a key-ID map.
    ///
    /// Entries without a key ID and non-RSA entries are skipped. A broken RSA
    /// entry rejects the whole set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Decode`] if an RSA entry lacks or has malformed
    /// modulus/exponent fields.
    pub fn decode_keys(&self) -> Result<HashMap<String, RsaPublicKey>> {
        let mut keys = HashMap::with_capacity(self.keys.len());

        for jwk in &self.keys {
            let Some(kid) = jwk.kid.as_deref().filter(|k| !k.is_empty()) else {
                tracing::warn!(kty = %jwk.kty, "Skipping key without kid");
                continue;
            };
            if jwk.kty != "RSA" {
                tracing::warn!(kid = %kid, kty = %jwk.kty, "Skipping non-RSA key");
                continue;
            }

            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                return Err(AuthError::Decode(format!("key {kid} is missing n or e")));
            };
            let key = decode_rsa_components(n, e)
                .map_err(|err| AuthError::Decode(format!("key {kid}: {err}")))?;
            keys.insert(kid.to_string(), key);
        }

        Ok(keys)
    }
}

/// Anything that can produce the issuer's current key set.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the complete key set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] when the key set cannot be retrieved.
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Fetches the key set over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    url: String,
    client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for `url` whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// The key-set URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<JwkSet> {
        tracing::debug!(url = %self.url, "Fetching key set");

        self.client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Transport(format!("invalid key set: {e}")))
    }
}

/// Resolves a key ID to the issuer's public key.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Look up `kid`, returning `None` when the key is unknown.
    async fn resolve(&self, kid: &str) -> Option<RsaPublicKey>;
}

/// A fixed, in-memory key table.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, RsaPublicKey>,
}

impl StaticKeyResolver {
    /// Create a resolver over an existing key map.
    #[must_use]
    pub const fn new(keys: HashMap<String, RsaPublicKey>) -> Self {
        Self { keys }
    }

    /// Build a resolver from `(kid, modulus, exponent)` base64url triples.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Decode`] if any triple fails to decode.
    pub fn from_components<'a, I>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let keys = components
            .into_iter()
            .map(|(kid, n, e)| decode_rsa_components(n, e).map(|key| (kid.to_string(), key)))
            .collect::<Result<_>>()?;
        Ok(Self { keys })
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, kid: &str) -> Option<RsaPublicKey> {
        self.keys.get(kid).cloned()
    }
}

/// Concurrency-safe key cache backed by a remote key set.
///
/// Lookups take a shared lock only. On a miss, one caller at a time holds the
/// refresh lock; it spends a bucket token (if any) on a fetch and swaps in the
/// whole new key map. Other callers that missed concurrently wait on the same
/// lock and then see the fresh map.
///
/// The bucket is replenished by a background task that lives until
/// [`SigningKeyCache::shutdown`] is called or the cache is dropped. The cache
/// must be created inside a Tokio runtime.
pub struct SigningKeyCache {
    keys: RwLock<HashMap<String, RsaPublicKey>>,
    refresh: Mutex<mpsc::Receiver<()>>,
    source: Arc<dyn KeySetSource>,
    fetch_timeout: Duration,
    shutdown: CancellationToken,
}

impl SigningKeyCache {
    /// Create an empty cache and start its bucket replenisher.
    ///
    /// The bucket starts with one token, so the first miss always fetches.
    #[must_use]
    pub fn new(
        source: Arc<dyn KeySetSource>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Seed the bucket; the channel is empty so this cannot fail.
        let _ = tx.try_send(());

        let shutdown = CancellationToken::new();
        spawn_replenisher(tx, refresh_interval, shutdown.clone());

        Self {
            keys: RwLock::new(HashMap::new()),
            refresh: Mutex::new(rx),
            source,
            fetch_timeout,
            shutdown,
        }
    }

    /// Create a cache fetching from the configured key-set URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let source = HttpKeySetSource::new(config.key_set_url.clone(), config.fetch_timeout())?;
        Ok(Self::new(
            Arc::new(source),
            config.refresh_interval(),
            config.fetch_timeout(),
        ))
    }

    /// Get a key by ID, refreshing from the remote key set on a miss.
    ///
    /// Returns `None` if the key is still unknown after the refresh attempt,
    /// including when the refresh was throttled or failed.
    pub async fn get(&self, kid: &str) -> Option<RsaPublicKey> {
        if let Some(key) = self.lookup(kid) {
            return Some(key);
        }

        self.fetch_keys(kid).await;
        self.lookup(kid)
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the cache holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// IDs of all cached keys.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        self.keys.read().keys().cloned().collect()
    }

    /// Stop the bucket replenisher. Tokens already in the bucket remain usable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn lookup(&self, kid: &str) -> Option<RsaPublicKey> {
        self.keys.read().get(kid).cloned()
    }

    async fn fetch_keys(&self, kid: &str) {
        let mut bucket = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if self.lookup(kid).is_some() {
            return;
        }

        if bucket.try_recv().is_err() {
            tracing::debug!(kid = %kid, "Key set refresh throttled");
            return;
        }

        tracing::info!(kid = %kid, "Updating signing key cache");

        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Transport(format!(
                "key set fetch timed out after {:?}",
                self.fetch_timeout
            ))),
        };

        let keys = match fetched.and_then(|set| set.decode_keys()) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "Error updating cached keys, keeping previous snapshot");
                return;
            }
        };

        tracing::info!(count = keys.len(), "Cached signing keys");
        *self.keys.write() = keys;
    }
}

impl Drop for SigningKeyCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl KeyResolver for SigningKeyCache {
    async fn resolve(&self, kid: &str) -> Option<RsaPublicKey> {
        self.get(kid).await
    }
}

fn spawn_replenisher(tx: mpsc::Sender<()>, period: Duration, shutdown: CancellationToken) {
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                        break;
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }

        tracing::debug!("Key set refresh replenisher stopped");
    });
}
