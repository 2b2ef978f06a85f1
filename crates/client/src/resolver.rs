//! The resolution engine.
//!
//! Given an identity and a record identifier, find the freshest locator
//! record the network knows: pick a relay set (bootstrap plus optional
//! gossip discovery), query every relay under one deadline, keep the
//! newest verifiable event, decrypt whatever mode it carries, check
//! freshness, and cache the result.
//!
//! The cache is consulted before the network, so within one process a
//! cached answer is never displaced by an older record.

use crate::error::{ClientError, Result};
use crate::pool::{PoolConfig, RelayPool};
use locator_core::{
    expiration, open_record, parse_public_key, sort_events_newest_first, verify_event, Endpoint,
    Payload, Signer, DEFAULT_IDENTIFIER, KIND_LOCATOR, KIND_RELAY_LIST,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, warn};

/// Cache key suffix used by [`Resolver::resolve_latest`], which ignores
/// the record identifier.
const LATEST_KEY: &str = "__latest__";

/// Relays queried when the caller configures none.
pub const DEFAULT_BOOTSTRAP_RELAYS: &[&str] = &["wss://relay.damus.io"];

/// Default resolve deadline.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rewrites applied to every endpoint of a returned payload, e.g.
/// turning `.onion` addresses into SOCKS URLs.
pub type UrlTransformer = Arc<dyn Fn(Endpoint) -> Endpoint + Send + Sync>;

/// Resolver construction options.
#[derive(Clone, Default)]
pub struct ResolverConfig {
    /// Relays always queried. Empty means the built-in default list.
    pub bootstrap_relays: Vec<String>,
    /// Per-call deadline; the default is 10 seconds.
    pub timeout: Option<Duration>,
    /// Externally owned pool. When supplied, [`Resolver::close`] leaves
    /// it open; otherwise the resolver creates and owns one.
    pub pool: Option<Arc<RelayPool>>,
    /// Applied to every endpoint in every returned payload.
    pub url_transformer: Option<UrlTransformer>,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Reject expired records and surface decryption failures instead of
    /// returning `None`.
    pub strict: bool,
    /// Widen the relay set with the author's advertised relay list
    /// (kind 10002).
    pub gossip: bool,
}

struct CacheEntry {
    payload: Payload,
    expires_at: u64,
}

/// Resolves locator records for identities.
pub struct Resolver {
    pool: Arc<RelayPool>,
    owns_pool: bool,
    bootstrap_relays: Vec<String>,
    timeout: Duration,
    url_transformer: Option<UrlTransformer>,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let (pool, owns_pool) = match config.pool {
            Some(pool) => (pool, false),
            None => (Arc::new(RelayPool::new(PoolConfig::default())), true),
        };

        let bootstrap_relays = if config.bootstrap_relays.is_empty() {
            DEFAULT_BOOTSTRAP_RELAYS
                .iter()
                .map(|r| r.to_string())
                .collect()
        } else {
            config.bootstrap_relays
        };

        Self {
            pool,
            owns_pool,
            bootstrap_relays,
            timeout: config.timeout.unwrap_or(DEFAULT_RESOLVE_TIMEOUT),
            url_transformer: config.url_transformer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the record named `identifier` published by `target`
    /// (64-hex or `npub1...`).
    ///
    /// Returns `None` when no matching fresh record exists or the caller
    /// cannot read the one that does. Errors: `Argument` (bad target),
    /// `Timeout` (deadline), `Relay` (every relay failed), and in strict
    /// mode `Decryption`.
    pub async fn resolve(
        &self,
        target: &str,
        signer: Option<&dyn Signer>,
        identifier: &str,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        self.resolve_inner(target, signer, Some(identifier), options)
            .await
    }

    /// Resolve the freshest locator record from `target` regardless of
    /// its identifier.
    pub async fn resolve_latest(
        &self,
        target: &str,
        signer: Option<&dyn Signer>,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        self.resolve_inner(target, signer, None, options).await
    }

    async fn resolve_inner(
        &self,
        target: &str,
        signer: Option<&dyn Signer>,
        identifier: Option<&str>,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        let author = parse_public_key(target)?;
        let cache_key = (
            author.clone(),
            identifier.unwrap_or(LATEST_KEY).to_string(),
        );

        if let Some(payload) = self.cache_lookup(&cache_key).await {
            debug!(author = %author, identifier = %cache_key.1, "cache hit");
            return Ok(Some(self.transform(payload)));
        }

        let started = Instant::now();
        let relays = self.relay_set(&author, options, started).await?;

        let filter = json!({
            "authors": [author],
            "kinds": [KIND_LOCATOR],
            "limit": 50,
        });
        let mut events = match timeout(
            self.remaining(started),
            self.pool.query(&relays, &filter),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "resolve exceeded {:?}",
                    self.timeout
                )))
            }
        };

        // Author-mismatched or unverifiable events are dropped silently.
        events.retain(|e| e.pubkey == author && verify_event(e).unwrap_or(false));
        sort_events_newest_first(&mut events);
        let Some(event) = events.into_iter().next() else {
            return Ok(None);
        };

        if let Some(wanted) = identifier {
            if locator_core::identifier(&event) != Some(wanted) {
                return Ok(None);
            }
        }

        let plaintext = match open_record(&event, signer).await {
            Ok(Some(plaintext)) => plaintext,
            Ok(None) => return Ok(None),
            Err(e) => {
                if options.strict {
                    return Err(e.into());
                }
                warn!(author = %author, error = %e, "could not open record");
                return Ok(None);
            }
        };

        let payload = match Payload::decode(&plaintext) {
            Ok(payload) => payload,
            Err(e) => {
                if options.strict {
                    return Err(e.into());
                }
                warn!(author = %author, error = %e, "record payload is malformed");
                return Ok(None);
            }
        };

        let explicit = expiration(&event).unwrap_or(u64::MAX);
        let expiry = explicit.min(payload.expires_at());
        if unix_now() > expiry {
            if options.strict {
                return Ok(None);
            }
            warn!(author = %author, expiry, "returning expired record");
            return Ok(Some(self.transform(payload)));
        }

        self.cache.lock().await.insert(
            cache_key,
            CacheEntry {
                payload: payload.clone(),
                expires_at: expiry,
            },
        );
        Ok(Some(self.transform(payload)))
    }

    /// Bootstrap relays, widened by the author's verified relay list
    /// when gossip is on. Gossip failures are non-fatal.
    async fn relay_set(
        &self,
        author: &str,
        options: ResolveOptions,
        started: Instant,
    ) -> Result<Vec<String>> {
        let mut relays = self.bootstrap_relays.clone();
        if !options.gossip {
            return Ok(relays);
        }

        let filter = json!({
            "authors": [author],
            "kinds": [KIND_RELAY_LIST],
        });
        let advertised = match timeout(
            self.remaining(started),
            self.pool.get(&self.bootstrap_relays, &filter),
        )
        .await
        {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(author = %author, error = %e, "gossip discovery failed");
                None
            }
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "resolve exceeded {:?}",
                    self.timeout
                )))
            }
        };

        if let Some(event) = advertised {
            if event.pubkey == author && verify_event(&event).unwrap_or(false) {
                for tag in &event.tags {
                    if tag.first().map(String::as_str) == Some("r") {
                        if let Some(relay) = tag.get(1) {
                            if !relays.contains(relay) {
                                debug!(author = %author, relay = %relay, "gossip relay");
                                relays.push(relay.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(relays)
    }

    fn remaining(&self, started: Instant) -> Duration {
        self.timeout.saturating_sub(started.elapsed())
    }

    async fn cache_lookup(&self, key: &(String, String)) -> Option<Payload> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.expires_at > unix_now() => Some(entry.payload.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn transform(&self, mut payload: Payload) -> Payload {
        if let Some(transformer) = &self.url_transformer {
            payload.endpoints = payload
                .endpoints
                .into_iter()
                .map(|endpoint| transformer(endpoint))
                .collect();
        }
        payload
    }

    /// [`resolve`](Self::resolve) with the default `"addr"` identifier.
    pub async fn resolve_default(
        &self,
        target: &str,
        signer: Option<&dyn Signer>,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        self.resolve(target, signer, DEFAULT_IDENTIFIER, options)
            .await
    }

    /// Close the pool if this resolver owns it; an externally supplied
    /// pool is left untouched.
    pub async fn close(&self) {
        if self.owns_pool {
            self.pool.close().await;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_secs()
}
