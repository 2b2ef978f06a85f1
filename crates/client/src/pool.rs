//! Relay pool adapter.
//!
//! Fans operations out across many relays and reduces the outcomes:
//! publish with per-relay acknowledgements, deadline-bounded queries with
//! cross-relay deduplication, and a newest-single-event convenience. The
//! pool owns one connection per relay URL and serializes operations per
//! connection, so concurrent callers never interleave frames on one
//! socket.
//!
//! Subscriptions are never leaked: ids abandoned by a cancelled call are
//! closed before the next operation on the same connection.

use crate::error::{ClientError, Result};
use crate::relay::{RelayConnection, RelayMessage};
use futures_util::future::join_all;
use locator_core::{sort_events_newest_first, Event};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Default bound for opening a WebSocket to a relay.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bound for opening a WebSocket to a relay.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Per-relay result of a publish fan-out.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// Relay URL this outcome belongs to.
    pub relay: String,
    /// Whether the relay acknowledged the event with `["OK", .., true]`.
    pub accepted: bool,
    /// Relay-provided message or transport error detail.
    pub detail: String,
}

#[derive(Clone)]
struct PoolEntry {
    conn: Arc<RelayConnection>,
    /// Serializes subscribe/recv exchanges on this connection.
    op: Arc<Mutex<()>>,
    /// Subscription ids whose exchange was cancelled before CLOSE.
    abandoned: Arc<Mutex<Vec<String>>>,
}

/// A pool of relay connections keyed by URL.
pub struct RelayPool {
    config: PoolConfig,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl RelayPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event to every relay in parallel, waiting up to
    /// `deadline` per relay for its acknowledgement. Always returns one
    /// outcome per relay; the caller decides what partial success means.
    pub async fn publish(
        &self,
        relays: &[String],
        event: &Event,
        deadline: Duration,
    ) -> Vec<PublishOutcome> {
        let submissions = relays.iter().map(|relay| {
            async move {
                let detail = match timeout(deadline, self.publish_one(relay, event)).await {
                    Ok(Ok(())) => {
                        return PublishOutcome {
                            relay: relay.clone(),
                            accepted: true,
                            detail: String::new(),
                        }
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("no acknowledgement within {deadline:?}"),
                };
                warn!(relay = %relay, detail = %detail, "publish failed");
                PublishOutcome {
                    relay: relay.clone(),
                    accepted: false,
                    detail,
                }
            }
        });
        join_all(submissions).await
    }

    async fn publish_one(&self, relay: &str, event: &Event) -> Result<()> {
        let entry = self.entry(relay).await?;
        let _guard = entry.op.lock().await;
        self.connect_entry(relay, &entry).await?;
        self.close_abandoned(&entry).await;

        if let Err(e) = entry.conn.send_event(event).await {
            self.drop_entry(relay).await;
            return Err(e);
        }

        loop {
            match entry.conn.recv().await {
                Ok(Some(RelayMessage::Ok(id, accepted, message))) if id == event.id => {
                    if accepted {
                        debug!(relay = %relay, id = %id, "event accepted");
                        return Ok(());
                    }
                    return Err(ClientError::Relay(format!(
                        "{relay} rejected event: {message}"
                    )));
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.drop_entry(relay).await;
                    return Err(ClientError::Relay(format!(
                        "{relay} closed before acknowledging"
                    )));
                }
                Err(e) => {
                    self.drop_entry(relay).await;
                    return Err(e);
                }
            }
        }
    }

    /// Query every relay in parallel and merge the results, dropping
    /// duplicate event ids. Errors only when every relay failed; the
    /// caller bounds the whole call with its own deadline.
    pub async fn query(&self, relays: &[String], filter: &Value) -> Result<Vec<Event>> {
        if relays.is_empty() {
            return Err(ClientError::Argument("no relays to query".to_string()));
        }

        let requests = relays
            .iter()
            .map(|relay| async move { (relay.clone(), self.query_one(relay, filter).await) });
        let responses = join_all(requests).await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut failures = Vec::new();
        for (relay, response) in responses {
            match response {
                Ok(batch) => {
                    for event in batch {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(e) => {
                    warn!(relay = %relay, error = %e, "query failed");
                    failures.push(format!("{relay}: {e}"));
                }
            }
        }

        if events.is_empty() && failures.len() == relays.len() {
            return Err(ClientError::Relay(failures.join("; ")));
        }
        Ok(events)
    }

    async fn query_one(&self, relay: &str, filter: &Value) -> Result<Vec<Event>> {
        let entry = self.entry(relay).await?;
        let _guard = entry.op.lock().await;
        self.connect_entry(relay, &entry).await?;
        self.close_abandoned(&entry).await;

        let subscription_id = format!("loc-{:016x}", rand::random::<u64>());
        entry.abandoned.lock().await.push(subscription_id.clone());

        let result = self
            .exchange_query(&entry, relay, &subscription_id, filter)
            .await;

        // Reached only on completion; a cancelled exchange leaves the id
        // for the next operation to close.
        entry
            .abandoned
            .lock()
            .await
            .retain(|id| id != &subscription_id);

        if result.is_err() {
            self.drop_entry(relay).await;
        }
        result
    }

    async fn exchange_query(
        &self,
        entry: &PoolEntry,
        relay: &str,
        subscription_id: &str,
        filter: &Value,
    ) -> Result<Vec<Event>> {
        entry
            .conn
            .subscribe(subscription_id, std::slice::from_ref(filter))
            .await?;

        let mut events = Vec::new();
        loop {
            match entry.conn.recv().await? {
                Some(RelayMessage::Event(sub, event)) if sub == subscription_id => {
                    events.push(event);
                }
                Some(RelayMessage::Eose(sub)) if sub == subscription_id => break,
                Some(RelayMessage::Closed(sub, message)) if sub == subscription_id => {
                    return Err(ClientError::Relay(format!(
                        "{relay} closed subscription: {message}"
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(ClientError::Relay(format!(
                        "{relay} closed before end of stored events"
                    )));
                }
            }
        }

        let _ = entry.conn.close_subscription(subscription_id).await;
        Ok(events)
    }

    /// The single newest event matching `filter` across the relay set,
    /// using the deterministic created-at/id order.
    pub async fn get(&self, relays: &[String], filter: &Value) -> Result<Option<Event>> {
        let mut events = self.query(relays, filter).await?;
        sort_events_newest_first(&mut events);
        Ok(events.into_iter().next())
    }

    /// Disconnect every relay and clear the pool. Only the pool's owner
    /// may call this; externally supplied pools stay open.
    pub async fn close(&self) {
        let entries: Vec<PoolEntry> = {
            let mut map = self.entries.lock().await;
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.conn.disconnect().await;
        }
    }

    async fn entry(&self, relay: &str) -> Result<PoolEntry> {
        let mut map = self.entries.lock().await;
        if let Some(entry) = map.get(relay) {
            return Ok(entry.clone());
        }
        let entry = PoolEntry {
            conn: Arc::new(RelayConnection::new(relay)?),
            op: Arc::new(Mutex::new(())),
            abandoned: Arc::new(Mutex::new(Vec::new())),
        };
        map.insert(relay.to_string(), entry.clone());
        Ok(entry)
    }

    /// Connect under the caller's operation guard, so concurrent first
    /// uses of one relay cannot race the handshake.
    async fn connect_entry(&self, relay: &str, entry: &PoolEntry) -> Result<()> {
        if entry.conn.is_connected().await {
            return Ok(());
        }
        if let Err(e) = entry.conn.connect(self.config.connect_timeout).await {
            self.drop_entry(relay).await;
            return Err(e);
        }
        Ok(())
    }

    async fn drop_entry(&self, relay: &str) {
        if let Some(entry) = self.entries.lock().await.remove(relay) {
            entry.conn.disconnect().await;
        }
    }

    async fn close_abandoned(&self, entry: &PoolEntry) {
        let stale: Vec<String> = std::mem::take(&mut *entry.abandoned.lock().await);
        for id in stale {
            debug!(subscription = %id, "closing abandoned subscription");
            let _ = entry.conn.close_subscription(&id).await;
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
