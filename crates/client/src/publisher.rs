//! The publish side: build, encrypt, sign, and broadcast locator
//! records.
//!
//! Publishing is best-effort across the relay set: one acceptance is
//! success, and only a unanimous failure surfaces as an error carrying
//! every per-relay reason.

use crate::error::{ClientError, Result};
use crate::pool::{PoolConfig, RelayPool};
use locator_core::{
    build_record, parse_public_key, EncryptMode, Event, Payload, RecordOptions, Signer,
    DEFAULT_IDENTIFIER, KIND_RELAY_LIST,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Duration;
use tracing::{info, warn};

/// Default publish deadline, applied per relay.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Publisher construction options.
#[derive(Clone, Default)]
pub struct PublisherConfig {
    /// Externally owned pool. When supplied, [`Publisher::close`] leaves
    /// it open; otherwise the publisher creates and owns one.
    pub pool: Option<Arc<RelayPool>>,
    /// Per-call deadline; the default is 5 seconds.
    pub timeout: Option<Duration>,
}

/// Per-publish options.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// The record's `d`-tag identifier.
    pub identifier: String,
    /// Publish the payload in plaintext, readable by anyone.
    pub public: bool,
    /// Encrypt to this peer (64-hex or `npub1...`). Ignored when
    /// `public` is set.
    pub recipient: Option<String>,
    /// Mark the locator non-discoverable by non-targets.
    pub private_locator: bool,
    /// Add an explicit expiration tag (epoch seconds).
    pub expiration: Option<u64>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_IDENTIFIER.to_string(),
            public: false,
            recipient: None,
            private_locator: false,
            expiration: None,
        }
    }
}

/// Publishes locator records to relays.
pub struct Publisher {
    pool: Arc<RelayPool>,
    owns_pool: bool,
    timeout: Duration,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Self {
        let (pool, owns_pool) = match config.pool {
            Some(pool) => (pool, false),
            None => (Arc::new(RelayPool::new(PoolConfig::default())), true),
        };
        Self {
            pool,
            owns_pool,
            timeout: config.timeout.unwrap_or(DEFAULT_PUBLISH_TIMEOUT),
        }
    }

    /// Build and broadcast a locator record.
    ///
    /// The protection mode follows the options: `public` publishes
    /// plaintext, a `recipient` encrypts to that peer, and otherwise the
    /// record is encrypted to the publisher itself.
    ///
    /// Returns the signed event when at least one relay accepted it.
    /// Errors: `Argument` (bad recipient key), `Relay` (every relay
    /// failed, with concatenated reasons).
    pub async fn publish(
        &self,
        relays: &[String],
        signer: &dyn Signer,
        payload: &Payload,
        options: &PublishOptions,
    ) -> Result<Event> {
        let mode = if options.public {
            EncryptMode::Public
        } else if let Some(recipient) = &options.recipient {
            EncryptMode::Targeted(recipient)
        } else {
            EncryptMode::SelfAddressed
        };

        let event = build_record(
            signer,
            payload,
            &options.identifier,
            mode,
            unix_now(),
            &RecordOptions {
                private: options.private_locator,
                expiration: options.expiration,
            },
        )
        .await?;

        self.broadcast(relays, event).await
    }

    /// Build and broadcast a multi-recipient (wrapped) locator record.
    ///
    /// Every recipient key is normalized up front; a malformed one fails
    /// the call before anything reaches the network.
    pub async fn publish_wrapped(
        &self,
        relays: &[String],
        signer: &dyn Signer,
        recipients: &[String],
        payload: &Payload,
        options: &PublishOptions,
    ) -> Result<Event> {
        let recipients: Vec<String> = recipients
            .iter()
            .map(|r| parse_public_key(r))
            .collect::<std::result::Result<_, _>>()?;

        let event = build_record(
            signer,
            payload,
            &options.identifier,
            EncryptMode::Wrapped(&recipients),
            unix_now(),
            &RecordOptions {
                private: options.private_locator,
                expiration: options.expiration,
            },
        )
        .await?;

        self.broadcast(relays, event).await
    }

    /// Advertise the relays where this identity publishes, as a
    /// kind-10002 relay-list event the resolver's gossip step consumes.
    pub async fn publish_relay_list(
        &self,
        relays: &[String],
        signer: &dyn Signer,
        advertised: &[String],
    ) -> Result<Event> {
        let tags = advertised
            .iter()
            .map(|relay| vec!["r".to_string(), relay.clone()])
            .collect();
        let template = locator_core::EventTemplate {
            created_at: unix_now(),
            kind: KIND_RELAY_LIST,
            tags,
            content: String::new(),
        };
        let event = signer.sign(template).await.map_err(ClientError::from)?;

        self.broadcast(relays, event).await
    }

    async fn broadcast(&self, relays: &[String], event: Event) -> Result<Event> {
        if relays.is_empty() {
            return Err(ClientError::Argument("no relays to publish to".to_string()));
        }

        let outcomes = self.pool.publish(relays, &event, self.timeout).await;
        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        if accepted > 0 {
            info!(
                id = %event.id,
                accepted,
                total = outcomes.len(),
                "published locator record"
            );
            return Ok(event);
        }

        let reasons: Vec<String> = outcomes
            .iter()
            .map(|o| format!("{}: {}", o.relay, o.detail))
            .collect();
        warn!(id = %event.id, "every relay rejected the record");
        Err(ClientError::Relay(reasons.join("; ")))
    }

    /// Close the pool if this publisher owns it.
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

#[cfg(test)]
mod tests {
    use super::*;
    use locator_core::{Endpoint, Keys};

    fn sample_payload() -> Payload {
        Payload::new(600, unix_now(), vec![Endpoint::tcp("203.0.113.42", 9735)])
    }

    #[tokio::test]
    async fn publish_needs_relays() {
        let publisher = Publisher::new(PublisherConfig::default());
        let keys = Keys::generate();
        let err = publisher
            .publish(&[], &keys, &sample_payload(), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Argument(_)));
    }

    #[tokio::test]
    async fn wrapped_publish_validates_recipients_first() {
        let publisher = Publisher::new(PublisherConfig::default());
        let keys = Keys::generate();
        let err = publisher
            .publish_wrapped(
                &["ws://127.0.0.1:1".to_string()],
                &keys,
                &["garbage".to_string()],
                &sample_payload(),
                &PublishOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Argument(_)));
    }

    #[tokio::test]
    async fn all_relays_down_is_a_relay_error() {
        let publisher = Publisher::new(PublisherConfig {
            timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let keys = Keys::generate();
        let err = publisher
            .publish(
                &["ws://127.0.0.1:1".to_string()],
                &keys,
                &sample_payload(),
                &PublishOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Relay(_)));
    }

    #[test]
    fn default_options_are_self_addressed_addr() {
        let options = PublishOptions::default();
        assert_eq!(options.identifier, "addr");
        assert!(!options.public);
        assert!(options.recipient.is_none());
        assert!(!options.private_locator);
    }
}
