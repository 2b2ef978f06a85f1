//! Gossip discovery: widening the relay set through the author's
//! advertised relay list (kind 10002).

mod common;

use common::MockRelay;
use locator_client::{
    PublishOptions, Publisher, PublisherConfig, ResolveOptions, Resolver, ResolverConfig,
};
use locator_core::{Endpoint, Keys, Payload, Signer};
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn payload() -> Payload {
    Payload::new(600, unix_now(), vec![Endpoint::tcp("10.0.0.1", 8080)])
}

#[tokio::test]
async fn gossip_discovers_records_on_advertised_relays() {
    let bootstrap = MockRelay::start().await;
    let advertised = MockRelay::start().await;
    let keys = Keys::generate();
    let publisher = Publisher::new(PublisherConfig::default());

    // The bootstrap relay only knows where this identity publishes.
    publisher
        .publish_relay_list(&[bootstrap.url()], &keys, &[advertised.url()])
        .await
        .unwrap();

    // The record itself lives on the advertised relay only.
    let payload = payload();
    publisher
        .publish(
            &[advertised.url()],
            &keys,
            &payload,
            &PublishOptions {
                public: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resolver = Resolver::new(ResolverConfig {
        bootstrap_relays: vec![bootstrap.url()],
        ..Default::default()
    });

    // Without gossip the bootstrap relay has no record.
    let blind = resolver
        .resolve(
            &keys.public_key_hex(),
            None,
            "addr",
            ResolveOptions::default(),
        )
        .await
        .unwrap();
    assert!(blind.is_none());

    // With gossip the advertised relay is discovered and queried.
    let found = resolver
        .resolve(
            &keys.public_key_hex(),
            None,
            "addr",
            ResolveOptions {
                gossip: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found.unwrap(), payload);

    bootstrap.shutdown().await;
    advertised.shutdown().await;
}

#[tokio::test]
async fn forged_relay_list_is_ignored() {
    let bootstrap = MockRelay::start().await;
    let advertised = MockRelay::start().await;
    let keys = Keys::generate();
    let other = Keys::generate();
    let publisher = Publisher::new(PublisherConfig::default());

    // A relay list claiming the target's pubkey but signed by someone
    // else: it matches the gossip filter yet fails verification.
    let mut forged = other
        .sign(locator_core::EventTemplate {
            created_at: unix_now(),
            kind: locator_core::KIND_RELAY_LIST,
            tags: vec![vec!["r".to_string(), advertised.url()]],
            content: String::new(),
        })
        .await
        .unwrap();
    forged.pubkey = keys.public_key_hex();
    bootstrap
        .seed_event(serde_json::to_value(&forged).unwrap())
        .await;

    publisher
        .publish(
            &[advertised.url()],
            &keys,
            &payload(),
            &PublishOptions {
                public: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resolver = Resolver::new(ResolverConfig {
        bootstrap_relays: vec![bootstrap.url()],
        ..Default::default()
    });
    let found = resolver
        .resolve(
            &keys.public_key_hex(),
            None,
            "addr",
            ResolveOptions {
                gossip: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(found.is_none());

    bootstrap.shutdown().await;
    advertised.shutdown().await;
}

#[tokio::test]
async fn gossip_survives_a_missing_relay_list() {
    let bootstrap = MockRelay::start().await;
    let keys = Keys::generate();
    let publisher = Publisher::new(PublisherConfig::default());

    // No relay list anywhere; the record is on the bootstrap relay.
    let payload = payload();
    publisher
        .publish(
            &[bootstrap.url()],
            &keys,
            &payload,
            &PublishOptions {
                public: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resolver = Resolver::new(ResolverConfig {
        bootstrap_relays: vec![bootstrap.url()],
        ..Default::default()
    });
    let found = resolver
        .resolve(
            &keys.public_key_hex(),
            None,
            "addr",
            ResolveOptions {
                gossip: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found.unwrap(), payload);

    bootstrap.shutdown().await;
}
