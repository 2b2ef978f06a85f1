//! Resolver and publisher for identity-bound endpoint locator records.
//!
//! This crate turns a peer's public key and a record name into a
//! freshness-validated, decrypted list of reachable endpoints, using a
//! set of untrusted relays as transport — and, dually, publishes such
//! records for the local identity.
//!
//! # Example
//!
//! ```no_run
//! use locator_client::{
//!     PublishOptions, Publisher, PublisherConfig, ResolveOptions, Resolver, ResolverConfig,
//! };
//! use locator_core::{select_endpoints, Endpoint, Keys, Payload};
//!
//! # fn unix_now() -> u64 { 0 }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relays = vec!["wss://relay.damus.io".to_string()];
//!     let keys = Keys::generate();
//!
//!     // Publish our reachable endpoints, encrypted to ourselves.
//!     let publisher = Publisher::new(PublisherConfig::default());
//!     let payload = Payload::new(600, unix_now(), vec![Endpoint::tcp("203.0.113.42", 9735)]);
//!     publisher
//!         .publish(&relays, &keys, &payload, &PublishOptions::default())
//!         .await?;
//!
//!     // Resolve them back and order for connection attempts.
//!     let resolver = Resolver::new(ResolverConfig {
//!         bootstrap_relays: relays,
//!         ..Default::default()
//!     });
//!     if let Some(found) = resolver
//!         .resolve(&keys.public_key_hex(), Some(&keys), "addr", ResolveOptions::default())
//!         .await?
//!     {
//!         for endpoint in select_endpoints(&found.endpoints) {
//!             println!("{} {}", endpoint.transport, endpoint.url);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod group;
mod pool;
mod publisher;
mod relay;
mod resolver;

pub use error::{ClientError, Result};
pub use group::GroupIdentity;
pub use pool::{PoolConfig, PublishOutcome, RelayPool, DEFAULT_CONNECT_TIMEOUT};
pub use publisher::{
    PublishOptions, Publisher, PublisherConfig, DEFAULT_PUBLISH_TIMEOUT,
};
pub use relay::{ConnectionState, RelayConnection, RelayMessage};
pub use resolver::{
    ResolveOptions, Resolver, ResolverConfig, UrlTransformer, DEFAULT_BOOTSTRAP_RELAYS,
    DEFAULT_RESOLVE_TIMEOUT,
};

// The core types callers hold when using this crate.
pub use locator_core::{
    select_endpoints, Endpoint, Event, Keys, Payload, Signer, DEFAULT_IDENTIFIER, KIND_LOCATOR,
    KIND_RELAY_LIST,
};
