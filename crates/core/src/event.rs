//! Wire event model: canonical serialization, signing, verification.
//!
//! Events follow the standard relay wire shape `{ id, pubkey, created_at,
//! kind, tags, content, sig }`. The id is the SHA-256 of the canonical
//! array `[0, pubkey, created_at, kind, tags, content]` and the signature
//! is BIP-340 Schnorr over that id.

use bitcoin::secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Tag name carrying the replaceable-record identifier.
pub const TAG_IDENTIFIER: &str = "d";

/// Tag name carrying an absolute expiration timestamp (epoch seconds).
pub const TAG_EXPIRATION: &str = "expiration";

/// Errors from event construction and verification.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A signed event as sent to and received from relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// SHA-256 of the canonical serialization, hex.
    pub id: String,
    /// Author x-only public key, hex.
    pub pubkey: String,
    /// Unix seconds at creation. Mutating this after signing invalidates
    /// the signature.
    pub created_at: u64,
    /// Event kind.
    pub kind: u16,
    /// Tag arrays, e.g. `["d", "addr"]`.
    pub tags: Vec<Vec<String>>,
    /// Content body (plaintext JSON or an encrypted payload).
    pub content: String,
    /// BIP-340 Schnorr signature over `id`, hex.
    pub sig: String,
}

/// Event fields chosen by the caller; pubkey/id/sig are filled in at
/// signing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// An event with a known author but no id or signature yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl UnsignedEvent {
    /// Attach an author to a template.
    pub fn from_template(template: &EventTemplate, pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags.clone(),
            content: template.content.clone(),
        }
    }
}

/// Canonical serialization used for hashing:
/// `[0, pubkey, created_at, kind, tags, content]`.
pub fn serialize_event(event: &UnsignedEvent) -> String {
    json!([
        0,
        event.pubkey,
        event.created_at,
        event.kind,
        event.tags,
        event.content
    ])
    .to_string()
}

/// Compute the event id (hex SHA-256 of the canonical serialization).
pub fn get_event_hash(event: &UnsignedEvent) -> String {
    let serialized = serialize_event(event);
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

/// Derive the x-only public key for a secret key, as lowercase hex.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, EventError> {
    let secp = Secp256k1::new();
    let keypair =
        Keypair::from_seckey_slice(&secp, secret_key).map_err(|_| EventError::InvalidSecretKey)?;
    let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
    Ok(hex::encode(xonly.serialize()))
}

/// Hash and sign a template, producing a complete event.
pub fn finalize_event(template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, EventError> {
    let secp = Secp256k1::new();
    let keypair =
        Keypair::from_seckey_slice(&secp, secret_key).map_err(|_| EventError::InvalidSecretKey)?;
    let (xonly, _) = XOnlyPublicKey::from_keypair(&keypair);
    let pubkey = hex::encode(xonly.serialize());

    let unsigned = UnsignedEvent::from_template(template, &pubkey);
    let digest = Sha256::digest(serialize_event(&unsigned).as_bytes());
    let id = hex::encode(digest);

    let message = Message::from_digest(digest.into());
    let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

    Ok(Event {
        id,
        pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig.as_ref()),
    })
}

/// Verify an event: the id must match the canonical hash and the signature
/// must verify over it against the claimed author.
///
/// Returns `Ok(false)` for a well-formed event that fails either check;
/// `Err` only for fields that cannot be decoded at all.
pub fn verify_event(event: &Event) -> Result<bool, EventError> {
    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    let digest = Sha256::digest(serialize_event(&unsigned).as_bytes());
    if hex::encode(digest) != event.id {
        return Ok(false);
    }

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| EventError::InvalidPublicKey(e.to_string()))?;
    let xonly = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| EventError::InvalidPublicKey(e.to_string()))?;

    let sig_bytes =
        hex::decode(&event.sig).map_err(|e| EventError::InvalidSignature(e.to_string()))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| EventError::InvalidSignature(e.to_string()))?;

    let message = Message::from_digest(digest.into());

    let secp = Secp256k1::verification_only();
    Ok(secp.verify_schnorr(&sig, &message, &xonly).is_ok())
}

/// Sort newest first. Equal `created_at` is broken by ascending
/// lexicographic id, a deterministic total order across implementations.
pub fn sort_events_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// First value of the named tag, if present.
pub fn tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event
        .tags
        .iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Expiration tag value in epoch seconds, if present and parseable.
pub fn expiration(event: &Event) -> Option<u64> {
    tag_value(event, TAG_EXPIRATION).and_then(|ts| ts.parse().ok())
}
