//! Core codec for identity-bound endpoint locator records.
//!
//! This crate provides everything below the network: key handling and the
//! signer seam, the wire event model with BIP-340 signing, NIP-44
//! encryption, the locator payload codec, the kind-30058 record codec
//! with its four protection modes, and deterministic endpoint selection.
//! It performs no I/O; the companion client crate layers relay
//! connections, resolution, and publishing on top.

mod event;
mod keys;
pub mod nip44;
mod payload;
mod record;
mod select;

// Wire events: model, canonical hashing, signing, verification.
pub use event::{
    expiration, finalize_event, get_event_hash, get_public_key_hex, serialize_event,
    sort_events_newest_first, tag_value, verify_event, Event, EventError, EventTemplate,
    UnsignedEvent, TAG_EXPIRATION, TAG_IDENTIFIER,
};

// Identity and the signer capability.
pub use keys::{
    npub_to_public_key, nsec_to_secret_bytes, parse_public_key, public_key_to_npub,
    secret_bytes_to_nsec, KeyError, Keys, Signer,
};

// Locator payloads.
pub use payload::{
    Endpoint, Payload, PayloadError, DEFAULT_PRIORITY, PAYLOAD_VERSION,
};

// Locator records (kind 30058).
pub use record::{
    build_record, identifier, is_private, open_record, EncryptMode, RecordError, RecordOptions,
    WrappedContent, DEFAULT_IDENTIFIER, KIND_LOCATOR, KIND_RELAY_LIST, TAG_PRIVATE,
};

// Endpoint ordering.
pub use select::select_endpoints;
