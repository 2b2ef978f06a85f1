//! Locator record codec: building, encrypting, and opening kind-30058
//! events.
//!
//! A locator record is a parameterized replaceable event whose content
//! carries a [`Payload`](crate::Payload) in one of four forms:
//!
//! - **Public** — plaintext JSON, readable by anyone.
//! - **Self-addressed** — encrypted to the publisher's own key.
//! - **Targeted** — encrypted to a single peer.
//! - **Wrapped** — one ciphertext under a fresh session key, plus one
//!   encrypted copy of that session key per recipient.
//!
//! Relays only ever see the content string and the tags; endpoint data
//! never appears in tags in any mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::event::{tag_value, Event, EventTemplate, TAG_IDENTIFIER};
use crate::keys::{parse_public_key, KeyError, Keys, Signer};
use crate::nip44;
use crate::payload::Payload;

/// Event kind of a locator record (parameterized replaceable).
pub const KIND_LOCATOR: u16 = 30058;

/// Event kind of a relay-list advertisement consumed by gossip discovery.
pub const KIND_RELAY_LIST: u16 = 10002;

/// Identifier used when the caller does not name one.
pub const DEFAULT_IDENTIFIER: &str = "addr";

/// Tag marking a locator as non-discoverable by non-targets.
pub const TAG_PRIVATE: &str = "private";

/// Errors from building and opening locator records.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("wrapped content is malformed: {0}")]
    MalformedWrap(String),

    #[error("wrapped publish requires at least one recipient")]
    NoRecipients,
}

/// How the payload is protected inside the event content.
#[derive(Debug, Clone)]
pub enum EncryptMode<'a> {
    /// Plaintext payload JSON.
    Public,
    /// Encrypted to the publisher itself.
    SelfAddressed,
    /// Encrypted to one peer (x-only hex or npub).
    Targeted(&'a str),
    /// Encrypted once under a session key wrapped per recipient.
    Wrapped(&'a [String]),
}

/// Multi-recipient content: the payload ciphertext plus per-recipient
/// envelopes of the session key.
///
/// `wraps` maps recipient public key (hex) to the hex-encoded session
/// secret encrypted under the conversation key between publisher and
/// that recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedContent {
    pub ciphertext: String,
    pub wraps: BTreeMap<String, String>,
}

/// Extra tags applied at build time.
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// Add `["private", "true"]`, marking the locator non-discoverable
    /// by non-targets.
    pub private: bool,
    /// Add `["expiration", <epoch>]`, hardening revocation.
    pub expiration: Option<u64>,
}

/// Build and sign a locator record.
///
/// Tags always include `["d", identifier]`. The signer provides the
/// author key, the signature, and every conversation key; raw secrets
/// never pass through here. Wrapped mode generates a fresh random
/// session key per call.
pub async fn build_record(
    signer: &dyn Signer,
    payload: &Payload,
    identifier: &str,
    mode: EncryptMode<'_>,
    created_at: u64,
    options: &RecordOptions,
) -> Result<Event, RecordError> {
    let plaintext = payload.encode();

    let content = match mode {
        EncryptMode::Public => plaintext,
        EncryptMode::SelfAddressed => {
            let key = signer.conversation_key(&signer.public_key()).await?;
            nip44::encrypt_with_key(&key, &plaintext)
                .map_err(|e| RecordError::Encryption(e.to_string()))?
        }
        EncryptMode::Targeted(peer) => {
            let peer = parse_public_key(peer)?;
            let key = signer.conversation_key(&peer).await?;
            nip44::encrypt_with_key(&key, &plaintext)
                .map_err(|e| RecordError::Encryption(e.to_string()))?
        }
        EncryptMode::Wrapped(recipients) => {
            let wrapped = wrap_payload(signer, &plaintext, recipients).await?;
            serde_json::to_string(&wrapped)
                .map_err(|e| RecordError::Encryption(e.to_string()))?
        }
    };

    let mut tags = vec![vec![TAG_IDENTIFIER.to_string(), identifier.to_string()]];
    if options.private {
        tags.push(vec![TAG_PRIVATE.to_string(), "true".to_string()]);
    }
    if let Some(expiration) = options.expiration {
        tags.push(vec![
            crate::event::TAG_EXPIRATION.to_string(),
            expiration.to_string(),
        ]);
    }

    let template = EventTemplate {
        created_at,
        kind: KIND_LOCATOR,
        tags,
        content,
    };
    Ok(signer.sign(template).await?)
}

/// Encrypt the payload under a fresh session key and wrap that key for
/// every recipient.
///
/// The inner ciphertext uses the session key's conversation with itself,
/// so holding the session secret is sufficient to open it.
async fn wrap_payload(
    signer: &dyn Signer,
    plaintext: &str,
    recipients: &[String],
) -> Result<WrappedContent, RecordError> {
    if recipients.is_empty() {
        return Err(RecordError::NoRecipients);
    }

    let session = Keys::generate();
    let session_key = nip44::conversation_key(session.secret_bytes(), &session.public_key_hex())
        .map_err(|e| RecordError::Encryption(e.to_string()))?;
    let ciphertext = nip44::encrypt_with_key(&session_key, plaintext)
        .map_err(|e| RecordError::Encryption(e.to_string()))?;

    let session_secret_hex = hex::encode(session.secret_bytes());
    let mut wraps = BTreeMap::new();
    for recipient in recipients {
        let recipient = parse_public_key(recipient)?;
        let key = signer.conversation_key(&recipient).await?;
        let envelope = nip44::encrypt_with_key(&key, &session_secret_hex)
            .map_err(|e| RecordError::Encryption(e.to_string()))?;
        wraps.insert(recipient, envelope);
    }

    Ok(WrappedContent { ciphertext, wraps })
}

/// Open a record's content, detecting its mode.
///
/// Returns the plaintext payload JSON, or `None` when the content is
/// wrapped and the caller is not among the recipients (or cannot decrypt
/// for lack of a signer). Decryption failures for an actual recipient
/// are errors.
///
/// Detection order:
/// 1. content parses as a JSON object with exactly the wrapped shape
///    (`ciphertext` + `wraps`) — wrapped;
/// 2. a signer is available and the content does not start with `{` —
///    targeted or self-addressed ciphertext;
/// 3. otherwise — public plaintext.
pub async fn open_record(
    event: &Event,
    signer: Option<&dyn Signer>,
) -> Result<Option<String>, RecordError> {
    if let Some(wrapped) = parse_wrapped(&event.content) {
        let wrapped = wrapped?;
        let Some(signer) = signer else {
            return Ok(None);
        };
        return open_wrapped(event, signer, &wrapped).await;
    }

    if let Some(signer) = signer {
        if !event.content.trim_start().starts_with('{') {
            let key = signer.conversation_key(&event.pubkey).await?;
            let plaintext = nip44::decrypt_with_key(&key, &event.content)
                .map_err(|e| RecordError::Decryption(e.to_string()))?;
            return Ok(Some(plaintext));
        }
    }

    Ok(Some(event.content.clone()))
}

/// Shape check for wrapped content: a JSON object carrying both
/// `ciphertext` and `wraps`. Returns `None` for anything else, and an
/// error when the shape matches but the structure does not deserialize.
fn parse_wrapped(content: &str) -> Option<Result<WrappedContent, RecordError>> {
    if !content.trim_start().starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(content).ok()?;
    let object = value.as_object()?;
    if !object.contains_key("ciphertext") || !object.contains_key("wraps") {
        return None;
    }
    Some(
        serde_json::from_value(value).map_err(|e| RecordError::MalformedWrap(e.to_string())),
    )
}

async fn open_wrapped(
    event: &Event,
    signer: &dyn Signer,
    wrapped: &WrappedContent,
) -> Result<Option<String>, RecordError> {
    let Some(envelope) = wrapped.wraps.get(&signer.public_key()) else {
        return Ok(None);
    };

    let key = signer.conversation_key(&event.pubkey).await?;
    let session_secret_hex = nip44::decrypt_with_key(&key, envelope)
        .map_err(|e| RecordError::Decryption(e.to_string()))?;

    let session_secret: [u8; 32] = hex::decode(&session_secret_hex)
        .map_err(|e| RecordError::Decryption(e.to_string()))?
        .try_into()
        .map_err(|_| RecordError::Decryption("session key is not 32 bytes".to_string()))?;

    let session = Keys::from_secret_bytes(session_secret)
        .map_err(|e| RecordError::Decryption(e.to_string()))?;
    let session_key = nip44::conversation_key(&session_secret, &session.public_key_hex())
        .map_err(|e| RecordError::Decryption(e.to_string()))?;

    let plaintext = nip44::decrypt_with_key(&session_key, &wrapped.ciphertext)
        .map_err(|e| RecordError::Decryption(e.to_string()))?;
    Ok(Some(plaintext))
}

/// The record's `d`-tag identifier, if present.
pub fn identifier(event: &Event) -> Option<&str> {
    tag_value(event, TAG_IDENTIFIER)
}

/// Whether the publisher marked the locator private.
pub fn is_private(event: &Event) -> bool {
    tag_value(event, TAG_PRIVATE) == Some("true")
}
