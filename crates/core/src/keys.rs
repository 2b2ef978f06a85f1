//! Key handling and the signer seam.
//!
//! [`Keys`] is the local in-memory signer: it holds the 32-byte secret
//! scalar and the derived x-only public key. Everything above this module
//! works through the [`Signer`] trait and never sees raw secret bytes;
//! the trait is async so a remote signer (a bunker holding the user's
//! keys) can implement the same capability.
//!
//! Accepted key encodings: 64-char hex, raw 32 bytes, and bech32
//! (`nsec1...` for secrets, `npub1...` for public keys). All inputs
//! normalize to the canonical byte form.

use async_trait::async_trait;
use bech32::{Bech32, Hrp};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use crate::event::{finalize_event, Event, EventTemplate};
use crate::nip44;

const HRP_PUBLIC: &str = "npub";
const HRP_SECRET: &str = "nsec";

/// Errors from key parsing, derivation, and signing.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid bech32: {0}")]
    InvalidBech32(String),

    #[error("expected a {expected} key, got {got}")]
    WrongPrefix { expected: &'static str, got: String },

    #[error("key must be 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("conversation key derivation failed: {0}")]
    Conversation(String),
}

/// Signing capability consumed by the record codec, resolver, and
/// publisher.
///
/// Implementations never expose secret bytes; callers obtain derived
/// conversation keys instead.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The signer's x-only public key, lowercase hex.
    fn public_key(&self) -> String;

    /// Sign a template on behalf of this identity.
    async fn sign(&self, template: EventTemplate) -> Result<Event, KeyError>;

    /// Derive the 32-byte conversation key shared with `peer_public_key`
    /// (64-char hex).
    async fn conversation_key(&self, peer_public_key: &str) -> Result<[u8; 32], KeyError>;
}

/// A local identity: secret scalar plus derived public key.
#[derive(Clone)]
pub struct Keys {
    secret: [u8; 32],
    public: [u8; 32],
}

impl Keys {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        loop {
            rand::thread_rng().fill_bytes(&mut secret);
            if let Ok(keys) = Self::from_secret_bytes(secret) {
                return keys;
            }
        }
    }

    /// Build an identity from raw secret bytes.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(&secret).map_err(|_| KeyError::InvalidSecretKey)?;
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        // x-only form: drop the parity byte of the compressed encoding.
        let mut public = [0u8; 32];
        public.copy_from_slice(&public_key.serialize()[1..33]);

        Ok(Self { secret, public })
    }

    /// Parse a secret key given as 64-char hex or bech32 `nsec1...`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        Self::from_secret_bytes(nsec_to_secret_bytes(input)?)
    }

    /// x-only public key, lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public)
    }

    /// Public key in bech32 `npub` form.
    pub fn npub(&self) -> String {
        encode_bech32(HRP_PUBLIC, &self.public)
    }

    /// Secret key in bech32 `nsec` form. Handle with care.
    pub fn nsec(&self) -> String {
        encode_bech32(HRP_SECRET, &self.secret)
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public_key_hex())
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Signer for Keys {
    fn public_key(&self) -> String {
        self.public_key_hex()
    }

    async fn sign(&self, template: EventTemplate) -> Result<Event, KeyError> {
        finalize_event(&template, &self.secret).map_err(|e| KeyError::Signing(e.to_string()))
    }

    async fn conversation_key(&self, peer_public_key: &str) -> Result<[u8; 32], KeyError> {
        nip44::conversation_key(&self.secret, peer_public_key)
            .map_err(|e| KeyError::Conversation(e.to_string()))
    }
}

/// Normalize a public key given as 64-char hex or bech32 `npub1...` to
/// lowercase hex.
pub fn parse_public_key(input: &str) -> Result<String, KeyError> {
    if input.starts_with(HRP_PUBLIC) {
        return npub_to_public_key(input).map(hex::encode);
    }
    let bytes = decode_hex32(input)?;
    Ok(hex::encode(bytes))
}

/// Encode raw x-only public key bytes as `npub1...`.
pub fn public_key_to_npub(public_key: &[u8; 32]) -> String {
    encode_bech32(HRP_PUBLIC, public_key)
}

/// Decode an `npub1...` string to raw public key bytes.
pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32], KeyError> {
    decode_bech32(HRP_PUBLIC, npub)
}

/// Encode raw secret bytes as `nsec1...`.
pub fn secret_bytes_to_nsec(secret: &[u8; 32]) -> String {
    encode_bech32(HRP_SECRET, secret)
}

/// Decode a secret key given as 64-char hex or bech32 `nsec1...`.
pub fn nsec_to_secret_bytes(input: &str) -> Result<[u8; 32], KeyError> {
    if input.starts_with(HRP_SECRET) {
        return decode_bech32(HRP_SECRET, input);
    }
    decode_hex32(input)
}

fn decode_hex32(input: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(input).map_err(|e| KeyError::InvalidHex(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| KeyError::InvalidLength(len))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> String {
    let hrp = Hrp::parse(hrp).expect("valid hrp");
    bech32::encode::<Bech32>(hrp, data).expect("32 bytes always encode")
}

fn decode_bech32(expected_hrp: &'static str, input: &str) -> Result<[u8; 32], KeyError> {
    let (hrp, data) =
        bech32::decode(input).map_err(|e| KeyError::InvalidBech32(e.to_string()))?;

    let expected = Hrp::parse(expected_hrp).expect("valid hrp");
    if hrp != expected {
        return Err(KeyError::WrongPrefix {
            expected: expected_hrp,
            got: hrp.to_string(),
        });
    }

    let len = data.len();
    data.try_into().map_err(|_| KeyError::InvalidLength(len))
}
