//! NIP-44 versioned encryption (version 2).
//!
//! Locator record contents are encrypted with this scheme in every
//! non-public mode. The API is conversation-key centric: callers derive a
//! 32-byte conversation key once per peer (or obtain one from a
//! [`Signer`](crate::Signer)) and reuse it for any number of messages.
//!
//! Construction:
//! - ECDH over secp256k1, x-coordinate only
//! - HKDF-SHA256 (extract with salt `nip44-v2`, per-message expand)
//! - ChaCha20 body, HMAC-SHA256 over nonce and ciphertext
//! - padded plaintext, base64 payload `version || nonce || ciphertext || mac`
//!
//! Public keys are the 64-char x-only hex used everywhere on the wire; the
//! even-parity point is lifted internally, which both sides of a
//! conversation agree on because only the shared x-coordinate is consumed.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use bitcoin::secp256k1::{ecdh, PublicKey, SecretKey};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Payload format version produced and accepted by this module.
pub const VERSION: u8 = 2;

/// Maximum plaintext length in bytes.
pub const MAX_PLAINTEXT_LEN: usize = 65535;

const NONCE_SIZE: usize = 32;
const MAC_SIZE: usize = 32;
const MIN_PADDED_LEN: usize = 32;
const HKDF_SALT: &[u8] = b"nip44-v2";

type HmacSha256 = Hmac<Sha256>;

/// Errors from conversation-key derivation and payload processing.
#[derive(Debug, Error)]
pub enum Nip44Error {
    #[error("plaintext length must be 1..=65535 bytes")]
    PlaintextLength,

    #[error("invalid payload structure")]
    InvalidPayload,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("invalid padding")]
    InvalidPadding,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Derive the conversation key between a secret key and a peer's x-only
/// public key (64-char hex).
///
/// Symmetric in its inputs: `conversation_key(a, B) ==
/// conversation_key(b, A)` for the corresponding key pairs.
pub fn conversation_key(
    secret_key: &[u8; 32],
    peer_public_key_hex: &str,
) -> Result<[u8; 32], Nip44Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|_| Nip44Error::InvalidSecretKey)?;
    let pk = lift_x_only(peer_public_key_hex)?;

    // Shared point is 64 bytes of x || y; NIP-44 consumes only x.
    let shared_point = ecdh::shared_secret_point(&pk, &sk);
    let shared_x = &shared_point[..32];

    let (prk, _) = Hkdf::<Sha256>::extract(Some(HKDF_SALT), shared_x);

    let mut key = [0u8; 32];
    key.copy_from_slice(&prk);
    Ok(key)
}

/// Lift a 64-char x-only hex public key to the even-parity curve point.
fn lift_x_only(public_key_hex: &str) -> Result<PublicKey, Nip44Error> {
    let bytes = hex::decode(public_key_hex).map_err(|_| Nip44Error::InvalidPublicKey)?;
    if bytes.len() != 32 {
        return Err(Nip44Error::InvalidPublicKey);
    }
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(&bytes);
    PublicKey::from_slice(&compressed).map_err(|_| Nip44Error::InvalidPublicKey)
}

/// Per-message keys: ChaCha20 key, ChaCha20 nonce, HMAC key.
fn message_keys(
    conversation_key: &[u8; 32],
    nonce: &[u8; 32],
) -> Result<([u8; 32], [u8; 12], [u8; 32]), Nip44Error> {
    let hkdf =
        Hkdf::<Sha256>::from_prk(conversation_key).map_err(|_| Nip44Error::InvalidPayload)?;

    let mut okm = [0u8; 76];
    hkdf.expand(nonce, &mut okm)
        .map_err(|_| Nip44Error::InvalidPayload)?;

    let mut chacha_key = [0u8; 32];
    let mut chacha_nonce = [0u8; 12];
    let mut hmac_key = [0u8; 32];
    chacha_key.copy_from_slice(&okm[0..32]);
    chacha_nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);

    Ok((chacha_key, chacha_nonce, hmac_key))
}

/// Padded length: power-of-two buckets up to 256 bytes, then multiples of
/// 32, with a 32-byte floor.
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        32
    } else if unpadded_len <= 256 {
        unpadded_len.next_power_of_two()
    } else {
        unpadded_len.div_ceil(32) * 32
    }
}

/// Pad: u16 big-endian length prefix, plaintext, zero fill.
fn pad(plaintext: &str) -> Result<Vec<u8>, Nip44Error> {
    let bytes = plaintext.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_PLAINTEXT_LEN {
        return Err(Nip44Error::PlaintextLength);
    }

    let padded_len = calc_padded_len(2 + bytes.len());
    let mut padded = vec![0u8; padded_len];
    padded[..2].copy_from_slice(&(bytes.len() as u16).to_be_bytes());
    padded[2..2 + bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn unpad(padded: &[u8]) -> Result<String, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let plaintext_len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if plaintext_len == 0 || plaintext_len > MAX_PLAINTEXT_LEN {
        return Err(Nip44Error::InvalidPadding);
    }

    let unpadded_len = 2 + plaintext_len;
    if padded.len() != calc_padded_len(unpadded_len) || padded.len() < unpadded_len {
        return Err(Nip44Error::InvalidPadding);
    }
    if padded[unpadded_len..].iter().any(|&b| b != 0) {
        return Err(Nip44Error::InvalidPadding);
    }

    String::from_utf8(padded[2..unpadded_len].to_vec()).map_err(|_| Nip44Error::InvalidPadding)
}

/// Encrypt under an established conversation key.
pub fn encrypt_with_key(
    conversation_key: &[u8; 32],
    plaintext: &str,
) -> Result<String, Nip44Error> {
    let mut nonce = [0u8; NONCE_SIZE];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut nonce);

    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, &nonce)?;

    let mut ciphertext = pad(plaintext)?;
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut ciphertext);

    let mut mac = HmacSha256::new_from_slice(&hmac_key).map_err(|_| Nip44Error::InvalidPayload)?;
    mac.update(&nonce);
    mac.update(&ciphertext);
    let mac_bytes = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len() + MAC_SIZE);
    payload.push(VERSION);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac_bytes);

    Ok(BASE64_STANDARD.encode(&payload))
}

/// Decrypt a payload under an established conversation key.
pub fn decrypt_with_key(
    conversation_key: &[u8; 32],
    payload: &str,
) -> Result<String, Nip44Error> {
    let decoded = BASE64_STANDARD.decode(payload)?;

    if decoded.len() < 1 + NONCE_SIZE + MIN_PADDED_LEN + MAC_SIZE {
        return Err(Nip44Error::InvalidPayload);
    }

    let version = decoded[0];
    if version != VERSION {
        return Err(Nip44Error::UnsupportedVersion(version));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&decoded[1..1 + NONCE_SIZE]);
    let ciphertext = &decoded[1 + NONCE_SIZE..decoded.len() - MAC_SIZE];
    let mac_received = &decoded[decoded.len() - MAC_SIZE..];

    let (chacha_key, chacha_nonce, hmac_key) = message_keys(conversation_key, &nonce)?;

    let mut mac = HmacSha256::new_from_slice(&hmac_key).map_err(|_| Nip44Error::InvalidPayload)?;
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(mac_received)
        .map_err(|_| Nip44Error::MacMismatch)?;

    let mut plaintext = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut plaintext);

    unpad(&plaintext)
}

/// Encrypt for a peer: derive the conversation key, then encrypt.
pub fn encrypt(
    secret_key: &[u8; 32],
    peer_public_key_hex: &str,
    plaintext: &str,
) -> Result<String, Nip44Error> {
    let key = conversation_key(secret_key, peer_public_key_hex)?;
    encrypt_with_key(&key, plaintext)
}

/// Decrypt from a peer: derive the conversation key, then decrypt.
pub fn decrypt(
    secret_key: &[u8; 32],
    peer_public_key_hex: &str,
    payload: &str,
) -> Result<String, Nip44Error> {
    let key = conversation_key(secret_key, peer_public_key_hex)?;
    decrypt_with_key(&key, payload)
}
