//! Shared-identity convenience.
//!
//! A group identity is an ordinary key pair handed to every member, so
//! any of them can publish and resolve the group's locator records. No
//! special wire behaviour: this is a façade over the standard resolver
//! with the group's key as both author and decryption key.

use crate::error::Result;
use crate::resolver::{ResolveOptions, Resolver};
use locator_core::{Keys, Payload, DEFAULT_IDENTIFIER};

/// A key pair intended to be shared among group members.
#[derive(Debug, Clone)]
pub struct GroupIdentity {
    keys: Keys,
}

impl GroupIdentity {
    /// Create a fresh identity for a new group.
    pub fn generate() -> Self {
        Self {
            keys: Keys::generate(),
        }
    }

    /// Adopt an existing shared secret (64-hex or `nsec1...`).
    pub fn from_secret(input: &str) -> Result<Self> {
        Ok(Self {
            keys: Keys::parse(input)?,
        })
    }

    /// The group's public key, lowercase hex.
    pub fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    /// The group's public key for distribution to members.
    pub fn npub(&self) -> String {
        self.keys.npub()
    }

    /// The shared secret for distribution to members. Handle with care.
    pub fn nsec(&self) -> String {
        self.keys.nsec()
    }

    /// The group's keys as a signer, for publishing group records.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Resolve the group's own locator record: the group key is the
    /// author and the decryption key.
    pub async fn resolve(
        &self,
        resolver: &Resolver,
        identifier: &str,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        resolver
            .resolve(
                &self.keys.public_key_hex(),
                Some(&self.keys),
                identifier,
                options,
            )
            .await
    }

    /// [`resolve`](Self::resolve) with the default `"addr"` identifier.
    pub async fn resolve_default(
        &self,
        resolver: &Resolver,
        options: ResolveOptions,
    ) -> Result<Option<Payload>> {
        self.resolve(resolver, DEFAULT_IDENTIFIER, options).await
    }
}
