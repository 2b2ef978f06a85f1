//! Client error taxonomy.
//!
//! Every fallible operation in this crate returns one of these
//! categories:
//!
//! - [`ClientError::Argument`] — malformed caller input (keys, URLs);
//!   always surfaced immediately.
//! - [`ClientError::Timeout`] — the per-call deadline elapsed; the call
//!   failed even if a relay answers later.
//! - [`ClientError::Relay`] — every targeted relay failed (a partial
//!   failure is not an error; see the resolver and publisher policies).
//! - [`ClientError::Decryption`] — the caller is a recipient but the
//!   content could not be decrypted, or a wrapped container is
//!   malformed.
//! - [`ClientError::Protocol`] — everything else: malformed frames or
//!   payloads, internal serialization failures.

use locator_core::{EventError, KeyError, PayloadError, RecordError};
use thiserror::Error;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Failure categories propagated out of the resolver, publisher, and
/// pool.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("relay failure: {0}")]
    Relay(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<KeyError> for ClientError {
    fn from(err: KeyError) -> Self {
        ClientError::Argument(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::Argument(err.to_string())
    }
}

impl From<RecordError> for ClientError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Key(key) => key.into(),
            RecordError::Decryption(msg) | RecordError::MalformedWrap(msg) => {
                ClientError::Decryption(msg)
            }
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<EventError> for ClientError {
    fn from(err: EventError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<PayloadError> for ClientError {
    fn from(err: PayloadError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
