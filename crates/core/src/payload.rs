//! The locator payload: the logical document of endpoints carried inside
//! a record.
//!
//! Wire form is UTF-8 JSON. Decoding is strict about the fields this
//! library interprets (`v`, `ttl`, `updated_at`, `endpoints`) and
//! preserves everything else verbatim, so payloads produced by newer
//! revisions survive a decode/encode cycle.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Current payload version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Priority assumed for endpoints that do not state one.
pub const DEFAULT_PRIORITY: u32 = 1000;

/// Errors from payload decoding and validation.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing or non-numeric field: {0}")]
    BadNumber(&'static str),

    #[error("endpoints must be a non-empty array")]
    BadEndpoints,

    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u32),
}

/// One reachable address for an identity.
///
/// On input both `url` and `uri` are accepted for the address field;
/// output always emits `url` (the canonical name for payload version 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Transport tag: `tcp`, `udp`, `http`, `ws`, or any free string.
    #[serde(rename = "type")]
    pub transport: String,

    /// Address as a URL/URI string; IPv6 literals use bracket notation
    /// with a port.
    #[serde(alias = "uri")]
    pub url: String,

    /// Lower is preferred; treated as 1000 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    /// `ipv4`, `ipv6`, `onion`, or any free string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,

    /// Optional transport key fingerprint.
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
}

impl Endpoint {
    /// A bare endpoint with the given transport tag and address.
    pub fn new(transport: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            url: url.into(),
            priority: None,
            family: None,
            key_fingerprint: None,
        }
    }

    /// A TCP endpoint for `host:port`, bracketing IPv6 literals and
    /// inferring the address family from the host.
    pub fn tcp(host: &str, port: u16) -> Self {
        let (url, family) = format_host_port(host, port);
        Self {
            transport: "tcp".to_string(),
            url,
            priority: None,
            family,
            key_fingerprint: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    pub fn with_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.key_fingerprint = Some(fingerprint.into());
        self
    }

    /// Effective priority for ordering.
    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

fn format_host_port(host: &str, port: u16) -> (String, Option<String>) {
    if host.parse::<Ipv6Addr>().is_ok() {
        (format!("[{host}]:{port}"), Some("ipv6".to_string()))
    } else if host.parse::<Ipv4Addr>().is_ok() {
        (format!("{host}:{port}"), Some("ipv4".to_string()))
    } else if host.ends_with(".onion") {
        (format!("{host}:{port}"), Some("onion".to_string()))
    } else {
        (format!("{host}:{port}"), None)
    }
}

/// The locator document published for an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// Payload format version, `>= 1`.
    pub v: u32,

    /// Freshness window length in seconds from `updated_at`.
    pub ttl: u64,

    /// Publisher's clock at publish time, Unix seconds.
    pub updated_at: u64,

    /// Reachable addresses, most specific first as the publisher chose.
    pub endpoints: Vec<Endpoint>,

    /// Capability tags, e.g. `nostr-connect`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,

    /// Opaque free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Fields this revision does not interpret, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// A version-1 payload for the given endpoints.
    pub fn new(ttl: u64, updated_at: u64, endpoints: Vec<Endpoint>) -> Self {
        Self {
            v: PAYLOAD_VERSION,
            ttl,
            updated_at,
            endpoints,
            caps: None,
            notes: None,
            extra: Map::new(),
        }
    }

    pub fn with_caps(mut self, caps: Vec<String>) -> Self {
        self.caps = Some(caps);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Canonical UTF-8 JSON encoding.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("payload serialization cannot fail")
    }

    /// Strict decode: rejects a missing or non-array `endpoints`,
    /// non-numeric `ttl`/`updated_at`, an empty endpoint list, and
    /// versions below 1.
    pub fn decode(input: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(input)?;
        let object = value.as_object().ok_or(PayloadError::NotAnObject)?;

        match object.get("v") {
            Some(v) if v.is_u64() => {}
            _ => return Err(PayloadError::BadNumber("v")),
        }
        match object.get("ttl") {
            Some(ttl) if ttl.is_u64() => {}
            _ => return Err(PayloadError::BadNumber("ttl")),
        }
        match object.get("updated_at") {
            Some(at) if at.is_u64() => {}
            _ => return Err(PayloadError::BadNumber("updated_at")),
        }
        match object.get("endpoints") {
            Some(Value::Array(endpoints)) if !endpoints.is_empty() => {}
            _ => return Err(PayloadError::BadEndpoints),
        }

        let payload: Payload = serde_json::from_value(value)?;
        if payload.v < 1 {
            return Err(PayloadError::UnsupportedVersion(payload.v));
        }
        Ok(payload)
    }

    /// End of the freshness window computed from the payload alone.
    pub fn expires_at(&self) -> u64 {
        self.updated_at.saturating_add(self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Payload {
        Payload::new(
            600,
            1766726400,
            vec![
                Endpoint::new("tcp", "[2001:db8:abcd:42::10]:9735")
                    .with_priority(5)
                    .with_family("ipv6"),
                Endpoint::new("tcp", "203.0.113.42:9735")
                    .with_priority(10)
                    .with_family("ipv4"),
            ],
        )
        .with_caps(vec!["nostr-connect".to_string()])
    }

    #[test]
    fn encode_decode_roundtrip() {
        let payload = sample();
        let decoded = Payload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.endpoints, payload.endpoints);
    }

    #[test]
    fn accepts_uri_alias_and_emits_url() {
        let input = r#"{"v":1,"ttl":600,"updated_at":1000,
            "endpoints":[{"type":"tcp","uri":"1.2.3.4:8080","priority":10,"family":"ipv4"}]}"#;
        let payload = Payload::decode(input).unwrap();
        assert_eq!(payload.endpoints[0].url, "1.2.3.4:8080");

        let encoded = payload.encode();
        assert!(encoded.contains("\"url\""));
        assert!(!encoded.contains("\"uri\""));
    }

    #[test]
    fn preserves_unknown_fields() {
        let input = r#"{"v":1,"ttl":60,"updated_at":1000,
            "endpoints":[{"type":"tcp","url":"1.2.3.4:1"}],
            "relay_hint":"wss://example.com"}"#;
        let payload = Payload::decode(input).unwrap();
        assert_eq!(
            payload.extra.get("relay_hint").and_then(Value::as_str),
            Some("wss://example.com")
        );
        assert!(payload.encode().contains("relay_hint"));
    }

    #[test]
    fn rejects_missing_or_malformed_fields() {
        let no_endpoints = r#"{"v":1,"ttl":60,"updated_at":1000}"#;
        assert!(matches!(
            Payload::decode(no_endpoints),
            Err(PayloadError::BadEndpoints)
        ));

        let endpoints_not_array = r#"{"v":1,"ttl":60,"updated_at":1000,"endpoints":{}}"#;
        assert!(matches!(
            Payload::decode(endpoints_not_array),
            Err(PayloadError::BadEndpoints)
        ));

        let empty_endpoints = r#"{"v":1,"ttl":60,"updated_at":1000,"endpoints":[]}"#;
        assert!(matches!(
            Payload::decode(empty_endpoints),
            Err(PayloadError::BadEndpoints)
        ));

        let ttl_string = r#"{"v":1,"ttl":"60","updated_at":1000,
            "endpoints":[{"type":"tcp","url":"1.2.3.4:1"}]}"#;
        assert!(matches!(
            Payload::decode(ttl_string),
            Err(PayloadError::BadNumber("ttl"))
        ));

        let negative_updated_at = r#"{"v":1,"ttl":60,"updated_at":-5,
            "endpoints":[{"type":"tcp","url":"1.2.3.4:1"}]}"#;
        assert!(matches!(
            Payload::decode(negative_updated_at),
            Err(PayloadError::BadNumber("updated_at"))
        ));

        let version_zero = r#"{"v":0,"ttl":60,"updated_at":1000,
            "endpoints":[{"type":"tcp","url":"1.2.3.4:1"}]}"#;
        assert!(Payload::decode(version_zero).is_err());

        assert!(Payload::decode("[]").is_err());
        assert!(Payload::decode("not json").is_err());
    }

    #[test]
    fn tcp_constructor_formats_and_classifies() {
        let v6 = Endpoint::tcp("2001:db8::1", 9735);
        assert_eq!(v6.url, "[2001:db8::1]:9735");
        assert_eq!(v6.family.as_deref(), Some("ipv6"));

        let v4 = Endpoint::tcp("203.0.113.42", 9735);
        assert_eq!(v4.url, "203.0.113.42:9735");
        assert_eq!(v4.family.as_deref(), Some("ipv4"));

        let onion = Endpoint::tcp("example2epl4gzvw.onion", 8080);
        assert_eq!(onion.url, "example2epl4gzvw.onion:8080");
        assert_eq!(onion.family.as_deref(), Some("onion"));

        let name = Endpoint::tcp("node.example.com", 8080);
        assert_eq!(name.family, None);
    }

    #[test]
    fn freshness_window() {
        let payload = sample();
        assert_eq!(payload.expires_at(), 1766726400 + 600);

        let forever = Payload::new(u64::MAX, 10, vec![Endpoint::new("tcp", "1.2.3.4:1")]);
        assert_eq!(forever.expires_at(), u64::MAX);
    }
}
