//! Shared Access Signature credentials
//!
//! A [`SasCredential`] is built once per device from its base64 device key
//! and the resource URI it authenticates against. Each request asks for a
//! fresh token so that long-lived transports never present an expired
//! `Authorization` value.
//!
//! Token shape (fixed by the service):
//!
//! ```text
//! SharedAccessSignature sr=<uri>&sig=<signature>&se=<expiry>[&skn=<keyName>]
//! ```
//!
//! where `signature = base64(HMAC-SHA256(key, "<url-encoded uri>\n<expiry>"))`
//! and `uri` / `signature` are URL-encoded in the final string.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::hmac;

use crate::error::SasError;

/// A signing credential scoped to one resource URI
#[derive(Debug, Clone)]
pub struct SasCredential {
    key: Vec<u8>,
    resource_uri: String,
    key_name: Option<String>,
}

impl SasCredential {
    /// Build a credential from a base64-encoded device key
    ///
    /// `key_name` is omitted from tokens when `None` (device-scoped keys
    /// have no policy name).
    pub fn new(
        device_key: &str,
        resource_uri: impl Into<String>,
        key_name: Option<&str>,
    ) -> Result<Self, SasError> {
        let key = STANDARD
            .decode(device_key)
            .map_err(|e| SasError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key,
            resource_uri: resource_uri.into(),
            key_name: key_name.map(str::to_owned),
        })
    }

    /// Generate a token valid until `expiry` (seconds since the Unix epoch)
    pub fn token(&self, expiry: u64) -> String {
        let encoded_uri = url_encode(&self.resource_uri);
        let to_sign = format!("{}\n{}", encoded_uri, expiry);

        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.key);
        let tag = hmac::sign(&key, to_sign.as_bytes());
        let signature = STANDARD.encode(tag.as_ref());

        let mut token = format!(
            "SharedAccessSignature sr={}&sig={}&se={}",
            encoded_uri,
            url_encode(&signature),
            expiry
        );
        if let Some(key_name) = &self.key_name {
            token.push_str("&skn=");
            token.push_str(key_name);
        }
        token
    }

    /// Generate a token expiring `ttl` from now
    pub fn token_now(&self, ttl: Duration) -> Result<String, SasError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| SasError::ClockUnavailable)?;
        Ok(self.token((now + ttl).as_secs()))
    }

    /// The resource URI this credential signs for
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }
}

/// Percent-encoding as the service expects it: unreserved characters pass
/// through, everything else (including space) becomes `%XX`.
pub fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";
