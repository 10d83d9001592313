//! Fixed protocol literals
//!
//! These values are part of the service contract and must match it
//! byte-for-byte.

use std::time::Duration;

/// Query suffix appended to every event/command relative path
pub const API_VERSION: &str = "?api-version=2016-02-03";

/// Path suffix for device-to-cloud events
pub const EVENT_ENDPOINT: &str = "/messages/events";

/// Path suffix for the cloud-to-device poll endpoint
pub const MESSAGE_ENDPOINT: &str = "/messages/devicebound";

/// Path suffix prefixing a specific polled command (ETag follows)
pub const MESSAGE_ITEM_ENDPOINT: &str = "/messages/devicebound/";

/// Appended before the api-version suffix when abandoning a command
pub const ABANDON_SUFFIX: &str = "/abandon";

/// Appended after the api-version suffix when rejecting a command
pub const REJECT_SUFFIX: &str = "?reject";

/// Prefix marking application properties in headers and batch payloads
pub const IOTHUB_APP_PREFIX: &str = "iothub-app-";

pub const IOTHUB_MESSAGE_ID: &str = "iothub-messageid";
pub const IOTHUB_CORRELATION_ID: &str = "iothub-correlationid";

pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";
pub const APPLICATION_VND_MICROSOFT_IOTHUB_JSON: &str = "application/vnd.microsoft.iothub.json";

pub const USER_AGENT: &str = concat!("iothubclient/", env!("CARGO_PKG_VERSION"));

/// Maximum per-request message size contribution
pub const MAXIMUM_MESSAGE_SIZE: usize = 255 * 1024 - 1;

/// Fixed per-message overhead charged against the size limit
pub const PAYLOAD_OVERHEAD: usize = 384;

/// Per-property overhead, on top of name and value lengths
pub const PROPERTY_OVERHEAD: usize = 16;

/// Floor between two consecutive command polls unless overridden
pub const DEFAULT_MINIMUM_POLLING_INTERVAL: Duration = Duration::from_secs(1500);

/// Validity window of per-request SAS tokens
pub const SAS_TOKEN_TTL: Duration = Duration::from_secs(3600);
