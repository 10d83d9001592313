//! Error types for the HTTP client layer

use thiserror::Error;

/// Errors that can occur while executing a request or configuring the client
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced an HTTP response (DNS, TCP, TLS, I/O)
    #[error("transport failure: {0}")]
    Transport(String),

    /// An argument was rejected (bad option value, malformed input)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The option name is not handled by this layer
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
}

/// Errors raised while building or signing a SAS credential
#[derive(Debug, Error)]
pub enum SasError {
    /// The device key is not valid base64
    #[error("device key is not valid base64: {0}")]
    InvalidKey(String),

    /// The system clock is set before the Unix epoch
    #[error("system clock is unavailable")]
    ClockUnavailable,
}
