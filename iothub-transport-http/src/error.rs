//! Error types for the HTTP transport engine

use http_client::{HttpError, SasError};
use thiserror::Error;

/// Errors surfaced by the synchronous transport operations
///
/// Delivery outcomes are *not* errors: HTTP failures during a work cycle
/// leave messages queued for retry and are reported through callbacks, not
/// through this enum.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A required argument is missing or malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device id is already present in the registry
    #[error("device `{0}` is already registered")]
    DuplicateDevice(String),

    /// No registered device matches the handle
    #[error("device not found")]
    DeviceNotFound,

    /// SAS credential construction failed
    #[error(transparent)]
    Sas(#[from] SasError),

    /// A lower-layer HTTP client error
    #[error(transparent)]
    Http(#[from] HttpError),
}

pub type Result<T> = std::result::Result<T, TransportError>;
