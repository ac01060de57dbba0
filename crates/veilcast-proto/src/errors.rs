//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while decoding or validating wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A service identifier was not a UUID-shaped string.
    #[error("malformed service id: {0:?}")]
    MalformedServiceId(String),

    /// A response body did not match the documented contract.
    #[error("malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}
