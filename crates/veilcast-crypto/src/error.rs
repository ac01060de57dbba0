//! Error types for the epoch sealing layer.

use thiserror::Error;

/// Errors from key derivation and payload sealing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// HKDF expansion failed (output length out of range).
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD encryption failed.
    #[error("payload sealing failed")]
    Seal,

    /// AEAD decryption or authentication failed.
    #[error("payload authentication failed")]
    Open,

    /// A sealed payload was too short or structurally invalid.
    #[error("truncated sealed payload: {len} bytes")]
    Truncated {
        /// Observed payload length.
        len: usize,
    },
}
