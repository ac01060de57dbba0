//! Error taxonomy for the fan-out engine.
//!
//! Kinds map onto how the caller must react:
//!
//! - recoverable this call: network/timeout, solved spam challenge; the
//!   engine retries within its budget
//! - recoverable next call: [`MulticastFailure::DeviceUpdate`] and
//!   [`MulticastFailure::StaleDevices`]; this call fails but the repair has
//!   already been applied, so the next attempt will succeed
//! - permanent for this send: invalid credential, unresolvable recipient,
//!   oversize ciphertext; the caller falls back to pairwise fanout
//! - per-recipient terminal: unregistered accounts, reported in the result
//!   rather than as an operation error

use thiserror::Error;
use veilcast_proto::ServiceId;

use crate::{multicast::MAX_MULTICAST_CIPHERTEXT_BYTES, types::SendResult};

/// Failure of a single collaborator store operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("store operation failed: {0}")]
pub struct StoreError(pub String);

/// Network-level transport failure (the server was never reached, or the
/// request timed out). Anything the server actually answered becomes a
/// `TransportResponse` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failure or timeout.
    #[error("network failure or timeout: {0}")]
    Network(String),
}

/// Failure sending one pairwise distribution handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The recipient account no longer exists. Marked unregistered
    /// persistently, separate from this operation's result.
    #[error("recipient account no longer exists")]
    UnregisteredAccount,

    /// Any other send failure.
    #[error("handshake send failed: {0}")]
    Send(String),
}

/// Terminal failure kinds for one multicast submission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MulticastFailure {
    /// Network failures exhausted the retry budget.
    #[error("network failure after exhausting the retry budget")]
    NetworkExhausted,

    /// HTTP 401: the composite credential was rejected. Multicast is
    /// unusable for this send; deliver pairwise instead.
    #[error("composite access credential rejected")]
    InvalidAuthHeader,

    /// HTTP 404: the server could not resolve one or more identities.
    #[error("one or more recipient identities could not be resolved")]
    InvalidRecipient,

    /// HTTP 409: device sets drifted. The deltas have been applied and the
    /// epoch rotated; the caller resends after this call fails.
    #[error("recipient device sets changed; repaired, resend required")]
    DeviceUpdate,

    /// HTTP 410: stale device sessions. Listed sessions have been reset and
    /// the epoch rotated; the caller resends after this call fails.
    #[error("stale device sessions reset; resend required")]
    StaleDevices,

    /// HTTP 428: the anti-abuse challenge could not be solved.
    #[error("spam challenge required and not solved")]
    SpamChallengeRequired,

    /// The retry budget ran out on a retryable path that was not itself a
    /// network failure (a solved spam challenge with no attempts left).
    #[error("retry budget exhausted")]
    RetryBudgetExhausted,

    /// The sealed ciphertext exceeds the server's hard limit. A multicast
    /// ciphertext cannot be sharded; the whole operation fails with zero
    /// network calls.
    #[error("multicast ciphertext of {size} bytes exceeds {MAX_MULTICAST_CIPHERTEXT_BYTES}")]
    OversizeMessage {
        /// Size of the rejected ciphertext.
        size: usize,
    },

    /// Unexpected status code, or a 200 body that failed to decode.
    #[error("unhandled server response: status {status}")]
    Unhandled {
        /// The status code observed.
        status: u16,
    },

    /// A ready recipient has no sealed-sender access key. Caught before any
    /// network call.
    #[error("recipient {0} has no sealed-sender access key")]
    MissingAccessKey(ServiceId),

    /// Programmer-error condition (group id mismatch, key derivation
    /// failure). Asserted in debug builds; degraded to a failed send in
    /// release.
    #[error("integrity violation: {0}")]
    IntegrityViolation(&'static str),
}

/// Error building the sealed multicast submission.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// A collaborator store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The submission itself is invalid (oversize, missing access key).
    #[error(transparent)]
    Failure(#[from] MulticastFailure),
}

/// Operation-level error for one send.
#[derive(Debug, Error)]
pub enum SendError {
    /// A collaborator store failed outside any per-recipient context.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The multicast submission terminally failed for all submitted
    /// recipients.
    #[error("multicast submission failed: {0}")]
    Multicast(MulticastFailure),

    /// The operation completed but at least one recipient failed. Failure
    /// is sticky at the operation level even when others succeeded.
    #[error("one or more recipients failed during sender key send")]
    Partial {
        /// The full per-recipient summary, successes included.
        result: SendResult,
    },
}
