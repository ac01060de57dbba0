//! Multicast submission metadata and the transport response envelope.

use std::time::Duration;

use bytes::Bytes;

/// Delivery metadata attached to one multicast submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastMetadata {
    /// Deliver only to currently-online devices; do not queue.
    pub online: bool,

    /// The message warrants waking the recipient's device.
    pub urgent: bool,

    /// Story send (relaxed delivery semantics server-side).
    pub story: bool,

    /// Client message timestamp, milliseconds since the epoch.
    pub timestamp_ms: u64,
}

/// Response envelope returned by the multicast transport.
///
/// The transport resolves at the HTTP layer: any reachable server produces a
/// `TransportResponse` regardless of status code. Only network-level failure
/// (unreachable, timeout) surfaces as a transport error instead.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,

    /// Raw response body, if any.
    pub body: Option<Bytes>,

    /// Server retry-after hint, if present (seen on 428 responses).
    pub retry_after: Option<Duration>,
}
