//! Wire contract types for the Veilcast multicast delivery engine.
//!
//! The multicast endpoint speaks a small JSON contract: a 200 response lists
//! the identities the server considers unregistered, while 409 and 410
//! responses carry per-account device deltas. These body shapes must be
//! reproduced bit-for-bit, so every field keeps its exact wire name.
//!
//! Everything above the contract (retry policy, session repair, handshake
//! dispatch) lives in `veilcast-core`; this crate only defines the shapes
//! that cross the transport boundary.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod errors;
pub mod ids;
pub mod request;
pub mod responses;

pub use access::{ACCESS_KEY_LEN, AccessKey, CompositeAccessKey};
pub use errors::ProtocolError;
pub use ids::{DeviceId, ServiceId};
pub use request::{MulticastMetadata, TransportResponse};
pub use responses::{
    AccountMismatchedDevices, AccountStaleDevices, MismatchedDevices, MulticastSuccess,
    StaleDevices,
};
