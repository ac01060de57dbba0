//! Veilcast fan-out engine core logic.
//!
//! Decides, per conversation and per recipient, whether a message can be
//! encrypted once for the whole group (sender-key multicast) or must fall
//! back to pairwise fanout, runs the distribution-key handshakes, and
//! interprets the server's partial-failure responses with bounded retry.
//!
//! # Architecture
//!
//! The engine is split into small pieces that each do one thing and are
//! testable without I/O where possible:
//!
//! - [`registration`]: per-recipient session/registration-id classifier
//! - [`evaluate`]: partitions intended recipients into fanout-only,
//!   needs-distribution, and sender-key-ready
//! - [`distribution`]: concurrent per-recipient handshake dispatch
//! - [`multicast`]: builds the single sealed ciphertext and the composite
//!   access credential
//! - [`retry`]: explicit response/retry step function (no recursion)
//! - [`engine`]: the orchestrator driving the above end to end
//!
//! All external effects go through the collaborator traits in [`stores`];
//! [`memory`] provides in-memory reference implementations used by tests
//! and the simulation harness.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod distribution;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod failure;
pub mod memory;
pub mod multicast;
pub mod registration;
pub mod retry;
pub mod stores;
pub mod types;

pub use engine::{Collaborators, SendRequest, SenderKeyEngine};
pub use error::{HandshakeError, MulticastFailure, SendError, TransportError};
pub use failure::{FailureSink, RecipientFailure};
pub use retry::RETRY_BUDGET;
pub use types::{
    ConversationKind, DistributionMessage, GroupId, Partition, ParticipantState, Recipient,
    RegistrationIdStatus, SendResult, SenderCertificate, SessionRecord, Thread, ThreadId,
};
