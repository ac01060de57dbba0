//! Test harness for the Veilcast fan-out engine.
//!
//! Scripted implementations of the network-facing collaborator traits, plus
//! a scenario builder that wires a full engine against in-memory stores.
//! Integration tests drive whole send operations through canned server
//! responses without any real network.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod scripted;

pub use scenario::Scenario;
pub use scripted::{
    RecordedSubmission, RecordingHandshakeSender, ScriptedTransport, StaticChallengeSolver,
};
