//! Epoch key material and multicast payload sealing.
//!
//! The fan-out engine encrypts a group message exactly once under a shared
//! symmetric key ("sender key"). Each conversation carries one generation of
//! key material at a time, an epoch, distributed to members over pairwise
//! sessions and rotated whenever the member or device set changes.
//!
//! This crate owns the symmetric side of that scheme: deriving the per-epoch
//! sealing key from the epoch seed (via HKDF, bound to the group identifier)
//! and sealing the single multicast ciphertext with XChaCha20-Poly1305. The
//! pairwise sessions that carry the seed to recipients are an external
//! concern.
//!
//! # Security
//!
//! The sealing key is bound to both the epoch seed and the group identifier,
//! so a seed leaked from one conversation cannot decrypt another. The group
//! identifier also rides as AEAD associated data, which makes cross-group
//! ciphertext splicing fail authentication.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod epoch;
pub mod error;
pub mod sealing;

pub use epoch::{EPOCH_SEED_LEN, EpochMaterial, membership_digest};
pub use error::CryptoError;
pub use sealing::{NONCE_LEN, SealedPayload, open_payload, seal_payload};
