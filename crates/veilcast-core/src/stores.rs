//! Collaborator traits consumed by the fan-out engine.
//!
//! The engine owns no persistence and no sockets; everything external comes
//! through these narrow contracts. Production backs them with the real
//! directory, session database, and HTTP stack; tests use the in-memory
//! implementations in [`crate::memory`] and the scripted doubles from the
//! harness crate.
//!
//! Each mutating method is atomic on its own. The engine adds a per-thread
//! send lock around the dispatcher's re-check-and-handshake critical
//! section, which together gives single-writer semantics for a thread's
//! distribution-key state without binding these traits to one storage
//! engine.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use veilcast_crypto::EpochMaterial;
use veilcast_proto::{CompositeAccessKey, DeviceId, MulticastMetadata, ServiceId, TransportResponse};

use crate::{
    error::{HandshakeError, StoreError, TransportError},
    types::{DistributionMessage, SessionRecord, ThreadId},
};

/// Recipient directory: the authority on which devices an account has.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Current device list for an identity. Must reflect very recent
    /// device adds and removes.
    async fn devices_for(&self, id: &ServiceId) -> Result<Vec<DeviceId>, StoreError>;

    /// Apply a 409 repair: add the missing devices, remove the extra ones.
    async fn apply_device_changes(
        &self,
        id: &ServiceId,
        missing: &[DeviceId],
        extra: &[DeviceId],
    ) -> Result<(), StoreError>;
}

/// Pairwise session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session record for one (identity, device) pair, if any.
    async fn load_session(
        &self,
        id: &ServiceId,
        device: DeviceId,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Reset the session for one device, forcing a fresh handshake on the
    /// next attempt.
    async fn reset_session(&self, id: &ServiceId, device: DeviceId) -> Result<(), StoreError>;
}

/// Distribution-key store: one epoch of sender-key material per thread.
#[async_trait]
pub trait DistributionKeyStore: Send + Sync {
    /// Expire the current epoch if policy demands it (age threshold or
    /// membership change). Idempotent.
    async fn expire_epoch_if_necessary(
        &self,
        thread: &ThreadId,
        members: &[ServiceId],
        now_ms: u64,
    ) -> Result<(), StoreError>;

    /// Whether a current, unexpired epoch exists for the thread.
    async fn is_epoch_valid(&self, thread: &ThreadId) -> Result<bool, StoreError>;

    /// Which of the candidates have not yet received the current epoch's
    /// distribution message. With no current epoch, all candidates need it.
    async fn recipients_needing_epoch(
        &self,
        thread: &ThreadId,
        candidates: &[ServiceId],
    ) -> Result<Vec<ServiceId>, StoreError>;

    /// Current epoch material, deriving a fresh epoch (with an incremented
    /// epoch id) if none exists. An existing epoch's seed is returned
    /// as stored, never re-derived.
    async fn current_epoch_material(
        &self,
        thread: &ThreadId,
        members: &[ServiceId],
        now_ms: u64,
    ) -> Result<EpochMaterial, StoreError>;

    /// Record that a recipient now holds the current epoch, stamped with
    /// the handshake message's timestamp.
    async fn record_recipient_received_epoch(
        &self,
        thread: &ThreadId,
        id: &ServiceId,
        timestamp_ms: u64,
    ) -> Result<(), StoreError>;

    /// Invalidate the current epoch. The next send derives a fresh epoch
    /// and re-handshakes every recipient.
    async fn rotate_epoch(&self, thread: &ThreadId) -> Result<(), StoreError>;
}

/// Transport for the single multi-recipient submission.
#[async_trait]
pub trait MulticastTransport: Send + Sync {
    /// Submit one multicast ciphertext with its composite credential.
    /// Any server answer, whatever the status, resolves to a response;
    /// only network-level failure is an error.
    async fn submit_multicast(
        &self,
        ciphertext: Bytes,
        credential: CompositeAccessKey,
        metadata: MulticastMetadata,
    ) -> Result<TransportResponse, TransportError>;
}

/// Pairwise send path for distribution handshake messages.
#[async_trait]
pub trait HandshakeSender: Send + Sync {
    /// Encrypt and send one distribution message over the recipient's
    /// pairwise sessions.
    async fn send_distribution(
        &self,
        id: &ServiceId,
        message: DistributionMessage,
    ) -> Result<(), HandshakeError>;
}

/// Anti-abuse challenge collaborator (external, UI-driven).
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Attempt to solve the challenge from a 428 response. Returns whether
    /// the challenge was solved.
    async fn solve(&self, body: Option<Bytes>, retry_after: Option<Duration>) -> bool;
}

/// Persistent unregistered-account bookkeeping.
#[async_trait]
pub trait UnregisteredMarker: Send + Sync {
    /// Mark an identity unregistered. Invoked once per recipient found
    /// unregistered by either the handshake or the multicast response.
    async fn mark_unregistered(&self, id: &ServiceId) -> Result<(), StoreError>;
}
