//! Data model for one send operation.
//!
//! Everything here is recreated per send from the collaborator stores;
//! nothing is persisted by the engine itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use veilcast_crypto::EPOCH_SEED_LEN;
use veilcast_proto::{DeviceId, ServiceId};

use crate::failure::RecipientFailure;

/// Opaque conversation identifier, stable across sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group association identifier embedded in every multicast ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub Vec<u8>);

impl GroupId {
    /// The raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Conversation shape, modeled as a tagged variant rather than runtime
/// subtype checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationKind {
    /// One-to-one conversation; multicast never applies.
    Direct,

    /// Group conversation carrying its association identifier.
    Group {
        /// Identifier embedded in the sealed multicast payload.
        group_id: GroupId,
    },
}

/// A conversation as seen by one send operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// Stable conversation identifier.
    pub id: ThreadId,

    /// Direct or group.
    pub kind: ConversationKind,

    /// Whether sender-key multicast is enabled for this conversation.
    pub multicast_enabled: bool,

    /// Current member set.
    pub members: Vec<ServiceId>,
}

impl Thread {
    /// Whether this conversation can use sender-key multicast at all.
    #[must_use]
    pub fn supports_multicast(&self) -> bool {
        self.multicast_enabled && matches!(self.kind, ConversationKind::Group { .. })
    }

    /// The group association identifier, if this is a group conversation.
    #[must_use]
    pub fn group_id(&self) -> Option<&GroupId> {
        match &self.kind {
            ConversationKind::Group { group_id } => Some(group_id),
            ConversationKind::Direct => None,
        }
    }

    /// Whether the identity is a current member.
    #[must_use]
    pub fn is_member(&self, id: &ServiceId) -> bool {
        self.members.contains(id)
    }
}

/// One intended recipient: identity plus its device set as known at
/// evaluation time. Device lists are re-resolved fresh before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Stable service identifier.
    pub service_id: ServiceId,

    /// Ordered device set.
    pub devices: Vec<DeviceId>,
}

/// Session state snapshot for one (identity, device) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Registration id negotiated for the session.
    pub registration_id: u32,

    /// Whether the record holds current cryptographic state. A record that
    /// was archived or reset exists but cannot encrypt.
    pub has_current_state: bool,
}

/// Per-recipient classifier result. Computed per send, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationIdStatus {
    /// Sessions exist and every registration id is in range.
    Valid,

    /// At least one registration id is out of range, or session state could
    /// not be read. Disqualifies sender-key use for this recipient.
    Invalid,

    /// At least one device has no usable session record.
    NoSession,
}

/// Why a recipient was routed to pairwise fanout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutReason {
    /// Direct conversation, or multicast disabled for the thread.
    MulticastUnsupported,

    /// Not a current member of the conversation.
    NotAMember,

    /// No sealed-sender access key available for this recipient.
    NoSealedSenderAccess,

    /// The local user appeared in the remote recipient list.
    LocalIdentity,

    /// Registration id out of range or unreadable session state.
    InvalidRegistrationId,
}

/// Delivery path for one recipient within a single send attempt.
///
/// Every intended recipient gets exactly one state. Transitions are only
/// forward within a send: a recipient routed to fanout stays there, and
/// `NeedsDistribution` becomes `SenderKeyReady` only across sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    /// Holds the current epoch; include in the multicast ciphertext.
    SenderKeyReady,

    /// Needs a distribution handshake before multicast can include them.
    NeedsDistribution,

    /// Must be delivered over pairwise sessions.
    FanoutOnly(FanoutReason),
}

/// Complete partition of the intended recipients for one send.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Recipients holding the current epoch.
    pub ready: Vec<Recipient>,

    /// Recipients that need a distribution handshake first.
    pub needs_distribution: Vec<Recipient>,

    /// Recipients routed to pairwise fanout, with the reason.
    pub fanout_only: Vec<(Recipient, FanoutReason)>,
}

impl Partition {
    /// Place one recipient according to its state.
    pub fn insert(&mut self, recipient: Recipient, state: ParticipantState) {
        match state {
            ParticipantState::SenderKeyReady => self.ready.push(recipient),
            ParticipantState::NeedsDistribution => self.needs_distribution.push(recipient),
            ParticipantState::FanoutOnly(reason) => self.fanout_only.push((recipient, reason)),
        }
    }

    /// Total recipients across all three buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ready.len() + self.needs_distribution.len() + self.fanout_only.len()
    }

    /// Whether the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sender certificate presented to the server inside the multicast envelope.
/// Opaque to this engine; issued and validated elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderCertificate(pub Vec<u8>);

/// Pairwise handshake message carrying the current epoch seed to one
/// recipient who lacks it.
#[derive(Clone, PartialEq, Eq)]
pub struct DistributionMessage {
    /// Conversation this epoch belongs to.
    pub thread: ThreadId,

    /// Epoch generation being distributed.
    pub epoch_id: u64,

    /// The epoch seed. Sensitive; the debug representation is redacted.
    pub seed: [u8; EPOCH_SEED_LEN],

    /// Timestamp of the message this handshake was sent on behalf of,
    /// used for later ordering and resend decisions.
    pub sent_on_behalf_of_ms: u64,
}

impl fmt::Debug for DistributionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionMessage")
            .field("thread", &self.thread)
            .field("epoch_id", &self.epoch_id)
            .field("sent_on_behalf_of_ms", &self.sent_on_behalf_of_ms)
            .finish_non_exhaustive()
    }
}

/// Aggregate outcome of one send operation.
///
/// Per-recipient failures are also delivered through the failure callback as
/// they happen; this struct is the final summary. The operation as a whole
/// is reported as failed if `failed` is non-empty, even when other
/// recipients succeeded.
#[derive(Debug, Clone, Default)]
pub struct SendResult {
    /// Recipients the server accepted delivery for.
    pub successes: Vec<ServiceId>,

    /// Recipients the server reported as unregistered. A definitive
    /// per-recipient outcome, not an operation failure.
    pub unregistered: Vec<ServiceId>,

    /// Recipients the caller must deliver over pairwise fanout instead.
    pub fanout_required: Vec<ServiceId>,

    /// Per-recipient failures from either phase.
    pub failed: Vec<(ServiceId, RecipientFailure)>,
}
