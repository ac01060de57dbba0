//! Scenario builder: a full engine wired against in-memory stores and
//! scripted doubles.

use std::{collections::HashMap, sync::Arc};

use veilcast_core::{
    Collaborators, Recipient, SendError, SendRequest, SendResult, SenderCertificate,
    SenderKeyEngine, SessionRecord, Thread, ThreadId,
    failure::FailureCallback,
    memory::{
        InMemoryDirectory, InMemoryDistributionKeyStore, InMemorySessionStore,
        InMemoryUnregisteredMarker,
    },
    stores::DistributionKeyStore,
    types::{ConversationKind, GroupId},
};
use veilcast_proto::{AccessKey, DeviceId, MulticastMetadata, ServiceId};

use crate::scripted::{RecordingHandshakeSender, ScriptedTransport, StaticChallengeSolver};

/// Fixed operation timestamp used by every scenario send.
pub const TIMESTAMP_MS: u64 = 1_700_000_000_000;

/// A group conversation scenario with full access to every collaborator for
/// setup and assertions.
pub struct Scenario {
    /// Recipient directory.
    pub directory: Arc<InMemoryDirectory>,

    /// Pairwise session store.
    pub sessions: Arc<InMemorySessionStore>,

    /// Distribution-key store.
    pub keys: Arc<InMemoryDistributionKeyStore>,

    /// Scripted multicast transport.
    pub transport: Arc<ScriptedTransport>,

    /// Recording handshake sender.
    pub handshakes: Arc<RecordingHandshakeSender>,

    /// Challenge solver double.
    pub challenge: Arc<StaticChallengeSolver>,

    /// Unregistered-account marker.
    pub unregistered: Arc<InMemoryUnregisteredMarker>,

    engine: SenderKeyEngine,
    thread_id: ThreadId,
    members: Vec<ServiceId>,
    intended: Vec<Recipient>,
    access: HashMap<ServiceId, AccessKey>,
}

impl Scenario {
    /// Group scenario whose challenge solver always fails.
    #[must_use]
    pub fn group() -> Self {
        Self::with_challenge_solver(false)
    }

    /// Group scenario with the given challenge solver answer.
    #[must_use]
    pub fn with_challenge_solver(solves: bool) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let keys = Arc::new(InMemoryDistributionKeyStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let handshakes = Arc::new(RecordingHandshakeSender::new());
        let challenge = Arc::new(StaticChallengeSolver::new(solves));
        let unregistered = Arc::new(InMemoryUnregisteredMarker::new());

        let engine = SenderKeyEngine::new(
            Collaborators {
                directory: directory.clone(),
                sessions: sessions.clone(),
                keys: keys.clone(),
                transport: transport.clone(),
                handshakes: handshakes.clone(),
                challenge: challenge.clone(),
                unregistered: unregistered.clone(),
            },
            Self::local_identity(),
        );

        Self {
            directory,
            sessions,
            keys,
            transport,
            handshakes,
            challenge,
            unregistered,
            engine,
            thread_id: ThreadId("scenario-thread".into()),
            members: Vec::new(),
            intended: Vec::new(),
            access: HashMap::new(),
        }
    }

    /// Deterministic service id for member number `n`.
    #[must_use]
    #[allow(clippy::unwrap_used)] // constant shape
    pub fn service_id(n: u8) -> ServiceId {
        ServiceId::parse(&format!("00000000-0000-4000-8000-{n:012x}")).unwrap()
    }

    /// The scenario's local identity (never a member).
    #[must_use]
    pub fn local_identity() -> ServiceId {
        Self::service_id(0xFF)
    }

    /// Add a member with a valid session and an access key on the primary
    /// device.
    pub async fn add_member(&mut self, n: u8) -> ServiceId {
        self.add_member_with_devices(n, &[DeviceId::PRIMARY.0]).await
    }

    /// Add a member with valid sessions and an access key on the given
    /// devices.
    pub async fn add_member_with_devices(&mut self, n: u8, devices: &[u32]) -> ServiceId {
        let id = Self::service_id(n);
        let devices: Vec<DeviceId> = devices.iter().copied().map(DeviceId).collect();
        self.directory.insert(id.clone(), devices.iter().copied()).await;
        for device in &devices {
            self.sessions
                .put(
                    id.clone(),
                    *device,
                    SessionRecord { registration_id: 100, has_current_state: true },
                )
                .await;
        }
        self.access.insert(id.clone(), AccessKey::from_bytes([n; 16]));
        self.members.push(id.clone());
        self.intended.push(Recipient { service_id: id.clone(), devices });
        id
    }

    /// Add a member with an access key but no session: the evaluator must
    /// route them through a distribution handshake.
    pub async fn add_member_without_session(&mut self, n: u8) -> ServiceId {
        let id = Self::service_id(n);
        let devices = vec![DeviceId::PRIMARY];
        self.directory.insert(id.clone(), devices.iter().copied()).await;
        self.access.insert(id.clone(), AccessKey::from_bytes([n; 16]));
        self.members.push(id.clone());
        self.intended.push(Recipient { service_id: id.clone(), devices });
        id
    }

    /// Drop the access key for one member, forcing them onto the pairwise
    /// fanout path.
    pub fn revoke_access(&mut self, id: &ServiceId) {
        self.access.remove(id);
    }

    /// Pre-establish the current epoch and mark every current member as
    /// holding it, so a subsequent send goes straight to multicast.
    #[allow(clippy::unwrap_used)] // in-memory store cannot fail
    pub async fn establish_epoch(&self) {
        self.keys
            .current_epoch_material(&self.thread_id, &self.members, TIMESTAMP_MS)
            .await
            .unwrap();
        for id in &self.members {
            self.keys
                .record_recipient_received_epoch(&self.thread_id, id, TIMESTAMP_MS)
                .await
                .unwrap();
        }
    }

    /// The thread as the engine will see it.
    #[must_use]
    pub fn thread(&self) -> Thread {
        Thread {
            id: self.thread_id.clone(),
            kind: ConversationKind::Group { group_id: GroupId(b"scenario-group".to_vec()) },
            multicast_enabled: true,
            members: self.members.clone(),
        }
    }

    /// Build the send request for the given plaintext.
    #[must_use]
    pub fn request(&self, plaintext: &[u8]) -> SendRequest {
        SendRequest {
            thread: self.thread(),
            plaintext: plaintext.to_vec(),
            intended: self.intended.clone(),
            access: self.access.clone(),
            sender_certificate: SenderCertificate(vec![0xCC; 64]),
            metadata: MulticastMetadata {
                online: false,
                urgent: true,
                story: false,
                timestamp_ms: TIMESTAMP_MS,
            },
        }
    }

    /// Run one send with the default plaintext.
    pub async fn send(&self) -> Result<SendResult, SendError> {
        self.engine.send(self.request(b"scenario message"), None).await
    }

    /// Run one send, forwarding per-recipient failures to the callback.
    pub async fn send_with_callback(
        &self,
        on_failure: &FailureCallback<'_>,
    ) -> Result<SendResult, SendError> {
        self.engine.send(self.request(b"scenario message"), Some(on_failure)).await
    }

    /// Run one send with a specific plaintext.
    pub async fn send_plaintext(&self, plaintext: &[u8]) -> Result<SendResult, SendError> {
        self.engine.send(self.request(plaintext), None).await
    }
}
