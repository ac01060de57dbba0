//! Scripted collaborator doubles.
//!
//! Each double plays back a canned script and records everything the engine
//! did, so tests can assert both the outcome and the exact interactions
//! (how many submissions, which handshakes, whether the challenge solver
//! was consulted).

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use veilcast_core::{
    DistributionMessage, HandshakeError, TransportError,
    stores::{ChallengeSolver, HandshakeSender, MulticastTransport},
};
use veilcast_proto::{CompositeAccessKey, MulticastMetadata, ServiceId, TransportResponse};

/// One recorded multicast submission.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    /// The sealed envelope as handed to the transport.
    pub ciphertext: Bytes,

    /// The composite credential.
    pub credential: CompositeAccessKey,

    /// The delivery metadata.
    pub metadata: MulticastMetadata,
}

/// Multicast transport that replays a script of canned outcomes.
///
/// Each submission consumes the next scripted outcome. With an empty script
/// the transport answers 200 with an empty body, so happy-path tests need no
/// setup.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
}

impl ScriptedTransport {
    /// Transport with an empty script (every submission succeeds).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one outcome.
    pub async fn push(&self, outcome: Result<TransportResponse, TransportError>) {
        self.script.lock().await.push_back(outcome);
    }

    /// Queue a server response with the given status and body.
    pub async fn push_response(&self, status: u16, body: &[u8]) {
        self.push(Ok(TransportResponse {
            status,
            body: Some(Bytes::copy_from_slice(body)),
            retry_after: None,
        }))
        .await;
    }

    /// Queue a network-level failure.
    pub async fn push_network_failure(&self) {
        self.push(Err(TransportError::Network("scripted network failure".into()))).await;
    }

    /// Every submission the engine made, in order.
    pub async fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().await.clone()
    }

    /// Number of submissions made so far.
    pub async fn submission_count(&self) -> usize {
        self.submissions.lock().await.len()
    }
}

#[async_trait]
impl MulticastTransport for ScriptedTransport {
    async fn submit_multicast(
        &self,
        ciphertext: Bytes,
        credential: CompositeAccessKey,
        metadata: MulticastMetadata,
    ) -> Result<TransportResponse, TransportError> {
        self.submissions.lock().await.push(RecordedSubmission {
            ciphertext,
            credential,
            metadata,
        });
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => {
                Ok(TransportResponse { status: 200, body: Some(Bytes::from_static(b"{}")), retry_after: None })
            },
        }
    }
}

/// Handshake sender that records every distribution message and fails the
/// identities it was told to fail.
#[derive(Default)]
pub struct RecordingHandshakeSender {
    failures: Mutex<HashMap<ServiceId, HandshakeError>>,
    sent: Mutex<Vec<(ServiceId, DistributionMessage)>>,
}

impl RecordingHandshakeSender {
    /// Sender where every handshake succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make handshakes to this identity fail with the given error.
    pub async fn fail_with(&self, id: ServiceId, error: HandshakeError) {
        self.failures.lock().await.insert(id, error);
    }

    /// Every handshake sent (successfully or not), in completion order.
    pub async fn sent(&self) -> Vec<(ServiceId, DistributionMessage)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl HandshakeSender for RecordingHandshakeSender {
    async fn send_distribution(
        &self,
        id: &ServiceId,
        message: DistributionMessage,
    ) -> Result<(), HandshakeError> {
        self.sent.lock().await.push((id.clone(), message));
        match self.failures.lock().await.get(id) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Challenge solver with a fixed answer, counting how often it was asked.
pub struct StaticChallengeSolver {
    outcome: bool,
    calls: AtomicUsize,
}

impl StaticChallengeSolver {
    /// Solver that always answers `outcome`.
    #[must_use]
    pub fn new(outcome: bool) -> Self {
        Self { outcome, calls: AtomicUsize::new(0) }
    }

    /// How many challenges were presented.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for StaticChallengeSolver {
    async fn solve(&self, _body: Option<Bytes>, _retry_after: Option<Duration>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome
    }
}
