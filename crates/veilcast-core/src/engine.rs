//! Send orchestrator.
//!
//! Drives one send end to end: evaluate the recipient partition, bring the
//! needing recipients up to the current epoch under the thread's send lock,
//! seal once, submit, and interpret the server's answer with bounded retry.
//!
//! The engine holds no persistent state of its own; everything external
//! comes through the [`Collaborators`]. It is cheap to share behind an
//! `Arc` and safe to call concurrently for different threads. Sends to the
//! same thread serialize on the per-thread lock for the handshake and
//! submission phases.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use veilcast_crypto::NONCE_LEN;
use veilcast_proto::{AccessKey, MulticastMetadata, ServiceId};

use crate::{
    distribution::Dispatcher,
    error::{PrepareError, SendError},
    evaluate::evaluate,
    failure::{FailureCallback, FailureSink, RecipientFailure},
    multicast::{PreparedMulticast, prepare},
    retry::{AttemptDisposition, RETRY_BUDGET, ResponseHandler},
    stores::{
        ChallengeSolver, DistributionKeyStore, HandshakeSender, MulticastTransport,
        RecipientDirectory, SessionStore, UnregisteredMarker,
    },
    types::{Recipient, SendResult, SenderCertificate, Thread, ThreadId},
};

/// Everything external the engine talks to.
pub struct Collaborators {
    /// Device-list authority.
    pub directory: Arc<dyn RecipientDirectory>,

    /// Pairwise session store.
    pub sessions: Arc<dyn SessionStore>,

    /// Distribution-key epochs.
    pub keys: Arc<dyn DistributionKeyStore>,

    /// The multicast endpoint.
    pub transport: Arc<dyn MulticastTransport>,

    /// Pairwise path for distribution handshakes.
    pub handshakes: Arc<dyn HandshakeSender>,

    /// Anti-abuse challenge collaborator.
    pub challenge: Arc<dyn ChallengeSolver>,

    /// Unregistered-account bookkeeping.
    pub unregistered: Arc<dyn UnregisteredMarker>,
}

/// One message to deliver to a conversation's recipients.
pub struct SendRequest {
    /// The conversation being sent to.
    pub thread: Thread,

    /// Message plaintext, sealed at most once per attempt.
    pub plaintext: Vec<u8>,

    /// Intended recipients with their evaluation-time device sets.
    pub intended: Vec<Recipient>,

    /// Sealed-sender access keys, per recipient that granted one.
    pub access: HashMap<ServiceId, AccessKey>,

    /// Sender certificate embedded in the multicast envelope.
    pub sender_certificate: SenderCertificate,

    /// Delivery metadata; `timestamp_ms` is the operation's clock.
    pub metadata: MulticastMetadata,
}

/// Sender-key fan-out engine.
pub struct SenderKeyEngine {
    collaborators: Collaborators,
    local_identity: ServiceId,
    send_locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SenderKeyEngine {
    /// Build an engine for the given local identity.
    #[must_use]
    pub fn new(collaborators: Collaborators, local_identity: ServiceId) -> Self {
        Self { collaborators, local_identity, send_locks: Mutex::new(HashMap::new()) }
    }

    /// Deliver one message.
    ///
    /// Recipients routed to pairwise fanout are reported in the result's
    /// `fanout_required`; actually delivering to them is the caller's job.
    /// Per-recipient failures reach `on_failure` as they happen and are
    /// summarized in the result.
    ///
    /// # Errors
    ///
    /// - [`SendError::Multicast`] when the submission terminally fails for
    ///   every submitted recipient.
    /// - [`SendError::Partial`] when the operation ran to completion but at
    ///   least one recipient failed. Failure is sticky: one failed handshake
    ///   fails the operation even though the multicast succeeded.
    /// - [`SendError::Store`] on collaborator store failure.
    pub async fn send(
        &self,
        request: SendRequest,
        on_failure: Option<&FailureCallback<'_>>,
    ) -> Result<SendResult, SendError> {
        let now_ms = request.metadata.timestamp_ms;
        let sink = FailureSink::new(on_failure);

        let partition = evaluate(
            &request.thread,
            &request.intended,
            &request.access,
            &self.local_identity,
            self.collaborators.sessions.as_ref(),
            self.collaborators.keys.as_ref(),
            now_ms,
        )
        .await?;

        let fanout_required: Vec<ServiceId> =
            partition.fanout_only.iter().map(|(r, _)| r.service_id.clone()).collect();

        tracing::info!(
            thread = %request.thread.id,
            ready = partition.ready.len(),
            needs_distribution = partition.needs_distribution.len(),
            fanout = fanout_required.len(),
            "starting sender key send"
        );

        // Nobody on the multicast path at all: nothing to seal, nothing to
        // submit.
        if partition.ready.is_empty() && partition.needs_distribution.is_empty() {
            return finish(&sink, Vec::new(), Vec::new(), fanout_required);
        }

        let lock = self.send_lock(&request.thread.id);
        let _guard = lock.lock().await;

        let dispatcher = Dispatcher {
            keys: self.collaborators.keys.as_ref(),
            handshakes: self.collaborators.handshakes.as_ref(),
            unregistered: self.collaborators.unregistered.as_ref(),
        };
        let ready = dispatcher
            .dispatch(
                &request.thread,
                partition.ready,
                partition.needs_distribution,
                request.metadata.timestamp_ms,
                now_ms,
                &sink,
            )
            .await?;

        // Every handshake failed: no one can receive the multicast, so no
        // network call is made. The handshake failures are already in the
        // sink.
        if ready.is_empty() {
            return finish(&sink, Vec::new(), Vec::new(), fanout_required);
        }

        let (submitted, unregistered) =
            self.submit_with_retry(&request, &ready, &sink).await?;
        finish(&sink, submitted, unregistered, fanout_required)
    }

    /// Seal and submit, driving the retry step function until a terminal
    /// disposition. Returns (submitted, unregistered) identities.
    async fn submit_with_retry(
        &self,
        request: &SendRequest,
        ready: &[Recipient],
        sink: &FailureSink<'_>,
    ) -> Result<(Vec<ServiceId>, Vec<ServiceId>), SendError> {
        let handler = ResponseHandler {
            thread: &request.thread.id,
            directory: self.collaborators.directory.as_ref(),
            sessions: self.collaborators.sessions.as_ref(),
            keys: self.collaborators.keys.as_ref(),
            challenge: self.collaborators.challenge.as_ref(),
        };

        let mut remaining = RETRY_BUDGET;
        // Outer loop: one sealed submission per iteration. Re-entered only
        // on the reseal path (solved challenge); plain network retries
        // re-submit the same ciphertext in the inner loop.
        loop {
            let prepared = self.build_submission(request, ready, sink).await?;

            loop {
                let outcome = self
                    .collaborators
                    .transport
                    .submit_multicast(
                        prepared.ciphertext.clone(),
                        prepared.credential,
                        request.metadata,
                    )
                    .await;
                match handler.interpret(outcome, remaining).await? {
                    AttemptDisposition::Succeeded { unregistered } => {
                        return Ok((
                            prepared.submitted,
                            self.settle_unregistered(unregistered).await,
                        ));
                    },
                    AttemptDisposition::RetrySameCiphertext { remaining: left } => {
                        remaining = left;
                    },
                    AttemptDisposition::RetryAfterReseal { remaining: left } => {
                        remaining = left;
                        break;
                    },
                    AttemptDisposition::Failed(kind) => {
                        tracing::warn!(
                            thread = %request.thread.id,
                            error = %kind,
                            "multicast submission failed terminally"
                        );
                        for id in &prepared.submitted {
                            sink.report(id, RecipientFailure::Multicast(kind.clone()));
                        }
                        return Err(SendError::Multicast(kind));
                    },
                }
            }
        }
    }

    /// Build one sealed submission with a fresh nonce and fresh device
    /// lists. Submission-level failures fail every ready recipient.
    async fn build_submission(
        &self,
        request: &SendRequest,
        ready: &[Recipient],
        sink: &FailureSink<'_>,
    ) -> Result<PreparedMulticast, SendError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        match prepare(
            &request.thread,
            ready,
            &request.access,
            self.collaborators.directory.as_ref(),
            self.collaborators.keys.as_ref(),
            &request.sender_certificate,
            &request.plaintext,
            nonce,
            request.metadata.timestamp_ms,
        )
        .await
        {
            Ok(prepared) => Ok(prepared),
            Err(PrepareError::Store(error)) => Err(error.into()),
            Err(PrepareError::Failure(kind)) => {
                tracing::warn!(thread = %request.thread.id, error = %kind, "submission build failed");
                for recipient in ready {
                    sink.report(&recipient.service_id, RecipientFailure::Multicast(kind.clone()));
                }
                Err(SendError::Multicast(kind))
            },
        }
    }

    /// Persist the unregistered marks from a 200 body, once per identity.
    /// A mark that fails to persist is logged, not fatal: the server's
    /// answer already decided the per-recipient outcome.
    async fn settle_unregistered(&self, unregistered: Vec<ServiceId>) -> Vec<ServiceId> {
        for id in &unregistered {
            if let Err(error) = self.collaborators.unregistered.mark_unregistered(id).await {
                tracing::warn!(%id, %error, "failed to persist unregistered mark");
            }
        }
        unregistered
    }

    fn send_lock(&self, thread: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.send_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(thread.clone()).or_default())
    }
}

/// Assemble the final result, applying operation-sticky failure.
fn finish(
    sink: &FailureSink<'_>,
    submitted: Vec<ServiceId>,
    unregistered: Vec<ServiceId>,
    fanout_required: Vec<ServiceId>,
) -> Result<SendResult, SendError> {
    let successes: Vec<ServiceId> =
        submitted.into_iter().filter(|id| !unregistered.contains(id)).collect();
    let failed = sink.take();
    let result = SendResult { successes, unregistered, fanout_required, failed };
    if result.failed.is_empty() {
        Ok(result)
    } else {
        Err(SendError::Partial { result })
    }
}
