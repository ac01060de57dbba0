//! Distribution handshake dispatcher.
//!
//! Delivers the current epoch seed to every recipient that lacks it, one
//! pairwise handshake message per recipient, all sent concurrently. This is
//! a join-all: a failed handshake never cancels its siblings, and partial
//! success is the expected case.

use std::collections::HashSet;

use futures::future::join_all;
use veilcast_proto::ServiceId;

use crate::{
    error::{HandshakeError, StoreError},
    failure::{FailureSink, RecipientFailure},
    stores::{DistributionKeyStore, HandshakeSender, UnregisteredMarker},
    types::{DistributionMessage, Recipient, Thread},
};

/// Handshake dispatcher for one send operation.
pub struct Dispatcher<'a> {
    /// Distribution-key store.
    pub keys: &'a dyn DistributionKeyStore,

    /// Pairwise send path for handshake messages.
    pub handshakes: &'a dyn HandshakeSender,

    /// Unregistered-account bookkeeping.
    pub unregistered: &'a dyn UnregisteredMarker,
}

impl Dispatcher<'_> {
    /// Bring every recipient up to the current epoch, returning the set
    /// that is ready for multicast afterwards.
    ///
    /// Must be called with the thread's send lock held: epoch validity and
    /// the needing set are re-checked here, immediately before building the
    /// handshake payloads, because state may have changed since evaluation.
    /// Skipping the re-check risks distributing a stale key.
    ///
    /// Returns the recipients who already held the epoch plus those whose
    /// handshake just succeeded. If this is empty the caller must not
    /// attempt multicast.
    ///
    /// # Errors
    ///
    /// Propagates distribution-key store failures from the re-check.
    /// Per-recipient handshake failures do not error; they are reported
    /// through the sink and the recipient is excluded from the result.
    pub async fn dispatch(
        &self,
        thread: &Thread,
        ready: Vec<Recipient>,
        needs_distribution: Vec<Recipient>,
        message_timestamp_ms: u64,
        now_ms: u64,
        sink: &FailureSink<'_>,
    ) -> Result<Vec<Recipient>, StoreError> {
        self.keys.expire_epoch_if_necessary(&thread.id, &thread.members, now_ms).await?;

        let mut all = ready;
        all.extend(needs_distribution);
        let candidates: Vec<ServiceId> = all.iter().map(|r| r.service_id.clone()).collect();
        let needing: HashSet<ServiceId> = self
            .keys
            .recipients_needing_epoch(&thread.id, &candidates)
            .await?
            .into_iter()
            .collect();

        // Epoch already fresh for everyone; nothing to distribute.
        if needing.is_empty() {
            return Ok(all);
        }

        let material = self.keys.current_epoch_material(&thread.id, &thread.members, now_ms).await?;

        let (to_handshake, mut ready_now): (Vec<Recipient>, Vec<Recipient>) =
            all.into_iter().partition(|r| needing.contains(&r.service_id));

        tracing::info!(
            thread = %thread.id,
            epoch_id = material.epoch_id(),
            handshakes = to_handshake.len(),
            already_ready = ready_now.len(),
            "dispatching distribution handshakes"
        );

        let sends = to_handshake.iter().map(|recipient| {
            let message = DistributionMessage {
                thread: thread.id.clone(),
                epoch_id: material.epoch_id(),
                seed: *material.seed(),
                sent_on_behalf_of_ms: message_timestamp_ms,
            };
            self.handshake_one(thread, recipient, message, message_timestamp_ms, sink)
        });

        // Join-all: every handshake runs to completion, success or failure.
        let outcomes = join_all(sends).await;
        for (recipient, succeeded) in to_handshake.into_iter().zip(outcomes) {
            if succeeded {
                ready_now.push(recipient);
            }
        }
        Ok(ready_now)
    }

    /// One handshake send; returns whether the recipient ended up ready.
    async fn handshake_one(
        &self,
        thread: &Thread,
        recipient: &Recipient,
        message: DistributionMessage,
        message_timestamp_ms: u64,
        sink: &FailureSink<'_>,
    ) -> bool {
        let id = &recipient.service_id;
        match self.handshakes.send_distribution(id, message).await {
            Ok(()) => {
                match self
                    .keys
                    .record_recipient_received_epoch(&thread.id, id, message_timestamp_ms)
                    .await
                {
                    Ok(()) => true,
                    Err(error) => {
                        // Delivered but not recorded; treat as failed so the
                        // next send re-handshakes rather than multicasting
                        // to a recipient we cannot account for.
                        sink.report(
                            id,
                            RecipientFailure::Handshake(HandshakeError::Send(error.to_string())),
                        );
                        false
                    },
                }
            },
            Err(HandshakeError::UnregisteredAccount) => {
                if let Err(error) = self.unregistered.mark_unregistered(id).await {
                    tracing::warn!(%id, %error, "failed to persist unregistered mark");
                }
                sink.report(id, RecipientFailure::Handshake(HandshakeError::UnregisteredAccount));
                false
            },
            Err(error) => {
                tracing::warn!(%id, %error, "distribution handshake failed");
                sink.report(id, RecipientFailure::Handshake(error));
                false
            },
        }
    }
}
