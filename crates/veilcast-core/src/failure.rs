//! Per-recipient failure reporting for one send operation.
//!
//! Handshake and multicast failures are funneled through a single callback
//! so the caller sees a uniform per-recipient error view regardless of which
//! phase failed. The sink also accumulates the failures so the operation can
//! report sticky failure after all concurrent tasks have joined.

use std::sync::{Mutex, PoisonError};

use veilcast_proto::ServiceId;

use crate::error::{HandshakeError, MulticastFailure};

/// Which phase a per-recipient failure came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientFailure {
    /// The distribution handshake for this recipient failed; the recipient
    /// was excluded from the multicast.
    Handshake(HandshakeError),

    /// The multicast submission this recipient was part of failed.
    Multicast(MulticastFailure),
}

/// Caller-provided per-recipient failure callback.
pub type FailureCallback<'a> = dyn Fn(&ServiceId, &RecipientFailure) + Send + Sync + 'a;

/// Operation-scoped failure accumulator.
///
/// Shared by the concurrent handshake tasks of one send; safe to report
/// into from multiple tasks. Owned by the send operation and never shared
/// across operations.
pub struct FailureSink<'a> {
    failures: Mutex<Vec<(ServiceId, RecipientFailure)>>,
    callback: Option<&'a FailureCallback<'a>>,
}

impl<'a> FailureSink<'a> {
    /// Create a sink, optionally forwarding to a caller callback.
    #[must_use]
    pub fn new(callback: Option<&'a FailureCallback<'a>>) -> Self {
        Self { failures: Mutex::new(Vec::new()), callback }
    }

    /// Record one per-recipient failure and forward it to the callback.
    pub fn report(&self, id: &ServiceId, failure: RecipientFailure) {
        if let Some(callback) = self.callback {
            callback(id, &failure);
        }
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), failure));
    }

    /// Whether any failure has been reported so far. Read once after all
    /// tasks have joined.
    #[must_use]
    pub fn any_failure(&self) -> bool {
        !self.failures.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Drain the accumulated failures.
    #[must_use]
    pub fn take(&self) -> Vec<(ServiceId, RecipientFailure)> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
