//! Response interpretation and bounded retry.
//!
//! An explicit step function rather than recursive resend: each transport
//! outcome is interpreted into a terminal result or a retry instruction
//! carrying the decremented budget, and an outer driver loop (the engine)
//! executes the instruction. This keeps the retry budget independently
//! testable and the call stack flat.
//!
//! Repairs are performed here; resending is not. The 409 and 410 paths
//! mutate state (device deltas, session resets, epoch rotation) and then
//! fail this call; the caller resends after repair, so encryption never
//! runs against known-stale device or session state.

use veilcast_proto::{AccountMismatchedDevices, AccountStaleDevices, MulticastSuccess, ServiceId, TransportResponse};

use crate::{
    error::{MulticastFailure, StoreError, TransportError},
    stores::{ChallengeSolver, DistributionKeyStore, RecipientDirectory, SessionStore},
    types::ThreadId,
};

/// Retry budget for one send operation: up to this many retries after the
/// initial attempt.
pub const RETRY_BUDGET: u8 = 3;

/// Instruction produced by interpreting one transport outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDisposition {
    /// HTTP 200: the submission succeeded. Carries the identities the
    /// server reported unregistered; every other submitted identity was
    /// delivered.
    Succeeded {
        /// Unregistered identities from the response body.
        unregistered: Vec<ServiceId>,
    },

    /// Transient failure: re-submit the same already-sealed ciphertext.
    RetrySameCiphertext {
        /// Retries left after this one.
        remaining: u8,
    },

    /// Challenge solved: rebuild the submission (fresh device lists, fresh
    /// seal) and resend.
    RetryAfterReseal {
        /// Retries left after this one.
        remaining: u8,
    },

    /// Terminal failure for this call.
    Failed(MulticastFailure),
}

/// Interprets transport outcomes and applies the side-effecting repairs.
pub struct ResponseHandler<'a> {
    /// The thread being sent to.
    pub thread: &'a ThreadId,

    /// Directory for 409 device-set repair.
    pub directory: &'a dyn RecipientDirectory,

    /// Session store for 410 session resets.
    pub sessions: &'a dyn SessionStore,

    /// Key store for epoch rotation after a device-set change.
    pub keys: &'a dyn DistributionKeyStore,

    /// Anti-abuse challenge collaborator for 428.
    pub challenge: &'a dyn ChallengeSolver,
}

impl ResponseHandler<'_> {
    /// Interpret one transport outcome into a disposition.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the 409/410 repair writes.
    pub async fn interpret(
        &self,
        outcome: Result<TransportResponse, TransportError>,
        remaining: u8,
    ) -> Result<AttemptDisposition, StoreError> {
        let response = match outcome {
            Ok(response) => response,
            Err(TransportError::Network(reason)) => {
                return Ok(if remaining > 0 {
                    tracing::info!(thread = %self.thread, %reason, remaining, "network failure; retrying");
                    AttemptDisposition::RetrySameCiphertext { remaining: remaining - 1 }
                } else {
                    AttemptDisposition::Failed(MulticastFailure::NetworkExhausted)
                });
            },
        };

        let body = response.body.as_deref().unwrap_or_default();
        match response.status {
            200 => match MulticastSuccess::from_body(body) {
                Ok(success) => {
                    Ok(AttemptDisposition::Succeeded { unregistered: success.unregistered })
                },
                // Malformed server contract.
                Err(error) => {
                    tracing::error!(thread = %self.thread, %error, "200 body failed to decode");
                    Ok(AttemptDisposition::Failed(MulticastFailure::Unhandled { status: 200 }))
                },
            },
            401 => Ok(AttemptDisposition::Failed(MulticastFailure::InvalidAuthHeader)),
            404 => Ok(AttemptDisposition::Failed(MulticastFailure::InvalidRecipient)),
            409 => self.repair_mismatched_devices(body).await,
            410 => self.repair_stale_devices(body).await,
            428 => {
                let solved = self.challenge.solve(response.body.clone(), response.retry_after).await;
                Ok(if !solved {
                    AttemptDisposition::Failed(MulticastFailure::SpamChallengeRequired)
                } else if remaining > 0 {
                    tracing::info!(thread = %self.thread, remaining, "spam challenge solved; retrying");
                    AttemptDisposition::RetryAfterReseal { remaining: remaining - 1 }
                } else {
                    // Solved, but no attempts left to resend with. Not a
                    // network failure; report the budget itself.
                    AttemptDisposition::Failed(MulticastFailure::RetryBudgetExhausted)
                })
            },
            status => Ok(AttemptDisposition::Failed(MulticastFailure::Unhandled { status })),
        }
    }

    /// 409: the device set drifted. Apply the per-account deltas and rotate
    /// the epoch, then fail so the caller resends with repaired state.
    async fn repair_mismatched_devices(
        &self,
        body: &[u8],
    ) -> Result<AttemptDisposition, StoreError> {
        let entries = match AccountMismatchedDevices::from_body(body) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(thread = %self.thread, %error, "409 body failed to decode");
                return Ok(AttemptDisposition::Failed(MulticastFailure::Unhandled { status: 409 }));
            },
        };
        for entry in &entries {
            tracing::warn!(
                thread = %self.thread,
                id = %entry.uuid,
                missing = entry.devices.missing_devices.len(),
                extra = entry.devices.extra_devices.len(),
                "repairing drifted device set"
            );
            self.directory
                .apply_device_changes(
                    &entry.uuid,
                    &entry.devices.missing_devices,
                    &entry.devices.extra_devices,
                )
                .await?;
        }
        self.keys.rotate_epoch(self.thread).await?;
        Ok(AttemptDisposition::Failed(MulticastFailure::DeviceUpdate))
    }

    /// 410: listed sessions are stale. Reset them and rotate the epoch,
    /// forcing a fresh handshake on the next attempt.
    async fn repair_stale_devices(&self, body: &[u8]) -> Result<AttemptDisposition, StoreError> {
        let entries = match AccountStaleDevices::from_body(body) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::error!(thread = %self.thread, %error, "410 body failed to decode");
                return Ok(AttemptDisposition::Failed(MulticastFailure::Unhandled { status: 410 }));
            },
        };
        for entry in &entries {
            for device in &entry.devices.stale_devices {
                tracing::warn!(thread = %self.thread, id = %entry.uuid, device = %device, "resetting stale session");
                self.sessions.reset_session(&entry.uuid, *device).await?;
            }
        }
        self.keys.rotate_epoch(self.thread).await?;
        Ok(AttemptDisposition::Failed(MulticastFailure::StaleDevices))
    }
}
