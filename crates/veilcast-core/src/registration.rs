//! Session registration classifier.
//!
//! Decides, per recipient, whether the pairwise session state supports
//! sender-key delivery at all. Read-only; store errors fail safe toward
//! fanout by classifying as `Invalid`.

use crate::{
    stores::SessionStore,
    types::{Recipient, RegistrationIdStatus},
};

/// Registration ids must fit in 14 bits; larger values disqualify the
/// session for sender-key use.
pub const MAX_REGISTRATION_ID: u32 = (1 << 14) - 1;

impl RegistrationIdStatus {
    /// Worst-case-first precedence: `Invalid > NoSession > Valid`.
    ///
    /// A recipient with devices in mixed states gets the worst status, so
    /// the result is deterministic regardless of device enumeration order.
    /// `Invalid` routes to fanout, which is always safe.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Invalid, _) | (_, Self::Invalid) => Self::Invalid,
            (Self::NoSession, _) | (_, Self::NoSession) => Self::NoSession,
            (Self::Valid, Self::Valid) => Self::Valid,
        }
    }
}

/// Classify one recipient across all of its devices.
///
/// A recipient with no devices has no sessions to speak of and classifies
/// as `NoSession`.
pub async fn classify(recipient: &Recipient, sessions: &dyn SessionStore) -> RegistrationIdStatus {
    if recipient.devices.is_empty() {
        return RegistrationIdStatus::NoSession;
    }

    let mut overall = RegistrationIdStatus::Valid;
    for device in &recipient.devices {
        let status = match sessions.load_session(&recipient.service_id, *device).await {
            // Unreadable session state disqualifies sender-key use.
            Err(error) => {
                tracing::warn!(
                    id = %recipient.service_id,
                    device = %device,
                    %error,
                    "session load failed; classifying as invalid"
                );
                RegistrationIdStatus::Invalid
            },
            Ok(None) => RegistrationIdStatus::NoSession,
            Ok(Some(record)) => classify_record(record.registration_id, record.has_current_state),
        };
        overall = overall.worst(status);
        if overall == RegistrationIdStatus::Invalid {
            break;
        }
    }
    overall
}

fn classify_record(registration_id: u32, has_current_state: bool) -> RegistrationIdStatus {
    if !has_current_state {
        RegistrationIdStatus::NoSession
    } else if registration_id > MAX_REGISTRATION_ID {
        RegistrationIdStatus::Invalid
    } else {
        RegistrationIdStatus::Valid
    }
}
