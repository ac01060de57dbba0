//! Multicast submission builder.
//!
//! Seals the plaintext exactly once under the current epoch key and wraps
//! it in the delivery envelope addressing every (recipient, device) pair.
//! Everything here happens before the network: size and credential
//! violations fail with zero network calls.
//!
//! Envelope layout:
//!
//! ```text
//! [1 byte: envelope version]
//! [2 bytes: sender certificate length (u16 BE)] [N bytes: certificate]
//! [8 bytes: epoch id (u64 BE)]
//! [2 bytes: recipient count (u16 BE)]
//! per recipient:
//!   [1 byte: service id length] [id bytes]
//!   [1 byte: device count] [4 bytes per device (u32 BE)]
//! [sealed payload, see veilcast-crypto]
//! ```

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use veilcast_crypto::{NONCE_LEN, seal_payload};
use veilcast_proto::{AccessKey, CompositeAccessKey, DeviceId, ServiceId};

use crate::{
    error::{MulticastFailure, PrepareError},
    stores::{DistributionKeyStore, RecipientDirectory},
    types::{Recipient, SenderCertificate, Thread},
};

/// Hard server-side limit on one multicast ciphertext. A multicast
/// ciphertext cannot be sharded, so exceeding this fails the whole send.
pub const MAX_MULTICAST_CIPHERTEXT_BYTES: usize = 256 * 1024;

const ENVELOPE_VERSION: u8 = 1;

/// A fully built multicast submission, ready for the transport.
///
/// Network retries re-submit this exact ciphertext; it is rebuilt only
/// after state repair (solved challenge path).
#[derive(Debug, Clone)]
pub struct PreparedMulticast {
    /// The sealed envelope.
    pub ciphertext: Bytes,

    /// XOR-composite of every submitted recipient's access key.
    pub credential: CompositeAccessKey,

    /// The identities this submission addresses, in envelope order.
    pub submitted: Vec<ServiceId>,
}

/// Build the sealed multicast submission for the ready recipients.
///
/// Device lists are re-resolved fresh from the directory so a very recent
/// device add or remove is reflected.
///
/// # Errors
///
/// - [`MulticastFailure::MissingAccessKey`] if any ready recipient lacks a
///   sealed-sender access key (checked before anything else).
/// - [`MulticastFailure::OversizeMessage`] if the envelope exceeds
///   [`MAX_MULTICAST_CIPHERTEXT_BYTES`].
/// - Store errors from the directory or key store.
#[allow(clippy::too_many_arguments)]
pub async fn prepare(
    thread: &Thread,
    ready: &[Recipient],
    access: &HashMap<ServiceId, AccessKey>,
    directory: &dyn RecipientDirectory,
    keys: &dyn DistributionKeyStore,
    sender_certificate: &SenderCertificate,
    plaintext: &[u8],
    nonce: [u8; NONCE_LEN],
    now_ms: u64,
) -> Result<PreparedMulticast, PrepareError> {
    let Some(group_id) = thread.group_id() else {
        debug_assert!(false, "multicast prepare on a non-group thread");
        tracing::error!(thread = %thread.id, "multicast prepare on a non-group thread");
        return Err(MulticastFailure::IntegrityViolation("multicast on a non-group thread").into());
    };

    // Every ready recipient must have an access key before any other work.
    let mut recipient_keys = Vec::with_capacity(ready.len());
    for recipient in ready {
        let key = access
            .get(&recipient.service_id)
            .ok_or_else(|| MulticastFailure::MissingAccessKey(recipient.service_id.clone()))?;
        recipient_keys.push(key);
    }
    debug_assert_eq!(recipient_keys.len(), ready.len());
    let credential = CompositeAccessKey::combine(recipient_keys);

    // Fresh device lists; the evaluation-time snapshot may be stale.
    let mut addressed: Vec<(ServiceId, Vec<DeviceId>)> = Vec::with_capacity(ready.len());
    for recipient in ready {
        let devices = directory.devices_for(&recipient.service_id).await?;
        addressed.push((recipient.service_id.clone(), devices));
    }

    let material = keys.current_epoch_material(&thread.id, &thread.members, now_ms).await?;
    let sealing_key = material.sealing_key(group_id.as_bytes()).map_err(|_| {
        debug_assert!(false, "epoch sealing key derivation failed");
        MulticastFailure::IntegrityViolation("epoch key derivation failed")
    })?;
    let sealed = seal_payload(&sealing_key, group_id.as_bytes(), nonce, plaintext)
        .map_err(|_| MulticastFailure::IntegrityViolation("payload sealing failed"))?;

    // The association embedded in the ciphertext must be the thread's own
    // group id; a mismatch is a caller bug, not a runtime condition.
    debug_assert_eq!(sealed.group_id(), group_id.as_bytes());
    if sealed.group_id() != group_id.as_bytes() {
        tracing::error!(thread = %thread.id, "sealed payload group association mismatch");
        return Err(MulticastFailure::IntegrityViolation("group association mismatch").into());
    }

    let sealed_bytes = sealed.to_bytes();
    let mut envelope = BytesMut::with_capacity(128 + sealed_bytes.len());
    envelope.put_u8(ENVELOPE_VERSION);
    envelope.put_u16(sender_certificate.0.len() as u16);
    envelope.put_slice(&sender_certificate.0);
    envelope.put_u64(material.epoch_id());
    envelope.put_u16(addressed.len() as u16);
    for (id, devices) in &addressed {
        envelope.put_u8(id.as_str().len() as u8);
        envelope.put_slice(id.as_str().as_bytes());
        envelope.put_u8(devices.len() as u8);
        for device in devices {
            envelope.put_u32(device.0);
        }
    }
    envelope.put_slice(&sealed_bytes);

    if envelope.len() > MAX_MULTICAST_CIPHERTEXT_BYTES {
        return Err(MulticastFailure::OversizeMessage { size: envelope.len() }.into());
    }

    Ok(PreparedMulticast {
        ciphertext: envelope.freeze(),
        credential,
        submitted: addressed.into_iter().map(|(id, _)| id).collect(),
    })
}
