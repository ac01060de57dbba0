//! Sealing of the single multicast ciphertext.
//!
//! One group message is encrypted exactly once, under the epoch sealing key,
//! for every recipient device at the same time. The group identifier is
//! embedded in the sealed payload (and authenticated as AEAD associated
//! data) so the delivery layer can assert it matches the conversation being
//! sent to.
//!
//! Wire layout:
//!
//! ```text
//! [2 bytes: group id length (u16 BE)]
//! [N bytes: group id]
//! [24 bytes: XChaCha20-Poly1305 nonce]
//! [M bytes: ciphertext + 16-byte tag]
//! ```

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::CryptoError;

/// Length in bytes of the XChaCha20-Poly1305 nonce.
pub const NONCE_LEN: usize = 24;

/// Minimum sealed payload: empty group id, nonce, AEAD tag.
const MIN_SEALED_LEN: usize = 2 + NONCE_LEN + 16;

/// A sealed multicast payload with its embedded group association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    group_id: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// The group identifier this payload was sealed for.
    #[must_use]
    pub fn group_id(&self) -> &[u8] {
        &self.group_id
    }

    /// Encode to the wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.group_id.len() + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&(self.group_id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.group_id);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode from the wire layout.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Truncated`] if the payload is shorter than the
    /// declared layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_SEALED_LEN {
            return Err(CryptoError::Truncated { len: bytes.len() });
        }
        let group_len = usize::from(u16::from_be_bytes([bytes[0], bytes[1]]));
        if bytes.len() < 2 + group_len + NONCE_LEN + 16 {
            return Err(CryptoError::Truncated { len: bytes.len() });
        }
        let group_id = bytes[2..2 + group_len].to_vec();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[2 + group_len..2 + group_len + NONCE_LEN]);
        let ciphertext = bytes[2 + group_len + NONCE_LEN..].to_vec();
        Ok(Self { group_id, nonce, ciphertext })
    }
}

/// Seal a plaintext under the epoch sealing key for one group.
///
/// The nonce must be fresh random bytes per call; the caller owns nonce
/// generation so this crate stays free of RNG state.
///
/// # Errors
///
/// Returns [`CryptoError::Seal`] if AEAD encryption fails.
pub fn seal_payload(
    key: &[u8; 32],
    group_id: &[u8],
    nonce: [u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<SealedPayload, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: group_id })
        .map_err(|_| CryptoError::Seal)?;
    Ok(SealedPayload { group_id: group_id.to_vec(), nonce, ciphertext })
}

/// Open a sealed payload with the epoch sealing key.
///
/// The group id embedded in the payload is the associated data; a payload
/// spliced from another conversation fails authentication here.
///
/// # Errors
///
/// Returns [`CryptoError::Open`] if authentication fails.
pub fn open_payload(key: &[u8; 32], sealed: &SealedPayload) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(&sealed.nonce),
            Payload { msg: sealed.ciphertext.as_slice(), aad: &sealed.group_id },
        )
        .map_err(|_| CryptoError::Open)
}
