//! Sealed-sender access keys and the composite multicast credential.
//!
//! Each recipient grants the sender a 16-byte access key that permits
//! delivery without revealing the sender's identity to the server. A
//! multicast submission carries one credential for the whole recipient set:
//! the XOR of every individual key. XOR is commutative and associative, so
//! the composite is independent of recipient iteration order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length in bytes of an individual access key and of the composite.
pub const ACCESS_KEY_LEN: usize = 16;

/// Per-recipient sealed-sender access key.
///
/// The debug representation is redacted: access keys are credentials and
/// must never end up in logs.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey([u8; ACCESS_KEY_LEN]);

impl AccessKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ACCESS_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ACCESS_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(..)")
    }
}

/// Composite credential for one multicast submission.
///
/// Computed by XOR-folding every ready recipient's [`AccessKey`]. The empty
/// fold is all zeroes, but the engine never submits with zero recipients.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CompositeAccessKey([u8; ACCESS_KEY_LEN]);

impl CompositeAccessKey {
    /// XOR-combine a set of access keys into one composite credential.
    #[must_use]
    pub fn combine<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a AccessKey>,
    {
        let mut out = [0u8; ACCESS_KEY_LEN];
        for key in keys {
            for (acc, byte) in out.iter_mut().zip(key.as_bytes()) {
                *acc ^= byte;
            }
        }
        Self(out)
    }

    /// The raw composite bytes, as submitted to the transport.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ACCESS_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for CompositeAccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompositeAccessKey(..)")
    }
}
