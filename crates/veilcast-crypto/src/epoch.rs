//! Per-conversation epoch key material.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Length in bytes of an epoch seed.
pub const EPOCH_SEED_LEN: usize = 32;

const SEALING_KEY_INFO: &[u8] = b"veilcast-epoch-sealing-v1";

/// One generation of sender-key material for a conversation.
///
/// The seed is distributed to members over pairwise sessions; the sealing
/// key is derived locally and never leaves the device. Epoch ids increase
/// monotonically per conversation: a rotated epoch never reuses an id, so
/// a recipient holding an old seed can never decrypt a newer message.
#[derive(Clone, PartialEq, Eq)]
pub struct EpochMaterial {
    epoch_id: u64,
    seed: [u8; EPOCH_SEED_LEN],
}

impl EpochMaterial {
    /// Wrap an epoch id and its seed.
    #[must_use]
    pub const fn new(epoch_id: u64, seed: [u8; EPOCH_SEED_LEN]) -> Self {
        Self { epoch_id, seed }
    }

    /// The epoch generation number.
    #[must_use]
    pub const fn epoch_id(&self) -> u64 {
        self.epoch_id
    }

    /// The raw seed, for pairwise distribution to members.
    #[must_use]
    pub const fn seed(&self) -> &[u8; EPOCH_SEED_LEN] {
        &self.seed
    }

    /// Derive the sealing key for this epoch, bound to the group identifier.
    ///
    /// HKDF-SHA256 with the group id as salt and a fixed scheme label as
    /// info. Binding the group id here means a leaked seed from one
    /// conversation derives a useless key for any other.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
    pub fn sealing_key(&self, group_id: &[u8]) -> Result<[u8; 32], CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(group_id), &self.seed);
        let mut key = [0u8; 32];
        hk.expand(SEALING_KEY_INFO, &mut key).map_err(|_| CryptoError::KeyDerivation)?;
        Ok(key)
    }
}

impl std::fmt::Debug for EpochMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seed is key material; never print it.
        f.debug_struct("EpochMaterial").field("epoch_id", &self.epoch_id).finish_non_exhaustive()
    }
}

/// Digest of a conversation's member set, used to detect membership change.
///
/// Members are length-prefixed and sorted before hashing, so the digest is
/// independent of iteration order and unambiguous under concatenation.
#[must_use]
pub fn membership_digest<I, T>(members: I) -> [u8; 32]
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut entries: Vec<Vec<u8>> = members.into_iter().map(|m| m.as_ref().to_vec()).collect();
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update((entry.len() as u64).to_be_bytes());
        hasher.update(entry);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn sealing_key_is_deterministic() {
        let material = EpochMaterial::new(3, [0x42; EPOCH_SEED_LEN]);
        let a = material.sealing_key(b"group-a").unwrap();
        let b = material.sealing_key(b"group-a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sealing_key_differs_per_group() {
        let material = EpochMaterial::new(3, [0x42; EPOCH_SEED_LEN]);
        let a = material.sealing_key(b"group-a").unwrap();
        let b = material.sealing_key(b"group-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_does_not_leak_seed() {
        let material = EpochMaterial::new(7, [0xAB; EPOCH_SEED_LEN]);
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("ab, ab"));
        assert!(rendered.contains("epoch_id: 7"));
    }

    proptest! {
        #[test]
        fn membership_digest_is_order_independent(
            mut members in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..40), 0..10),
        ) {
            let forward = membership_digest(members.iter());
            members.reverse();
            let backward = membership_digest(members.iter());
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn membership_digest_detects_added_member(
            members in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..40), 1..8),
            extra in prop::collection::vec(any::<u8>(), 41..60),
        ) {
            let before = membership_digest(members.iter());
            let mut grown = members.clone();
            grown.push(extra);
            let after = membership_digest(grown.iter());
            prop_assert_ne!(before, after);
        }
    }
}
