//! In-memory collaborator implementations.
//!
//! Reference implementations of the store traits, used by unit tests and
//! the simulation harness. They keep the same invariants the production
//! stores must: epoch ids increase monotonically per thread, an existing
//! epoch's seed is never re-derived, and every mutation is atomic.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use veilcast_crypto::{EPOCH_SEED_LEN, EpochMaterial, membership_digest};
use veilcast_proto::{DeviceId, ServiceId};

use crate::{
    error::StoreError,
    stores::{DistributionKeyStore, RecipientDirectory, SessionStore, UnregisteredMarker},
    types::{SessionRecord, ThreadId},
};

/// Default epoch age limit: 14 days.
pub const DEFAULT_EPOCH_MAX_AGE_MS: u64 = 14 * 24 * 60 * 60 * 1000;

/// In-memory recipient directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    devices: RwLock<HashMap<ServiceId, BTreeSet<DeviceId>>>,
}

impl InMemoryDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account with its devices.
    pub async fn insert(&self, id: ServiceId, devices: impl IntoIterator<Item = DeviceId>) {
        self.devices.write().await.insert(id, devices.into_iter().collect());
    }

    /// Snapshot of one account's device set, sorted, for assertions.
    pub async fn snapshot(&self, id: &ServiceId) -> Vec<DeviceId> {
        self.devices
            .read()
            .await
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn devices_for(&self, id: &ServiceId) -> Result<Vec<DeviceId>, StoreError> {
        Ok(self.snapshot(id).await)
    }

    async fn apply_device_changes(
        &self,
        id: &ServiceId,
        missing: &[DeviceId],
        extra: &[DeviceId],
    ) -> Result<(), StoreError> {
        let mut devices = self.devices.write().await;
        let set = devices.entry(id.clone()).or_default();
        for device in missing {
            set.insert(*device);
        }
        for device in extra {
            set.remove(device);
        }
        Ok(())
    }
}

/// In-memory pairwise session store. Also records every reset, so tests can
/// assert which sessions a 410 repair touched.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<(ServiceId, DeviceId), SessionRecord>>,
    resets: RwLock<Vec<(ServiceId, DeviceId)>>,
}

impl InMemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a session record for one (identity, device) pair.
    pub async fn put(&self, id: ServiceId, device: DeviceId, record: SessionRecord) {
        self.sessions.write().await.insert((id, device), record);
    }

    /// Every reset performed so far, in order.
    pub async fn resets(&self) -> Vec<(ServiceId, DeviceId)> {
        self.resets.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_session(
        &self,
        id: &ServiceId,
        device: DeviceId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().await.get(&(id.clone(), device)).copied())
    }

    async fn reset_session(&self, id: &ServiceId, device: DeviceId) -> Result<(), StoreError> {
        self.sessions.write().await.remove(&(id.clone(), device));
        self.resets.write().await.push((id.clone(), device));
        Ok(())
    }
}

/// One epoch of sender-key material for a thread, with its holder set.
#[derive(Clone)]
pub struct DistributionKeyRecord {
    /// Epoch generation number, monotonic per thread.
    pub epoch_id: u64,

    /// The epoch seed.
    pub seed: [u8; EPOCH_SEED_LEN],

    /// When the epoch was derived, milliseconds since the epoch.
    pub created_at_ms: u64,

    /// Digest of the member set the epoch was derived for.
    pub membership_digest: [u8; 32],

    /// Recipients known to hold this epoch, with the timestamp of the
    /// handshake that delivered it.
    pub holders: HashMap<ServiceId, u64>,
}

#[derive(Default)]
struct ThreadKeyState {
    record: Option<DistributionKeyRecord>,
    last_epoch_id: u64,
}

/// In-memory distribution-key store.
///
/// Expiry policy: an epoch expires once it is older than the configured age
/// limit, or when the thread's membership digest no longer matches the one
/// recorded at derivation time.
pub struct InMemoryDistributionKeyStore {
    threads: RwLock<HashMap<ThreadId, ThreadKeyState>>,
    max_epoch_age_ms: u64,
}

impl Default for InMemoryDistributionKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDistributionKeyStore {
    /// Store with the default 14-day epoch age limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_EPOCH_MAX_AGE_MS)
    }

    /// Store with a custom epoch age limit.
    #[must_use]
    pub fn with_max_age(max_epoch_age_ms: u64) -> Self {
        Self { threads: RwLock::new(HashMap::new()), max_epoch_age_ms }
    }

    /// Current record for a thread, for assertions.
    pub async fn record(&self, thread: &ThreadId) -> Option<DistributionKeyRecord> {
        self.threads.read().await.get(thread).and_then(|state| state.record.clone())
    }
}

#[async_trait]
impl DistributionKeyStore for InMemoryDistributionKeyStore {
    async fn expire_epoch_if_necessary(
        &self,
        thread: &ThreadId,
        members: &[ServiceId],
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        if let Some(state) = threads.get_mut(thread)
            && let Some(record) = &state.record
        {
            let too_old = now_ms.saturating_sub(record.created_at_ms) >= self.max_epoch_age_ms;
            let digest = membership_digest(members.iter().map(ServiceId::as_str));
            let membership_changed = record.membership_digest != digest;
            if too_old || membership_changed {
                tracing::debug!(
                    %thread,
                    epoch_id = record.epoch_id,
                    too_old,
                    membership_changed,
                    "expiring distribution key epoch"
                );
                state.record = None;
            }
        }
        Ok(())
    }

    async fn is_epoch_valid(&self, thread: &ThreadId) -> Result<bool, StoreError> {
        Ok(self.threads.read().await.get(thread).is_some_and(|state| state.record.is_some()))
    }

    async fn recipients_needing_epoch(
        &self,
        thread: &ThreadId,
        candidates: &[ServiceId],
    ) -> Result<Vec<ServiceId>, StoreError> {
        let threads = self.threads.read().await;
        let record = threads.get(thread).and_then(|state| state.record.as_ref());
        Ok(match record {
            Some(record) => {
                candidates.iter().filter(|id| !record.holders.contains_key(id)).cloned().collect()
            },
            None => candidates.to_vec(),
        })
    }

    async fn current_epoch_material(
        &self,
        thread: &ThreadId,
        members: &[ServiceId],
        now_ms: u64,
    ) -> Result<EpochMaterial, StoreError> {
        let mut threads = self.threads.write().await;
        let state = threads.entry(thread.clone()).or_default();
        if state.record.is_none() {
            state.last_epoch_id += 1;
            let record = DistributionKeyRecord {
                epoch_id: state.last_epoch_id,
                seed: rand::random(),
                created_at_ms: now_ms,
                membership_digest: membership_digest(members.iter().map(ServiceId::as_str)),
                holders: HashMap::new(),
            };
            tracing::debug!(%thread, epoch_id = record.epoch_id, "derived fresh epoch");
            state.record = Some(record);
        }
        let record = state.record.as_ref().ok_or_else(|| StoreError("epoch vanished".into()))?;
        Ok(EpochMaterial::new(record.epoch_id, record.seed))
    }

    async fn record_recipient_received_epoch(
        &self,
        thread: &ThreadId,
        id: &ServiceId,
        timestamp_ms: u64,
    ) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let record = threads
            .get_mut(thread)
            .and_then(|state| state.record.as_mut())
            .ok_or_else(|| StoreError(format!("no current epoch for thread {thread}")))?;
        record.holders.insert(id.clone(), timestamp_ms);
        Ok(())
    }

    async fn rotate_epoch(&self, thread: &ThreadId) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        let state = threads.entry(thread.clone()).or_default();
        if let Some(record) = &state.record {
            tracing::debug!(%thread, epoch_id = record.epoch_id, "rotating epoch");
        }
        state.record = None;
        Ok(())
    }
}

/// In-memory unregistered-account marker. Records every call, duplicates
/// included, so tests can assert exactly-once bookkeeping.
#[derive(Default)]
pub struct InMemoryUnregisteredMarker {
    events: RwLock<Vec<ServiceId>>,
}

impl InMemoryUnregisteredMarker {
    /// Empty marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mark call so far, in order, duplicates preserved.
    pub async fn events(&self) -> Vec<ServiceId> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl UnregisteredMarker for InMemoryUnregisteredMarker {
    async fn mark_unregistered(&self, id: &ServiceId) -> Result<(), StoreError> {
        self.events.write().await.push(id.clone());
        Ok(())
    }
}
