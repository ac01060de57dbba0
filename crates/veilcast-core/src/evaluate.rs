//! Recipient status evaluator.
//!
//! Partitions the intended recipients of one send into fanout-only,
//! needs-distribution, and sender-key-ready. The partition is complete:
//! every intended recipient lands in exactly one bucket.

use std::collections::{HashMap, HashSet};

use veilcast_proto::{AccessKey, ServiceId};

use crate::{
    error::StoreError,
    registration::classify,
    stores::{DistributionKeyStore, SessionStore},
    types::{FanoutReason, ParticipantState, Partition, Recipient, RegistrationIdStatus, Thread},
};

/// Evaluate the delivery path for every intended recipient.
///
/// Threads that cannot multicast at all take the fast path: everyone is
/// fanout-only and no store is touched.
///
/// # Errors
///
/// Propagates distribution-key store failures. Session store failures do
/// not propagate; the classifier folds them into `Invalid` (fail safe
/// toward fanout).
pub async fn evaluate(
    thread: &Thread,
    intended: &[Recipient],
    access: &HashMap<ServiceId, AccessKey>,
    local_identity: &ServiceId,
    sessions: &dyn SessionStore,
    keys: &dyn DistributionKeyStore,
    now_ms: u64,
) -> Result<Partition, StoreError> {
    let mut partition = Partition::default();

    if !thread.supports_multicast() {
        for recipient in intended {
            partition.insert(
                recipient.clone(),
                ParticipantState::FanoutOnly(FanoutReason::MulticastUnsupported),
            );
        }
        return Ok(partition);
    }

    keys.expire_epoch_if_necessary(&thread.id, &thread.members, now_ms).await?;
    let epoch_valid = keys.is_epoch_valid(&thread.id).await?;
    let candidates: Vec<ServiceId> = intended.iter().map(|r| r.service_id.clone()).collect();
    let needing: HashSet<ServiceId> =
        keys.recipients_needing_epoch(&thread.id, &candidates).await?.into_iter().collect();

    for recipient in intended {
        let state = participant_state(
            thread,
            recipient,
            access,
            local_identity,
            sessions,
            epoch_valid,
            &needing,
        )
        .await;
        partition.insert(recipient.clone(), state);
    }

    tracing::debug!(
        thread = %thread.id,
        ready = partition.ready.len(),
        needs_distribution = partition.needs_distribution.len(),
        fanout_only = partition.fanout_only.len(),
        epoch_valid,
        "evaluated recipient statuses"
    );
    Ok(partition)
}

async fn participant_state(
    thread: &Thread,
    recipient: &Recipient,
    access: &HashMap<ServiceId, AccessKey>,
    local_identity: &ServiceId,
    sessions: &dyn SessionStore,
    epoch_valid: bool,
    needing: &HashSet<ServiceId>,
) -> ParticipantState {
    let id = &recipient.service_id;

    if id == local_identity {
        // Should never occur; degrade silently to fanout in release.
        debug_assert!(false, "local identity included as a remote recipient");
        tracing::error!(%id, "local identity included as a remote recipient");
        return ParticipantState::FanoutOnly(FanoutReason::LocalIdentity);
    }
    if !thread.is_member(id) {
        return ParticipantState::FanoutOnly(FanoutReason::NotAMember);
    }
    if !access.contains_key(id) {
        return ParticipantState::FanoutOnly(FanoutReason::NoSealedSenderAccess);
    }

    match classify(recipient, sessions).await {
        RegistrationIdStatus::Invalid => {
            ParticipantState::FanoutOnly(FanoutReason::InvalidRegistrationId)
        },
        RegistrationIdStatus::NoSession => ParticipantState::NeedsDistribution,
        RegistrationIdStatus::Valid => {
            if !epoch_valid || needing.contains(id) {
                ParticipantState::NeedsDistribution
            } else {
                ParticipantState::SenderKeyReady
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use veilcast_proto::DeviceId;

    use super::*;
    use crate::{
        memory::{InMemoryDistributionKeyStore, InMemorySessionStore},
        registration::MAX_REGISTRATION_ID,
        types::{ConversationKind, GroupId, SessionRecord, ThreadId},
    };

    fn sid(n: u8) -> ServiceId {
        ServiceId::parse(&format!("00000000-0000-4000-8000-{n:012x}")).unwrap()
    }

    fn group_thread(members: Vec<ServiceId>) -> Thread {
        Thread {
            id: ThreadId("t1".into()),
            kind: ConversationKind::Group { group_id: GroupId(b"group-1".to_vec()) },
            multicast_enabled: true,
            members,
        }
    }

    fn recipient(n: u8) -> Recipient {
        Recipient { service_id: sid(n), devices: vec![DeviceId::PRIMARY] }
    }

    fn access_for(recipients: &[Recipient]) -> HashMap<ServiceId, AccessKey> {
        recipients
            .iter()
            .map(|r| (r.service_id.clone(), AccessKey::from_bytes([1; 16])))
            .collect()
    }

    async fn valid_session(store: &InMemorySessionStore, r: &Recipient) {
        for device in &r.devices {
            store
                .put(
                    r.service_id.clone(),
                    *device,
                    SessionRecord { registration_id: 42, has_current_state: true },
                )
                .await;
        }
    }

    #[tokio::test]
    async fn direct_thread_takes_the_fast_path() {
        let thread = Thread {
            id: ThreadId("t1".into()),
            kind: ConversationKind::Direct,
            multicast_enabled: true,
            members: vec![sid(1)],
        };
        let sessions = InMemorySessionStore::new();
        let keys = InMemoryDistributionKeyStore::new();
        let intended = vec![recipient(1)];

        let partition =
            evaluate(&thread, &intended, &access_for(&intended), &sid(9), &sessions, &keys, 0)
                .await
                .unwrap();
        assert!(partition.ready.is_empty());
        assert!(partition.needs_distribution.is_empty());
        assert_eq!(partition.fanout_only.len(), 1);
        assert_eq!(partition.fanout_only[0].1, FanoutReason::MulticastUnsupported);
    }

    #[tokio::test]
    async fn non_members_and_keyless_recipients_go_to_fanout() {
        let member = recipient(1);
        let non_member = recipient(2);
        let keyless = recipient(3);
        let thread = group_thread(vec![sid(1), sid(3)]);

        let sessions = InMemorySessionStore::new();
        valid_session(&sessions, &member).await;
        valid_session(&sessions, &keyless).await;
        let keys = InMemoryDistributionKeyStore::new();

        let mut access = access_for(std::slice::from_ref(&member));
        access.insert(non_member.service_id.clone(), AccessKey::from_bytes([2; 16]));

        let intended = vec![member, non_member, keyless];
        let partition =
            evaluate(&thread, &intended, &access, &sid(9), &sessions, &keys, 0).await.unwrap();

        let reasons: HashMap<ServiceId, FanoutReason> = partition
            .fanout_only
            .iter()
            .map(|(r, reason)| (r.service_id.clone(), *reason))
            .collect();
        assert_eq!(reasons.get(&sid(2)), Some(&FanoutReason::NotAMember));
        assert_eq!(reasons.get(&sid(3)), Some(&FanoutReason::NoSealedSenderAccess));
        // The member has a valid session but no epoch yet.
        assert_eq!(partition.needs_distribution.len(), 1);
    }

    #[tokio::test]
    async fn no_session_never_lands_in_ready() {
        let thread = group_thread(vec![sid(1), sid(2)]);
        let sessions = InMemorySessionStore::new();
        let keys = InMemoryDistributionKeyStore::new();

        // Epoch exists and both recipients already hold it, but recipient 2
        // has no session at all.
        let with_session = recipient(1);
        let without_session = recipient(2);
        valid_session(&sessions, &with_session).await;
        keys.current_epoch_material(&thread.id, &thread.members, 0).await.unwrap();
        keys.record_recipient_received_epoch(&thread.id, &sid(1), 0).await.unwrap();
        keys.record_recipient_received_epoch(&thread.id, &sid(2), 0).await.unwrap();

        let intended = vec![with_session, without_session];
        let partition =
            evaluate(&thread, &intended, &access_for(&intended), &sid(9), &sessions, &keys, 0)
                .await
                .unwrap();

        assert_eq!(partition.ready.len(), 1);
        assert_eq!(partition.ready[0].service_id, sid(1));
        assert_eq!(partition.needs_distribution.len(), 1);
        assert_eq!(partition.needs_distribution[0].service_id, sid(2));
    }

    #[tokio::test]
    async fn stale_epoch_sends_valid_recipients_to_distribution() {
        let thread = group_thread(vec![sid(1)]);
        let sessions = InMemorySessionStore::new();
        let keys = InMemoryDistributionKeyStore::with_max_age(100);
        let r = recipient(1);
        valid_session(&sessions, &r).await;

        keys.current_epoch_material(&thread.id, &thread.members, 0).await.unwrap();
        keys.record_recipient_received_epoch(&thread.id, &sid(1), 0).await.unwrap();

        // Within the age limit: ready.
        let intended = vec![r];
        let partition =
            evaluate(&thread, &intended, &access_for(&intended), &sid(9), &sessions, &keys, 50)
                .await
                .unwrap();
        assert_eq!(partition.ready.len(), 1);

        // Past the age limit: the epoch expires and the recipient needs a
        // fresh distribution despite having received the old one.
        let partition =
            evaluate(&thread, &intended, &access_for(&intended), &sid(9), &sessions, &keys, 200)
                .await
                .unwrap();
        assert!(partition.ready.is_empty());
        assert_eq!(partition.needs_distribution.len(), 1);
    }

    /// The partition is complete: every intended recipient appears in
    /// exactly one bucket, for arbitrary membership, access, and session
    /// configurations.
    #[test]
    fn partition_is_complete_and_disjoint() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        proptest!(|(
            config in prop::collection::vec((any::<bool>(), any::<bool>(), 0u8..4), 1..12),
        )| {
            runtime.block_on(async {
                let mut intended = Vec::new();
                let mut members = Vec::new();
                let mut access = HashMap::new();
                let sessions = InMemorySessionStore::new();
                let keys = InMemoryDistributionKeyStore::new();

                for (i, (is_member, has_access, session_kind)) in config.iter().enumerate() {
                    let r = recipient(i as u8 + 1);
                    if *is_member {
                        members.push(r.service_id.clone());
                    }
                    if *has_access {
                        access.insert(r.service_id.clone(), AccessKey::from_bytes([7; 16]));
                    }
                    match session_kind {
                        0 => {}, // no session
                        1 => valid_session(&sessions, &r).await,
                        2 => {
                            sessions
                                .put(
                                    r.service_id.clone(),
                                    DeviceId::PRIMARY,
                                    SessionRecord {
                                        registration_id: MAX_REGISTRATION_ID + 1,
                                        has_current_state: true,
                                    },
                                )
                                .await;
                        },
                        _ => {
                            sessions
                                .put(
                                    r.service_id.clone(),
                                    DeviceId::PRIMARY,
                                    SessionRecord { registration_id: 1, has_current_state: false },
                                )
                                .await;
                        },
                    }
                    intended.push(r);
                }

                let thread = group_thread(members);
                let partition =
                    evaluate(&thread, &intended, &access, &sid(200), &sessions, &keys, 0)
                        .await
                        .unwrap();

                // Exhaustive: every recipient appears exactly once.
                prop_assert_eq!(partition.len(), intended.len());
                let mut seen: HashSet<ServiceId> = HashSet::new();
                let all = partition
                    .ready
                    .iter()
                    .chain(partition.needs_distribution.iter())
                    .chain(partition.fanout_only.iter().map(|(r, _)| r));
                for r in all {
                    prop_assert!(seen.insert(r.service_id.clone()), "duplicate {:?}", r.service_id);
                }
                Ok(())
            })?;
        });
    }
}
