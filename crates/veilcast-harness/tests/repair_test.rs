//! Server-directed state repair: 409 device drift, 410 stale sessions,
//! unregistered bookkeeping, and the pre-network size check.

use veilcast_core::{MulticastFailure, SendError, stores::DistributionKeyStore};
use veilcast_harness::{Scenario, scenario::TIMESTAMP_MS};
use veilcast_proto::DeviceId;

#[tokio::test]
async fn mismatched_devices_are_repaired_and_the_next_send_succeeds() {
    let mut scenario = Scenario::group();
    let member = scenario.add_member_with_devices(1, &[1, 2]).await;
    let body = format!(
        r#"[{{"uuid":"{member}","devices":{{"missingDevices":[5],"extraDevices":[2]}}}}]"#
    );
    scenario.transport.push_response(409, body.as_bytes()).await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::DeviceUpdate)));

    // The deltas were applied and the epoch rotated before this call failed.
    assert_eq!(scenario.directory.snapshot(&member).await, vec![DeviceId(1), DeviceId(5)]);
    assert!(!scenario.keys.is_epoch_valid(&scenario.thread().id).await.unwrap());
    let handshakes_before = scenario.handshakes.sent().await.len();

    // The resend re-handshakes under the fresh epoch and goes through.
    let result = scenario.send().await.unwrap();
    assert_eq!(result.successes, vec![member]);
    assert!(scenario.handshakes.sent().await.len() > handshakes_before);
    assert_eq!(scenario.transport.submission_count().await, 2);
}

#[tokio::test]
async fn repeating_a_device_repair_settles_on_the_same_device_set() {
    let mut scenario = Scenario::group();
    let member = scenario.add_member_with_devices(1, &[1, 2]).await;
    let body = format!(
        r#"[{{"uuid":"{member}","devices":{{"missingDevices":[5],"extraDevices":[2]}}}}]"#
    );
    scenario.transport.push_response(409, body.as_bytes()).await;
    scenario.send().await.unwrap_err();
    let after_first = scenario.directory.snapshot(&member).await;

    scenario.transport.push_response(409, body.as_bytes()).await;
    scenario.send().await.unwrap_err();
    assert_eq!(scenario.directory.snapshot(&member).await, after_first);
}

#[tokio::test]
async fn stale_devices_get_reset_and_the_epoch_rotates() {
    let mut scenario = Scenario::group();
    let member = scenario.add_member_with_devices(1, &[1, 2]).await;
    let body = format!(r#"[{{"uuid":"{member}","devices":{{"staleDevices":[2]}}}}]"#);
    scenario.transport.push_response(410, body.as_bytes()).await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::StaleDevices)));

    assert_eq!(scenario.sessions.resets().await, vec![(member.clone(), DeviceId(2))]);
    assert!(!scenario.keys.is_epoch_valid(&scenario.thread().id).await.unwrap());
}

#[tokio::test]
async fn unregistered_recipients_are_marked_once_and_excluded_from_successes() {
    let mut scenario = Scenario::group();
    let alive = scenario.add_member(1).await;
    let gone = scenario.add_member(2).await;
    let body = format!(r#"{{"uuids404":["{gone}"]}}"#);
    scenario.transport.push_response(200, body.as_bytes()).await;

    // An unregistered recipient is a definitive outcome, not a failure.
    let result = scenario.send().await.unwrap();
    assert_eq!(result.successes, vec![alive]);
    assert_eq!(result.unregistered, vec![gone.clone()]);
    assert!(result.failed.is_empty());
    assert_eq!(scenario.unregistered.events().await, vec![gone]);
}

#[tokio::test]
async fn oversize_plaintext_never_reaches_the_network() {
    let mut scenario = Scenario::group();
    let member = scenario.add_member(1).await;
    scenario.establish_epoch().await;

    let plaintext = vec![0u8; 300 * 1024];
    let error = scenario.send_plaintext(&plaintext).await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::OversizeMessage { .. })));
    assert_eq!(scenario.transport.submission_count().await, 0);
    let _ = member;
}

#[tokio::test]
async fn epoch_rotates_when_membership_changes_between_sends() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.send().await.unwrap();
    let first_epoch =
        scenario.keys.record(&scenario.thread().id).await.unwrap().epoch_id;
    let handshakes_before = scenario.handshakes.sent().await.len();

    // A new member changes the membership digest; the next send must derive
    // a fresh epoch and re-handshake everyone.
    scenario.add_member(2).await;
    scenario.send().await.unwrap();
    let second_epoch =
        scenario.keys.record(&scenario.thread().id).await.unwrap().epoch_id;
    assert!(second_epoch > first_epoch);
    assert_eq!(scenario.handshakes.sent().await.len(), handshakes_before + 2);

    // Used the stamp timestamp the scenario sends with.
    let record = scenario.keys.record(&scenario.thread().id).await.unwrap();
    assert!(record.holders.values().all(|ts| *ts == TIMESTAMP_MS));
}
