//! Retry-budget behavior against scripted transport outcomes.

use veilcast_core::{MulticastFailure, SendError};
use veilcast_harness::Scenario;

#[tokio::test]
async fn network_failures_within_budget_are_retried_to_success() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.transport.push_network_failure().await;
    scenario.transport.push_network_failure().await;
    // Script exhausted: the third submission succeeds.

    let result = scenario.send().await.unwrap();
    assert_eq!(result.successes.len(), 1);
    assert_eq!(scenario.transport.submission_count().await, 3);
}

#[tokio::test]
async fn network_retries_resubmit_the_same_ciphertext() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.transport.push_network_failure().await;

    scenario.send().await.unwrap();

    let submissions = scenario.transport.submissions().await;
    assert_eq!(submissions.len(), 2);
    // A plain network retry must not re-seal.
    assert_eq!(submissions[0].ciphertext, submissions[1].ciphertext);
    assert_eq!(submissions[0].credential, submissions[1].credential);
}

#[tokio::test]
async fn budget_exhaustion_fails_after_exactly_four_attempts() {
    let mut scenario = Scenario::group();
    let member = scenario.add_member(1).await;
    for _ in 0..4 {
        scenario.transport.push_network_failure().await;
    }

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::NetworkExhausted)));
    // One initial attempt plus the full retry budget of three.
    assert_eq!(scenario.transport.submission_count().await, 4);

    // The recipient was never stamped delivered, but still holds the epoch
    // from the handshake: the next send goes straight to multicast.
    let record = scenario.keys.record(&scenario.thread().id).await.unwrap();
    assert!(record.holders.contains_key(&member));
}

#[tokio::test]
async fn solved_challenge_reseals_and_resends() {
    let mut scenario = Scenario::with_challenge_solver(true);
    scenario.add_member(1).await;
    scenario.transport.push_response(428, b"{\"token\":\"abc\"}").await;

    let result = scenario.send().await.unwrap();
    assert_eq!(result.successes.len(), 1);
    assert_eq!(scenario.challenge.calls(), 1);

    // The second submission was rebuilt with a fresh nonce.
    let submissions = scenario.transport.submissions().await;
    assert_eq!(submissions.len(), 2);
    assert_ne!(submissions[0].ciphertext, submissions[1].ciphertext);
}

#[tokio::test]
async fn unsolved_challenge_is_terminal_without_retry() {
    let mut scenario = Scenario::with_challenge_solver(false);
    scenario.add_member(1).await;
    scenario.transport.push_response(428, b"{}").await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::SpamChallengeRequired)));
    assert_eq!(scenario.transport.submission_count().await, 1);
}

#[tokio::test]
async fn rejected_credential_is_terminal() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.transport.push_response(401, b"").await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::InvalidAuthHeader)));
    assert_eq!(scenario.transport.submission_count().await, 1);
}

#[tokio::test]
async fn unresolvable_recipient_is_terminal() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.transport.push_response(404, b"").await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(error, SendError::Multicast(MulticastFailure::InvalidRecipient)));
}

#[tokio::test]
async fn unknown_status_is_surfaced_as_unhandled() {
    let mut scenario = Scenario::group();
    scenario.add_member(1).await;
    scenario.transport.push_response(503, b"").await;

    let error = scenario.send().await.unwrap_err();
    assert!(matches!(
        error,
        SendError::Multicast(MulticastFailure::Unhandled { status: 503 })
    ));
}
