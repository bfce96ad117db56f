//! End-to-end ceremony flows against the mock relying party and bridge.
//!
//! The tests play the host role: they start ceremonies, observe the options
//! handed to the authenticator bridge, and deliver interaction results back
//! to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use fido2_ceremony::{
    AssertionResult, AttestationResult, AuthenticatorError, AuthenticatorErrorKind,
    CeremonyError, CeremonyOptions, CeremonyResult, CeremonySuccess, CorrelationId,
    DeliveryStatus, MockAuthenticator, MockRelyingParty, Orchestrator, UserId,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Orchestrator, Arc<MockRelyingParty>, Arc<MockAuthenticator>) {
    init_tracing();
    let relying_party = Arc::new(MockRelyingParty::new());
    let bridge = Arc::new(MockAuthenticator::new());
    let orchestrator = Orchestrator::new(relying_party.clone(), bridge.clone());
    (orchestrator, relying_party, bridge)
}

/// Wait until the bridge has received `expected` interaction requests and
/// return the most recent options.
async fn wait_for_interaction(bridge: &MockAuthenticator, expected: usize) -> CeremonyOptions {
    for _ in 0..200 {
        if bridge.requests().len() >= expected {
            return bridge.last_options().expect("bridge recorded options");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("authenticator bridge never received the interaction request");
}

fn assertion_over(challenge: &[u8]) -> CeremonyResult {
    let client_data = serde_json::json!({
        "type": "webauthn.get",
        "challenge": STANDARD.encode(challenge),
        "origin": "https://fido2.apps.praphull.com",
    });
    CeremonyResult::Assertion(AssertionResult {
        credential_id: b"cred-key-1".to_vec(),
        client_data_json: serde_json::to_vec(&client_data).expect("client data serializes"),
        authenticator_data: b"authenticator-data".to_vec(),
        signature: b"signature-over-challenge".to_vec(),
        user_handle: None,
    })
}

fn attestation_over(challenge: &[u8]) -> CeremonyResult {
    let client_data = serde_json::json!({
        "type": "webauthn.create",
        "challenge": STANDARD.encode(challenge),
        "origin": "https://fido2.apps.praphull.com",
    });
    CeremonyResult::Attestation(AttestationResult {
        credential_id: b"new-cred-key".to_vec(),
        client_data_json: serde_json::to_vec(&client_data).expect("client data serializes"),
        attestation_object: b"attestation-object".to_vec(),
    })
}

#[tokio::test]
async fn authentication_by_username_end_to_end() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();

    let options = wait_for_interaction(&bridge, 1).await;
    let challenge = options.challenge().to_vec();

    let status = orchestrator.deliver_interaction_result(correlation_id, assertion_over(&challenge));
    assert_eq!(status, DeliveryStatus::Accepted);

    match handle.outcome().await.expect("ceremony succeeds") {
        CeremonySuccess::Authenticated { user } => {
            assert_eq!(user.user_id, UserId(42));
            assert_eq!(user.username.as_deref(), Some("alice"));
        }
        other => panic!("expected authentication success, got {other:?}"),
    }

    let session = orchestrator.session();
    assert!(session.authenticated);
    assert_eq!(session.user_id, Some(UserId(42)));

    // The user was resolved strictly before options were fetched.
    assert_eq!(
        relying_party.calls(),
        vec!["resolve_user", "authentication_options", "submit_assertion"]
    );
}

#[tokio::test]
async fn registration_without_session_makes_no_network_calls() {
    let (orchestrator, relying_party, _bridge) = setup();

    let err = orchestrator
        .begin_registration(CorrelationId::new())
        .unwrap_err();
    assert!(matches!(err, CeremonyError::InvalidState(_)));
    assert!(relying_party.calls().is_empty());
    assert_eq!(orchestrator.pending_ceremonies(), 0);
}

#[tokio::test]
async fn password_login_identifies_session_and_enables_registration() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("bob", UserId(7));
    relying_party.set_password("bob", "hunter2");

    let user = orchestrator
        .login_with_password("bob", "hunter2")
        .await
        .expect("password login succeeds");
    assert_eq!(user.user_id, UserId(7));

    // Identified, not authenticated: no assertion has been produced.
    let session = orchestrator.session();
    assert_eq!(session.user_id, Some(UserId(7)));
    assert!(!session.authenticated);

    // The identified session is what gates registration.
    let handle = orchestrator
        .begin_registration(CorrelationId::new())
        .expect("registration starts after password login");
    let options = wait_for_interaction(&bridge, 1).await;
    orchestrator
        .deliver_interaction_result(handle.correlation_id(), attestation_over(options.challenge()));
    handle.outcome().await.expect("registration succeeds");
}

#[tokio::test]
async fn rejected_password_leaves_session_anonymous() {
    let (orchestrator, relying_party, _bridge) = setup();
    relying_party.add_user("bob", UserId(7));
    relying_party.set_password("bob", "hunter2");

    let err = orchestrator
        .login_with_password("bob", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, CeremonyError::UnresolvedUser(_)));
    assert_eq!(orchestrator.session().user_id, None);

    let err = orchestrator
        .begin_registration(CorrelationId::new())
        .unwrap_err();
    assert!(matches!(err, CeremonyError::InvalidState(_)));
}

#[tokio::test]
async fn registration_end_to_end_updates_credential_count_only() {
    let (orchestrator, relying_party, bridge) = setup();
    orchestrator.identify_user(UserId(7), Some("bob".into()));

    let handle = orchestrator
        .begin_registration(CorrelationId::new())
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();

    let options = wait_for_interaction(&bridge, 1).await;
    let challenge = options.challenge().to_vec();

    let status =
        orchestrator.deliver_interaction_result(correlation_id, attestation_over(&challenge));
    assert_eq!(status, DeliveryStatus::Accepted);

    match handle.outcome().await.expect("ceremony succeeds") {
        CeremonySuccess::Registered { credentials } => assert_eq!(credentials.len(), 1),
        other => panic!("expected registration success, got {other:?}"),
    }

    let session = orchestrator.session();
    assert_eq!(session.credential_count, 1);
    // Registration never logs the user in.
    assert!(!session.authenticated);
    assert_eq!(
        relying_party.calls(),
        vec!["registration_options", "submit_attestation"]
    );
}

#[tokio::test]
async fn unknown_username_resolves_to_unresolved_user() {
    let (orchestrator, relying_party, _bridge) = setup();

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("mallory".into()))
        .expect("ceremony starts");

    match handle.outcome().await.unwrap_err() {
        CeremonyError::UnresolvedUser(name) => assert_eq!(name, "mallory"),
        other => panic!("expected UnresolvedUser, got {other}"),
    }
    // Options were never fetched for the unresolved name.
    assert_eq!(relying_party.calls(), vec!["resolve_user"]);
}

#[tokio::test]
async fn user_cancellation_skips_submission() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    wait_for_interaction(&bridge, 1).await;

    let status = orchestrator.deliver_interaction_result(
        correlation_id,
        CeremonyResult::Error(AuthenticatorError::user_cancelled()),
    );
    assert_eq!(status, DeliveryStatus::Accepted);

    match handle.outcome().await.unwrap_err() {
        CeremonyError::Authenticator(err) => {
            assert_eq!(err.kind, AuthenticatorErrorKind::UserCancelled);
        }
        other => panic!("expected Authenticator error, got {other}"),
    }
    assert!(!relying_party
        .calls()
        .iter()
        .any(|call| call.starts_with("submit")));
    assert!(!orchestrator.session().authenticated);
}

#[tokio::test]
async fn timeout_resolves_once_and_late_delivery_is_ignored() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    relying_party.set_options_timeout(Duration::from_millis(50));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    let options = wait_for_interaction(&bridge, 1).await;

    // Nobody delivers a result: the declared 50ms timeout fires.
    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CeremonyError::Timeout));
    assert_eq!(orchestrator.pending_ceremonies(), 0);

    // The genuine callback arriving after the timeout is a no-op.
    let status = orchestrator
        .deliver_interaction_result(correlation_id, assertion_over(options.challenge()));
    assert_eq!(status, DeliveryStatus::Ignored);
    assert!(!orchestrator.session().authenticated);
}

#[tokio::test]
async fn delivery_beats_timeout_and_timeout_stays_silent() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    relying_party.set_options_timeout(Duration::from_millis(250));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    let options = wait_for_interaction(&bridge, 1).await;

    let status = orchestrator
        .deliver_interaction_result(correlation_id, assertion_over(options.challenge()));
    assert_eq!(status, DeliveryStatus::Accepted);
    assert!(handle.outcome().await.is_ok());

    // Let the armed timeout fire against the resolved ceremony.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orchestrator.pending_ceremonies(), 0);
    assert!(orchestrator.session().authenticated);
}

#[tokio::test]
async fn duplicate_delivery_after_resolution_is_ignored() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    let options = wait_for_interaction(&bridge, 1).await;
    let result = assertion_over(options.challenge());

    assert_eq!(
        orchestrator.deliver_interaction_result(correlation_id, result.clone()),
        DeliveryStatus::Accepted
    );
    handle.outcome().await.expect("ceremony succeeds");

    assert_eq!(
        orchestrator.deliver_interaction_result(correlation_id, result),
        DeliveryStatus::Ignored
    );
    // No second submission happened.
    assert_eq!(
        relying_party
            .calls()
            .iter()
            .filter(|call| *call == &"submit_assertion".to_string())
            .count(),
        1
    );
}

#[tokio::test]
async fn server_rejection_leaves_session_unchanged() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    relying_party.set_reject_submissions(true);

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    let options = wait_for_interaction(&bridge, 1).await;

    orchestrator.deliver_interaction_result(correlation_id, assertion_over(options.challenge()));

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CeremonyError::ServerRejected(_)));
    assert!(!orchestrator.session().authenticated);
    assert_eq!(orchestrator.session().user_id, None);
}

#[tokio::test]
async fn options_fetch_failure_resolves_to_server_error() {
    let (orchestrator, relying_party, _bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    relying_party.set_fail_fetches(true);

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CeremonyError::Server(_)));
}

#[tokio::test]
async fn unavailable_bridge_resolves_to_authenticator_unavailable() {
    init_tracing();
    let relying_party = Arc::new(MockRelyingParty::new());
    relying_party.add_user("alice", UserId(42));
    let bridge = Arc::new(MockAuthenticator::unavailable());
    let orchestrator = Orchestrator::new(relying_party, bridge);

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CeremonyError::AuthenticatorUnavailable(_)));
}

#[tokio::test]
async fn mismatched_payload_kind_resolves_to_invalid_state() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    // A short declared timeout races the failure resolution; the accepted
    // delivery must still win and report InvalidState, never Timeout.
    relying_party.set_options_timeout(Duration::from_millis(50));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let correlation_id = handle.correlation_id();
    let options = wait_for_interaction(&bridge, 1).await;

    // An attestation cannot complete an authentication ceremony.
    let status = orchestrator
        .deliver_interaction_result(correlation_id, attestation_over(options.challenge()));
    assert_eq!(status, DeliveryStatus::Accepted);

    let err = handle.outcome().await.unwrap_err();
    assert!(matches!(err, CeremonyError::InvalidState(_)));
    assert!(!relying_party
        .calls()
        .iter()
        .any(|call| call.starts_with("submit")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orchestrator.pending_ceremonies(), 0);
}

#[tokio::test]
async fn failed_ceremony_gets_fresh_challenge_on_retry() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    relying_party.set_reject_submissions(true);

    let first = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let first_options = wait_for_interaction(&bridge, 1).await;
    orchestrator
        .deliver_interaction_result(first.correlation_id(), assertion_over(first_options.challenge()));
    first.outcome().await.unwrap_err();

    // Retry under a fresh correlation id: a new options fetch, a new challenge.
    relying_party.set_reject_submissions(false);
    let second = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("retry starts");
    let second_options = wait_for_interaction(&bridge, 2).await;

    assert_ne!(first_options.challenge(), second_options.challenge());
    assert_eq!(relying_party.issued_challenges().len(), 2);

    orchestrator.deliver_interaction_result(
        second.correlation_id(),
        assertion_over(second_options.challenge()),
    );
    second.outcome().await.expect("retry succeeds");
}

#[tokio::test]
async fn independent_ceremonies_run_concurrently() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));
    orchestrator.identify_user(UserId(42), Some("alice".into()));

    let registration = orchestrator
        .begin_registration(CorrelationId::new())
        .expect("registration starts");
    let login = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("login starts");
    assert_eq!(orchestrator.pending_ceremonies(), 2);

    wait_for_interaction(&bridge, 2).await;
    let requests = bridge.requests();

    for (correlation_id, options) in &requests {
        let result = match options {
            CeremonyOptions::Registration(_) => attestation_over(options.challenge()),
            CeremonyOptions::Authentication(_) => assertion_over(options.challenge()),
        };
        assert_eq!(
            orchestrator.deliver_interaction_result(*correlation_id, result),
            DeliveryStatus::Accepted
        );
    }

    assert!(registration.outcome().await.is_ok());
    assert!(login.outcome().await.is_ok());
    assert_eq!(orchestrator.pending_ceremonies(), 0);

    let session = orchestrator.session();
    assert!(session.authenticated);
    assert_eq!(session.credential_count, 1);
}

#[tokio::test]
async fn logout_clears_session_state() {
    let (orchestrator, relying_party, bridge) = setup();
    relying_party.add_user("alice", UserId(42));

    let handle = orchestrator
        .begin_authentication(CorrelationId::new(), Some("alice".into()))
        .expect("ceremony starts");
    let options = wait_for_interaction(&bridge, 1).await;
    orchestrator.deliver_interaction_result(handle.correlation_id(), assertion_over(options.challenge()));
    handle.outcome().await.expect("login succeeds");
    assert!(orchestrator.session().authenticated);

    orchestrator.logout();
    let session = orchestrator.session();
    assert!(!session.authenticated);
    assert_eq!(session.user_id, None);
}
