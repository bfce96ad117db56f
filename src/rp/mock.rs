//! Scripted relying party for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::RelyingParty;
use crate::error::{CeremonyError, Result};
use crate::types::{
    AssertionResult, AttestationResult, AuthenticatedUser, AuthenticationOptions,
    CredentialDescriptor, CredentialParameter, CredentialRef, RegistrationOptions,
    RelyingPartyInfo, UserEntity, UserId,
};

/// In-memory relying party double.
///
/// Issues a fresh, unique challenge per options fetch, records every
/// operation it serves, and can be scripted to reject submissions. Test-only
/// by nature, shipped like any other mock so downstream crates can drive the
/// orchestrator without a server.
#[derive(Default)]
pub struct MockRelyingParty {
    users: Mutex<HashMap<String, AuthenticatedUser>>,
    passwords: Mutex<HashMap<String, String>>,
    credentials: Mutex<Vec<CredentialRef>>,
    login_as: Mutex<Option<AuthenticatedUser>>,
    calls: Mutex<Vec<String>>,
    issued_challenges: Mutex<Vec<Vec<u8>>>,
    challenge_counter: AtomicU64,
    reject_submissions: AtomicBool,
    fail_fetches: AtomicBool,
    options_timeout: Mutex<Option<Duration>>,
}

impl MockRelyingParty {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a known user; the first one becomes the identity confirmed
    /// on successful assertion submission.
    pub fn add_user(&self, username: &str, user_id: UserId) {
        let user = AuthenticatedUser {
            user_id,
            username: Some(username.to_string()),
        };
        self.lock(&self.login_as).get_or_insert_with(|| user.clone());
        self.lock(&self.users).insert(username.to_string(), user);
    }

    /// Accept this password for an already added user.
    pub fn set_password(&self, username: &str, password: &str) {
        self.lock(&self.passwords)
            .insert(username.to_string(), password.to_string());
    }

    /// Make both submission endpoints answer with a semantic rejection.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    /// Make both options endpoints fail with a server error.
    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Declared timeout carried in every issued options document.
    pub fn set_options_timeout(&self, timeout: Duration) {
        *self.lock(&self.options_timeout) = Some(timeout);
    }

    /// Names of the operations served so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock(&self.calls).clone()
    }

    /// Every challenge issued so far; all distinct by construction.
    pub fn issued_challenges(&self) -> Vec<Vec<u8>> {
        self.lock(&self.issued_challenges).clone()
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, call: &str) {
        self.lock(&self.calls).push(call.to_string());
    }

    fn next_challenge(&self) -> Vec<u8> {
        let n = self.challenge_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let challenge = format!("challenge-{n}").into_bytes();
        self.lock(&self.issued_challenges).push(challenge.clone());
        challenge
    }

    fn check_fetch(&self, context: &str) -> Result<()> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            Err(CeremonyError::Server(format!("{context}: scripted failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelyingParty for MockRelyingParty {
    async fn resolve_user(&self, username: &str) -> Result<Option<AuthenticatedUser>> {
        self.record("resolve_user");
        Ok(self.lock(&self.users).get(username).cloned())
    }

    async fn password_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>> {
        self.record("password_login");
        let accepted = self
            .lock(&self.passwords)
            .get(username)
            .is_some_and(|expected| expected == password);
        if !accepted {
            return Ok(None);
        }
        Ok(self.lock(&self.users).get(username).cloned())
    }

    async fn registration_options(&self, user: UserId) -> Result<RegistrationOptions> {
        self.record("registration_options");
        self.check_fetch("registration_options")?;

        Ok(RegistrationOptions {
            challenge: self.next_challenge(),
            rp: RelyingPartyInfo {
                id: "mock.example.com".into(),
                name: Some("Mock RP".into()),
            },
            user: UserEntity {
                id: user.0.to_le_bytes().to_vec(),
                name: format!("user-{user}"),
                display_name: format!("User {user}"),
            },
            parameters: vec![CredentialParameter {
                ty: "public-key".into(),
                alg: -7,
            }],
            exclude_credentials: Vec::new(),
            authenticator_attachment: Some("platform".into()),
            timeout: *self.lock(&self.options_timeout),
        })
    }

    async fn authentication_options(
        &self,
        _user: Option<UserId>,
        credential_id: Option<&str>,
    ) -> Result<AuthenticationOptions> {
        self.record("authentication_options");
        self.check_fetch("authentication_options")?;

        let allow_credentials = credential_id
            .map(|id| {
                vec![CredentialDescriptor {
                    id: id.as_bytes().to_vec(),
                    ty: "public-key".into(),
                }]
            })
            .unwrap_or_default();

        Ok(AuthenticationOptions {
            challenge: self.next_challenge(),
            rp_id: "mock.example.com".into(),
            allow_credentials,
            timeout: *self.lock(&self.options_timeout),
        })
    }

    async fn submit_attestation(
        &self,
        _user: UserId,
        _attestation: &AttestationResult,
    ) -> Result<Vec<CredentialRef>> {
        self.record("submit_attestation");
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(CeremonyError::ServerRejected(
                "attestation verification failed".into(),
            ));
        }

        let mut credentials = self.lock(&self.credentials);
        let credential_id = format!("cred-{}", credentials.len() + 1);
        credentials.push(CredentialRef { credential_id });
        Ok(credentials.clone())
    }

    async fn submit_assertion(&self, _assertion: &AssertionResult) -> Result<AuthenticatedUser> {
        self.record("submit_assertion");
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(CeremonyError::ServerRejected(
                "assertion verification failed".into(),
            ));
        }

        self.lock(&self.login_as)
            .clone()
            .ok_or_else(|| CeremonyError::ServerRejected("unknown credential".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_challenges_are_fresh_per_fetch() {
        let rp = MockRelyingParty::new();
        let first = rp.authentication_options(None, None).await.unwrap();
        let second = rp.authentication_options(None, None).await.unwrap();
        assert_ne!(first.challenge, second.challenge);
        assert_eq!(rp.issued_challenges().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown_user() {
        let rp = MockRelyingParty::new();
        rp.add_user("alice", UserId(42));

        let alice = rp.resolve_user("alice").await.unwrap().unwrap();
        assert_eq!(alice.user_id, UserId(42));
        assert!(rp.resolve_user("mallory").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_filter_narrows_allow_list() {
        let rp = MockRelyingParty::new();
        let options = rp
            .authentication_options(Some(UserId(1)), Some("cred-1"))
            .await
            .unwrap();
        assert_eq!(options.allow_credentials.len(), 1);
    }

    #[tokio::test]
    async fn test_password_login_checks_credentials() {
        let rp = MockRelyingParty::new();
        rp.add_user("alice", UserId(42));
        rp.set_password("alice", "hunter2");

        let user = rp.password_login("alice", "hunter2").await.unwrap().unwrap();
        assert_eq!(user.user_id, UserId(42));
        assert!(rp.password_login("alice", "wrong").await.unwrap().is_none());
        assert!(rp.password_login("mallory", "hunter2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let rp = MockRelyingParty::new();
        rp.add_user("alice", UserId(42));
        rp.set_reject_submissions(true);

        let assertion = AssertionResult {
            credential_id: vec![1],
            client_data_json: vec![2],
            authenticator_data: vec![3],
            signature: vec![4],
            user_handle: None,
        };
        let err = rp.submit_assertion(&assertion).await.unwrap_err();
        assert!(matches!(err, CeremonyError::ServerRejected(_)));
    }
}
