//! Ceremony orchestrator.
//!
//! Drives one registration or authentication ceremony end-to-end: fetch
//! options from the relying party, hand them to the platform authenticator,
//! wait for the host to deliver the out-of-process interaction result, submit
//! it, and resolve the ceremony exactly once.
//!
//! The platform invocation is an explicit suspension point: the orchestrator
//! parks the ceremony in its registry keyed by correlation id and resumes
//! when [`Orchestrator::deliver_interaction_result`] is called, which may
//! happen on any thread. Exactly one of a genuine delivery and the ceremony
//! timeout wins; the loser is a logged no-op. Network steps run as tasks on
//! the tokio worker pool so no caller thread ever blocks on I/O.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::bridge::AuthenticatorBridge;
use crate::ceremony::{Ceremony, CeremonyState};
use crate::challenge::ChallengeStore;
use crate::error::{CeremonyError, Result};
use crate::rp::RelyingParty;
use crate::session::{SessionContext, SessionState};
use crate::types::{
    AuthenticatedUser, CeremonyKind, CeremonyOptions, CeremonyResult, CorrelationId,
    CredentialRef, UserId,
};

/// Terminal success of a ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonySuccess {
    /// Registration completed; the server's credential list for the user.
    Registered { credentials: Vec<CredentialRef> },
    /// Authentication completed; the confirmed identity.
    Authenticated { user: AuthenticatedUser },
}

/// What became of a delivered interaction result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The result was consumed by an in-flight ceremony.
    Accepted,
    /// No in-flight ceremony wanted it (already resolved, timed out, or a
    /// duplicate delivery); dropped with a warning.
    Ignored,
}

type Outcome = std::result::Result<CeremonySuccess, CeremonyError>;

/// Caller's view of one initiated ceremony.
#[derive(Debug)]
pub struct CeremonyHandle {
    correlation_id: CorrelationId,
    kind: CeremonyKind,
    rx: oneshot::Receiver<Outcome>,
}

impl CeremonyHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn kind(&self) -> CeremonyKind {
        self.kind
    }

    /// Wait for the single terminal resolution of this ceremony.
    pub async fn outcome(self) -> Result<CeremonySuccess> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CeremonyError::InvalidState(
                "orchestrator dropped before the ceremony resolved".into(),
            )),
        }
    }
}

struct ActiveCeremony {
    ceremony: Ceremony,
    resolver: oneshot::Sender<Outcome>,
}

/// What to do with a delivered interaction result, decided while holding the
/// registry entry and acted on after releasing it.
enum Disposition {
    Submit(CeremonyKind, Option<UserId>),
    Fail(CeremonyError),
}

struct Inner {
    relying_party: Arc<dyn RelyingParty>,
    authenticator: Arc<dyn AuthenticatorBridge>,
    challenges: ChallengeStore,
    session: SessionState,
    active: DashMap<CorrelationId, ActiveCeremony>,
}

/// Process-wide ceremony orchestrator.
///
/// Construct once at startup and share (it is cheap to clone). In-flight
/// ceremonies keep the internals alive after the last clone is dropped, so
/// outstanding [`CeremonyHandle`]s still resolve, at the latest with
/// [`CeremonyError::Timeout`] when their interaction timeout elapses.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        relying_party: Arc<dyn RelyingParty>,
        authenticator: Arc<dyn AuthenticatorBridge>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                relying_party,
                authenticator,
                challenges: ChallengeStore::new(),
                session: SessionState::new(),
                active: DashMap::new(),
            }),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> SessionContext {
        self.inner.session.snapshot()
    }

    /// Record a known user (e.g. identified out of band), enabling
    /// registration ceremonies.
    pub fn identify_user(&self, user_id: UserId, username: Option<String>) {
        self.inner.session.identify(user_id, username);
    }

    /// Log in with a username and password, the non-FIDO2 path to a known
    /// user. On success the session user is identified (not authenticated),
    /// which is what gates registration ceremonies. Returns
    /// [`CeremonyError::UnresolvedUser`] when the relying party rejects the
    /// credentials.
    #[instrument(skip(self, password))]
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthenticatedUser> {
        match self.inner.relying_party.password_login(username, password).await? {
            Some(user) => {
                info!(user_id = %user.user_id, "password login accepted");
                self.inner.session.identify(user.user_id, user.username.clone());
                Ok(user)
            }
            None => {
                warn!("password login rejected");
                Err(CeremonyError::UnresolvedUser(username.to_string()))
            }
        }
    }

    /// Clear the session. In-flight ceremonies are unaffected.
    pub fn logout(&self) {
        self.inner.session.clear();
    }

    /// Number of ceremonies currently in flight.
    pub fn pending_ceremonies(&self) -> usize {
        self.inner.active.len()
    }

    /// Start a registration ceremony for the session user.
    ///
    /// Fails fast with [`CeremonyError::InvalidState`] when no user is
    /// identified; the relying party is not contacted in that case. Must be
    /// called within a tokio runtime.
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    pub fn begin_registration(&self, correlation_id: CorrelationId) -> Result<CeremonyHandle> {
        let session = self.inner.session.snapshot();
        let Some(user) = session.user_id else {
            warn!("registration refused: no identified user in session");
            return Err(CeremonyError::InvalidState(
                "registration requires an identified user".into(),
            ));
        };

        let rx = self.insert_ceremony(correlation_id, CeremonyKind::Registration, Some(user))?;
        info!(user_id = %user, "registration ceremony started");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_registration(correlation_id, user));

        Ok(CeremonyHandle {
            correlation_id,
            kind: CeremonyKind::Registration,
            rx,
        })
    }

    /// Start an authentication ceremony.
    ///
    /// With a username the orchestrator first resolves it to a user id and
    /// only then fetches options; an unknown name resolves the ceremony to
    /// [`CeremonyError::UnresolvedUser`]. Without a username the relying
    /// party serves discoverable credentials. Must be called within a tokio
    /// runtime.
    pub fn begin_authentication(
        &self,
        correlation_id: CorrelationId,
        username: Option<String>,
    ) -> Result<CeremonyHandle> {
        self.begin_authentication_for_credential(correlation_id, username, None)
    }

    /// [`Self::begin_authentication`] narrowed to a single known credential.
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    pub fn begin_authentication_for_credential(
        &self,
        correlation_id: CorrelationId,
        username: Option<String>,
        credential_id: Option<String>,
    ) -> Result<CeremonyHandle> {
        let rx = self.insert_ceremony(correlation_id, CeremonyKind::Authentication, None)?;
        info!(
            username = username.as_deref().unwrap_or("<discoverable>"),
            "authentication ceremony started"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_authentication(correlation_id, username, credential_id));

        Ok(CeremonyHandle {
            correlation_id,
            kind: CeremonyKind::Authentication,
            rx,
        })
    }

    /// Deliver the out-of-process user interaction result for a ceremony.
    ///
    /// The single resumption entry point for the host. Idempotent-guarded: a
    /// delivery for a resolved, timed-out or unknown ceremony is a logged
    /// no-op ([`DeliveryStatus::Ignored`]), never a re-submission. An
    /// authenticator error payload resolves the ceremony immediately without
    /// contacting the relying party.
    #[instrument(skip(self, result), fields(correlation_id = %correlation_id))]
    pub fn deliver_interaction_result(
        &self,
        correlation_id: CorrelationId,
        result: CeremonyResult,
    ) -> DeliveryStatus {
        let disposition = match self.inner.active.get_mut(&correlation_id) {
            None => {
                warn!("interaction result for unknown or already resolved ceremony ignored");
                return DeliveryStatus::Ignored;
            }
            Some(mut entry) => match entry.ceremony.state() {
                CeremonyState::AwaitingUserInteraction => match &result {
                    CeremonyResult::Error(err) => {
                        // Bridge-reported failure: resolve without submitting.
                        let _ = entry.ceremony.advance(CeremonyState::ResultReceived);
                        Disposition::Fail(CeremonyError::Authenticator(err.clone()))
                    }
                    payload if payload.kind() != Some(entry.ceremony.kind) => {
                        // Leave AwaitingUserInteraction so the timeout path
                        // cannot claim this ceremony before resolve() does.
                        let _ = entry.ceremony.advance(CeremonyState::ResultReceived);
                        Disposition::Fail(CeremonyError::InvalidState(format!(
                            "{:?} payload delivered for {} ceremony",
                            payload.kind(),
                            entry.ceremony.kind
                        )))
                    }
                    _ => {
                        let advanced = entry
                            .ceremony
                            .advance(CeremonyState::ResultReceived)
                            .and_then(|()| entry.ceremony.advance(CeremonyState::Submitting));
                        match advanced {
                            Ok(()) => {
                                Disposition::Submit(entry.ceremony.kind, entry.ceremony.user_id)
                            }
                            Err(e) => Disposition::Fail(e),
                        }
                    }
                },
                CeremonyState::ResultReceived | CeremonyState::Submitting => {
                    warn!(
                        state = ?entry.ceremony.state(),
                        "duplicate interaction result ignored"
                    );
                    return DeliveryStatus::Ignored;
                }
                state => Disposition::Fail(CeremonyError::InvalidState(format!(
                    "interaction result delivered in state {state:?}"
                ))),
            },
        };
        // Registry entry released; resolution below may remove it.

        match disposition {
            Disposition::Fail(e) => {
                self.inner.resolve(correlation_id, Err(e));
                DeliveryStatus::Accepted
            }
            Disposition::Submit(kind, user) => {
                // The challenge is consumed here, exactly once; a retry after
                // any failure requires a fresh options fetch.
                let Some(issued) = self.inner.challenges.take(&correlation_id) else {
                    self.inner.resolve(
                        correlation_id,
                        Err(CeremonyError::InvalidState(
                            "ceremony challenge missing or expired".into(),
                        )),
                    );
                    return DeliveryStatus::Accepted;
                };
                if issued.kind != kind {
                    self.inner.resolve(
                        correlation_id,
                        Err(CeremonyError::InvalidState(format!(
                            "stored challenge is for a {} ceremony, not {}",
                            issued.kind, kind
                        ))),
                    );
                    return DeliveryStatus::Accepted;
                }

                info!(kind = %kind, "interaction result accepted, submitting to relying party");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(inner.run_submission(correlation_id, kind, user, result));
                DeliveryStatus::Accepted
            }
        }
    }

    fn insert_ceremony(
        &self,
        correlation_id: CorrelationId,
        kind: CeremonyKind,
        user: Option<UserId>,
    ) -> Result<oneshot::Receiver<Outcome>> {
        let (tx, rx) = oneshot::channel();
        let mut ceremony = Ceremony::new(correlation_id, kind);
        ceremony.user_id = user;
        ceremony.advance(CeremonyState::OptionsRequested)?;

        match self.inner.active.entry(correlation_id) {
            Entry::Occupied(_) => {
                warn!(correlation_id = %correlation_id, "ceremony already in progress");
                Err(CeremonyError::AlreadyInProgress(correlation_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveCeremony {
                    ceremony,
                    resolver: tx,
                });
                Ok(rx)
            }
        }
    }
}

impl Inner {
    async fn run_registration(self: Arc<Self>, correlation_id: CorrelationId, user: UserId) {
        let options = match self.relying_party.registration_options(user).await {
            Ok(options) => options,
            Err(e) => return self.resolve(correlation_id, Err(e)),
        };
        self.hand_to_authenticator(correlation_id, CeremonyOptions::Registration(options))
            .await;
    }

    async fn run_authentication(
        self: Arc<Self>,
        correlation_id: CorrelationId,
        username: Option<String>,
        credential_id: Option<String>,
    ) {
        // Resolve the user first; fetching options for an unresolved name is
        // not a permitted ordering.
        let user = match username {
            Some(name) => match self.relying_party.resolve_user(&name).await {
                Ok(Some(user)) => {
                    debug!(correlation_id = %correlation_id, user_id = %user.user_id, "user resolved");
                    self.set_user(correlation_id, user.user_id);
                    Some(user.user_id)
                }
                Ok(None) => {
                    return self.resolve(correlation_id, Err(CeremonyError::UnresolvedUser(name)))
                }
                Err(e) => return self.resolve(correlation_id, Err(e)),
            },
            None => None,
        };

        let options = match self
            .relying_party
            .authentication_options(user, credential_id.as_deref())
            .await
        {
            Ok(options) => options,
            Err(e) => return self.resolve(correlation_id, Err(e)),
        };
        self.hand_to_authenticator(correlation_id, CeremonyOptions::Authentication(options))
            .await;
    }

    /// Store the fresh challenge, pass options to the bridge and arm the
    /// interaction timeout.
    async fn hand_to_authenticator(
        self: Arc<Self>,
        correlation_id: CorrelationId,
        options: CeremonyOptions,
    ) {
        if !self.advance_or_fail(correlation_id, CeremonyState::AwaitingUserInteraction) {
            return;
        }
        self.challenges
            .store(correlation_id, options.kind(), options.challenge().to_vec());

        if let Err(e) = self
            .authenticator
            .request_interaction(correlation_id, &options)
            .await
        {
            let e = match e {
                CeremonyError::AuthenticatorUnavailable(_) => e,
                other => CeremonyError::AuthenticatorUnavailable(other.to_string()),
            };
            return self.resolve(correlation_id, Err(e));
        }

        let timeout = options.timeout();
        debug!(
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "awaiting user interaction"
        );
        let inner = Arc::clone(&self);
        tokio::spawn(async move {
            sleep(timeout).await;
            inner.expire(correlation_id);
        });
    }

    async fn run_submission(
        self: Arc<Self>,
        correlation_id: CorrelationId,
        kind: CeremonyKind,
        user: Option<UserId>,
        result: CeremonyResult,
    ) {
        let outcome = match (result, kind) {
            (CeremonyResult::Attestation(attestation), CeremonyKind::Registration) => {
                let Some(user) = user else {
                    return self.resolve(
                        correlation_id,
                        Err(CeremonyError::InvalidState(
                            "registration ceremony has no resolved user".into(),
                        )),
                    );
                };
                match self.relying_party.submit_attestation(user, &attestation).await {
                    Ok(credentials) => {
                        self.session.record_credentials(credentials.len());
                        Ok(CeremonySuccess::Registered { credentials })
                    }
                    Err(e) => Err(e),
                }
            }
            (CeremonyResult::Assertion(assertion), CeremonyKind::Authentication) => {
                match self.relying_party.submit_assertion(&assertion).await {
                    Ok(user) => {
                        self.session
                            .set_authenticated(user.user_id, user.username.clone());
                        Ok(CeremonySuccess::Authenticated { user })
                    }
                    Err(e) => Err(e),
                }
            }
            // Payload/kind agreement was checked at delivery.
            _ => Err(CeremonyError::InvalidState(
                "ceremony result does not match ceremony kind".into(),
            )),
        };
        self.resolve(correlation_id, outcome);
    }

    /// Resolve a ceremony exactly once. Removal from the registry is the
    /// single-resolution guard: whoever removes the entry owns the resolver.
    fn resolve(&self, correlation_id: CorrelationId, outcome: Outcome) {
        let Some((_, mut entry)) = self.active.remove(&correlation_id) else {
            debug!(correlation_id = %correlation_id, "resolution for unknown ceremony ignored");
            return;
        };
        self.challenges.discard(&correlation_id);
        let _ = entry.ceremony.advance(CeremonyState::Resolved);

        match &outcome {
            Ok(_) => info!(correlation_id = %correlation_id, "ceremony resolved: success"),
            Err(e) => info!(correlation_id = %correlation_id, error = %e, "ceremony resolved: failure"),
        }
        // The handle may have been dropped; resolution stands regardless.
        let _ = entry.resolver.send(outcome);
    }

    /// Timeout path: resolves only a ceremony still awaiting interaction, so
    /// it can never race past a genuine delivery.
    fn expire(&self, correlation_id: CorrelationId) {
        let removed = self.active.remove_if(&correlation_id, |_, active| {
            active.ceremony.state() == CeremonyState::AwaitingUserInteraction
        });
        let Some((_, mut entry)) = removed else {
            return;
        };
        self.challenges.discard(&correlation_id);
        let _ = entry.ceremony.advance(CeremonyState::Resolved);

        warn!(correlation_id = %correlation_id, "ceremony timed out awaiting user interaction");
        let _ = entry.resolver.send(Err(CeremonyError::Timeout));
    }

    /// Advance a live ceremony; an illegal transition resolves it to failure
    /// instead of corrupting state. Returns whether the ceremony may proceed.
    fn advance_or_fail(&self, correlation_id: CorrelationId, next: CeremonyState) -> bool {
        let advanced = match self.active.get_mut(&correlation_id) {
            Some(mut entry) => entry.ceremony.advance(next),
            // Already resolved elsewhere (e.g. early delivery failure).
            None => return false,
        };
        match advanced {
            Ok(()) => true,
            Err(e) => {
                self.resolve(correlation_id, Err(e));
                false
            }
        }
    }

    fn set_user(&self, correlation_id: CorrelationId, user: UserId) {
        if let Some(mut entry) = self.active.get_mut(&correlation_id) {
            entry.ceremony.user_id = Some(user);
        }
    }
}
