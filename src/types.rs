//! Core ceremony data model.
//!
//! Options and results are structured views of what the relying party and the
//! platform authenticator exchange; the cryptographic payloads themselves
//! (client data, attestation objects, authenticator data, signatures) are
//! opaque byte blobs produced and consumed by the authenticator.

use std::time::Duration;

use uuid::Uuid;

use crate::error::AuthenticatorError;

/// Default user-interaction timeout when the relying party declares none.
pub const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifies one ceremony attempt across the orchestrator, the platform
/// authenticator and the host UI delivering the interaction result.
///
/// The host chooses the id (the moral equivalent of an activity request
/// code); a logically new attempt requires a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a fresh correlation id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two ceremony flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl std::fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Authentication => write!(f, "authentication"),
        }
    }
}

/// Relying party identity as announced in creation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingPartyInfo {
    pub id: String,
    pub name: Option<String>,
}

/// User identity fields carried in creation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    /// Opaque user handle chosen by the server.
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

/// One allowed credential algorithm (COSE identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialParameter {
    pub ty: String,
    pub alg: i32,
}

/// Reference to an existing credential in allow/exclude lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub id: Vec<u8>,
    pub ty: String,
}

/// Creation options for a registration ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Single-use server challenge the attestation must cover.
    pub challenge: Vec<u8>,
    pub rp: RelyingPartyInfo,
    pub user: UserEntity,
    pub parameters: Vec<CredentialParameter>,
    /// Credentials the authenticator must not create duplicates of.
    pub exclude_credentials: Vec<CredentialDescriptor>,
    /// Requested attachment, e.g. "platform".
    pub authenticator_attachment: Option<String>,
    pub timeout: Option<Duration>,
}

/// Request options for an authentication ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationOptions {
    /// Single-use server challenge the assertion must cover.
    pub challenge: Vec<u8>,
    pub rp_id: String,
    /// Credentials eligible to produce the assertion; empty means the
    /// authenticator may use any discoverable credential for the rp id.
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub timeout: Option<Duration>,
}

/// Ceremony-kind-tagged options handed to the authenticator bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonyOptions {
    Registration(RegistrationOptions),
    Authentication(AuthenticationOptions),
}

impl CeremonyOptions {
    pub fn kind(&self) -> CeremonyKind {
        match self {
            Self::Registration(_) => CeremonyKind::Registration,
            Self::Authentication(_) => CeremonyKind::Authentication,
        }
    }

    pub fn challenge(&self) -> &[u8] {
        match self {
            Self::Registration(o) => &o.challenge,
            Self::Authentication(o) => &o.challenge,
        }
    }

    /// Declared timeout, falling back to [`DEFAULT_CEREMONY_TIMEOUT`].
    pub fn timeout(&self) -> Duration {
        let declared = match self {
            Self::Registration(o) => o.timeout,
            Self::Authentication(o) => o.timeout,
        };
        declared.unwrap_or(DEFAULT_CEREMONY_TIMEOUT)
    }
}

/// New-credential proof produced by a registration ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationResult {
    /// Key handle of the freshly created credential.
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub attestation_object: Vec<u8>,
}

/// Signature proof produced by an authentication ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    pub credential_id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

/// Out-of-process outcome of the user interaction, delivered back to the
/// orchestrator by the host. Exactly one of the three shapes is produced per
/// ceremony attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeremonyResult {
    Attestation(AttestationResult),
    Assertion(AssertionResult),
    Error(AuthenticatorError),
}

impl CeremonyResult {
    /// Kind of ceremony this result can complete, if it is a success payload.
    pub fn kind(&self) -> Option<CeremonyKind> {
        match self {
            Self::Attestation(_) => Some(CeremonyKind::Registration),
            Self::Assertion(_) => Some(CeremonyKind::Authentication),
            Self::Error(_) => None,
        }
    }
}

/// Server-side credential reference returned after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    /// Credential id as the server encodes it.
    pub credential_id: String,
}

/// Identity confirmed by the relying party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_options(timeout: Option<Duration>) -> CeremonyOptions {
        CeremonyOptions::Authentication(AuthenticationOptions {
            challenge: b"c1".to_vec(),
            rp_id: "example.com".into(),
            allow_credentials: Vec::new(),
            timeout,
        })
    }

    #[test]
    fn test_options_timeout_defaults_to_60s() {
        assert_eq!(auth_options(None).timeout(), Duration::from_secs(60));
        assert_eq!(
            auth_options(Some(Duration::from_secs(5))).timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_result_kind_matches_ceremony_kind() {
        let attestation = CeremonyResult::Attestation(AttestationResult {
            credential_id: vec![1],
            client_data_json: vec![2],
            attestation_object: vec![3],
        });
        assert_eq!(attestation.kind(), Some(CeremonyKind::Registration));

        let error = CeremonyResult::Error(crate::error::AuthenticatorError::user_cancelled());
        assert_eq!(error.kind(), None);
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
