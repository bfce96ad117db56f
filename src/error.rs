use thiserror::Error;

use crate::types::CorrelationId;

/// Failure categories the platform authenticator can report for a ceremony
/// attempt it refused or abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticatorErrorKind {
    /// The user dismissed the platform UI. Never retried automatically.
    UserCancelled,
    /// No registered credential on this device matches the allow list.
    NoEligibleCredential,
    /// The authenticator hardware or its service failed.
    Hardware,
    /// Any other bridge-reported failure.
    Other,
}

impl std::fmt::Display for AuthenticatorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserCancelled => write!(f, "user cancelled"),
            Self::NoEligibleCredential => write!(f, "no eligible credential"),
            Self::Hardware => write!(f, "hardware error"),
            Self::Other => write!(f, "authenticator failure"),
        }
    }
}

/// Failure reported by the platform authenticator bridge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AuthenticatorError {
    pub kind: AuthenticatorErrorKind,
    pub message: String,
}

impl AuthenticatorError {
    pub fn new(kind: AuthenticatorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn user_cancelled() -> Self {
        Self::new(AuthenticatorErrorKind::UserCancelled, "cancelled by user")
    }
}

/// Terminal error of a ceremony, or a synchronous rejection of an API call.
///
/// Every ceremony resolves to exactly one success or exactly one of these
/// variants; no other error type crosses the orchestrator boundary.
#[derive(Debug, Error)]
pub enum CeremonyError {
    /// An operation was invoked in a state that does not permit it.
    #[error("invalid ceremony state: {0}")]
    InvalidState(String),

    /// A username could not be resolved to a user id by the relying party.
    #[error("unresolved user: {0}")]
    UnresolvedUser(String),

    /// The platform authenticator could not start the user interaction.
    #[error("platform authenticator unavailable: {0}")]
    AuthenticatorUnavailable(String),

    /// The bridge delivered an error instead of an attestation or assertion.
    #[error("authenticator error: {0}")]
    Authenticator(AuthenticatorError),

    /// Transport or server-side failure. The caller may retry the whole
    /// ceremony with a fresh options fetch; the consumed challenge is gone.
    #[error("relying party error: {0}")]
    Server(String),

    /// The relying party rejected the ceremony result semantically
    /// (challenge or signature mismatch, unknown credential).
    #[error("relying party rejected the ceremony result: {0}")]
    ServerRejected(String),

    /// No user interaction result arrived within the ceremony timeout.
    #[error("ceremony timed out awaiting user interaction")]
    Timeout,

    /// A ceremony with this correlation id is already in flight.
    #[error("ceremony already in progress for correlation id {0}")]
    AlreadyInProgress(CorrelationId),
}

impl From<reqwest::Error> for CeremonyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Server(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;
