//! Relying-party client.
//!
//! Pure request/response contract over the ceremony lifecycle; no state lives
//! here. Every operation is single-shot and consumes server-side resources
//! (challenges), so implementations must never retry silently — retry policy
//! belongs to the caller, which starts over with a fresh options fetch.
//!
//! - [`HttpRelyingParty`] talks to the demo FIDO2 backend over HTTPS.
//! - [`MockRelyingParty`] is a scripted in-memory double for tests.

mod http;
mod mock;

pub use http::{HttpRelyingParty, HttpRelyingPartyConfig};
pub use mock::MockRelyingParty;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AssertionResult, AttestationResult, AuthenticatedUser, AuthenticationOptions, CredentialRef,
    RegistrationOptions, UserId,
};

/// Client for the relying-party ceremony endpoints.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait RelyingParty: Send + Sync {
    /// Resolve a username to a server-side user. `Ok(None)` means the user
    /// is unknown to the relying party.
    async fn resolve_user(&self, username: &str) -> Result<Option<AuthenticatedUser>>;

    /// Log in with a username and password. `Ok(None)` means the relying
    /// party did not accept the credentials. This is the non-FIDO2 path to a
    /// known user; it identifies, it does not produce an assertion.
    async fn password_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>>;

    /// Fetch creation options (and a fresh challenge) for registering a new
    /// credential to `user`.
    async fn registration_options(&self, user: UserId) -> Result<RegistrationOptions>;

    /// Fetch request options (and a fresh challenge) for an authentication
    /// ceremony. With `user` absent the server is expected to serve
    /// discoverable credentials; `credential_id` narrows the allow list to a
    /// single credential.
    async fn authentication_options(
        &self,
        user: Option<UserId>,
        credential_id: Option<&str>,
    ) -> Result<AuthenticationOptions>;

    /// Submit a registration result. On success the server returns the full
    /// credential list now bound to the user.
    async fn submit_attestation(
        &self,
        user: UserId,
        attestation: &AttestationResult,
    ) -> Result<Vec<CredentialRef>>;

    /// Submit an authentication result. On success the server confirms the
    /// signed-in identity.
    async fn submit_assertion(&self, assertion: &AssertionResult) -> Result<AuthenticatedUser>;
}
