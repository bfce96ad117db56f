//! Client-side WebAuthn/FIDO2 ceremony orchestration.
//!
//! This crate drives the two asynchronous passkey ceremonies — registration
//! (attestation) and authentication (assertion) — against a remote relying
//! party and a local platform authenticator. The host application supplies
//! the UI and the platform bridge; the orchestrator owns ceremony state,
//! challenge bookkeeping, timeouts and the session.
//!
//! # Architecture
//!
//! - [`Orchestrator`]: the per-ceremony state machine and public entry point
//! - [`RelyingParty`]: stateless client for the server's ceremony endpoints
//!   ([`HttpRelyingParty`] over HTTPS, [`MockRelyingParty`] for tests)
//! - [`AuthenticatorBridge`]: the platform FIDO2 capability; results come
//!   back out-of-process through the host
//! - [`ChallengeStore`]: single-use server challenges keyed by ceremony
//! - [`SessionContext`]: the locally known user identity and login state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fido2_ceremony::{
//!     CorrelationId, MockAuthenticator, MockRelyingParty, Orchestrator, UserId,
//! };
//!
//! # async fn example() -> fido2_ceremony::Result<()> {
//! let relying_party = Arc::new(MockRelyingParty::new());
//! relying_party.add_user("alice", UserId(42));
//! let bridge = Arc::new(MockAuthenticator::new());
//!
//! let orchestrator = Orchestrator::new(relying_party, bridge);
//!
//! // Start a login ceremony; the platform UI now runs out of process.
//! let handle =
//!     orchestrator.begin_authentication(CorrelationId::new(), Some("alice".into()))?;
//!
//! // ... the host delivers the interaction result when it arrives:
//! // orchestrator.deliver_interaction_result(handle.correlation_id(), result);
//!
//! let success = handle.outcome().await?;
//! # let _ = success;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod ceremony;
pub mod challenge;
pub mod error;
pub mod orchestrator;
pub mod rp;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use bridge::{AuthenticatorBridge, MockAuthenticator};
pub use ceremony::CeremonyState;
pub use challenge::{ChallengeStore, IssuedChallenge};
pub use error::{AuthenticatorError, AuthenticatorErrorKind, CeremonyError, Result};
pub use orchestrator::{CeremonyHandle, CeremonySuccess, DeliveryStatus, Orchestrator};
pub use rp::{HttpRelyingParty, HttpRelyingPartyConfig, MockRelyingParty, RelyingParty};
pub use session::SessionContext;
pub use types::{
    AssertionResult, AttestationResult, AuthenticatedUser, AuthenticationOptions, CeremonyKind,
    CeremonyOptions, CeremonyResult, CorrelationId, CredentialDescriptor, CredentialParameter,
    CredentialRef, RegistrationOptions, RelyingPartyInfo, UserEntity, UserId,
    DEFAULT_CEREMONY_TIMEOUT,
};
