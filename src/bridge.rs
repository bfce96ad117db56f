//! Platform authenticator bridge.
//!
//! The bridge is the external FIDO2 capability (platform API plus system UI).
//! Handing it ceremony options starts an out-of-process user interaction; the
//! eventual [`CeremonyResult`](crate::types::CeremonyResult) comes back
//! through the host via
//! [`Orchestrator::deliver_interaction_result`](crate::Orchestrator::deliver_interaction_result),
//! not through this trait.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CeremonyError, Result};
use crate::types::{CeremonyOptions, CorrelationId};

/// Capability to start the platform user interaction for a ceremony.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait AuthenticatorBridge: Send + Sync {
    /// Hand the ceremony options to the platform authenticator and request
    /// the pending user interaction.
    ///
    /// `Ok(())` means the interaction is pending and a result will (or may
    /// never) be delivered by the host under `correlation_id`. If no
    /// interaction can be produced at all, return
    /// [`CeremonyError::AuthenticatorUnavailable`].
    async fn request_interaction(
        &self,
        correlation_id: CorrelationId,
        options: &CeremonyOptions,
    ) -> Result<()>;
}

/// Recording bridge double for tests.
///
/// Accepts every interaction request (unless constructed with
/// [`MockAuthenticator::unavailable`]) and records the options it was handed;
/// the test then plays the host role and delivers the result itself.
#[derive(Default)]
pub struct MockAuthenticator {
    unavailable: bool,
    requests: Mutex<Vec<(CorrelationId, CeremonyOptions)>>,
}

impl MockAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bridge with no usable authenticator behind it.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(CorrelationId, CeremonyOptions)>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// All interaction requests received so far.
    pub fn requests(&self) -> Vec<(CorrelationId, CeremonyOptions)> {
        self.lock().clone()
    }

    /// Options of the most recent interaction request, if any.
    pub fn last_options(&self) -> Option<CeremonyOptions> {
        self.lock().last().map(|(_, options)| options.clone())
    }
}

#[async_trait]
impl AuthenticatorBridge for MockAuthenticator {
    async fn request_interaction(
        &self,
        correlation_id: CorrelationId,
        options: &CeremonyOptions,
    ) -> Result<()> {
        if self.unavailable {
            return Err(CeremonyError::AuthenticatorUnavailable(
                "no platform authenticator on this device".into(),
            ));
        }
        self.lock().push((correlation_id, options.clone()));
        Ok(())
    }
}
