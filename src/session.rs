//! Process-wide session state.
//!
//! Ceremonies may resolve on worker threads, so every mutation funnels
//! through a single mutex (single-writer discipline); readers get snapshots.

use std::sync::Mutex;

use tracing::info;

use crate::types::UserId;

/// Locally known user identity and login state.
///
/// Mutated only by successful ceremony resolution, explicit identification,
/// or logout. Gating logic reads it to decide whether registration may start:
/// registering a credential requires an identified (not necessarily
/// authenticated) user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub authenticated: bool,
    /// Number of credentials the server reported for this user at the last
    /// successful registration.
    pub credential_count: usize,
}

/// Mutex-confined holder of the single active session.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    inner: Mutex<SessionContext>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionContext> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> SessionContext {
        self.lock().clone()
    }

    /// Record a known-but-unauthenticated user, enabling registration.
    pub fn identify(&self, user_id: UserId, username: Option<String>) {
        let mut session = self.lock();
        session.user_id = Some(user_id);
        session.username = username;
        info!(user_id = %user_id, "session user identified");
    }

    /// Successful authentication ceremony.
    pub fn set_authenticated(&self, user_id: UserId, username: Option<String>) {
        let mut session = self.lock();
        session.user_id = Some(user_id);
        session.username = username;
        session.authenticated = true;
        info!(user_id = %user_id, "session authenticated");
    }

    /// Successful registration ceremony; login state is untouched.
    pub fn record_credentials(&self, count: usize) {
        let mut session = self.lock();
        session.credential_count = count;
        info!(credential_count = count, "session credential count updated");
    }

    /// Explicit logout.
    pub fn clear(&self) {
        let mut session = self.lock();
        *session = SessionContext::default();
        info!("session cleared");
    }
}
