//! The per-ceremony state machine.
//!
//! Transitions are strictly ordered and non-reentrant:
//!
//! ```text
//! Idle -> OptionsRequested -> AwaitingUserInteraction -> ResultReceived
//!      -> Submitting -> Resolved
//! ```
//!
//! Resolution (success or failure) is reachable from every live state, so a
//! ceremony can fail fast at any step. Any other out-of-order transition is
//! rejected rather than corrupting state.

use tracing::debug;

use crate::error::{CeremonyError, Result};
use crate::types::{CeremonyKind, CorrelationId, UserId};

/// Lifecycle position of a ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Idle,
    OptionsRequested,
    AwaitingUserInteraction,
    ResultReceived,
    Submitting,
    Resolved,
}

/// One registration or authentication attempt, owned by the orchestrator for
/// its lifetime. Created at initiation, destroyed at resolution; never
/// persisted.
#[derive(Debug)]
pub(crate) struct Ceremony {
    pub correlation_id: CorrelationId,
    pub kind: CeremonyKind,
    /// Resolved server-side user, once known. Set at initiation for
    /// registration, after user resolution for username authentication,
    /// absent for discoverable-credential authentication.
    pub user_id: Option<UserId>,
    state: CeremonyState,
}

impl Ceremony {
    pub fn new(correlation_id: CorrelationId, kind: CeremonyKind) -> Self {
        Self {
            correlation_id,
            kind,
            user_id: None,
            state: CeremonyState::Idle,
        }
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    /// Advance to `next`, rejecting anything but the expected successor.
    pub fn advance(&mut self, next: CeremonyState) -> Result<()> {
        use CeremonyState::*;

        let allowed = matches!(
            (self.state, next),
            (Idle, OptionsRequested)
                | (OptionsRequested, AwaitingUserInteraction)
                | (AwaitingUserInteraction, ResultReceived)
                | (ResultReceived, Submitting)
        ) || (next == Resolved && self.state != Resolved);

        if !allowed {
            return Err(CeremonyError::InvalidState(format!(
                "{} ceremony {} cannot move from {:?} to {:?}",
                self.kind, self.correlation_id, self.state, next
            )));
        }

        debug!(
            correlation_id = %self.correlation_id,
            from = ?self.state,
            to = ?next,
            "ceremony transition"
        );
        self.state = next;
        Ok(())
    }
}
