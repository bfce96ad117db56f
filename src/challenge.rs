//! In-memory store for server-issued ceremony challenges.
//!
//! A challenge is correlated with exactly one in-flight ceremony and is
//! consumed (removed) the moment the ceremony result is submitted. A failed
//! ceremony never reuses its challenge; the next attempt fetches a fresh one.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::types::{CeremonyKind, CorrelationId};

/// Maximum age for an unconsumed challenge (5 minutes).
const CHALLENGE_EXPIRY_SECS: u64 = 300;

/// A challenge held for an in-flight ceremony.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub kind: CeremonyKind,
    pub challenge: Vec<u8>,
    expires_at: Instant,
}

/// Store of single-use challenges keyed by correlation id.
pub struct ChallengeStore {
    entries: DashMap<CorrelationId, IssuedChallenge>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(CHALLENGE_EXPIRY_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Record the challenge issued for a ceremony. A repeated store for the
    /// same correlation id replaces the previous challenge; the old one is
    /// dead either way.
    pub fn store(&self, correlation_id: CorrelationId, kind: CeremonyKind, challenge: Vec<u8>) {
        self.entries.insert(
            correlation_id,
            IssuedChallenge {
                kind,
                challenge,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Consume the challenge for a ceremony. Returns `None` if it was never
    /// stored, already consumed, or expired.
    pub fn take(&self, correlation_id: &CorrelationId) -> Option<IssuedChallenge> {
        let (_, entry) = self.entries.remove(correlation_id)?;
        if entry.expires_at > Instant::now() {
            Some(entry)
        } else {
            None // Expired
        }
    }

    /// Drop the challenge for a resolved or abandoned ceremony, if any.
    pub fn discard(&self, correlation_id: &CorrelationId) {
        self.entries.remove(correlation_id);
    }

    /// Remove expired entries.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of unconsumed challenges.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("pending", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_challenge() {
        let store = ChallengeStore::new();
        let id = CorrelationId::new();
        store.store(id, CeremonyKind::Authentication, b"c1".to_vec());

        let issued = store.take(&id).unwrap();
        assert_eq!(issued.challenge, b"c1");
        assert_eq!(issued.kind, CeremonyKind::Authentication);

        // Second take must fail: the challenge is single-use.
        assert!(store.take(&id).is_none());
    }

    #[test]
    fn test_expired_challenge_is_not_returned() {
        let store = ChallengeStore::with_ttl(Duration::from_secs(0));
        let id = CorrelationId::new();
        store.store(id, CeremonyKind::Registration, b"c1".to_vec());

        std::thread::sleep(Duration::from_millis(5));
        assert!(store.take(&id).is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let store = ChallengeStore::with_ttl(Duration::from_secs(0));
        store.store(
            CorrelationId::new(),
            CeremonyKind::Registration,
            b"c1".to_vec(),
        );
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.pending_count(), 1);
        store.cleanup_expired();
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_discard_is_idempotent() {
        let store = ChallengeStore::new();
        let id = CorrelationId::new();
        store.store(id, CeremonyKind::Authentication, b"c1".to_vec());

        store.discard(&id);
        store.discard(&id);
        assert_eq!(store.pending_count(), 0);
    }
}
