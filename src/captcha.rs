//! Human-presence validation contract.
//!
//! The challenge renderer and its store live outside the engine; the
//! orchestrator only calls `validate` and, once a login attempt reaches a
//! definite outcome, `invalidate`. [`MemoryChallengeStore`] is the in-process
//! implementation backing tests and single-node deployments.

use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[allow(async_fn_in_trait)]
pub trait PresenceValidator: Send + Sync {
    /// Check a challenge response. `Ok(false)` is a wrong or unknown answer;
    /// `Err` means the validator itself is unavailable.
    async fn validate(&self, challenge_id: &str, response: &str) -> Result<bool>;

    /// Drop the challenge so it cannot be replayed. Best effort.
    async fn invalidate(&self, challenge_id: &str);
}

impl<T: PresenceValidator + ?Sized> PresenceValidator for std::sync::Arc<T> {
    async fn validate(&self, challenge_id: &str, response: &str) -> Result<bool> {
        (**self).validate(challenge_id, response).await
    }

    async fn invalidate(&self, challenge_id: &str) {
        (**self).invalidate(challenge_id).await;
    }
}

struct Challenge {
    answer: String,
    created_at: Instant,
}

/// TTL'd in-memory challenge store. Answers compare case-insensitively, as
/// generated challenge text is displayed without case guarantees.
pub struct MemoryChallengeStore {
    ttl: Duration,
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Store the expected answer for a freshly rendered challenge, evicting
    /// expired entries while the lock is held.
    pub async fn insert(&self, challenge_id: String, answer: String) {
        let mut challenges = self.challenges.lock().await;
        challenges.retain(|_, challenge| challenge.created_at.elapsed() < self.ttl);
        challenges.insert(
            challenge_id,
            Challenge {
                answer,
                created_at: Instant::now(),
            },
        );
    }
}

impl PresenceValidator for MemoryChallengeStore {
    async fn validate(&self, challenge_id: &str, response: &str) -> Result<bool> {
        let challenge_id = challenge_id.trim();
        let response = response.trim();
        if challenge_id.is_empty() || response.is_empty() {
            return Ok(false);
        }

        let challenges = self.challenges.lock().await;
        Ok(challenges.get(challenge_id).is_some_and(|challenge| {
            challenge.created_at.elapsed() < self.ttl
                && challenge.answer.eq_ignore_ascii_case(response)
        }))
    }

    async fn invalidate(&self, challenge_id: &str) {
        self.challenges.lock().await.remove(challenge_id.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_match_case_insensitively() -> Result<()> {
        let store = MemoryChallengeStore::new(Duration::from_secs(60));
        store.insert("c1".to_string(), "XK4P2".to_string()).await;

        assert!(store.validate("c1", "xk4p2").await?);
        assert!(store.validate(" c1 ", " XK4P2 ").await?);
        assert!(!store.validate("c1", "wrong").await?);
        assert!(!store.validate("missing", "XK4P2").await?);
        Ok(())
    }

    #[tokio::test]
    async fn empty_inputs_never_validate() -> Result<()> {
        let store = MemoryChallengeStore::new(Duration::from_secs(60));
        store.insert("c1".to_string(), "XK4P2".to_string()).await;

        assert!(!store.validate("", "XK4P2").await?);
        assert!(!store.validate("c1", "  ").await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_challenges_are_rejected() -> Result<()> {
        let store = MemoryChallengeStore::new(Duration::ZERO);
        store.insert("c1".to_string(), "XK4P2".to_string()).await;
        assert!(!store.validate("c1", "XK4P2").await?);
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_makes_a_challenge_single_use() -> Result<()> {
        let store = MemoryChallengeStore::new(Duration::from_secs(60));
        store.insert("c1".to_string(), "XK4P2".to_string()).await;

        assert!(store.validate("c1", "XK4P2").await?);
        store.invalidate("c1").await;
        assert!(!store.validate("c1", "XK4P2").await?);
        Ok(())
    }
}
