use serde::{Deserialize, Serialize};

use crate::site_limits::error::Result;
use crate::site_limits::store::{StateKey, StateStore};
use crate::site_limits::unlock::UnlockStore;

/// Whether a domain may be shown right now
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Block,
}

impl Decision {
    pub fn is_block(&self) -> bool {
        matches!(self, Decision::Block)
    }
}

/// Combines usage counters and temporary unlocks into a decision
pub struct AccessDecisionEngine;

impl AccessDecisionEngine {
    /// Decide for `domain` at `now_ms`. Reads only; never mutates the store.
    pub fn decide<S: StateStore + ?Sized>(store: &S, domain: &str, now_ms: i64) -> Result<Decision> {
        let sites = store
            .get(&[StateKey::BlockedSites])?
            .blocked_sites
            .unwrap_or_default();

        let Some(site) = sites.get(domain) else {
            return Ok(Decision::Allow);
        };

        if !site.limit_reached() {
            return Ok(Decision::Allow);
        }

        if UnlockStore::is_unlocked(store, domain, now_ms)? {
            Ok(Decision::Allow)
        } else {
            Ok(Decision::Block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_limits::state::TrackedSite;
    use crate::site_limits::store::{MemoryStore, StateDocument};

    const NOW: i64 = 1_763_280_000_000;

    fn store_with_site(limit: u32, used: u32) -> MemoryStore {
        let mut document = StateDocument::default();
        document.blocked_sites.insert(
            "example.com".to_string(),
            TrackedSite {
                daily_limit: limit,
                used_today: used,
                authorized_secret_ids: Default::default(),
            },
        );
        MemoryStore::with_document(document)
    }

    #[test]
    fn test_untracked_domains_are_allowed() {
        let store = store_with_site(0, 100);
        for now in [0, NOW, i64::MAX] {
            assert_eq!(
                AccessDecisionEngine::decide(&store, "other.com", now).unwrap(),
                Decision::Allow
            );
        }
    }

    #[test]
    fn test_under_limit_is_allowed() {
        let store = store_with_site(3, 2);
        assert_eq!(
            AccessDecisionEngine::decide(&store, "example.com", NOW).unwrap(),
            Decision::Allow
        );
    }

    #[test]
    fn test_limit_reached_is_blocked() {
        let store = store_with_site(3, 3);
        assert_eq!(
            AccessDecisionEngine::decide(&store, "example.com", NOW).unwrap(),
            Decision::Block
        );
    }

    #[test]
    fn test_unlock_allows_until_expiry() {
        let mut store = store_with_site(3, 5);
        let expiry = UnlockStore::grant_unlock(&mut store, "example.com", 10, NOW).unwrap();

        assert_eq!(
            AccessDecisionEngine::decide(&store, "example.com", expiry - 1).unwrap(),
            Decision::Allow
        );
        assert_eq!(
            AccessDecisionEngine::decide(&store, "example.com", expiry).unwrap(),
            Decision::Block
        );
    }

    #[test]
    fn test_decide_is_idempotent() {
        let store = store_with_site(3, 3);
        let before = store.document().clone();

        let first = AccessDecisionEngine::decide(&store, "example.com", NOW).unwrap();
        for _ in 0..10 {
            assert_eq!(AccessDecisionEngine::decide(&store, "example.com", NOW).unwrap(), first);
        }
        assert_eq!(store.document(), &before);
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Decision::Block).unwrap(), "\"block\"");
    }
}
