use tracing::{debug, info};

use crate::site_limits::error::Result;
use crate::site_limits::store::{StateKey, StateStore, StateValues};

const MS_PER_MINUTE: i64 = 60_000;

/// Temporary unlocks, keyed by domain
pub struct UnlockStore;

impl UnlockStore {
    /// Unlock `domain` for `duration_minutes` from `now_ms`
    ///
    /// Replaces any previous unlock for the domain, even a longer one.
    pub fn grant_unlock<S: StateStore + ?Sized>(
        store: &mut S,
        domain: &str,
        duration_minutes: u32,
        now_ms: i64,
    ) -> Result<i64> {
        let mut unlocks = store
            .get(&[StateKey::TempUnlocks])?
            .temp_unlocks
            .unwrap_or_default();

        let expiry = now_ms + i64::from(duration_minutes) * MS_PER_MINUTE;
        unlocks.insert(domain.to_string(), expiry);

        store.set(StateValues {
            temp_unlocks: Some(unlocks),
            ..Default::default()
        })?;

        info!("Unlocked {} for {} minutes", domain, duration_minutes);
        Ok(expiry)
    }

    pub fn is_unlocked<S: StateStore + ?Sized>(store: &S, domain: &str, now_ms: i64) -> Result<bool> {
        let unlocks = store
            .get(&[StateKey::TempUnlocks])?
            .temp_unlocks
            .unwrap_or_default();

        Ok(unlocks.get(domain).is_some_and(|&expiry| now_ms < expiry))
    }

    /// Drop unlocks that have already expired
    pub fn prune_expired<S: StateStore + ?Sized>(store: &mut S, now_ms: i64) -> Result<usize> {
        let mut unlocks = store
            .get(&[StateKey::TempUnlocks])?
            .temp_unlocks
            .unwrap_or_default();

        let before = unlocks.len();
        unlocks.retain(|_, expiry| now_ms < *expiry);
        let removed = before - unlocks.len();

        if removed > 0 {
            store.set(StateValues {
                temp_unlocks: Some(unlocks),
                ..Default::default()
            })?;
            debug!("Pruned {} expired unlocks", removed);
        }

        Ok(removed)
    }
}
