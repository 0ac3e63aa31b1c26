use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::site_limits::auth::{CodeValidator, RateLimiter};
use crate::site_limits::decision::{AccessDecisionEngine, Decision};
use crate::site_limits::error::{LimitError, Result};
use crate::site_limits::state::{SiteUsage, UnlockOption};
use crate::site_limits::store::{SharedStore, StateKey, StateStore};
use crate::site_limits::unlock::UnlockStore;
use crate::site_limits::usage::UsageStore;

/// Request handlers for the block page, popup and options surfaces
///
/// Every handler runs as one unit on the shared store, so they interleave
/// safely with the tracker's ticks.
pub struct SiteGuard<S> {
    pub(crate) store: SharedStore<S>,
    pub(crate) limiter: RateLimiter,
}

impl<S: StateStore> SiteGuard<S> {
    pub fn new(store: SharedStore<S>, limiter: RateLimiter) -> Self {
        Self { store, limiter }
    }

    pub fn store(&self) -> &SharedStore<S> {
        &self.store
    }

    /// Keys that may unlock `domain`; empty for untracked domains
    pub async fn unlock_options(&self, domain: &str) -> Result<Vec<UnlockOption>> {
        self.store
            .with(|store| {
                let values = store.get(&[StateKey::Secrets, StateKey::BlockedSites])?;
                let secrets = values.secrets.unwrap_or_default();
                let sites = values.blocked_sites.unwrap_or_default();

                Ok(sites
                    .get(domain)
                    .map(|site| {
                        site.authorized_secrets(&secrets)
                            .map(|secret| secret.to_option())
                            .collect()
                    })
                    .unwrap_or_default())
            })
            .await
    }

    /// Validate `code` for `secret_id` and unlock `domain` on success
    ///
    /// Returns the new expiry in epoch milliseconds. The attempt counts
    /// against the rate limiter before the code is looked at.
    pub async fn attempt_unlock(
        &self,
        domain: &str,
        secret_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let now_ms = now.timestamp_millis();

        let result = self
            .store
            .with(|store| {
                self.limiter.check(store, now_ms)?;

                let values = store.get(&[StateKey::Secrets, StateKey::BlockedSites])?;
                let secrets = values.secrets.unwrap_or_default();
                let sites = values.blocked_sites.unwrap_or_default();

                let secret = secrets
                    .get(secret_id)
                    .ok_or_else(|| LimitError::UnknownSecret(secret_id.to_string()))?;

                if let Some(site) = sites.get(domain) {
                    if !site.authorized_secret_ids.contains(secret_id) {
                        return Err(LimitError::UnknownSecret(secret_id.to_string()));
                    }
                }

                if !CodeValidator::validate(&secret.secret_material, code, now)? {
                    return Err(LimitError::InvalidCode);
                }

                let expiry =
                    UnlockStore::grant_unlock(store, domain, secret.duration_minutes, now_ms)?;
                self.limiter.reset(store)?;
                Ok(expiry)
            })
            .await;

        match &result {
            Ok(_) => {
                info!("Unlock granted for {} with key {}", domain, secret_id);
            }
            Err(e) => warn!("Unlock attempt for {} failed: {}", domain, e),
        }

        result
    }

    /// Today's usage for the popup surface
    pub async fn usage(&self, domain: &str) -> Result<Option<SiteUsage>> {
        self.store.with(|store| UsageStore::usage(store, domain)).await
    }

    /// Current decision without touching any counter
    pub async fn check(&self, domain: &str, now: DateTime<Utc>) -> Result<Decision> {
        self.store
            .with(|store| AccessDecisionEngine::decide(store, domain, now.timestamp_millis()))
            .await
    }
}
