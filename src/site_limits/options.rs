use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::site_limits::auth::CodeValidator;
use crate::site_limits::domain::normalize_domain_input;
use crate::site_limits::error::{LimitError, Result};
use crate::site_limits::guard::SiteGuard;
use crate::site_limits::state::{Secret, TrackedSite};
use crate::site_limits::store::{StateKey, StateStore, StateValues};

/// Options surface: accountability keys and tracked sites
///
/// Deleting a site that still has a usable key requires a valid code from
/// one of its keys, so the limit can't be removed without the partner.
impl<S: StateStore> SiteGuard<S> {
    /// Create a key with fresh secret material
    pub async fn add_secret(&self, label: &str, duration_minutes: u32) -> Result<Secret> {
        let label = label.trim();
        if label.is_empty() {
            return Err(LimitError::InvalidConfig("key label cannot be empty".to_string()));
        }
        if duration_minutes == 0 {
            return Err(LimitError::InvalidConfig(
                "unlock duration must be at least one minute".to_string(),
            ));
        }

        let secret = Secret {
            id: format!("key_{}", Uuid::new_v4().simple()),
            label: label.to_string(),
            secret_material: CodeValidator::generate_secret(),
            duration_minutes,
        };

        let created = secret.clone();
        self.store
            .with(move |store| {
                let mut secrets = store.get(&[StateKey::Secrets])?.secrets.unwrap_or_default();
                secrets.insert(secret.id.clone(), secret);
                store.set(StateValues {
                    secrets: Some(secrets),
                    ..Default::default()
                })
            })
            .await?;

        info!("Added key {} ({})", created.label, created.id);
        Ok(created)
    }

    /// Delete a key; sites that referenced it keep a dangling id
    pub async fn remove_secret(&self, id: &str) -> Result<Secret> {
        let removed = self
            .store
            .with(|store| {
                let mut secrets = store.get(&[StateKey::Secrets])?.secrets.unwrap_or_default();
                let removed = secrets
                    .remove(id)
                    .ok_or_else(|| LimitError::UnknownSecret(id.to_string()))?;
                store.set(StateValues {
                    secrets: Some(secrets),
                    ..Default::default()
                })?;
                Ok(removed)
            })
            .await?;

        info!("Removed key {} ({})", removed.label, removed.id);
        Ok(removed)
    }

    pub async fn secrets(&self) -> Result<BTreeMap<String, Secret>> {
        self.store
            .with(|store| Ok(store.get(&[StateKey::Secrets])?.secrets.unwrap_or_default()))
            .await
    }

    /// Start tracking a domain; returns the normalized domain
    pub async fn add_site(&self, domain: &str, daily_limit: u32, secret_ids: &[String]) -> Result<String> {
        let domain = normalize_domain_input(domain)
            .ok_or_else(|| LimitError::InvalidConfig(format!("invalid domain: {:?}", domain)))?;

        if daily_limit == 0 {
            return Err(LimitError::InvalidConfig("daily limit must be at least 1".to_string()));
        }
        if secret_ids.is_empty() {
            return Err(LimitError::InvalidConfig(
                "select at least one key for unlocking".to_string(),
            ));
        }

        let ids: BTreeSet<String> = secret_ids.iter().cloned().collect();
        let tracked = domain.clone();

        self.store
            .with(move |store| {
                let values = store.get(&[StateKey::Secrets, StateKey::BlockedSites])?;
                let secrets = values.secrets.unwrap_or_default();
                let mut sites = values.blocked_sites.unwrap_or_default();

                if let Some(missing) = ids.iter().find(|id| !secrets.contains_key(*id)) {
                    return Err(LimitError::UnknownSecret(missing.clone()));
                }
                if sites.contains_key(&tracked) {
                    return Err(LimitError::AlreadyTracked(tracked));
                }

                sites.insert(tracked, TrackedSite::new(daily_limit, ids));
                store.set(StateValues {
                    blocked_sites: Some(sites),
                    ..Default::default()
                })
            })
            .await?;

        info!("Tracking {} with a daily limit of {}", domain, daily_limit);
        Ok(domain)
    }

    /// Stop tracking a domain
    ///
    /// Protected sites need a `code` that validates against one of their
    /// existing keys at `now`. Code checks share the unlock rate limiter.
    pub async fn remove_site(&self, domain: &str, code: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        let domain = normalize_domain_input(domain).unwrap_or_else(|| domain.to_string());
        let now_ms = now.timestamp_millis();

        let result = self
            .store
            .with(|store| {
                let values = store.get(&[StateKey::Secrets, StateKey::BlockedSites])?;
                let secrets = values.secrets.unwrap_or_default();
                let mut sites = values.blocked_sites.unwrap_or_default();
                let site = sites
                    .get(&domain)
                    .ok_or_else(|| LimitError::NotTracked(domain.clone()))?;

                let protected = site.is_protected(&secrets);
                if protected {
                    self.limiter.check(store, now_ms)?;

                    let code = code.ok_or(LimitError::InvalidCode)?;
                    let mut valid = false;
                    for secret in site.authorized_secrets(&secrets) {
                        match CodeValidator::validate(&secret.secret_material, code, now) {
                            Ok(true) => {
                                valid = true;
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => warn!("Skipping key {}: {}", secret.id, e),
                        }
                    }
                    if !valid {
                        return Err(LimitError::InvalidCode);
                    }
                }

                sites.remove(&domain);
                store.set(StateValues {
                    blocked_sites: Some(sites),
                    ..Default::default()
                })?;
                if protected {
                    self.limiter.reset(store)?;
                }
                Ok(())
            })
            .await;

        if result.is_ok() {
            info!("Stopped tracking {}", domain);
        }

        result
    }

    pub async fn sites(&self) -> Result<BTreeMap<String, TrackedSite>> {
        self.store
            .with(|store| Ok(store.get(&[StateKey::BlockedSites])?.blocked_sites.unwrap_or_default()))
            .await
    }
}
