use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unlock duration used when a stored key has no duration
pub const DEFAULT_UNLOCK_MINUTES: u32 = 15;

fn default_duration() -> u32 {
    DEFAULT_UNLOCK_MINUTES
}

/// Accountability key shared with a trusted third party
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Secret {
    pub id: String,
    pub label: String,

    /// Base32 TOTP seed
    #[serde(rename = "secret")]
    pub secret_material: String,

    /// Length of the unlock this key grants
    #[serde(rename = "duration", default = "default_duration")]
    pub duration_minutes: u32,
}

impl Secret {
    /// Short form handed to UI surfaces (never includes the seed)
    pub fn to_option(&self) -> UnlockOption {
        UnlockOption {
            id: self.id.clone(),
            label: self.label.clone(),
            duration: self.duration_minutes,
        }
    }
}

/// A domain whose daily usage is limited
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrackedSite {
    /// Heartbeat ticks allowed per day
    #[serde(rename = "limit")]
    pub daily_limit: u32,

    /// Heartbeat ticks counted since the last reset
    #[serde(rename = "used", default)]
    pub used_today: u32,

    /// Keys allowed to unlock or delete this site
    #[serde(rename = "secretIds", default)]
    pub authorized_secret_ids: BTreeSet<String>,
}

impl TrackedSite {
    pub fn new(daily_limit: u32, authorized_secret_ids: BTreeSet<String>) -> Self {
        Self {
            daily_limit,
            used_today: 0,
            authorized_secret_ids,
        }
    }

    pub fn limit_reached(&self) -> bool {
        self.used_today >= self.daily_limit
    }

    /// Authorized keys that still exist, in id order
    ///
    /// Ids referring to deleted keys are skipped.
    pub fn authorized_secrets<'a>(
        &'a self,
        secrets: &'a BTreeMap<String, Secret>,
    ) -> impl Iterator<Item = &'a Secret> + 'a {
        self.authorized_secret_ids
            .iter()
            .filter_map(move |id| secrets.get(id))
    }

    /// A site is protected while at least one authorized key exists
    pub fn is_protected(&self, secrets: &BTreeMap<String, Secret>) -> bool {
        self.authorized_secrets(secrets).next().is_some()
    }
}

/// Unlock choice presented on the block page
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UnlockOption {
    pub id: String,
    pub label: String,
    pub duration: u32,
}

/// Today's usage for a single domain (popup surface)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SiteUsage {
    pub domain: String,
    pub used: u32,
    pub limit: u32,
}
