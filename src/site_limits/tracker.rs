use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::site_limits::decision::{AccessDecisionEngine, Decision};
use crate::site_limits::domain::domain_from_url;
use crate::site_limits::enforcement::{BlockEnforcer, BlockPage};
use crate::site_limits::error::Result;
use crate::site_limits::store::{SharedStore, StateStore};
use crate::site_limits::unlock::UnlockStore;
use crate::site_limits::usage::UsageStore;

/// Input that drives usage accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Periodic tick: counts one unit against the active tab's domain
    Heartbeat,
    /// A top-level document was committed in a tab; observed, never counted
    Navigation { url: String, tab_id: Option<u64> },
}

/// The focused tab as last reported by the browser
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTab {
    pub tab_id: Option<u64>,
    pub url: String,
}

/// Answers "which tab is the user looking at?"
pub trait ActivitySource: Send + Sync {
    fn active_tab(&self) -> Option<ActiveTab>;
}

/// Activity source fed by active-tab updates from the browser
#[derive(Debug, Default)]
pub struct LatestActiveTab {
    current: RwLock<Option<ActiveTab>>,
}

impl LatestActiveTab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, tab: Option<ActiveTab>) {
        if let Ok(mut current) = self.current.write() {
            *current = tab;
        }
    }

    /// Follow a top-level navigation; only the focused tab's URL changes
    ///
    /// Returns whether the focused tab was the one that navigated.
    pub fn navigated(&self, tab_id: Option<u64>, url: &str) -> bool {
        let Some(tab_id) = tab_id else {
            return false;
        };

        match self.current.write() {
            Ok(mut current) => match current.as_mut() {
                Some(tab) if tab.tab_id == Some(tab_id) => {
                    tab.url = url.to_string();
                    true
                }
                _ => false,
            },
            Err(_) => false,
        }
    }
}

impl ActivitySource for LatestActiveTab {
    fn active_tab(&self) -> Option<ActiveTab> {
        self.current.read().ok().and_then(|tab| tab.clone())
    }
}

/// What a single tick observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub domain: String,
    /// Daily counters were reset during this tick
    pub reset: bool,
    /// New counter value, for heartbeats on tracked domains
    pub used: Option<u32>,
    pub decision: Decision,
}

/// Drives usage accounting and blocking from heartbeats and navigations
pub struct SiteTracker<S> {
    store: SharedStore<S>,
    activity: Arc<dyn ActivitySource>,
    enforcer: Arc<dyn BlockEnforcer>,
    block_page: BlockPage,
    heartbeat: Duration,
}

impl<S: StateStore> SiteTracker<S> {
    pub fn new(
        store: SharedStore<S>,
        activity: Arc<dyn ActivitySource>,
        enforcer: Arc<dyn BlockEnforcer>,
        block_page: BlockPage,
        heartbeat: Duration,
    ) -> Self {
        Self {
            store,
            activity,
            enforcer,
            block_page,
            heartbeat,
        }
    }

    /// Handle one trigger at `now`
    ///
    /// Reset, increment and decision run as one unit under the store lock;
    /// the block action is signaled after the lock is released. Returns
    /// `None` when no domain could be resolved.
    pub async fn tick<Tz: TimeZone>(&self, trigger: Trigger, now: DateTime<Tz>) -> Result<Option<TickOutcome>> {
        let (url, tab_id, counts_usage) = match trigger {
            Trigger::Heartbeat => match self.activity.active_tab() {
                Some(tab) => (tab.url, tab.tab_id, true),
                None => {
                    debug!("No active tab, skipping heartbeat");
                    return Ok(None);
                }
            },
            Trigger::Navigation { url, tab_id } => (url, tab_id, false),
        };

        let Some(domain) = domain_from_url(&url) else {
            debug!("No trackable host in {}", url);
            return Ok(None);
        };

        let now_ms = now.timestamp_millis();
        let outcome = self
            .store
            .with(|store| {
                let reset = UsageStore::reset_if_new_day(store, &now)?;
                if reset {
                    UnlockStore::prune_expired(store, now_ms)?;
                }

                let used = if counts_usage {
                    match UsageStore::increment_usage(store, &domain) {
                        Ok(used) => Some(used),
                        Err(e) if e.is_not_tracked() => None,
                        Err(e) => return Err(e),
                    }
                } else {
                    None
                };

                let decision = AccessDecisionEngine::decide(store, &domain, now_ms)?;
                Ok(TickOutcome {
                    domain: domain.clone(),
                    reset,
                    used,
                    decision,
                })
            })
            .await?;

        if outcome.decision.is_block() {
            info!("Blocking {} (used: {:?})", outcome.domain, outcome.used);
            let action = self.block_page.action_for(&outcome.domain, tab_id);
            if let Err(e) = self.enforcer.enforce_block(&action) {
                error!("Failed to enforce block for {}: {:#}", outcome.domain, e);
            }
        }

        Ok(Some(outcome))
    }

    /// Process heartbeats and incoming triggers one at a time until the
    /// trigger channel closes
    pub async fn run(&self, mut triggers: mpsc::Receiver<Trigger>) {
        info!(
            "Starting site tracker (heartbeat every {} seconds)",
            self.heartbeat.as_secs()
        );

        let mut interval = time::interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                _ = interval.tick() => Trigger::Heartbeat,
                received = triggers.recv() => match received {
                    Some(trigger) => trigger,
                    None => {
                        info!("Trigger channel closed, stopping site tracker");
                        break;
                    }
                },
            };

            if let Err(e) = self.tick(trigger, Local::now()).await {
                error!("Error in tracking tick: {}", e);
            }
        }
    }
}
