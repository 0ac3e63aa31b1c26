use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};

use site_limits::domain::normalize_domain_input;
use site_limits::{Decision, JsonFileStore, SharedStore, StateKey, StateStore, UnlockStore, UsageStore};

use super::utils::{Environment, format_duration};

/// Apply a pending midnight reset so the counters shown are today's
async fn refresh(store: &SharedStore<JsonFileStore>, now: DateTime<Local>) -> Result<()> {
    store
        .with(|store| {
            if UsageStore::reset_if_new_day(store, &now)? {
                UnlockStore::prune_expired(store, now.timestamp_millis())?;
            }
            Ok(())
        })
        .await
        .context("Failed to refresh daily counters")
}

/// Show today's usage
pub fn status(env: Environment, domain: Option<String>) -> Result<()> {
    let guard = env.guard();
    let store = guard.store().clone();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let now = Local::now();
        refresh(&store, now).await?;

        let values = store
            .with(|store| store.get(&[StateKey::BlockedSites, StateKey::TempUnlocks]))
            .await?;
        let sites = values.blocked_sites.unwrap_or_default();
        let unlocks = values.temp_unlocks.unwrap_or_default();

        println!("Site Limits Status");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        println!("State file: {}", env.state_path.display());
        println!();

        let filter = domain.map(|d| normalize_domain_input(&d).unwrap_or(d));
        let domains: Vec<&String> = match &filter {
            Some(domain) => sites.keys().filter(|d| *d == domain).collect(),
            None => sites.keys().collect(),
        };

        if domains.is_empty() {
            println!("No tracked sites.");
            return Ok::<(), anyhow::Error>(());
        }

        for domain in domains {
            let site = &sites[domain];
            let decision = guard.check(domain, now.with_timezone(&Utc)).await?;

            let state = match (decision, unlocks.get(domain)) {
                (Decision::Block, _) => "BLOCKED".to_string(),
                (Decision::Allow, Some(&expiry)) if expiry > now.timestamp_millis() => {
                    format!("unlocked ({} left)", remaining(now, expiry))
                }
                (Decision::Allow, _) => "allowed".to_string(),
            };

            println!(
                "{:<30} {:>4}/{:<4}  {}",
                domain, site.used_today, site.daily_limit, state
            );
        }

        Ok(())
    })
}

/// Show whether a domain is currently allowed
pub fn check(env: Environment, domain: String) -> Result<()> {
    let guard = env.guard();
    let store = guard.store().clone();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let now = Local::now();
        refresh(&store, now).await?;

        let domain = normalize_domain_input(&domain)
            .with_context(|| format!("Invalid domain: {}", domain))?;
        let decision = guard.check(&domain, now.with_timezone(&Utc)).await?;

        match decision {
            Decision::Allow => println!("{}: allowed", domain),
            Decision::Block => println!("{}: blocked", domain),
        }

        Ok::<(), anyhow::Error>(())
    })
}

/// Unlock a domain with a partner's code
pub fn unlock(env: Environment, domain: String, key: String, code: String) -> Result<()> {
    let guard = env.guard();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let domain = normalize_domain_input(&domain)
            .with_context(|| format!("Invalid domain: {}", domain))?;

        let now = Utc::now();
        let expiry = guard
            .attempt_unlock(&domain, &key, &code, now)
            .await
            .with_context(|| format!("Failed to unlock {}", domain))?;

        println!(
            "✓ {} unlocked for {}",
            domain,
            remaining(now.with_timezone(&Local), expiry)
        );

        Ok::<(), anyhow::Error>(())
    })
}

fn remaining<Tz: TimeZone>(now: DateTime<Tz>, expiry_ms: i64) -> String {
    format_duration(chrono::Duration::milliseconds(expiry_ms - now.timestamp_millis()))
}
