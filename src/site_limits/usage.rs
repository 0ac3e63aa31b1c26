use chrono::{DateTime, Duration, NaiveTime, TimeZone};
use tracing::{debug, info};

use crate::site_limits::error::{LimitError, Result};
use crate::site_limits::state::SiteUsage;
use crate::site_limits::store::{StateKey, StateStore, StateValues};

/// Daily usage counters for tracked sites
pub struct UsageStore;

impl UsageStore {
    /// Count one heartbeat against `domain`
    ///
    /// Fails with `LimitError::NotTracked` for domains without a site entry;
    /// callers treat that as a no-op.
    pub fn increment_usage<S: StateStore + ?Sized>(store: &mut S, domain: &str) -> Result<u32> {
        let mut sites = store
            .get(&[StateKey::BlockedSites])?
            .blocked_sites
            .unwrap_or_default();

        let site = sites
            .get_mut(domain)
            .ok_or_else(|| LimitError::NotTracked(domain.to_string()))?;
        site.used_today = site.used_today.saturating_add(1);
        let used = site.used_today;

        store.set(StateValues {
            blocked_sites: Some(sites),
            ..Default::default()
        })?;

        debug!("Usage for {} is now {}", domain, used);
        Ok(used)
    }

    /// Zero every counter once per local calendar day
    ///
    /// Resets whenever the stored marker predates the local midnight of
    /// `now`, regardless of how much time has actually elapsed.
    pub fn reset_if_new_day<S, Tz>(store: &mut S, now: &DateTime<Tz>) -> Result<bool>
    where
        S: StateStore + ?Sized,
        Tz: TimeZone,
    {
        let midnight = local_midnight_ms(now);
        let values = store.get(&[StateKey::BlockedSites, StateKey::LastReset])?;
        let last_reset = values.last_reset.unwrap_or(0);

        if last_reset >= midnight {
            return Ok(false);
        }

        let mut sites = values.blocked_sites.unwrap_or_default();
        for site in sites.values_mut() {
            site.used_today = 0;
        }

        store.set(StateValues {
            blocked_sites: Some(sites),
            last_reset: Some(midnight),
            ..Default::default()
        })?;

        info!("Resetting daily usage");
        Ok(true)
    }

    /// Today's counter and limit for `domain`, if tracked
    pub fn usage<S: StateStore + ?Sized>(store: &S, domain: &str) -> Result<Option<SiteUsage>> {
        let sites = store
            .get(&[StateKey::BlockedSites])?
            .blocked_sites
            .unwrap_or_default();

        Ok(sites.get(domain).map(|site| SiteUsage {
            domain: domain.to_string(),
            used: site.used_today,
            limit: site.daily_limit,
        }))
    }
}

/// Epoch milliseconds of the start of `now`'s calendar day in its timezone
///
/// When a DST shift skips midnight, the first instant that exists that day
/// is used instead.
pub fn local_midnight_ms<Tz: TimeZone>(now: &DateTime<Tz>) -> i64 {
    let tz = now.timezone();
    let start = now.date_naive().and_time(NaiveTime::MIN);

    tz.from_local_datetime(&start)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(start + Duration::hours(1))).earliest())
        .map(|midnight| midnight.timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_limits::state::TrackedSite;
    use crate::site_limits::store::{MemoryStore, StateDocument};
    use chrono::{FixedOffset, Utc};

    fn store_with_site(domain: &str, limit: u32, used: u32, last_reset: i64) -> MemoryStore {
        let mut document = StateDocument::default();
        document.blocked_sites.insert(
            domain.to_string(),
            TrackedSite {
                daily_limit: limit,
                used_today: used,
                authorized_secret_ids: Default::default(),
            },
        );
        document.last_reset = last_reset;
        MemoryStore::with_document(document)
    }

    #[test]
    fn test_increment_usage() {
        let mut store = store_with_site("example.com", 3, 0, 0);

        assert_eq!(UsageStore::increment_usage(&mut store, "example.com").unwrap(), 1);
        assert_eq!(UsageStore::increment_usage(&mut store, "example.com").unwrap(), 2);
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 2);
    }

    #[test]
    fn test_increment_untracked_is_not_tracked() {
        let mut store = store_with_site("example.com", 3, 0, 0);

        let err = UsageStore::increment_usage(&mut store, "other.com").unwrap_err();
        assert!(err.is_not_tracked());
        assert!(!store.document().blocked_sites.contains_key("other.com"));
    }

    #[test]
    fn test_local_midnight_uses_calendar_date() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2025, 11, 16, 0, 2, 0).unwrap();
        let midnight = tz.with_ymd_and_hms(2025, 11, 16, 0, 0, 0).unwrap();

        assert_eq!(local_midnight_ms(&now), midnight.timestamp_millis());
    }

    #[test]
    fn test_reset_when_marker_predates_midnight() {
        let yesterday = Utc.with_ymd_and_hms(2025, 11, 15, 0, 0, 0).unwrap();
        let mut store = store_with_site("example.com", 3, 3, yesterday.timestamp_millis());

        let now = Utc.with_ymd_and_hms(2025, 11, 16, 9, 30, 0).unwrap();
        assert!(UsageStore::reset_if_new_day(&mut store, &now).unwrap());

        let midnight = Utc.with_ymd_and_hms(2025, 11, 16, 0, 0, 0).unwrap();
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 0);
        assert_eq!(store.document().last_reset, midnight.timestamp_millis());

        // Second call the same day is a no-op
        UsageStore::increment_usage(&mut store, "example.com").unwrap();
        assert!(!UsageStore::reset_if_new_day(&mut store, &now).unwrap());
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 1);
    }

    #[test]
    fn test_reset_across_midnight_within_minutes() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let mut store = store_with_site("example.com", 3, 0, 0);

        let before = tz.with_ymd_and_hms(2025, 11, 15, 23, 58, 0).unwrap();
        assert!(UsageStore::reset_if_new_day(&mut store, &before).unwrap());
        UsageStore::increment_usage(&mut store, "example.com").unwrap();
        UsageStore::increment_usage(&mut store, "example.com").unwrap();

        let after = tz.with_ymd_and_hms(2025, 11, 16, 0, 2, 0).unwrap();
        assert!(UsageStore::reset_if_new_day(&mut store, &after).unwrap());
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 0);
    }

    #[test]
    fn test_first_run_resets() {
        let mut store = store_with_site("example.com", 3, 2, 0);
        let now = Utc.with_ymd_and_hms(2025, 11, 16, 12, 0, 0).unwrap();

        assert!(UsageStore::reset_if_new_day(&mut store, &now).unwrap());
        assert_eq!(store.document().blocked_sites["example.com"].used_today, 0);
    }

    #[test]
    fn test_usage_lookup() {
        let store = store_with_site("example.com", 30, 12, 0);

        let usage = UsageStore::usage(&store, "example.com").unwrap().unwrap();
        assert_eq!(usage.used, 12);
        assert_eq!(usage.limit, 30);
        assert!(UsageStore::usage(&store, "other.com").unwrap().is_none());
    }
}
