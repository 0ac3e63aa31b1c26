/// Daily site limits with accountability-key unlocks
///
/// This module provides functionality to:
/// - Count heartbeat ticks against tracked domains
/// - Reset counters at local midnight
/// - Block domains whose daily limit is reached
/// - Grant temporary unlocks for a valid one-time code from a trusted key

pub mod auth;
pub mod decision;
pub mod domain;
pub mod enforcement;
pub mod error;
pub mod guard;
pub mod messages;
pub mod options;
pub mod state;
pub mod store;
pub mod tracker;
pub mod unlock;
pub mod usage;

pub use auth::{CodeValidator, RateLimiter};
pub use decision::{AccessDecisionEngine, Decision};
pub use enforcement::{BlockAction, BlockEnforcer, BlockPage, RecordingEnforcer};
pub use error::{LimitError, Result};
pub use guard::SiteGuard;
pub use messages::{Request, Response};
pub use state::{Secret, SiteUsage, TrackedSite, UnlockOption};
pub use store::{JsonFileStore, MemoryStore, SharedStore, StateDocument, StateKey, StateStore, StateValues};
pub use tracker::{ActiveTab, ActivitySource, LatestActiveTab, SiteTracker, TickOutcome, Trigger};
pub use unlock::UnlockStore;
pub use usage::UsageStore;
