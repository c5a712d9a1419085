//! Resource tiers and per-system availability
//!
//! Crisis resources are never "missing". The cache tier is tried first and
//! the offline bundle always answers, so the caller gets a value tagged
//! with where it came from instead of an error.
//!
//! ```text
//! resolve resources
//!   ├─ cache populated, fallback idle  → Served { tier: Cache,         level: Full }
//!   └─ cache empty or fallback active → Served { tier: OfflineBundle, level: Partial }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failures in a row after which a system counts as down regardless of
/// what the reporter assessed.
const DOWN_AFTER_STREAK: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Full,
    Partial,
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Where crisis-path data was read from, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTier {
    /// Resources loaded from the host store at boot or migration start
    Cache,
    /// Compiled-in bundle; needs no storage or network
    OfflineBundle,
}

impl ResourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "resource_cache",
            Self::OfflineBundle => "offline_bundle",
        }
    }
}

impl std::fmt::Display for ResourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crisis-path value and the tier that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Served<T> {
    pub value: T,
    pub tier: ResourceTier,
    /// Why the cache tier was skipped, if it was
    pub cache_miss: Option<String>,
    pub served_at: DateTime<Utc>,
}

impl<T> Served<T> {
    /// Try the cache; fall through to the bundle on any miss.
    pub fn cache_or_bundle(
        cache: impl FnOnce() -> Result<T, String>,
        bundle: impl FnOnce() -> T,
    ) -> Self {
        let (value, tier, cache_miss) = match cache() {
            Ok(value) => (value, ResourceTier::Cache, None),
            Err(reason) => (bundle(), ResourceTier::OfflineBundle, Some(reason)),
        };
        Self {
            value,
            tier,
            cache_miss,
            served_at: Utc::now(),
        }
    }

    pub fn level(&self) -> DegradationLevel {
        match self.tier {
            ResourceTier::Cache => DegradationLevel::Full,
            ResourceTier::OfflineBundle => DegradationLevel::Partial,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.level() != DegradationLevel::Full
    }
}

/// Availability of one collaborator system as reported through the hooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub system: String,
    pub level: DegradationLevel,
    /// Failures since the last recovery
    pub failure_streak: u32,
    pub failures_total: u64,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl SystemHealth {
    pub fn new(system: &str) -> Self {
        Self {
            system: system.to_string(),
            level: DegradationLevel::Full,
            failure_streak: 0,
            failures_total: 0,
            last_error: None,
            changed_at: Utc::now(),
        }
    }

    /// Only a recovery report raises the level again.
    pub fn record_failure(&mut self, error: &str, reported: DegradationLevel) {
        self.failures_total += 1;
        self.failure_streak += 1;
        self.last_error = Some(error.to_string());

        let assessed = if self.failure_streak >= DOWN_AFTER_STREAK {
            DegradationLevel::Unavailable
        } else {
            reported.max(DegradationLevel::Partial)
        };
        self.set_level(self.level.max(assessed));
    }

    pub fn record_recovery(&mut self) {
        self.failure_streak = 0;
        self.last_error = None;
        self.set_level(DegradationLevel::Full);
    }

    pub fn is_available(&self) -> bool {
        self.level < DegradationLevel::Unavailable
    }

    fn set_level(&mut self, level: DegradationLevel) {
        if level != self.level {
            self.level = level;
            self.changed_at = Utc::now();
        }
    }
}
