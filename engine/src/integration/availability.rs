//! Best-effort availability flags per collaborator system
//!
//! Background hooks write these; the crisis path only reads them and never
//! waits on them.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::types::{CrisisAccessImpact, SystemFailure};
use crate::resilience::{DegradationLevel, SystemHealth};

#[derive(Debug, Default)]
pub struct AvailabilityBoard {
    systems: RwLock<HashMap<String, SystemHealth>>,
    /// Systems with an outstanding failure that affects crisis access
    impaired: RwLock<BTreeSet<String>>,
}

impl AvailabilityBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, failure: &SystemFailure) {
        let level = match failure.impact_on_crisis_access {
            CrisisAccessImpact::Unavailable => DegradationLevel::Unavailable,
            CrisisAccessImpact::None | CrisisAccessImpact::Degraded => DegradationLevel::Partial,
        };
        self.mark_degraded(&failure.system, &failure.failure_type, level);
        if failure.affects_crisis_access() {
            if let Ok(mut impaired) = self.impaired.write() {
                impaired.insert(failure.system.clone());
            }
        }
    }

    /// Flag a system without touching crisis access (calendar, onboarding).
    pub fn mark_degraded(&self, system: &str, error: &str, level: DegradationLevel) {
        if let Ok(mut systems) = self.systems.write() {
            systems
                .entry(system.to_string())
                .or_insert_with(|| SystemHealth::new(system))
                .record_failure(error, level);
        }
    }

    /// Returns true if the system had been impairing crisis access.
    pub fn record_recovery(&self, system: &str) -> bool {
        if let Ok(mut systems) = self.systems.write() {
            if let Some(health) = systems.get_mut(system) {
                health.record_recovery();
            }
        }
        self.impaired
            .write()
            .map(|mut impaired| impaired.remove(system))
            .unwrap_or(false)
    }

    /// Unknown systems count as available.
    pub fn is_available(&self, system: &str) -> bool {
        self.systems
            .read()
            .ok()
            .and_then(|s| s.get(system).map(SystemHealth::is_available))
            .unwrap_or(true)
    }

    pub fn level(&self, system: &str) -> DegradationLevel {
        self.systems
            .read()
            .ok()
            .and_then(|s| s.get(system).map(|h| h.level))
            .unwrap_or(DegradationLevel::Full)
    }

    pub fn crisis_access_impaired(&self) -> bool {
        self.impaired.read().map(|i| !i.is_empty()).unwrap_or(true)
    }

    pub fn impaired_systems(&self) -> Vec<String> {
        self.impaired
            .read()
            .map(|i| i.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted by system name
    pub fn snapshot(&self) -> Vec<SystemHealth> {
        let mut health: Vec<SystemHealth> = self
            .systems
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default();
        health.sort_by(|a, b| a.system.cmp(&b.system));
        health
    }
}
