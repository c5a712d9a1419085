//! Crisis event ledger and derived statistics
//!
//! Events are appended and never deleted; once the rolling cap is reached the
//! oldest resolved event is retired. Statistics are computed on demand.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};

use super::types::{CrisisEvent, CrisisTrigger, InterventionKind};
use crate::scoring::CrisisSeverity;

#[derive(Debug, Clone)]
pub struct Ledger {
    events: VecDeque<CrisisEvent>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn from_events(events: Vec<CrisisEvent>, capacity: usize) -> Self {
        let mut ledger = Self {
            events: events.into(),
            capacity: capacity.max(1),
        };
        ledger.enforce_cap();
        ledger
    }

    pub fn append(&mut self, event: CrisisEvent) {
        self.events.push_back(event);
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        while self.events.len() > self.capacity {
            match self.events.iter().position(|e| e.is_resolved()) {
                Some(idx) => {
                    self.events.remove(idx);
                }
                // Never retire an open event
                None => break,
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&CrisisEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut CrisisEvent> {
        self.events.iter_mut().find(|e| e.id == id)
    }

    pub fn events(&self) -> impl Iterator<Item = &CrisisEvent> {
        self.events.iter()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &CrisisEvent> {
        self.events.iter().filter(|e| !e.is_resolved())
    }

    pub fn to_vec(&self) -> Vec<CrisisEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events triggered within the last `days` days, newest first. A window
    /// reaching past the representable calendar means no cutoff.
    pub fn history(&self, days: Option<u32>, now: DateTime<Utc>) -> Vec<CrisisEvent> {
        let cutoff = days.and_then(|d| {
            TimeDelta::try_days(i64::from(d)).and_then(|window| now.checked_sub_signed(window))
        });
        let mut events: Vec<CrisisEvent> = self
            .events
            .iter()
            .filter(|e| cutoff.map_or(true, |c| e.triggered_at >= c))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        events
    }

    pub fn stats(&self) -> CrisisStats {
        CrisisStats::from_events(self.events.iter())
    }
}

/// Effectiveness of one intervention kind, from user feedback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterventionEffectiveness {
    /// Events where this intervention was dispatched
    pub times_used: usize,
    /// Of those, events with feedback
    pub rated_events: usize,
    /// Of those, events whose feedback named this intervention helpful
    pub helpful_count: usize,
    /// helpful_count / rated_events
    pub effectiveness: Option<f64>,
}

/// Aggregate view over the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrisisStats {
    pub total_events: usize,
    pub active_events: usize,
    pub resolved_events: usize,
    pub most_common_trigger: Option<CrisisTrigger>,
    pub average_response_time_ms: Option<f64>,
    pub events_by_severity: BTreeMap<CrisisSeverity, usize>,
    pub intervention_effectiveness: BTreeMap<InterventionKind, InterventionEffectiveness>,
}

impl CrisisStats {
    pub fn from_events<'a>(events: impl Iterator<Item = &'a CrisisEvent>) -> Self {
        let mut stats = Self::default();
        let mut trigger_counts: BTreeMap<CrisisTrigger, usize> = BTreeMap::new();
        let mut response_total = 0u64;
        let mut response_count = 0u64;

        for event in events {
            stats.total_events += 1;
            if event.is_resolved() {
                stats.resolved_events += 1;
            } else {
                stats.active_events += 1;
            }
            *trigger_counts.entry(event.trigger).or_insert(0) += 1;
            *stats.events_by_severity.entry(event.severity).or_insert(0) += 1;

            if let Some(ms) = event.response_time_ms {
                response_total += ms;
                response_count += 1;
            }

            // One count per event even if a kind was dispatched repeatedly
            let used: HashSet<InterventionKind> =
                event.interventions_taken.iter().copied().collect();
            for kind in used {
                let entry = stats.intervention_effectiveness.entry(kind).or_default();
                entry.times_used += 1;
                if let Some(feedback) = &event.feedback {
                    entry.rated_events += 1;
                    if feedback.helpful_interventions.contains(&kind) {
                        entry.helpful_count += 1;
                    }
                }
            }
        }

        for entry in stats.intervention_effectiveness.values_mut() {
            if entry.rated_events > 0 {
                entry.effectiveness = Some(entry.helpful_count as f64 / entry.rated_events as f64);
            }
        }

        // Ties go to the trigger declared first
        stats.most_common_trigger = trigger_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(trigger, _)| trigger);

        if response_count > 0 {
            stats.average_response_time_ms = Some(response_total as f64 / response_count as f64);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::CrisisFeedback;

    fn event(trigger: CrisisTrigger, severity: CrisisSeverity) -> CrisisEvent {
        CrisisEvent::new(trigger, severity, None)
    }

    fn resolved(mut e: CrisisEvent) -> CrisisEvent {
        e.resolved_at = Some(Utc::now());
        e
    }

    #[test]
    fn test_cap_retires_oldest_resolved() {
        let mut ledger = Ledger::new(2);
        let open = event(CrisisTrigger::UserActivated, CrisisSeverity::Severe);
        let open_id = open.id.clone();
        ledger.append(open);
        ledger.append(resolved(event(
            CrisisTrigger::ScoreThreshold,
            CrisisSeverity::Severe,
        )));
        ledger.append(resolved(event(
            CrisisTrigger::ScoreThreshold,
            CrisisSeverity::Critical,
        )));

        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(&open_id).is_some());
    }

    #[test]
    fn test_cap_never_drops_open_events() {
        let mut ledger = Ledger::new(1);
        ledger.append(event(CrisisTrigger::UserActivated, CrisisSeverity::Severe));
        ledger.append(event(CrisisTrigger::UserActivated, CrisisSeverity::Critical));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_history_window() {
        let mut ledger = Ledger::new(10);
        let mut old = event(CrisisTrigger::UserActivated, CrisisSeverity::Severe);
        old.triggered_at = Utc::now() - TimeDelta::days(40);
        ledger.append(old);
        ledger.append(event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Severe));

        assert_eq!(ledger.history(Some(30), Utc::now()).len(), 1);
        assert_eq!(ledger.history(None, Utc::now()).len(), 2);
    }

    #[test]
    fn test_history_window_past_calendar_returns_all() {
        let mut ledger = Ledger::new(10);
        let mut old = event(CrisisTrigger::UserActivated, CrisisSeverity::Severe);
        old.triggered_at = Utc::now() - TimeDelta::days(4000);
        ledger.append(old);
        ledger.append(event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Severe));

        assert_eq!(ledger.history(Some(u32::MAX), Utc::now()).len(), 2);
    }

    #[test]
    fn test_history_newest_first() {
        let mut ledger = Ledger::new(10);
        let mut first = event(CrisisTrigger::UserActivated, CrisisSeverity::Severe);
        first.triggered_at = Utc::now() - TimeDelta::hours(2);
        let first_id = first.id.clone();
        ledger.append(first);
        ledger.append(event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Severe));

        let history = ledger.history(None, Utc::now());
        assert_eq!(history[1].id, first_id);
    }

    #[test]
    fn test_stats_derived() {
        let mut a = resolved(event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Severe));
        a.interventions_taken = vec![InterventionKind::Hotline, InterventionKind::TextLine];
        a.response_time_ms = Some(100);
        a.feedback = Some(CrisisFeedback {
            helpful: true,
            helpful_interventions: vec![InterventionKind::Hotline],
            ..Default::default()
        });

        let mut b = resolved(event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Critical));
        b.interventions_taken = vec![InterventionKind::Hotline, InterventionKind::Hotline];
        b.response_time_ms = Some(50);
        b.feedback = Some(CrisisFeedback::default());

        let c = event(CrisisTrigger::UserActivated, CrisisSeverity::Moderate);

        let stats = CrisisStats::from_events([a, b, c].iter());
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.active_events, 1);
        assert_eq!(stats.resolved_events, 2);
        assert_eq!(stats.most_common_trigger, Some(CrisisTrigger::ScoreThreshold));
        assert_eq!(stats.average_response_time_ms, Some(75.0));

        let hotline = &stats.intervention_effectiveness[&InterventionKind::Hotline];
        assert_eq!(hotline.times_used, 2);
        assert_eq!(hotline.rated_events, 2);
        assert_eq!(hotline.helpful_count, 1);
        assert_eq!(hotline.effectiveness, Some(0.5));

        let text = &stats.intervention_effectiveness[&InterventionKind::TextLine];
        assert_eq!(text.effectiveness, Some(0.0));
    }

    #[test]
    fn test_stats_tie_prefers_declared_order() {
        let events = [
            event(CrisisTrigger::UserActivated, CrisisSeverity::Severe),
            event(CrisisTrigger::ScoreThreshold, CrisisSeverity::Severe),
        ];
        let stats = CrisisStats::from_events(events.iter());
        assert_eq!(stats.most_common_trigger, Some(CrisisTrigger::ScoreThreshold));
    }

    #[test]
    fn test_stats_serialize_with_enum_keys() {
        let events = [event(CrisisTrigger::UserActivated, CrisisSeverity::Severe)];
        let json = serde_json::to_value(CrisisStats::from_events(events.iter())).unwrap();
        assert_eq!(json["events_by_severity"]["severe"], 1);
    }
}
