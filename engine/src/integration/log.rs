//! Bounded integration log and its periodic review

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::types::{EventSeverity, IntegrationEvent};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Summary produced by [`IntegrationLog::review`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationLogReview {
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Events currently retained
    pub retained: usize,
    /// Events ever recorded, including rotated ones
    pub total_recorded: u64,
    pub by_type: BTreeMap<String, usize>,
    pub unhandled: usize,
    pub warnings: usize,
    pub critical: usize,
    pub average_response_time_ms: Option<f64>,
    /// Systems whose failures currently affect crisis access
    pub impaired_systems: Vec<String>,
}

#[derive(Debug)]
pub struct IntegrationLog {
    events: Mutex<VecDeque<IntegrationEvent>>,
    capacity: usize,
    total_recorded: AtomicU64,
}

impl IntegrationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            total_recorded: AtomicU64::new(0),
        }
    }

    pub fn record(&self, event: IntegrationEvent) {
        self.total_recorded.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// Set the response time on a retained event.
    pub fn mark_handled(&self, id: &str, response_time_ms: u64) -> bool {
        let Ok(mut events) = self.events.lock() else {
            return false;
        };
        match events.iter_mut().rev().find(|e| e.id == id) {
            Some(event) => {
                event.response_time_ms = Some(response_time_ms);
                true
            }
            None => false,
        }
    }

    /// Oldest first
    pub fn events(&self) -> Vec<IntegrationEvent> {
        self.events
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn review(&self) -> IntegrationLogReview {
        let events = self.events();
        let mut review = IntegrationLogReview {
            reviewed_at: Some(Utc::now()),
            retained: events.len(),
            total_recorded: self.total_recorded.load(Ordering::SeqCst),
            ..Default::default()
        };

        let mut response_total = 0u64;
        let mut handled = 0u64;
        for event in &events {
            *review
                .by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            match event.severity {
                EventSeverity::Critical => review.critical += 1,
                EventSeverity::Warning => review.warnings += 1,
                EventSeverity::Info => {}
            }
            match event.response_time_ms {
                Some(ms) => {
                    response_total += ms;
                    handled += 1;
                }
                None => review.unhandled += 1,
            }
        }
        if handled > 0 {
            review.average_response_time_ms = Some(response_total as f64 / handled as f64);
        }
        review
    }
}

impl Default for IntegrationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
