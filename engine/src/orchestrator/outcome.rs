//! First-write-wins outcome recording
//!
//! A timed action has two completions that may both try to record a result:
//! the deadline path (the executor gave up) and the work path (the dispatch
//! finished, possibly long after). Both go through [`OutcomeRegistry::record`]
//! keyed by event id, action kind and attempt; only the first is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::executor::ActionStatus;
use crate::state::{lock_machine, EventId, InterventionKind, OutcomePath, SharedStateMachine};

const DEFAULT_REGISTRY_CAPACITY: usize = 4096;

/// Idempotency key for one dispatched action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey {
    pub event_id: EventId,
    pub kind: InterventionKind,
    /// Zero-based count of earlier dispatches of this kind for the event
    pub attempt: u32,
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.event_id, self.kind, self.attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedOutcome {
    pub status: ActionStatus,
    pub path: OutcomePath,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct OutcomeRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    outcomes: HashMap<ActionKey, RecordedOutcome>,
    order: VecDeque<ActionKey>,
}

impl OutcomeRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Returns true when this call wrote the outcome.
    pub fn record(&self, key: &ActionKey, status: ActionStatus, path: OutcomePath) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.outcomes.contains_key(key) {
            debug!(key = %key, ?path, %status, "Outcome already recorded; discarding");
            return false;
        }
        inner.outcomes.insert(
            key.clone(),
            RecordedOutcome {
                status,
                path,
                recorded_at: Utc::now(),
            },
        );
        inner.order.push_back(key.clone());
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.outcomes.remove(&old);
            }
        }
        true
    }

    pub fn get(&self, key: &ActionKey) -> Option<RecordedOutcome> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.outcomes.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.outcomes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutcomeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

/// Applies the winning outcome of one action to the state machine.
///
/// Cloned into the spawned work so the work path can record on its own.
#[derive(Clone)]
pub struct OutcomeRecorder {
    key: ActionKey,
    registry: Arc<OutcomeRegistry>,
    machine: SharedStateMachine,
    /// Set for the primary action: when detection happened
    detected_at: Option<tokio::time::Instant>,
}

impl OutcomeRecorder {
    pub fn new(key: ActionKey, registry: Arc<OutcomeRegistry>, machine: SharedStateMachine) -> Self {
        Self {
            key,
            registry,
            machine,
            detected_at: None,
        }
    }

    /// Also record detection-to-outcome response time on the event.
    pub fn with_response_clock(mut self, detected_at: tokio::time::Instant) -> Self {
        self.detected_at = Some(detected_at);
        self
    }

    pub fn key(&self) -> &ActionKey {
        &self.key
    }

    /// Returns true if this completion won.
    pub fn complete(&self, status: ActionStatus, path: OutcomePath) -> bool {
        if !self.registry.record(&self.key, status, path) {
            return false;
        }
        let response_time_ms = self
            .detected_at
            .map(|detected_at| detected_at.elapsed().as_millis() as u64);
        lock_machine(&self.machine).record_outcome(
            &self.key.event_id,
            self.key.kind,
            self.key.attempt,
            status,
            path,
            response_time_ms,
        );
        true
    }
}
