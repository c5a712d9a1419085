//! Crisis state machine, the only write path for CrisisState
//!
//! ```text
//!            activate                 resolve(active id)
//!   Idle ───────────────▶ Active(sev) ──────────────────▶ Resolved ──▶ Idle
//!                           │    ▲
//!                           └────┘ higher-severity trigger: new event,
//!                                  previous event closed as Escalated
//! ```
//!
//! Severity never goes down implicitly. A trigger at or below the current
//! severity leaves the active event in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::audit::{AuditAction, AuditError, AuditSnapshot, AuditTrail, OutcomePath};
use super::ledger::{CrisisStats, Ledger};
use super::types::{
    CrisisEvent, CrisisFeedback, CrisisState, CrisisTrigger, EventId, InterventionKind,
    ResolutionKind,
};
use crate::error::{EngineError, EngineResult};
use crate::executor::ActionStatus;
use crate::scoring::{AssessmentScore, CrisisSeverity};

/// Result of an activation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Idle → Active
    Activated { event_id: EventId },
    /// Active → Active at a higher severity
    Escalated {
        event_id: EventId,
        previous_event_id: EventId,
        previous_severity: CrisisSeverity,
    },
    /// Already active at this severity or higher
    Unchanged { event_id: EventId },
}

impl Transition {
    pub fn event_id(&self) -> &str {
        match self {
            Self::Activated { event_id }
            | Self::Escalated { event_id, .. }
            | Self::Unchanged { event_id } => event_id,
        }
    }

    /// Whether orchestration should run for this transition
    pub fn needs_orchestration(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

/// Result of a resolution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved,
    /// Second call for an already-resolved event
    AlreadyResolved,
}

/// Shared reference to the state machine; never held across an await
pub type SharedStateMachine = Arc<Mutex<CrisisStateMachine>>;

/// Lock the machine, recovering from poisoning. A panic elsewhere must not
/// switch off crisis handling; every transition leaves the machine usable.
pub fn lock_machine(machine: &SharedStateMachine) -> MutexGuard<'_, CrisisStateMachine> {
    machine.lock().unwrap_or_else(|poisoned| {
        warn!("Crisis state lock was poisoned; recovering");
        machine.clear_poison();
        poisoned.into_inner()
    })
}

#[derive(Debug, Clone)]
pub struct CrisisStateMachine {
    state: CrisisState,
    ledger: Ledger,
    audit: AuditTrail,
}

impl CrisisStateMachine {
    pub fn new(ledger_capacity: usize) -> Self {
        Self {
            state: CrisisState::idle(),
            ledger: Ledger::new(ledger_capacity),
            audit: AuditTrail::default(),
        }
    }

    /// Rebuild from persisted history. The state is always Idle; open events
    /// from the previous run stay open until the host confirms them.
    pub fn restore(events: Vec<CrisisEvent>, audit: AuditSnapshot, ledger_capacity: usize) -> Self {
        Self {
            state: CrisisState::idle(),
            ledger: Ledger::from_events(events, ledger_capacity),
            audit: AuditTrail::from_snapshot(audit, super::audit::DEFAULT_AUDIT_CAPACITY),
        }
    }

    pub fn shared(self) -> SharedStateMachine {
        Arc::new(Mutex::new(self))
    }

    pub fn snapshot(&self) -> CrisisState {
        self.state.clone()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn stats(&self) -> CrisisStats {
        self.ledger.stats()
    }

    pub fn event(&self, id: &str) -> Option<&CrisisEvent> {
        self.ledger.get(id)
    }

    pub fn active_event_id(&self) -> Option<&str> {
        self.state.active_event_id.as_deref()
    }

    /// Idle → Active, or escalate an active crisis.
    pub fn activate(
        &mut self,
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
        assessment: Option<AssessmentScore>,
    ) -> Transition {
        let current = match (&self.state.active_event_id, self.state.is_active) {
            (Some(id), true) => Some((id.clone(), self.state.severity)),
            _ => None,
        };

        match current {
            None => {
                let event = CrisisEvent::new(trigger, severity, assessment);
                let event_id = event.id.clone();
                self.open(event, trigger, severity);
                info!(event_id = %event_id, %trigger, %severity, "Crisis activated");
                Transition::Activated { event_id }
            }
            Some((active_id, active_severity)) if severity > active_severity => {
                let mut event = CrisisEvent::new(trigger, severity, assessment);
                event.escalated_from = Some(active_id.clone());
                let event_id = event.id.clone();

                self.close(
                    &active_id,
                    ResolutionKind::Escalated {
                        into: event_id.clone(),
                    },
                    None,
                );
                self.log(
                    &event_id,
                    AuditAction::Escalated {
                        from_event: active_id.clone(),
                        from_severity: active_severity,
                        to_severity: severity,
                    },
                );
                self.open(event, trigger, severity);
                info!(
                    event_id = %event_id,
                    previous = %active_id,
                    from = %active_severity,
                    to = %severity,
                    "Crisis escalated"
                );
                Transition::Escalated {
                    event_id,
                    previous_event_id: active_id,
                    previous_severity: active_severity,
                }
            }
            Some((active_id, active_severity)) => {
                debug!(
                    event_id = %active_id,
                    %active_severity,
                    requested = %severity,
                    "Trigger at or below active severity; keeping current event"
                );
                Transition::Unchanged {
                    event_id: active_id,
                }
            }
        }
    }

    fn open(&mut self, event: CrisisEvent, trigger: CrisisTrigger, severity: CrisisSeverity) {
        let event_id = event.id.clone();
        let started_at = event.triggered_at;
        self.ledger.append(event);
        self.log(&event_id, AuditAction::Opened { trigger, severity });
        self.state = CrisisState {
            is_active: true,
            severity,
            active_event_id: Some(event_id),
            started_at: Some(started_at),
        };
    }

    fn close(&mut self, event_id: &str, resolution: ResolutionKind, feedback: Option<CrisisFeedback>) {
        if let Some(event) = self.ledger.get_mut(event_id) {
            event.resolved_at = Some(Utc::now());
            event.resolution = Some(resolution.clone());
            event.feedback = feedback;
        }
        self.log(event_id, AuditAction::Resolved { resolution });
    }

    /// Active → Resolved → Idle. Only the currently active event can be
    /// resolved; repeating the call is a no-op.
    pub fn resolve(
        &mut self,
        event_id: &str,
        feedback: Option<CrisisFeedback>,
    ) -> EngineResult<ResolveOutcome> {
        let event = self
            .ledger
            .get(event_id)
            .ok_or_else(|| EngineError::invalid_input(format!("unknown crisis event '{event_id}'")))?;

        if event.is_resolved() {
            debug!(event_id, "Resolve repeated for closed event; ignoring");
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        if self.state.active_event_id.as_deref() != Some(event_id) {
            return Err(EngineError::invalid_input(format!(
                "crisis event '{event_id}' is not the active event"
            )));
        }

        self.close(event_id, ResolutionKind::Resolved, feedback);
        self.state = CrisisState::idle();
        info!(event_id, "Crisis resolved");
        Ok(ResolveOutcome::Resolved)
    }

    /// Append a dispatched intervention; returns the attempt number for this
    /// kind, or None when the event is no longer open.
    pub fn record_dispatch(&mut self, event_id: &str, kind: InterventionKind) -> Option<u32> {
        let event = self.ledger.get_mut(event_id)?;
        if event.is_resolved() {
            return None;
        }
        let attempt = event
            .interventions_taken
            .iter()
            .filter(|k| **k == kind)
            .count() as u32;
        event.interventions_taken.push(kind);
        self.log(event_id, AuditAction::InterventionDispatched { kind, attempt });
        Some(attempt)
    }

    /// Audit the first completion written for an action. The response time
    /// is set once, by the primary action, before the record is written.
    pub fn record_outcome(
        &mut self,
        event_id: &str,
        kind: InterventionKind,
        attempt: u32,
        status: ActionStatus,
        path: OutcomePath,
        response_time_ms: Option<u64>,
    ) {
        if let (Some(ms), Some(event)) = (response_time_ms, self.ledger.get_mut(event_id)) {
            if event.response_time_ms.is_none() {
                event.response_time_ms = Some(ms);
            }
        }
        self.log(
            event_id,
            AuditAction::OutcomeRecorded {
                kind,
                attempt,
                status,
                path,
            },
        );
    }

    pub fn mark_offline(&mut self, event_id: &str, reason: &str) {
        if let Some(event) = self.ledger.get_mut(event_id) {
            event.used_offline_resources = true;
            self.log(
                event_id,
                AuditAction::OfflineFallbackUsed {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Open events carried over from a previous run
    pub fn stale_events(&self) -> Vec<EventId> {
        let active = self.state.active_event_id.as_deref();
        self.ledger
            .unresolved()
            .filter(|e| Some(e.id.as_str()) != active)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Host confirmed a carried-over event is still live.
    pub fn reactivate(&mut self, event_id: &str) -> EngineResult<Transition> {
        let event = self
            .ledger
            .get(event_id)
            .ok_or_else(|| EngineError::invalid_input(format!("unknown crisis event '{event_id}'")))?;
        if event.is_resolved() {
            return Err(EngineError::invalid_input(format!(
                "crisis event '{event_id}' is already resolved"
            )));
        }
        let (trigger, severity) = (event.trigger, event.severity);

        if self.state.is_active {
            // A live crisis already exists; treat the old one as a new trigger.
            let transition = self.activate(trigger, severity, None);
            self.close(event_id, ResolutionKind::ClosedAfterRestart, None);
            return Ok(transition);
        }

        self.state = CrisisState {
            is_active: true,
            severity,
            active_event_id: Some(event_id.to_string()),
            started_at: Some(Utc::now()),
        };
        self.log(event_id, AuditAction::Reactivated);
        info!(event_id, %severity, "Carried-over crisis confirmed live");
        Ok(Transition::Activated {
            event_id: event_id.to_string(),
        })
    }

    /// Host confirmed a carried-over event is over.
    pub fn close_stale(&mut self, event_id: &str) -> EngineResult<ResolveOutcome> {
        let event = self
            .ledger
            .get(event_id)
            .ok_or_else(|| EngineError::invalid_input(format!("unknown crisis event '{event_id}'")))?;
        if event.is_resolved() {
            return Ok(ResolveOutcome::AlreadyResolved);
        }
        if self.state.active_event_id.as_deref() == Some(event_id) {
            return Err(EngineError::invalid_input(format!(
                "crisis event '{event_id}' is active; resolve it instead"
            )));
        }
        self.close(event_id, ResolutionKind::ClosedAfterRestart, None);
        Ok(ResolveOutcome::Resolved)
    }

    pub fn history(&self, days: Option<u32>, now: DateTime<Utc>) -> Vec<CrisisEvent> {
        self.ledger.history(days, now)
    }

    /// Every ledger write goes through here so the record carries the
    /// event's post-change digest.
    fn log(&mut self, event_id: &str, action: AuditAction) {
        let digest = self.ledger.get(event_id).map(CrisisEvent::content_digest);
        self.audit.append(event_id, action, digest);
    }

    /// Verify the chain, then check each ledger event against the digest in
    /// its newest audit record.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        self.audit.verify()?;

        for event in self.ledger.events() {
            match self.audit.latest_digest(&event.id) {
                Some(Some(digest)) if digest == event.content_digest() => {}
                Some(_) => {
                    return Err(AuditError::EventMismatch {
                        event_id: event.id.clone(),
                    })
                }
                // Its records may have been rotated out
                None if self.audit.has_rotated() => {}
                None => {
                    return Err(AuditError::Unaudited {
                        event_id: event.id.clone(),
                    })
                }
            }
        }

        // Below capacity nothing has been retired, so every opened event
        // must still be in the ledger.
        if self.ledger.len() < self.ledger.capacity() {
            let missing = self.audit.records().find(|r| {
                matches!(r.action, AuditAction::Opened { .. }) && self.ledger.get(&r.event_id).is_none()
            });
            if let Some(record) = missing {
                return Err(AuditError::MissingEvent {
                    event_id: record.event_id.clone(),
                });
            }
        }
        Ok(())
    }
}
