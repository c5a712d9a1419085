//! Collaborator hooks
//!
//! ```text
//! migration   start ─ precache resources ──────────────┐
//!             complete ─ re-read within deadline ──────┤ failure → SystemFailure
//!             error ───────────────────────────────────┘
//! calendar    permission / sync ─ availability flag only
//! onboarding  step / complete ─ logged
//! system      failure ─ flags + offline fallback (+ offline message if a crisis is active)
//!             recovery ─ flags, leave fallback once nothing impairs crisis access
//! ```
//!
//! Every invocation is logged as an [`IntegrationEvent`] and published on the
//! bus. Critical events are emitted on the integration target the moment they
//! are recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn, Instrument};

use super::availability::AvailabilityBoard;
use super::bus::SharedIntegrationBus;
use super::log::{IntegrationLog, IntegrationLogReview};
use super::types::{
    CrisisAccessImpact, EventSeverity, FailureSeverity, IntegrationEvent, IntegrationEventKind,
    SystemFailure,
};
use crate::fallback::OfflineFallbackManager;
use crate::orchestrator::InterventionOrchestrator;
use crate::resilience::{DegradationLevel, SystemHealth};
use crate::scoring::CrisisSeverity;
use crate::state::{lock_machine, CrisisTrigger, SharedStateMachine};
use crate::telemetry::{self, INTEGRATION_TARGET};

const MIGRATION: &str = "migration";
const CALENDAR: &str = "calendar";

/// Best-effort calendar status; never consulted on the crisis path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarStatus {
    pub permission_granted: Option<bool>,
    pub syncing: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct IntegrationHooks {
    bus: SharedIntegrationBus,
    log: IntegrationLog,
    availability: AvailabilityBoard,
    calendar: RwLock<CalendarStatus>,
    orchestrator: Arc<InterventionOrchestrator>,
    fallback: Arc<OfflineFallbackManager>,
    machine: SharedStateMachine,
}

impl IntegrationHooks {
    pub fn new(
        bus: SharedIntegrationBus,
        log_capacity: usize,
        orchestrator: Arc<InterventionOrchestrator>,
        fallback: Arc<OfflineFallbackManager>,
        machine: SharedStateMachine,
    ) -> Self {
        Self {
            bus,
            log: IntegrationLog::new(log_capacity),
            availability: AvailabilityBoard::new(),
            calendar: RwLock::new(CalendarStatus::default()),
            orchestrator,
            fallback,
            machine,
        }
    }

    pub fn bus(&self) -> &SharedIntegrationBus {
        &self.bus
    }

    pub fn events(&self) -> Vec<IntegrationEvent> {
        self.log.events()
    }

    pub fn availability(&self) -> Vec<SystemHealth> {
        self.availability.snapshot()
    }

    pub fn is_available(&self, system: &str) -> bool {
        self.availability.is_available(system)
    }

    pub fn crisis_access_impaired(&self) -> bool {
        self.availability.crisis_access_impaired()
    }

    pub fn calendar_status(&self) -> CalendarStatus {
        self.calendar.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn review_integration_log(&self) -> IntegrationLogReview {
        let mut review = self.log.review();
        review.impaired_systems = self.availability.impaired_systems();
        review
    }

    fn record(&self, kind: IntegrationEventKind, severity: EventSeverity) -> IntegrationEvent {
        let event = IntegrationEvent::new(kind, severity);
        if event.is_critical() {
            error!(
                target: INTEGRATION_TARGET,
                event_id = %event.id,
                event_type = event.event_type(),
                system = event.kind.system(),
                "Critical integration event"
            );
        }
        self.log.record(event.clone());
        self.bus.publish(event.clone());
        event
    }

    fn handled(&self, event: &mut IntegrationEvent, started: tokio::time::Instant) {
        let ms = started.elapsed().as_millis() as u64;
        event.response_time_ms = Some(ms);
        self.log.mark_handled(&event.id, ms);
    }

    fn record_handled(
        &self,
        kind: IntegrationEventKind,
        severity: EventSeverity,
        started: tokio::time::Instant,
    ) -> IntegrationEvent {
        let mut event = self.record(kind, severity);
        self.handled(&mut event, started);
        event
    }

    fn active_event_id(&self) -> Option<String> {
        lock_machine(&self.machine)
            .active_event_id()
            .map(str::to_string)
    }

    // ── Migration ────────────────────────────────────────────────────

    /// Cache crisis resources before any destructive migration step.
    pub async fn on_migration_start(&self, migration_id: &str) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let span = telemetry::integration_span("on_migration_start", MIGRATION);

        let precached = match self.orchestrator.refresh_resources().instrument(span.clone()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(migration_id, error = %e, "Could not cache crisis resources before migration");
                false
            }
        };
        let severity = if precached {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };
        let event = self.record_handled(
            IntegrationEventKind::MigrationStarted {
                migration_id: migration_id.to_string(),
                precached,
            },
            severity,
            started,
        );

        if !precached {
            let failure = SystemFailure::new(
                MIGRATION,
                "precache_failed",
                FailureSeverity::High,
                CrisisAccessImpact::Degraded,
            )
            .with_recovery_action("serve bundled offline resources until the migration completes");
            self.handle_failure(failure).instrument(span).await;
        }
        event
    }

    pub async fn on_migration_progress(
        &self,
        migration_id: &str,
        percent: u8,
        step: &str,
    ) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        debug!(migration_id, percent, step, "Migration progress");
        self.record_handled(
            IntegrationEventKind::MigrationProgress {
                migration_id: migration_id.to_string(),
                percent: percent.min(100),
                step: step.to_string(),
            },
            EventSeverity::Info,
            started,
        )
    }

    /// Re-read crisis resources within the deadline; a failed read is
    /// escalated as a system failure.
    pub async fn on_migration_complete(&self, migration_id: &str) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let span = telemetry::integration_span("on_migration_complete", MIGRATION);

        let verified = match self.orchestrator.refresh_resources().instrument(span.clone()).await {
            Ok(()) => self
                .orchestrator
                .cached_resources()
                .is_some_and(|r| !r.hotline.number.is_empty()),
            Err(e) => {
                warn!(migration_id, error = %e, "Crisis resources unreachable after migration");
                false
            }
        };

        let severity = if verified {
            EventSeverity::Info
        } else {
            EventSeverity::Critical
        };
        let event = self.record_handled(
            IntegrationEventKind::MigrationCompleted {
                migration_id: migration_id.to_string(),
                crisis_access_verified: verified,
            },
            severity,
            started,
        );

        if verified {
            info!(migration_id, "Crisis access verified after migration");
            self.recover(MIGRATION).instrument(span).await;
        } else {
            let failure = SystemFailure::new(
                MIGRATION,
                "post_migration_verification",
                FailureSeverity::Critical,
                CrisisAccessImpact::Degraded,
            )
            .with_recovery_action("keep offline resources active and retry verification");
            self.handle_failure(failure).instrument(span).await;
        }
        event
    }

    pub async fn on_migration_error(
        &self,
        migration_id: &str,
        error: &str,
        impact: CrisisAccessImpact,
    ) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let event = self.record_handled(
            IntegrationEventKind::MigrationFailed {
                migration_id: migration_id.to_string(),
                error: error.to_string(),
            },
            EventSeverity::Warning,
            started,
        );
        let failure =
            SystemFailure::new(MIGRATION, "migration_error", FailureSeverity::High, impact);
        self.handle_failure(failure).await;
        event
    }

    // ── Calendar ─────────────────────────────────────────────────────

    fn update_calendar(&self, f: impl FnOnce(&mut CalendarStatus)) {
        if let Ok(mut calendar) = self.calendar.write() {
            f(&mut calendar);
        }
    }

    pub fn on_calendar_permission_change(&self, granted: bool) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.update_calendar(|c| c.permission_granted = Some(granted));
        if granted {
            self.availability.record_recovery(CALENDAR);
        } else {
            self.availability
                .mark_degraded(CALENDAR, "permission denied", DegradationLevel::Partial);
        }
        self.record_handled(
            IntegrationEventKind::CalendarPermissionChanged { granted },
            EventSeverity::Info,
            started,
        )
    }

    pub fn on_calendar_sync_start(&self) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.update_calendar(|c| c.syncing = true);
        self.record_handled(
            IntegrationEventKind::CalendarSyncStarted,
            EventSeverity::Info,
            started,
        )
    }

    pub fn on_calendar_sync_complete(&self, synced_events: u32) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.update_calendar(|c| {
            c.syncing = false;
            c.last_sync = Some(Utc::now());
            c.last_error = None;
        });
        self.availability.record_recovery(CALENDAR);
        self.record_handled(
            IntegrationEventKind::CalendarSyncCompleted { synced_events },
            EventSeverity::Info,
            started,
        )
    }

    pub fn on_calendar_sync_error(&self, error: &str) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.update_calendar(|c| {
            c.syncing = false;
            c.last_error = Some(error.to_string());
        });
        self.availability
            .mark_degraded(CALENDAR, error, DegradationLevel::Partial);
        self.record_handled(
            IntegrationEventKind::CalendarSyncFailed {
                error: error.to_string(),
            },
            EventSeverity::Warning,
            started,
        )
    }

    // ── Onboarding ───────────────────────────────────────────────────

    pub fn on_onboarding_step(&self, step: &str, completed: bool) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.record_handled(
            IntegrationEventKind::OnboardingStep {
                step: step.to_string(),
                completed,
            },
            EventSeverity::Info,
            started,
        )
    }

    pub fn on_onboarding_complete(&self, crisis_resources_reviewed: bool) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        if !crisis_resources_reviewed {
            info!("Onboarding finished without reviewing crisis resources");
        }
        self.record_handled(
            IntegrationEventKind::OnboardingCompleted {
                crisis_resources_reviewed,
            },
            EventSeverity::Info,
            started,
        )
    }

    // ── Generic failure channel ──────────────────────────────────────

    pub async fn on_system_failure(&self, failure: SystemFailure) -> IntegrationEvent {
        self.handle_failure(failure).await
    }

    async fn handle_failure(&self, mut failure: SystemFailure) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let span = telemetry::integration_span("on_system_failure", &failure.system);

        self.availability.record_failure(&failure);
        let reason = format!("{} {}", failure.system, failure.failure_type);
        if failure.affects_crisis_access() {
            self.fallback.activate(&reason);
            failure.mitigation_active = true;
        }

        let severity = EventSeverity::for_failure(&failure);
        let affects = failure.affects_crisis_access();
        let mut event = self.record(IntegrationEventKind::SystemFailure { failure }, severity);

        if affects {
            if let Some(event_id) = self.active_event_id() {
                warn!(event_id = %event_id, reason = %reason, "Active crisis switched to offline resources");
                self.orchestrator
                    .show_offline_message(Some(&event_id), &reason)
                    .instrument(span)
                    .await;
            }
        }
        self.handled(&mut event, started);
        event
    }

    pub async fn on_system_recovery(&self, system: &str) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let span = telemetry::integration_span("on_system_recovery", system);
        self.recover(system).instrument(span).await;
        self.record_handled(
            IntegrationEventKind::SystemRecovered {
                system: system.to_string(),
            },
            EventSeverity::Info,
            started,
        )
    }

    async fn recover(&self, system: &str) {
        let was_impaired = self.availability.record_recovery(system);
        if !was_impaired || self.availability.crisis_access_impaired() {
            return;
        }
        self.fallback.deactivate();
        if let Err(e) = self.orchestrator.refresh_resources().await {
            warn!(system, error = %e, "Resource refresh after recovery failed");
        }
    }

    // ── Engine-originated events ─────────────────────────────────────

    pub fn record_crisis_detected(
        &self,
        event_id: &str,
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
    ) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        let level = if severity == CrisisSeverity::Critical {
            EventSeverity::Critical
        } else {
            EventSeverity::Warning
        };
        self.record_handled(
            IntegrationEventKind::CrisisDetected {
                event_id: event_id.to_string(),
                trigger,
                severity,
            },
            level,
            started,
        )
    }

    pub fn record_crisis_resolved(&self, event_id: &str) -> IntegrationEvent {
        let started = tokio::time::Instant::now();
        self.record_handled(
            IntegrationEventKind::CrisisResolved {
                event_id: event_id.to_string(),
            },
            EventSeverity::Info,
            started,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TimedExecutor;
    use crate::integration::bus::IntegrationBus;
    use crate::state::CrisisStateMachine;
    use crate::testing::{RecordingDispatcher, StaticDataStore};
    use std::time::Duration;

    struct Fixture {
        hooks: IntegrationHooks,
        dispatcher: Arc<RecordingDispatcher>,
        store: Arc<StaticDataStore>,
        fallback: Arc<OfflineFallbackManager>,
        machine: SharedStateMachine,
    }

    fn fixture(store: StaticDataStore) -> Fixture {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let store = Arc::new(store);
        let executor = Arc::new(
            TimedExecutor::new(Duration::from_millis(200), 100)
                .with_fallback_sink(dispatcher.clone()),
        );
        let fallback = Arc::new(OfflineFallbackManager::default());
        let machine = CrisisStateMachine::new(100).shared();
        let orchestrator = Arc::new(InterventionOrchestrator::new(
            executor,
            dispatcher.clone(),
            store.clone(),
            fallback.clone(),
            machine.clone(),
        ));
        let hooks = IntegrationHooks::new(
            IntegrationBus::new().shared(),
            1000,
            orchestrator,
            fallback.clone(),
            machine.clone(),
        );
        Fixture {
            hooks,
            dispatcher,
            store,
            fallback,
            machine,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_migration_happy_path() {
        let f = fixture(StaticDataStore::default());

        let start = f.hooks.on_migration_start("m1").await;
        assert!(matches!(
            start.kind,
            IntegrationEventKind::MigrationStarted { precached: true, .. }
        ));
        f.hooks.on_migration_progress("m1", 50, "reencrypt").await;
        let done = f.hooks.on_migration_complete("m1").await;
        assert!(matches!(
            done.kind,
            IntegrationEventKind::MigrationCompleted {
                crisis_access_verified: true,
                ..
            }
        ));
        assert!(!f.fallback.is_active());
        assert_eq!(f.hooks.events().len(), 3);
        assert!(f.hooks.events().iter().all(|e| e.is_handled()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_verification_escalates() {
        let f = fixture(StaticDataStore::default().with_resource_delay(Duration::from_secs(1)));

        let done = f.hooks.on_migration_complete("m1").await;
        assert!(done.is_critical());
        assert!(f.fallback.is_active());

        let failures: Vec<_> = f
            .hooks
            .events()
            .into_iter()
            .filter(|e| e.event_type() == "system_failure")
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(f.hooks.crisis_access_impaired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_precache_failure_degrades() {
        let f = fixture(StaticDataStore::default());
        f.store.set_failing(true);

        f.hooks.on_migration_start("m1").await;
        assert!(f.fallback.is_active());

        f.store.set_failing(false);
        f.hooks.on_migration_complete("m1").await;
        assert!(!f.fallback.is_active());
        assert!(!f.hooks.crisis_access_impaired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calendar_never_gates_crisis() {
        let f = fixture(StaticDataStore::default());
        f.hooks.on_calendar_permission_change(false);
        f.hooks.on_calendar_sync_start();
        f.hooks.on_calendar_sync_error("token expired");

        assert!(!f.fallback.is_active());
        assert!(!f.hooks.crisis_access_impaired());
        assert_eq!(
            f.hooks.calendar_status().last_error.as_deref(),
            Some("token expired")
        );
        assert!(!f.hooks.calendar_status().syncing);

        f.hooks.on_calendar_permission_change(true);
        f.hooks.on_calendar_sync_complete(12);
        assert!(f.hooks.is_available(CALENDAR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_during_crisis_shows_offline_message() {
        let f = fixture(StaticDataStore::default());
        let event_id = f
            .machine
            .lock()
            .unwrap()
            .activate(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None)
            .event_id()
            .to_string();

        let failure = SystemFailure::new(
            "storage",
            "migration_error",
            FailureSeverity::High,
            CrisisAccessImpact::Degraded,
        );
        let event = f.hooks.on_system_failure(failure).await;

        match &event.kind {
            IntegrationEventKind::SystemFailure { failure } => assert!(failure.mitigation_active),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(f.dispatcher.requests_of("show_offline_message").len(), 1);
        assert!(
            f.machine
                .lock()
                .unwrap()
                .event(&event_id)
                .unwrap()
                .used_offline_resources
        );

        f.hooks.on_system_recovery("storage").await;
        assert!(!f.fallback.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_impacting_failure_keeps_primary_path() {
        let f = fixture(StaticDataStore::default());
        f.machine
            .lock()
            .unwrap()
            .activate(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None);

        f.hooks
            .on_system_failure(SystemFailure::new(
                "analytics",
                "upload_failed",
                FailureSeverity::Low,
                CrisisAccessImpact::None,
            ))
            .await;

        assert!(!f.fallback.is_active());
        assert!(f.dispatcher.requests().is_empty());
        assert!(!f.hooks.crisis_access_impaired());
    }

    #[tokio::test]
    async fn test_critical_events_reach_alert_channel() {
        let f = fixture(StaticDataStore::default());
        let mut alerts = f.hooks.bus().subscribe_critical();

        f.hooks
            .on_system_failure(SystemFailure::new(
                "storage",
                "corrupt",
                FailureSeverity::Critical,
                CrisisAccessImpact::Unavailable,
            ))
            .await;

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.event_type(), "system_failure");
        assert_eq!(f.hooks.review_integration_log().critical, 1);
        assert_eq!(
            f.hooks.review_integration_log().impaired_systems,
            vec!["storage".to_string()]
        );
    }
}
