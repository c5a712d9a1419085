//! The crisis engine service
//!
//! One explicitly constructed instance per process. It owns the state
//! machine and wires the scorer, orchestrator, fallback manager and
//! integration hooks together with the host's collaborators.
//!
//! ```text
//! answers ─▶ classify ─▶ activate ─▶ state machine ─▶ orchestrator ─▶ dispatcher
//!                                         │                │
//!                                   watch snapshot    timed executor ─▶ fallback
//!                                         │
//!                                   checkpoint ─▶ repository
//! ```
//!
//! The engine always boots idle. Events left open by a previous run are
//! reported as stale and stay open until the host confirms them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::executor::{PerfEntry, SafetyViolation, TimedExecutor};
use crate::fallback::{FallbackNotice, FallbackSink, OfflineFallbackManager, MINIMUM_VIABLE_NOTICE};
use crate::integration::{IntegrationBus, IntegrationHooks, IntegrationLogReview};
use crate::orchestrator::{
    follow_ups, select_primary, ActionReport, InterventionOrchestrator, SharedDataStore,
    SharedDispatcher,
};
use crate::resources::CrisisResources;
use crate::scoring::{
    self, AssessmentKind, AssessmentScore, Classification, CrisisSeverity, LanguageScreen,
};
use crate::state::{
    lock_machine, AuditRecord, CrisisEvent, CrisisFeedback, CrisisSettings, CrisisState,
    CrisisStateMachine, CrisisStats, CrisisTrigger, EventId, InterventionKind, PersistedLedger,
    ResolveOutcome, SharedRepository, SharedStateMachine, Transition,
};
use crate::telemetry;

/// Shared reference to the engine
pub type SharedCrisisEngine = Arc<CrisisEngine>;

/// Host-provided collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub dispatcher: SharedDispatcher,
    pub data_store: SharedDataStore,
    pub repository: SharedRepository,
}

/// What boot found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootReport {
    pub restored_events: usize,
    /// Open events from a previous run, newest first; awaiting confirmation
    pub stale_events: Vec<CrisisEvent>,
    pub audit_verified: bool,
    pub resources_cached: bool,
    /// False when the stored ledger could not be read; nothing will be
    /// written over it this session
    pub persistence_enabled: bool,
    pub load_error: Option<String>,
}

impl BootReport {
    /// Most recent carried-over event
    pub fn stale_event(&self) -> Option<&CrisisEvent> {
        self.stale_events.first()
    }
}

/// Result of an activation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationReport {
    pub event_id: EventId,
    pub transition: Transition,
    /// None when the request did not change the active crisis
    pub primary: Option<ActionReport>,
    /// Actions the user can take next
    pub follow_ups: Vec<InterventionKind>,
}

/// Result of [`CrisisEngine::submit_assessment`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    pub classification: Classification,
    pub activation: Option<ActivationReport>,
}

/// Result of [`CrisisEngine::screen_text`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningOutcome {
    /// None when real-time monitoring is disabled
    pub screen: Option<LanguageScreen>,
    pub activation: Option<ActivationReport>,
}

/// Result of [`CrisisEngine::verify_audit_trail`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditVerification {
    pub records: usize,
    pub valid: bool,
    pub error: Option<String>,
}

/// Routes executor fallbacks to the host dispatcher.
struct DispatcherSink(SharedDispatcher);

impl FallbackSink for DispatcherSink {
    fn present_fallback(&self, notice: &FallbackNotice, reason: &str) {
        self.0.present_fallback(notice, reason);
    }
}

pub struct CrisisEngine {
    config: EngineConfig,
    machine: SharedStateMachine,
    state_tx: watch::Sender<CrisisState>,
    settings: RwLock<CrisisSettings>,
    executor: Arc<TimedExecutor>,
    fallback: Arc<OfflineFallbackManager>,
    orchestrator: Arc<InterventionOrchestrator>,
    hooks: Arc<IntegrationHooks>,
    dispatcher: SharedDispatcher,
    repository: SharedRepository,
    persist: AtomicBool,
}

impl CrisisEngine {
    /// Build the engine, restore the ledger and cache resources.
    pub async fn boot(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> EngineResult<(Self, BootReport)> {
        config.validate()?;
        let Collaborators {
            dispatcher,
            data_store,
            repository,
        } = collaborators;

        let (machine, settings, load_error) = match repository.load() {
            Ok(Some(persisted)) => {
                let settings = persisted.settings.clone();
                let machine = CrisisStateMachine::restore(
                    persisted.events,
                    persisted.audit,
                    config.ledger_capacity,
                );
                (machine, settings, None)
            }
            Ok(None) => (
                CrisisStateMachine::new(config.ledger_capacity),
                CrisisSettings::default(),
                None,
            ),
            Err(e) => {
                warn!(error = %e, "Could not load crisis ledger; starting empty without persistence");
                (
                    CrisisStateMachine::new(config.ledger_capacity),
                    CrisisSettings::default(),
                    Some(e.to_string()),
                )
            }
        };

        let audit_verified = match machine.verify_integrity() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Restored ledger failed audit verification");
                false
            }
        };
        let mut stale_events: Vec<CrisisEvent> = machine
            .stale_events()
            .iter()
            .filter_map(|id| machine.event(id).cloned())
            .collect();
        stale_events.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        let restored_events = machine.ledger().len();

        let machine = machine.shared();
        let executor = Arc::new(
            TimedExecutor::new(config.action_deadline(), config.perf_log_capacity)
                .with_fallback_sink(Arc::new(DispatcherSink(dispatcher.clone()))),
        );
        let fallback = Arc::new(OfflineFallbackManager::new(config.fallback_latency_warn()));
        let orchestrator = Arc::new(InterventionOrchestrator::new(
            executor.clone(),
            dispatcher.clone(),
            data_store,
            fallback.clone(),
            machine.clone(),
        ));
        let hooks = Arc::new(IntegrationHooks::new(
            IntegrationBus::new().shared(),
            config.integration_log_capacity,
            orchestrator.clone(),
            fallback.clone(),
            machine.clone(),
        ));

        let resources_cached = match orchestrator.refresh_resources().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Crisis resources not cached at boot; offline bundle will serve");
                false
            }
        };

        let (state_tx, _) = watch::channel(CrisisState::idle());
        let persistence_enabled = load_error.is_none();
        let engine = Self {
            config,
            machine,
            state_tx,
            settings: RwLock::new(settings),
            executor,
            fallback,
            orchestrator,
            hooks,
            dispatcher,
            repository,
            persist: AtomicBool::new(persistence_enabled),
        };

        if !stale_events.is_empty() {
            warn!(
                count = stale_events.len(),
                "Crisis events left open by a previous run need confirmation"
            );
        }
        info!(restored_events, resources_cached, "Crisis engine booted idle");

        let report = BootReport {
            restored_events,
            stale_events,
            audit_verified,
            resources_cached,
            persistence_enabled,
            load_error,
        };
        Ok((engine, report))
    }

    pub fn shared(self) -> SharedCrisisEngine {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut CrisisStateMachine) -> R) -> EngineResult<R> {
        Ok(f(&mut lock_machine(&self.machine)))
    }

    /// Run a transition and publish the resulting state before the lock is
    /// released, so parallel transitions publish in the order they applied.
    fn transition<R>(&self, f: impl FnOnce(&mut CrisisStateMachine) -> R) -> EngineResult<R> {
        self.with_machine(|m| {
            let result = f(m);
            let next = m.snapshot();
            self.state_tx.send_if_modified(|current| {
                if *current == next {
                    return false;
                }
                *current = next;
                true
            });
            result
        })
    }

    /// Internal failures on the crisis path still put the notice in front
    /// of the user.
    fn guard<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e @ EngineError::Internal { .. }) = &result {
            self.dispatcher
                .present_fallback(&MINIMUM_VIABLE_NOTICE, &e.to_string());
        }
        result
    }

    fn checkpoint(&self, reason: &str) {
        if !self.persist.load(Ordering::SeqCst) {
            return;
        }
        let settings = self.settings();
        let ledger = match self.with_machine(|m| {
            PersistedLedger::new(m.ledger().to_vec(), m.audit().snapshot(), settings)
        }) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(reason, error = %e, "Ledger checkpoint skipped");
                return;
            }
        };
        match self.repository.save(&ledger) {
            Ok(()) => debug!(reason, events = ledger.events.len(), "Ledger checkpoint saved"),
            Err(e) => warn!(reason, error = %e, "Ledger checkpoint failed"),
        }
    }

    // ── Scoring ──────────────────────────────────────────────────────

    /// Score and classify; invalid answers are returned as-is to the caller.
    pub fn classify(&self, kind: AssessmentKind, answers: &[u8]) -> EngineResult<Classification> {
        scoring::classify(kind, answers)
    }

    /// Classify, and activate when the result calls for intervention.
    pub async fn submit_assessment(
        &self,
        kind: AssessmentKind,
        answers: &[u8],
    ) -> EngineResult<AssessmentOutcome> {
        let classification = self.classify(kind, answers)?;
        info!(
            assessment = %kind,
            total = classification.score.total,
            severity = %classification.severity,
            ideation = classification.ideation_flagged,
            "Assessment classified"
        );

        let activation = if classification.requires_intervention() {
            let trigger = if classification.ideation_flagged {
                CrisisTrigger::SuicidalIdeation
            } else {
                CrisisTrigger::ScoreThreshold
            };
            Some(
                self.activate_intervention(
                    trigger,
                    classification.severity,
                    Some(classification.score.clone()),
                )
                .await?,
            )
        } else {
            None
        };

        Ok(AssessmentOutcome {
            classification,
            activation,
        })
    }

    /// Screen free text when real-time monitoring is enabled.
    pub async fn screen_text(&self, text: &str) -> EngineResult<ScreeningOutcome> {
        if !self.settings().real_time_monitoring_enabled {
            return Ok(ScreeningOutcome {
                screen: None,
                activation: None,
            });
        }
        let screen = scoring::screen_text(text);
        let activation = if screen.severity.requires_intervention() {
            info!(severity = %screen.severity, matches = screen.matched.len(), "Crisis language detected");
            Some(
                self.activate_intervention(CrisisTrigger::SystemDetection, screen.severity, None)
                    .await?,
            )
        } else {
            None
        };
        Ok(ScreeningOutcome {
            screen: Some(screen),
            activation,
        })
    }

    // ── Crisis lifecycle ─────────────────────────────────────────────

    /// Open or escalate a crisis and run the immediate action.
    pub async fn activate_intervention(
        &self,
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
        assessment: Option<AssessmentScore>,
    ) -> EngineResult<ActivationReport> {
        if severity == CrisisSeverity::None {
            return Err(EngineError::invalid_input(
                "cannot activate an intervention at severity none",
            ));
        }
        let detected_at = tokio::time::Instant::now();
        let span = telemetry::activate_span(trigger.as_str(), severity.as_str());

        let transition = self.guard(self.transition(|m| m.activate(trigger, severity, assessment)))?;
        let event_id = transition.event_id().to_string();
        let primary_kind = select_primary(trigger, severity);

        if !transition.needs_orchestration() {
            return Ok(ActivationReport {
                event_id,
                transition,
                primary: None,
                follow_ups: follow_ups(primary_kind, severity),
            });
        }

        self.hooks.record_crisis_detected(&event_id, trigger, severity);

        let primary = self
            .orchestrator
            .run_primary(&event_id, primary_kind, detected_at)
            .instrument(span.clone())
            .await;
        self.checkpoint("activation");

        telemetry::record_activation_result(
            &span,
            &event_id,
            detected_at.elapsed().as_millis() as u64,
        );
        Ok(ActivationReport {
            event_id,
            transition,
            primary: Some(primary),
            follow_ups: follow_ups(primary_kind, severity),
        })
    }

    /// Run a follow-up action; true if the host reported success in time.
    pub async fn execute_action(&self, kind: InterventionKind) -> bool {
        self.execute_action_detailed(kind).await.success()
    }

    pub async fn execute_action_detailed(&self, kind: InterventionKind) -> ActionReport {
        let report = self.orchestrator.execute_action(kind).await;
        if report.event_id.is_some() {
            self.checkpoint("action");
        }
        report
    }

    /// Close the active crisis. A repeated call for the same event is a no-op.
    pub async fn resolve_crisis(
        &self,
        event_id: &str,
        feedback: Option<CrisisFeedback>,
    ) -> EngineResult<ResolveOutcome> {
        if let Some(rating) = feedback.as_ref().and_then(|f| f.rating) {
            if !(1..=5).contains(&rating) {
                return Err(EngineError::invalid_input(format!(
                    "feedback rating {rating} is outside 1-5"
                )));
            }
        }

        let outcome = self.guard(self.transition(|m| m.resolve(event_id, feedback)).and_then(|r| r))?;
        if outcome == ResolveOutcome::Resolved {
            self.hooks.record_crisis_resolved(event_id);
            self.checkpoint("resolution");
        }
        Ok(outcome)
    }

    /// Host verdict on an event carried over from a previous run.
    pub async fn confirm_stale_crisis(
        &self,
        event_id: &str,
        still_active: bool,
    ) -> EngineResult<Option<ActivationReport>> {
        if !still_active {
            self.guard(self.with_machine(|m| m.close_stale(event_id)).and_then(|r| r))?;
            info!(event_id, "Carried-over crisis closed");
            self.checkpoint("stale_closed");
            return Ok(None);
        }

        let detected_at = tokio::time::Instant::now();
        let (transition, trigger, severity) = self.guard(self.transition(|m| {
            let (trigger, severity) = m
                .event(event_id)
                .map(|e| (e.trigger, e.severity))
                .ok_or_else(|| EngineError::invalid_input(format!("unknown crisis event '{event_id}'")))?;
            m.reactivate(event_id).map(|t| (t, trigger, severity))
        })
        .and_then(|r| r))?;

        let active_id = transition.event_id().to_string();
        let primary_kind = select_primary(trigger, severity);
        let primary = if transition.needs_orchestration() {
            self.hooks.record_crisis_detected(&active_id, trigger, severity);
            Some(
                self.orchestrator
                    .run_primary(&active_id, primary_kind, detected_at)
                    .await,
            )
        } else {
            None
        };
        self.checkpoint("stale_reactivated");

        Ok(Some(ActivationReport {
            event_id: active_id,
            transition,
            primary,
            follow_ups: follow_ups(primary_kind, severity),
        }))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> CrisisState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CrisisState> {
        self.state_tx.subscribe()
    }

    /// Events from the last `days` days (all when None), newest first.
    pub fn get_crisis_history(&self, days: Option<u32>) -> EngineResult<Vec<CrisisEvent>> {
        self.with_machine(|m| m.history(days, chrono::Utc::now()))
    }

    pub fn get_crisis_stats(&self) -> EngineResult<CrisisStats> {
        self.with_machine(|m| m.stats())
    }

    pub fn get_event(&self, event_id: &str) -> EngineResult<Option<CrisisEvent>> {
        self.with_machine(|m| m.event(event_id).cloned())
    }

    pub fn audit_records(&self, event_id: &str) -> EngineResult<Vec<AuditRecord>> {
        self.with_machine(|m| m.audit().records_for(event_id).cloned().collect())
    }

    pub fn verify_audit_trail(&self) -> EngineResult<AuditVerification> {
        self.with_machine(|m| {
            let records = m.audit().len();
            match m.verify_integrity() {
                Ok(()) => AuditVerification {
                    records,
                    valid: true,
                    error: None,
                },
                Err(e) => AuditVerification {
                    records,
                    valid: false,
                    error: Some(e.to_string()),
                },
            }
        })
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn settings(&self) -> CrisisSettings {
        self.settings.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn update_settings(&self, settings: CrisisSettings) -> EngineResult<CrisisSettings> {
        {
            let mut current = self
                .settings
                .write()
                .map_err(|_| EngineError::lock_poisoned("settings"))?;
            *current = settings.clone();
        }
        info!(
            monitoring = settings.real_time_monitoring_enabled,
            button = settings.show_crisis_button,
            "Crisis settings updated"
        );
        self.checkpoint("settings");
        Ok(settings)
    }

    // ── Fallback and collaborators ───────────────────────────────────

    pub fn offline_resources(&self) -> CrisisResources {
        self.fallback.get_offline_resources()
    }

    pub fn offline_message(&self) -> String {
        self.fallback.get_offline_message()
    }

    pub fn fallback(&self) -> &OfflineFallbackManager {
        &self.fallback
    }

    /// Collaborator callback surface
    pub fn hooks(&self) -> &IntegrationHooks {
        &self.hooks
    }

    pub fn review_integration_log(&self) -> IntegrationLogReview {
        self.hooks.review_integration_log()
    }

    pub fn performance_log(&self) -> Vec<PerfEntry> {
        self.executor.performance_log()
    }

    pub fn safety_violations(&self) -> Vec<SafetyViolation> {
        self.executor.safety_violations()
    }

    /// Fallback health checks and integration log reviews on independent
    /// intervals until `token` is cancelled. Neither blocks the crisis path.
    pub fn spawn_monitors(&self, token: CancellationToken) -> JoinHandle<()> {
        let fallback = self.fallback.clone();
        let hooks = self.hooks.clone();
        let health_every = self.config.health_check_interval();
        let review_every = self.config.log_review_interval();

        tokio::spawn(async move {
            let mut health = tokio::time::interval(health_every);
            let mut review = tokio::time::interval(review_every);
            health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            review.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Crisis monitors stopped");
                        break;
                    }
                    _ = health.tick() => {
                        fallback.health_check();
                    }
                    _ = review.tick() => {
                        let summary = hooks.review_integration_log();
                        if summary.critical > 0 || !summary.impaired_systems.is_empty() {
                            warn!(
                                critical = summary.critical,
                                unhandled = summary.unhandled,
                                impaired = ?summary.impaired_systems,
                                "Integration log review found problems"
                            );
                        } else {
                            debug!(retained = summary.retained, "Integration log reviewed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryRepository;
    use crate::testing::{RecordingDispatcher, StaticDataStore};

    async fn engine() -> (CrisisEngine, Arc<RecordingDispatcher>, Arc<InMemoryRepository>) {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let repository = Arc::new(InMemoryRepository::new());
        let (engine, _) = CrisisEngine::boot(
            EngineConfig::default(),
            Collaborators {
                dispatcher: dispatcher.clone(),
                data_store: Arc::new(StaticDataStore::default()),
                repository: repository.clone(),
            },
        )
        .await
        .unwrap();
        (engine, dispatcher, repository)
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_is_idle() {
        let (engine, _, _) = engine().await;
        assert_eq!(engine.snapshot(), CrisisState::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected() {
        let config = EngineConfig {
            action_deadline_ms: 0,
            ..Default::default()
        };
        let result = CrisisEngine::boot(
            config,
            Collaborators {
                dispatcher: Arc::new(RecordingDispatcher::new()),
                data_store: Arc::new(StaticDataStore::default()),
                repository: Arc::new(InMemoryRepository::new()),
            },
        )
        .await;
        assert!(matches!(result, Err(EngineError::InvalidInput { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_publishes_and_checkpoints() {
        let (engine, _, repository) = engine().await;
        let mut rx = engine.subscribe_state();

        let report = engine
            .activate_intervention(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None)
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().active_event_id.as_deref(),
            Some(report.event_id.as_str())
        );
        assert_eq!(repository.save_count(), 1);
        assert_eq!(repository.stored().unwrap().events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_severity_none_rejected() {
        let (engine, dispatcher, _) = engine().await;
        let err = engine
            .activate_intervention(CrisisTrigger::UserActivated, CrisisSeverity::None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
        assert!(dispatcher.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_rating_rejected() {
        let (engine, _, _) = engine().await;
        let report = engine
            .activate_intervention(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None)
            .await
            .unwrap();
        let feedback = CrisisFeedback {
            helpful: true,
            rating: Some(9),
            ..Default::default()
        };
        assert!(engine
            .resolve_crisis(&report.event_id, Some(feedback))
            .await
            .is_err());
        assert!(engine.snapshot().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_disabled_skips_screen() {
        let (engine, dispatcher, _) = engine().await;
        engine
            .update_settings(CrisisSettings {
                real_time_monitoring_enabled: false,
                ..Default::default()
            })
            .unwrap();

        let outcome = engine.screen_text("I want to die").await.unwrap();
        assert!(outcome.screen.is_none());
        assert!(dispatcher.attempts().is_empty());
        assert!(!engine.snapshot().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_text_activates_system_detection() {
        let (engine, dispatcher, _) = engine().await;
        let outcome = engine.screen_text("some days I want to die").await.unwrap();

        let activation = outcome.activation.unwrap();
        let event = engine.get_event(&activation.event_id).unwrap().unwrap();
        assert_eq!(event.trigger, CrisisTrigger::SystemDetection);
        assert_eq!(event.severity, CrisisSeverity::Critical);
        assert_eq!(dispatcher.requests_of("tel").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_published_state_tracks_parallel_transitions() {
        let (engine, _, _) = engine().await;
        let engine = engine.shared();

        for _ in 0..50 {
            let first = engine
                .activate_intervention(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None)
                .await
                .unwrap();

            let resolver = engine.clone();
            let escalator = engine.clone();
            let resolve = tokio::spawn(async move {
                resolver.resolve_crisis(&first.event_id, None).await
            });
            let escalate = tokio::spawn(async move {
                escalator
                    .activate_intervention(CrisisTrigger::SystemDetection, CrisisSeverity::Critical, None)
                    .await
            });
            resolve.await.unwrap().unwrap();
            escalate.await.unwrap().unwrap();

            let machine_state = engine.with_machine(|m| m.snapshot()).unwrap();
            assert_eq!(engine.snapshot(), machine_state);

            if let Some(active) = machine_state.active_event_id {
                engine.resolve_crisis(&active, None).await.unwrap();
            }
            assert_eq!(engine.snapshot(), CrisisState::idle());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_stop_on_cancel() {
        let (engine, _, _) = engine().await;
        let token = CancellationToken::new();
        let handle = engine.spawn_monitors(token.clone());

        tokio::time::sleep(std::time::Duration::from_secs(120)).await;
        assert!(engine.fallback().last_health().is_some());

        token.cancel();
        handle.await.unwrap();
    }
}
