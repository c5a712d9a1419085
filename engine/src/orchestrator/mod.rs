//! Intervention Orchestrator
//!
//! Selects the immediate action for a classified risk and runs every action
//! through the [`TimedExecutor`]. Follow-up actions are independent calls so
//! a slow contact lookup can never hold up the hotline.
//!
//! ```text
//! run_action(kind)
//!   1. record dispatch on the active event   (dispatch order)
//!   2. resolve resources: cache → offline bundle
//!   3. executor.execute(work)
//!        work path:     dispatcher.dispatch(..) → recorder.complete(Work)
//!        deadline path: Timeout                 → recorder.complete(Deadline)
//!   4. on error: offline message + mark event
//! ```
//!
//! Action errors never propagate to the caller. They are turned into a
//! fallback dispatch and reported as a failed [`ActionReport`].

pub mod dispatch;
pub mod outcome;
pub mod policy;

pub use dispatch::{
    CrisisDataStore, HostRequest, InterventionDispatcher, SharedDataStore, SharedDispatcher,
};
pub use outcome::{ActionKey, OutcomeRecorder, OutcomeRegistry, RecordedOutcome};
pub use policy::{follow_ups, select_primary};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn, Instrument};

use crate::error::{EngineError, EngineResult};
use crate::executor::{ActionStatus, TimedExecutor};
use crate::fallback::{OfflineFallbackManager, MINIMUM_VIABLE_NOTICE};
use crate::resilience::{ResourceTier, Served};
use crate::resources::{CrisisResources, ResourceSource};
use crate::state::{
    lock_machine, CrisisStateMachine, EventId, InterventionKind, OutcomePath, SharedStateMachine,
};
use crate::telemetry;

const CONTACT_MESSAGE: &str = "Someone who listed you as an emergency contact may need support \
                               right now. Please reach out to them. If they are in immediate \
                               danger, call 911.";

/// What happened to one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub kind: InterventionKind,
    /// None when no crisis was active
    pub event_id: Option<EventId>,
    pub attempt: Option<u32>,
    pub status: ActionStatus,
    /// Resource tier the request was built from
    pub served_by: ResourceTier,
    /// Offline resources or the offline message were used
    pub used_offline: bool,
    pub error: Option<EngineError>,
}

impl ActionReport {
    pub fn success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

pub struct InterventionOrchestrator {
    executor: Arc<TimedExecutor>,
    dispatcher: SharedDispatcher,
    data_store: SharedDataStore,
    fallback: Arc<OfflineFallbackManager>,
    machine: SharedStateMachine,
    outcomes: Arc<OutcomeRegistry>,
    resource_cache: RwLock<Option<CrisisResources>>,
}

impl InterventionOrchestrator {
    pub fn new(
        executor: Arc<TimedExecutor>,
        dispatcher: SharedDispatcher,
        data_store: SharedDataStore,
        fallback: Arc<OfflineFallbackManager>,
        machine: SharedStateMachine,
    ) -> Self {
        Self {
            executor,
            dispatcher,
            data_store,
            fallback,
            machine,
            outcomes: Arc::new(OutcomeRegistry::default()),
            resource_cache: RwLock::new(None),
        }
    }

    pub fn outcomes(&self) -> &OutcomeRegistry {
        &self.outcomes
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut CrisisStateMachine) -> R) -> EngineResult<R> {
        Ok(f(&mut lock_machine(&self.machine)))
    }

    // ── Resources ────────────────────────────────────────────────────

    /// Load resources from the host store into the in-memory cache, within
    /// the action deadline. Used at boot and before destructive migrations.
    pub async fn refresh_resources(&self) -> EngineResult<()> {
        let store = self.data_store.clone();
        let mut resources = self
            .executor
            .execute_silent(
                "precache_resources",
                self.executor.default_deadline(),
                async move { store.load_resources().await },
            )
            .await?;
        resources.source = ResourceSource::Primary;
        let mut cache = self
            .resource_cache
            .write()
            .map_err(|_| EngineError::lock_poisoned("resource cache"))?;
        *cache = Some(resources);
        debug!("Crisis resources cached");
        Ok(())
    }

    pub fn cached_resources(&self) -> Option<CrisisResources> {
        self.resource_cache.read().ok().and_then(|c| c.clone())
    }

    /// Resources for the crisis path; never touches the host store.
    pub fn resolve_resources(&self) -> Served<CrisisResources> {
        Served::cache_or_bundle(
            || {
                if self.fallback.is_active() {
                    return Err("offline fallback active".to_string());
                }
                self.cached_resources()
                    .ok_or_else(|| "no cached resources".to_string())
            },
            || self.fallback.get_offline_resources(),
        )
    }


    // ── Actions ──────────────────────────────────────────────────────

    /// Run the immediate action for a freshly opened event. Response time
    /// is measured from `detected_at`.
    pub async fn run_primary(
        &self,
        event_id: &str,
        kind: InterventionKind,
        detected_at: tokio::time::Instant,
    ) -> ActionReport {
        self.run_action(Some(event_id.to_string()), kind, Some(detected_at))
            .await
    }

    /// User-initiated action against the active event (if any).
    pub async fn execute_action(&self, kind: InterventionKind) -> ActionReport {
        let event_id = match self.with_machine(|m| m.active_event_id().map(str::to_string)) {
            Ok(id) => id,
            Err(e) => return self.internal_failure(kind, e),
        };
        self.run_action(event_id, kind, None).await
    }

    async fn run_action(
        &self,
        event_id: Option<EventId>,
        kind: InterventionKind,
        detected_at: Option<tokio::time::Instant>,
    ) -> ActionReport {
        let attempt = match &event_id {
            Some(id) => match self.with_machine(|m| m.record_dispatch(id, kind)) {
                Ok(attempt) => attempt,
                Err(e) => return self.internal_failure(kind, e),
            },
            None => None,
        };
        // Event closed between lookup and dispatch: still act, without a ledger entry.
        let event_id = event_id.filter(|_| attempt.is_some());

        let span = telemetry::action_span(kind.as_str(), event_id.as_deref(), attempt.unwrap_or(0));
        let start = tokio::time::Instant::now();

        let resources = self.resolve_resources();
        let mut used_offline = resources.is_degraded();
        if used_offline {
            if let Some(id) = &event_id {
                let reason = format!("resources served by {}", resources.tier);
                self.mark_offline(id, &reason);
            }
        }

        let recorder = match (&event_id, attempt) {
            (Some(id), Some(attempt)) => {
                let recorder = OutcomeRecorder::new(
                    ActionKey {
                        event_id: id.clone(),
                        kind,
                        attempt,
                    },
                    self.outcomes.clone(),
                    self.machine.clone(),
                );
                Some(match detected_at {
                    Some(at) => recorder.with_response_clock(at),
                    None => recorder,
                })
            }
            _ => None,
        };

        let work = self.action_work(kind, &resources.value);
        let work_recorder = recorder.clone();
        let tracked = async move {
            let result = work.await;
            if let Some(recorder) = &work_recorder {
                let status = if result.is_ok() {
                    ActionStatus::Succeeded
                } else {
                    ActionStatus::Failed
                };
                recorder.complete(status, OutcomePath::Work);
            }
            result
        };

        let result = self
            .executor
            .execute(kind.as_str(), tracked)
            .instrument(span.clone())
            .await;

        let status = match &result {
            Ok(()) => ActionStatus::Succeeded,
            Err(EngineError::Timeout { .. }) => ActionStatus::TimedOut,
            Err(_) => ActionStatus::Failed,
        };
        if let Some(recorder) = &recorder {
            let path = if status == ActionStatus::TimedOut {
                OutcomePath::Deadline
            } else {
                OutcomePath::Work
            };
            recorder.complete(status, path);
        }
        telemetry::record_action_result(&span, result.is_ok(), start.elapsed().as_millis() as u64);

        let error = match result {
            Ok(()) => {
                info!(kind = %kind, event_id = ?event_id, "Intervention dispatched");
                None
            }
            Err(e) => {
                warn!(kind = %kind, event_id = ?event_id, error = %e, "Intervention failed; falling back");
                self.show_offline_message(event_id.as_deref(), &e.to_string())
                    .await;
                used_offline = true;
                Some(e)
            }
        };

        ActionReport {
            kind,
            event_id,
            attempt,
            status,
            served_by: resources.tier,
            used_offline,
            error,
        }
    }

    fn action_work(
        &self,
        kind: InterventionKind,
        resources: &CrisisResources,
    ) -> BoxFuture<'static, EngineResult<()>> {
        let dispatcher = self.dispatcher.clone();
        let request = match kind {
            InterventionKind::Hotline => HostRequest::tel(&resources.hotline.number),
            InterventionKind::EmergencyCall => HostRequest::tel(&resources.emergency_number),
            InterventionKind::TextLine => HostRequest::Sms {
                number: resources.text_line.number.clone(),
                body: resources.text_line.keyword.clone(),
            },
            InterventionKind::SafetyPlan => HostRequest::ShowSafetyPlan,
            InterventionKind::CopingStrategies => HostRequest::ShowCopingStrategies {
                strategies: resources.coping_strategies.clone(),
            },
            InterventionKind::EmergencyContact => {
                let store = self.data_store.clone();
                return notify_contacts(dispatcher, store).boxed();
            }
        };
        async move { dispatcher.dispatch(request).await }.boxed()
    }

    /// Render the offline message for an event, within the action deadline.
    /// The minimum viable notice has already been presented by then.
    pub async fn show_offline_message(&self, event_id: Option<&str>, reason: &str) {
        if let Some(id) = event_id {
            self.mark_offline(id, reason);
        }
        let dispatcher = self.dispatcher.clone();
        let request = HostRequest::ShowOfflineMessage {
            message: self.fallback.get_offline_message(),
        };
        let shown = self
            .executor
            .execute_silent(
                "offline_message",
                self.executor.default_deadline(),
                async move { dispatcher.dispatch(request).await },
            )
            .await;
        if let Err(e) = shown {
            warn!(error = %e, "Offline message could not be shown");
        }
    }

    fn mark_offline(&self, event_id: &str, reason: &str) {
        if let Err(e) = self.with_machine(|m| m.mark_offline(event_id, reason)) {
            warn!(event_id, error = %e, "Could not mark event as offline");
        }
    }

    /// Engine bug before anything was dispatched: still show the notice.
    fn internal_failure(&self, kind: InterventionKind, error: EngineError) -> ActionReport {
        self.dispatcher
            .present_fallback(&MINIMUM_VIABLE_NOTICE, &error.to_string());
        ActionReport {
            kind,
            event_id: None,
            attempt: None,
            status: ActionStatus::Failed,
            served_by: ResourceTier::OfflineBundle,
            used_offline: true,
            error: Some(error),
        }
    }
}

/// Notify every emergency contact concurrently; any delivery counts.
async fn notify_contacts(dispatcher: SharedDispatcher, store: SharedDataStore) -> EngineResult<()> {
    let contacts = store.load_contacts().await?;
    if contacts.is_empty() {
        return Err(EngineError::unavailable(
            "emergency_contacts",
            "no emergency contacts configured",
        ));
    }

    let total = contacts.len();
    let sends = contacts.into_iter().map(|contact| {
        let dispatcher = dispatcher.clone();
        let name = contact.name.clone();
        let request = HostRequest::NotifyContact {
            contact_id: contact.id,
            message: format!("{}, {}", contact.name, CONTACT_MESSAGE),
            name: contact.name,
            phone: contact.phone,
        };
        async move { (name, dispatcher.dispatch(request).await) }
    });

    let results = futures::future::join_all(sends).await;
    let mut delivered = 0;
    for (name, result) in results {
        match result {
            Ok(()) => delivered += 1,
            Err(e) => warn!(contact = %name, error = %e, "Emergency contact notification failed"),
        }
    }

    if delivered == 0 {
        return Err(EngineError::unavailable(
            "emergency_contacts",
            format!("all {total} notifications failed"),
        ));
    }
    debug!(delivered, total, "Emergency contacts notified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::EmergencyContact;
    use crate::scoring::CrisisSeverity;
    use crate::state::CrisisTrigger;
    use crate::testing::{RecordingDispatcher, StaticDataStore};
    use std::time::Duration;

    struct Fixture {
        orchestrator: InterventionOrchestrator,
        dispatcher: Arc<RecordingDispatcher>,
        machine: SharedStateMachine,
        fallback: Arc<OfflineFallbackManager>,
    }

    fn fixture(dispatcher: RecordingDispatcher, store: StaticDataStore) -> Fixture {
        let dispatcher = Arc::new(dispatcher);
        let executor = Arc::new(
            TimedExecutor::new(Duration::from_millis(200), 100)
                .with_fallback_sink(dispatcher.clone()),
        );
        let fallback = Arc::new(OfflineFallbackManager::default());
        let machine = CrisisStateMachine::new(100).shared();
        let orchestrator = InterventionOrchestrator::new(
            executor,
            dispatcher.clone(),
            Arc::new(store),
            fallback.clone(),
            machine.clone(),
        );
        Fixture {
            orchestrator,
            dispatcher,
            machine,
            fallback,
        }
    }

    fn open_event(machine: &SharedStateMachine) -> String {
        machine
            .lock()
            .unwrap()
            .activate(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None)
            .event_id()
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hotline_dials_cached_number() {
        let f = fixture(RecordingDispatcher::new(), StaticDataStore::default());
        f.orchestrator.refresh_resources().await.unwrap();
        let event_id = open_event(&f.machine);

        let report = f
            .orchestrator
            .run_primary(&event_id, InterventionKind::Hotline, tokio::time::Instant::now())
            .await;

        assert!(report.success());
        assert_eq!(report.served_by, ResourceTier::Cache);
        assert!(!report.used_offline);
        assert_eq!(f.dispatcher.requests(), vec![HostRequest::tel("988")]);

        let sm = f.machine.lock().unwrap();
        let event = sm.event(&event_id).unwrap();
        assert_eq!(event.interventions_taken, vec![InterventionKind::Hotline]);
        assert!(event.response_time_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncached_resources_use_offline_bundle() {
        let f = fixture(RecordingDispatcher::new(), StaticDataStore::default());
        let event_id = open_event(&f.machine);

        let report = f.orchestrator.execute_action(InterventionKind::TextLine).await;
        assert!(report.success());
        assert_eq!(report.served_by, ResourceTier::OfflineBundle);
        assert!(report.used_offline);
        assert!(f.machine.lock().unwrap().event(&event_id).unwrap().used_offline_resources);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_active_bypasses_cache() {
        let f = fixture(RecordingDispatcher::new(), StaticDataStore::default());
        f.orchestrator.refresh_resources().await.unwrap();
        f.fallback.activate("storage down");

        let resources = f.orchestrator.resolve_resources();
        assert_eq!(resources.tier, ResourceTier::OfflineBundle);
        assert!(resources.value.is_offline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_records_deadline_and_discards_straggler() {
        let dispatcher = RecordingDispatcher::new().with_delay("tel", Duration::from_secs(2));
        let f = fixture(dispatcher, StaticDataStore::default());
        let event_id = open_event(&f.machine);

        let report = f.orchestrator.execute_action(InterventionKind::Hotline).await;
        assert_eq!(report.status, ActionStatus::TimedOut);
        assert_eq!(f.dispatcher.fallback_count(), 1);
        assert!(f
            .dispatcher
            .requests()
            .iter()
            .any(|r| matches!(r, HostRequest::ShowOfflineMessage { .. })));

        // Let the abandoned dial finish.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let key = ActionKey {
            event_id: event_id.clone(),
            kind: InterventionKind::Hotline,
            attempt: 0,
        };
        let outcome = f.orchestrator.outcomes().get(&key).unwrap();
        assert_eq!(outcome.status, ActionStatus::TimedOut);
        assert_eq!(outcome.path, OutcomePath::Deadline);
        assert!(f.dispatcher.requests().contains(&HostRequest::tel("988")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_without_crisis_has_no_ledger_entry() {
        let f = fixture(RecordingDispatcher::new(), StaticDataStore::default());
        let report = f.orchestrator.execute_action(InterventionKind::SafetyPlan).await;

        assert!(report.success());
        assert!(report.event_id.is_none());
        assert!(f.orchestrator.outcomes().is_empty());
        assert_eq!(f.dispatcher.requests(), vec![HostRequest::ShowSafetyPlan]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contacts_any_success_counts() {
        let store = StaticDataStore::default().with_contacts(vec![
            EmergencyContact::new("Sam", "555-0100"),
            EmergencyContact::new("Alex", "555-0101"),
        ]);
        let dispatcher = RecordingDispatcher::new().fail_phone("555-0100");
        let f = fixture(dispatcher, store);
        open_event(&f.machine);

        let report = f
            .orchestrator
            .execute_action(InterventionKind::EmergencyContact)
            .await;
        assert!(report.success());
        let notified = f
            .dispatcher
            .requests()
            .into_iter()
            .filter(|r| matches!(r, HostRequest::NotifyContact { .. }))
            .count();
        assert_eq!(notified, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_contacts_is_failure_with_fallback() {
        let f = fixture(RecordingDispatcher::new(), StaticDataStore::default());
        let report = f
            .orchestrator
            .execute_action(InterventionKind::EmergencyContact)
            .await;

        assert!(!report.success());
        assert!(matches!(report.error, Some(EngineError::Unavailable { .. })));
        assert_eq!(f.dispatcher.fallback_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_contact_lookup_does_not_block_hotline() {
        let store = StaticDataStore::default()
            .with_contacts(vec![EmergencyContact::new("Sam", "555-0100")])
            .with_contact_delay(Duration::from_secs(5));
        let f = fixture(RecordingDispatcher::new(), store);
        let event_id = open_event(&f.machine);

        let orchestrator = Arc::new(f.orchestrator);
        let contacts = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .execute_action(InterventionKind::EmergencyContact)
                    .await
            })
        };
        let hotline = orchestrator.execute_action(InterventionKind::Hotline).await;
        assert!(hotline.success());

        let contacts = contacts.await.unwrap();
        assert_eq!(contacts.status, ActionStatus::TimedOut);

        let sm = f.machine.lock().unwrap();
        let taken = &sm.event(&event_id).unwrap().interventions_taken;
        assert_eq!(taken.len(), 2);
    }
}
