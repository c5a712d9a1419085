//! Crisis Engine Library
//!
//! Crisis detection and intervention for a mental-health companion app:
//! - Clinical scoring of PHQ-9 / GAD-7 answers with the ideation override
//! - A single-writer crisis state machine with escalation and an
//!   append-only, hash-chained audit trail
//! - Intervention orchestration under a hard 200ms per-action deadline
//! - Offline fallback resources that never depend on network or storage
//! - Integration hooks for migration, calendar, onboarding and failure
//!   reporting, with a bounded integration log
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use crisis_engine::testing::{RecordingDispatcher, StaticDataStore};
//! use crisis_engine::{AssessmentKind, Collaborators, CrisisEngine, EngineConfig, InMemoryRepository};
//!
//! # async fn run() -> crisis_engine::EngineResult<()> {
//! let (engine, boot) = CrisisEngine::boot(
//!     EngineConfig::default(),
//!     Collaborators {
//!         dispatcher: Arc::new(RecordingDispatcher::new()),
//!         data_store: Arc::new(StaticDataStore::default()),
//!         repository: Arc::new(InMemoryRepository::new()),
//!     },
//! )
//! .await?;
//! assert!(boot.stale_events.is_empty());
//!
//! let outcome = engine
//!     .submit_assessment(AssessmentKind::Phq9, &[3, 3, 3, 3, 3, 3, 3, 3, 0])
//!     .await?;
//! if let Some(activation) = outcome.activation {
//!     engine.resolve_crisis(&activation.event_id, None).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod integration;
pub mod orchestrator;
pub mod resilience;
pub mod resources;
pub mod scoring;
pub mod state;
pub mod telemetry;
pub mod testing;

// Re-export the engine surface
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    ActivationReport, AssessmentOutcome, AuditVerification, BootReport, Collaborators,
    CrisisEngine, ScreeningOutcome, SharedCrisisEngine,
};
pub use error::{EngineError, EngineResult, ErrorKind, ErrorReport};

// Re-export scoring types
pub use scoring::{
    classify, screen_text, AssessmentKind, AssessmentScore, Classification, CrisisSeverity,
    LanguageScreen, ScoreBand,
};

// Re-export state types
pub use state::{
    AuditAction, AuditRecord, CrisisEvent, CrisisFeedback, CrisisSettings, CrisisState,
    CrisisStats, CrisisTrigger, EventId, InMemoryRepository, InterventionKind,
    JsonFileRepository, LedgerRepository, PersistedLedger, ResolutionKind, ResolveOutcome,
    Transition,
};

// Re-export orchestration and collaborator seams
pub use executor::{ActionStatus, PerfEntry, SafetyViolation, TimedExecutor};
pub use fallback::{FallbackNotice, FallbackSink, OfflineFallbackManager, MINIMUM_VIABLE_NOTICE};
pub use orchestrator::{ActionReport, CrisisDataStore, HostRequest, InterventionDispatcher};
pub use resources::{CrisisResources, EmergencyContact};

// Re-export integration types
pub use integration::{
    CrisisAccessImpact, FailureSeverity, IntegrationEvent, IntegrationEventKind,
    IntegrationHooks, IntegrationLogReview, SystemFailure,
};
