//! Event types for collaborator integration
//!
//! Collaborators (storage migration, calendar sync, onboarding, anything
//! else that can fail) never call into engine internals. They report through
//! the hooks, and every report becomes an [`IntegrationEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::CrisisSeverity;
use crate::state::{CrisisTrigger, EventId};

/// How bad a collaborator failure is for that collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// How a failure affects the user's ability to reach crisis help
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisAccessImpact {
    #[default]
    None,
    Degraded,
    Unavailable,
}

/// A failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFailure {
    pub system: String,
    pub failure_type: String,
    pub severity: FailureSeverity,
    pub impact_on_crisis_access: CrisisAccessImpact,
    #[serde(default)]
    pub recovery_action: Option<String>,
    /// Set by the engine once offline resources are in use
    #[serde(default)]
    pub mitigation_active: bool,
}

impl SystemFailure {
    pub fn new(
        system: &str,
        failure_type: &str,
        severity: FailureSeverity,
        impact: CrisisAccessImpact,
    ) -> Self {
        Self {
            system: system.to_string(),
            failure_type: failure_type.to_string(),
            severity,
            impact_on_crisis_access: impact,
            recovery_action: None,
            mitigation_active: false,
        }
    }

    pub fn with_recovery_action(mut self, action: &str) -> Self {
        self.recovery_action = Some(action.to_string());
        self
    }

    pub fn affects_crisis_access(&self) -> bool {
        self.impact_on_crisis_access != CrisisAccessImpact::None
    }
}

/// Log severity of an integration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

impl EventSeverity {
    pub fn for_failure(failure: &SystemFailure) -> Self {
        if failure.severity == FailureSeverity::Critical
            || failure.impact_on_crisis_access == CrisisAccessImpact::Unavailable
        {
            Self::Critical
        } else {
            Self::Warning
        }
    }
}

/// The fixed set of cross-system occurrences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationEventKind {
    MigrationStarted {
        migration_id: String,
        /// Crisis resources were cached before the migration began
        precached: bool,
    },
    MigrationProgress {
        migration_id: String,
        percent: u8,
        step: String,
    },
    MigrationCompleted {
        migration_id: String,
        /// Resources were re-read within the deadline afterwards
        crisis_access_verified: bool,
    },
    MigrationFailed {
        migration_id: String,
        error: String,
    },
    CalendarPermissionChanged {
        granted: bool,
    },
    CalendarSyncStarted,
    CalendarSyncCompleted {
        synced_events: u32,
    },
    CalendarSyncFailed {
        error: String,
    },
    OnboardingStep {
        step: String,
        completed: bool,
    },
    OnboardingCompleted {
        crisis_resources_reviewed: bool,
    },
    SystemFailure {
        failure: SystemFailure,
    },
    SystemRecovered {
        system: String,
    },
    CrisisDetected {
        event_id: EventId,
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
    },
    CrisisResolved {
        event_id: EventId,
    },
}

impl IntegrationEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MigrationStarted { .. } => "migration_started",
            Self::MigrationProgress { .. } => "migration_progress",
            Self::MigrationCompleted { .. } => "migration_completed",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::CalendarPermissionChanged { .. } => "calendar_permission_changed",
            Self::CalendarSyncStarted => "calendar_sync_started",
            Self::CalendarSyncCompleted { .. } => "calendar_sync_completed",
            Self::CalendarSyncFailed { .. } => "calendar_sync_failed",
            Self::OnboardingStep { .. } => "onboarding_step",
            Self::OnboardingCompleted { .. } => "onboarding_completed",
            Self::SystemFailure { .. } => "system_failure",
            Self::SystemRecovered { .. } => "system_recovered",
            Self::CrisisDetected { .. } => "crisis_detected",
            Self::CrisisResolved { .. } => "crisis_resolved",
        }
    }

    /// Collaborator the event concerns
    pub fn system(&self) -> &str {
        match self {
            Self::MigrationStarted { .. }
            | Self::MigrationProgress { .. }
            | Self::MigrationCompleted { .. }
            | Self::MigrationFailed { .. } => "migration",
            Self::CalendarPermissionChanged { .. }
            | Self::CalendarSyncStarted
            | Self::CalendarSyncCompleted { .. }
            | Self::CalendarSyncFailed { .. } => "calendar",
            Self::OnboardingStep { .. } | Self::OnboardingCompleted { .. } => "onboarding",
            Self::SystemFailure { failure } => &failure.system,
            Self::SystemRecovered { system } => system,
            Self::CrisisDetected { .. } | Self::CrisisResolved { .. } => "crisis_engine",
        }
    }
}

/// One entry in the integration log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub id: String,
    pub at: DateTime<Utc>,
    pub severity: EventSeverity,
    #[serde(flatten)]
    pub kind: IntegrationEventKind,
    /// Hook invocation to handling complete; None until handled
    pub response_time_ms: Option<u64>,
}

impl IntegrationEvent {
    pub fn new(kind: IntegrationEventKind, severity: EventSeverity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            at: Utc::now(),
            severity,
            kind,
            response_time_ms: None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    pub fn is_handled(&self) -> bool {
        self.response_time_ms.is_some()
    }

    pub fn is_critical(&self) -> bool {
        self.severity == EventSeverity::Critical
    }
}
