//! Core types for crisis state and the event ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{AssessmentScore, CrisisSeverity};

/// Unique identifier for crisis events
pub type EventId = String;

/// What started a crisis event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisTrigger {
    /// An assessment total crossed a threshold
    ScoreThreshold,
    /// The PHQ-9 self-harm item was answered above zero
    SuicidalIdeation,
    /// The user pressed the crisis button
    UserActivated,
    /// A clinician or caregiver entered an assessment by hand
    ManualAssessment,
    /// Detected by the engine (language screening, monitoring)
    SystemDetection,
}

impl CrisisTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScoreThreshold => "score_threshold",
            Self::SuicidalIdeation => "suicidal_ideation",
            Self::UserActivated => "user_activated",
            Self::ManualAssessment => "manual_assessment",
            Self::SystemDetection => "system_detection",
        }
    }
}

impl std::fmt::Display for CrisisTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete action offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionKind {
    Hotline,
    EmergencyCall,
    TextLine,
    EmergencyContact,
    SafetyPlan,
    CopingStrategies,
}

impl InterventionKind {
    pub fn all() -> &'static [InterventionKind] {
        &[
            Self::Hotline,
            Self::EmergencyCall,
            Self::TextLine,
            Self::EmergencyContact,
            Self::SafetyPlan,
            Self::CopingStrategies,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hotline => "hotline",
            Self::EmergencyCall => "emergency_call",
            Self::TextLine => "text_line",
            Self::EmergencyContact => "emergency_contact",
            Self::SafetyPlan => "safety_plan",
            Self::CopingStrategies => "coping_strategies",
        }
    }
}

impl std::fmt::Display for InterventionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterventionKind {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                crate::error::EngineError::invalid_input(format!("unknown intervention '{s}'"))
            })
    }
}

/// User feedback collected on resolution
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrisisFeedback {
    /// Overall, did the help offered help
    pub helpful: bool,
    /// 1-5, if the user rated it
    #[serde(default)]
    pub rating: Option<u8>,
    /// Which interventions the user found helpful
    #[serde(default)]
    pub helpful_interventions: Vec<InterventionKind>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// How an event left the active state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Explicit resolveCrisis call
    Resolved,
    /// Superseded by a higher-severity event
    Escalated { into: EventId },
    /// Left open by a previous run and confirmed no longer active
    ClosedAfterRestart,
}

/// One detected crisis and everything done about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisEvent {
    pub id: EventId,
    pub triggered_at: DateTime<Utc>,
    pub trigger: CrisisTrigger,
    pub severity: CrisisSeverity,
    #[serde(default)]
    pub source_assessment: Option<AssessmentScore>,
    /// Dispatch order, not completion order
    #[serde(default)]
    pub interventions_taken: Vec<InterventionKind>,
    /// Detection to primary action outcome
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<ResolutionKind>,
    #[serde(default)]
    pub feedback: Option<CrisisFeedback>,
    /// Event this one escalated from
    #[serde(default)]
    pub escalated_from: Option<EventId>,
    /// Offline resources were shown for this event
    #[serde(default)]
    pub used_offline_resources: bool,
}

impl CrisisEvent {
    pub fn new(
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
        source_assessment: Option<AssessmentScore>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            triggered_at: Utc::now(),
            trigger,
            severity,
            source_assessment,
            interventions_taken: Vec::new(),
            response_time_ms: None,
            resolved_at: None,
            resolution: None,
            feedback: None,
            escalated_from: None,
            used_offline_resources: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// blake3 over the serialized event. Audit records carry this so the
    /// trail vouches for ledger content, not only for itself.
    pub fn content_digest(&self) -> String {
        // Plain data with no maps or floats; serialization cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

/// Process-wide crisis status; read-only outside the state machine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrisisState {
    pub is_active: bool,
    pub severity: CrisisSeverity,
    pub active_event_id: Option<EventId>,
    pub started_at: Option<DateTime<Utc>>,
}

impl CrisisState {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Where the floating crisis button sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisSettings {
    pub real_time_monitoring_enabled: bool,
    pub show_crisis_button: bool,
    pub button_position: ButtonPosition,
}

impl Default for CrisisSettings {
    fn default() -> Self {
        Self {
            real_time_monitoring_enabled: true,
            show_crisis_button: true,
            button_position: ButtonPosition::BottomRight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_open() {
        let event = CrisisEvent::new(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None);
        assert!(!event.is_resolved());
        assert!(event.interventions_taken.is_empty());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_settings_serialize_camel_case() {
        let json = serde_json::to_value(CrisisSettings::default()).unwrap();
        assert_eq!(json["realTimeMonitoringEnabled"], true);
        assert_eq!(json["showCrisisButton"], true);
        assert_eq!(json["buttonPosition"], "bottom_right");
    }

    #[test]
    fn test_intervention_parse() {
        assert_eq!(
            "text_line".parse::<InterventionKind>().unwrap(),
            InterventionKind::TextLine
        );
        assert!("carrier_pigeon".parse::<InterventionKind>().is_err());
    }

    #[test]
    fn test_idle_state() {
        let state = CrisisState::idle();
        assert!(!state.is_active);
        assert_eq!(state.severity, CrisisSeverity::None);
        assert!(state.active_event_id.is_none());
    }
}
