//! Intervention selection
//!
//! First match wins:
//!
//! | condition                                   | primary     |
//! |---------------------------------------------|-------------|
//! | trigger is suicidal_ideation, or critical   | hotline     |
//! | severe                                      | hotline     |
//! | anything else                               | safety_plan |

use crate::scoring::CrisisSeverity;
use crate::state::{CrisisTrigger, InterventionKind};

/// The immediate action for a classified risk
pub fn select_primary(trigger: CrisisTrigger, severity: CrisisSeverity) -> InterventionKind {
    if trigger == CrisisTrigger::SuicidalIdeation || severity == CrisisSeverity::Critical {
        return InterventionKind::Hotline;
    }
    if severity == CrisisSeverity::Severe {
        return InterventionKind::Hotline;
    }
    InterventionKind::SafetyPlan
}

/// User-initiated follow-ups offered after the primary action, most urgent first.
pub fn follow_ups(primary: InterventionKind, severity: CrisisSeverity) -> Vec<InterventionKind> {
    let mut actions = Vec::new();
    if severity == CrisisSeverity::Critical {
        actions.push(InterventionKind::EmergencyCall);
    }
    actions.extend([
        InterventionKind::TextLine,
        InterventionKind::EmergencyContact,
        InterventionKind::SafetyPlan,
        InterventionKind::CopingStrategies,
    ]);
    actions.retain(|k| *k != primary);
    actions
}
