//! Clinical scoring: questionnaire classification and free-text screening.

pub mod classifier;
pub mod language;

pub use classifier::{
    classify, ideation_severity, score_threshold_severity, AssessmentKind, AssessmentScore,
    Classification, CrisisSeverity, ScoreBand, PHQ9_IDEATION_INDEX,
};
pub use language::{screen_text, LanguageScreen};
