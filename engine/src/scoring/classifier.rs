//! Clinical scoring and severity classification; deterministic, no I/O
//!
//! Two independent rules produce a severity and the most severe one wins:
//!
//! ```text
//! answers ──┬─ sum ──▶ score-threshold rule ──┐
//!           │                                  ├─ max ──▶ CrisisSeverity
//!           └─ item 9 ─▶ ideation rule ────────┘
//! ```
//!
//! A low aggregate score never suppresses a positive ideation answer.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Highest value any single item may take
pub const MAX_ITEM_VALUE: u8 = 3;

/// 0-based index of the PHQ-9 self-harm item
pub const PHQ9_IDEATION_INDEX: usize = 8;

/// Screening questionnaire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    /// 9-item depression screen
    Phq9,
    /// 7-item anxiety screen
    Gad7,
}

impl AssessmentKind {
    /// Required number of answers
    pub fn item_count(&self) -> usize {
        match self {
            Self::Phq9 => 9,
            Self::Gad7 => 7,
        }
    }

    /// Highest attainable total
    pub fn max_score(&self) -> u32 {
        self.item_count() as u32 * MAX_ITEM_VALUE as u32
    }
}

impl std::fmt::Display for AssessmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phq9 => write!(f, "PHQ-9"),
            Self::Gad7 => write!(f, "GAD-7"),
        }
    }
}

impl std::str::FromStr for AssessmentKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "phq9" => Ok(Self::Phq9),
            "gad7" => Ok(Self::Gad7),
            other => Err(EngineError::invalid_input(format!(
                "unknown assessment kind '{other}'"
            ))),
        }
    }
}

/// Ordered crisis risk tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CrisisSeverity {
    #[default]
    None,
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl CrisisSeverity {
    /// Severity at which an intervention is started automatically
    pub fn requires_intervention(&self) -> bool {
        *self >= Self::Severe
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for CrisisSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard interpretation band for a total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Minimal,
    Mild,
    Moderate,
    ModeratelySevere,
    Severe,
}

impl ScoreBand {
    pub fn for_score(kind: AssessmentKind, total: u32) -> Self {
        match kind {
            AssessmentKind::Phq9 => match total {
                0..=4 => Self::Minimal,
                5..=9 => Self::Mild,
                10..=14 => Self::Moderate,
                15..=19 => Self::ModeratelySevere,
                _ => Self::Severe,
            },
            AssessmentKind::Gad7 => match total {
                0..=4 => Self::Minimal,
                5..=9 => Self::Mild,
                10..=14 => Self::Moderate,
                _ => Self::Severe,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::ModeratelySevere => "moderately severe",
            Self::Severe => "severe",
        }
    }
}

/// A validated questionnaire result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentScore {
    pub kind: AssessmentKind,
    pub answers: Vec<u8>,
    pub total: u32,
}

impl AssessmentScore {
    /// Validate answers and compute the total.
    ///
    /// Out-of-range items and wrong lengths are rejected, never clamped.
    pub fn new(kind: AssessmentKind, answers: &[u8]) -> EngineResult<Self> {
        if answers.len() != kind.item_count() {
            return Err(EngineError::invalid_input(format!(
                "{kind} requires {} answers, got {}",
                kind.item_count(),
                answers.len()
            )));
        }
        if let Some((idx, value)) = answers
            .iter()
            .enumerate()
            .find(|(_, v)| **v > MAX_ITEM_VALUE)
        {
            return Err(EngineError::invalid_input(format!(
                "{kind} item {} is {value}, expected 0-{MAX_ITEM_VALUE}",
                idx + 1
            )));
        }

        Ok(Self {
            kind,
            answers: answers.to_vec(),
            total: answers.iter().map(|v| *v as u32).sum(),
        })
    }

    /// Value of the PHQ-9 ideation item, if this is a PHQ-9
    pub fn ideation_answer(&self) -> Option<u8> {
        match self.kind {
            AssessmentKind::Phq9 => self.answers.get(PHQ9_IDEATION_INDEX).copied(),
            AssessmentKind::Gad7 => None,
        }
    }
}

/// Output of [`classify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub score: AssessmentScore,
    pub severity: CrisisSeverity,
    pub band: ScoreBand,
    /// Severity from the total alone
    pub score_severity: CrisisSeverity,
    /// The ideation item was answered above zero
    pub ideation_flagged: bool,
}

impl Classification {
    /// The ideation rule raised severity above the score rule
    pub fn ideation_override(&self) -> bool {
        self.severity > self.score_severity
    }

    pub fn requires_intervention(&self) -> bool {
        self.severity.requires_intervention()
    }
}

/// Severity from the total score alone
pub fn score_threshold_severity(kind: AssessmentKind, total: u32) -> CrisisSeverity {
    match kind {
        AssessmentKind::Phq9 => match total {
            25.. => CrisisSeverity::Critical,
            20..=24 => CrisisSeverity::Severe,
            10..=19 => CrisisSeverity::Moderate,
            5..=9 => CrisisSeverity::Mild,
            _ => CrisisSeverity::None,
        },
        AssessmentKind::Gad7 => match total {
            19.. => CrisisSeverity::Severe,
            15..=18 => CrisisSeverity::Moderate,
            5..=14 => CrisisSeverity::Mild,
            _ => CrisisSeverity::None,
        },
    }
}

/// Floor imposed by the ideation item
pub fn ideation_severity(ideation_answer: Option<u8>) -> CrisisSeverity {
    match ideation_answer {
        Some(v) if v >= 2 => CrisisSeverity::Critical,
        Some(1) => CrisisSeverity::Severe,
        _ => CrisisSeverity::None,
    }
}

/// Map assessment answers to a score and a crisis severity.
pub fn classify(kind: AssessmentKind, answers: &[u8]) -> EngineResult<Classification> {
    let score = AssessmentScore::new(kind, answers)?;
    let score_severity = score_threshold_severity(kind, score.total);
    let ideation = score.ideation_answer();
    let severity = score_severity.max(ideation_severity(ideation));

    Ok(Classification {
        band: ScoreBand::for_score(kind, score.total),
        severity,
        score_severity,
        ideation_flagged: ideation.is_some_and(|v| v >= 1),
        score,
    })
}
