//! Crisis language screening for free text (journal entries, chat input).
//!
//! Phrase matching only. Used when real-time monitoring is enabled; matches
//! at severe or above start a `system_detection` intervention.

use serde::{Deserialize, Serialize};

use super::classifier::CrisisSeverity;

const CRITICAL_PHRASES: &[&str] = &[
    "kill myself",
    "end my life",
    "suicide",
    "suicidal",
    "want to die",
    "better off dead",
    "take my own life",
];

const SEVERE_PHRASES: &[&str] = &[
    "hurt myself",
    "self harm",
    "self-harm",
    "cut myself",
    "no reason to live",
    "can't go on",
    "cannot go on",
];

const MODERATE_PHRASES: &[&str] = &[
    "hopeless",
    "worthless",
    "can't cope",
    "cannot cope",
    "give up",
    "trapped",
];

/// Result of screening one piece of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageScreen {
    pub severity: CrisisSeverity,
    pub matched: Vec<String>,
}

impl LanguageScreen {
    pub fn is_clear(&self) -> bool {
        self.matched.is_empty()
    }
}

/// Screen text for crisis language; the most severe match wins.
pub fn screen_text(text: &str) -> LanguageScreen {
    let normalized = normalize(text);
    let mut severity = CrisisSeverity::None;
    let mut matched = Vec::new();

    for (phrases, level) in [
        (CRITICAL_PHRASES, CrisisSeverity::Critical),
        (SEVERE_PHRASES, CrisisSeverity::Severe),
        (MODERATE_PHRASES, CrisisSeverity::Moderate),
    ] {
        for phrase in phrases {
            if normalized.contains(phrase) {
                matched.push((*phrase).to_string());
                severity = severity.max(level);
            }
        }
    }

    LanguageScreen { severity, matched }
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
