//! Crisis resource types and the statically bundled copy.

use serde::{Deserialize, Serialize};

/// US emergency services
pub const EMERGENCY_NUMBER: &str = "911";
/// 988 Suicide & Crisis Lifeline
pub const PRIMARY_HOTLINE_NUMBER: &str = "988";
/// Crisis Text Line short code
pub const TEXT_LINE_NUMBER: &str = "741741";
pub const TEXT_LINE_KEYWORD: &str = "HOME";

/// Where a resource set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSource {
    /// Loaded from the host's resource store
    Primary,
    /// Statically bundled, no I/O
    #[default]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotline {
    pub name: String,
    pub number: String,
    pub availability: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLine {
    pub name: String,
    pub number: String,
    pub keyword: String,
    pub instructions: String,
}

/// Everything needed to offer help during a crisis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisResources {
    pub hotline: Hotline,
    pub emergency_number: String,
    pub text_line: TextLine,
    #[serde(default)]
    pub additional_hotlines: Vec<Hotline>,
    pub safety_message: String,
    #[serde(default)]
    pub coping_strategies: Vec<String>,
    #[serde(default)]
    pub source: ResourceSource,
}

impl CrisisResources {
    /// The bundled copy; built from constants only.
    pub fn bundled() -> Self {
        Self {
            hotline: Hotline {
                name: "988 Suicide & Crisis Lifeline".to_string(),
                number: PRIMARY_HOTLINE_NUMBER.to_string(),
                availability: "24/7".to_string(),
            },
            emergency_number: EMERGENCY_NUMBER.to_string(),
            text_line: TextLine {
                name: "Crisis Text Line".to_string(),
                number: TEXT_LINE_NUMBER.to_string(),
                keyword: TEXT_LINE_KEYWORD.to_string(),
                instructions: format!(
                    "Text {TEXT_LINE_KEYWORD} to {TEXT_LINE_NUMBER} to reach a trained crisis counselor."
                ),
            },
            additional_hotlines: vec![
                Hotline {
                    name: "Veterans Crisis Line".to_string(),
                    number: "988".to_string(),
                    availability: "24/7, press 1".to_string(),
                },
                Hotline {
                    name: "SAMHSA National Helpline".to_string(),
                    number: "1-800-662-4357".to_string(),
                    availability: "24/7".to_string(),
                },
            ],
            safety_message: "You are not alone. If you are in immediate danger, call 911. \
                             You can call or text 988 any time to talk with someone who can help."
                .to_string(),
            coping_strategies: vec![
                "Breathe in for 4 seconds, hold for 4, out for 6. Repeat five times.".to_string(),
                "Name 5 things you can see, 4 you can hear, 3 you can touch.".to_string(),
                "Move somewhere safe and away from anything you could use to hurt yourself."
                    .to_string(),
                "Reach out to someone you trust and tell them how you feel.".to_string(),
            ],
            source: ResourceSource::Offline,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.source == ResourceSource::Offline
    }
}

/// A person to notify during a crisis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl EmergencyContact {
    pub fn new(name: &str, phone: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            relationship: None,
            is_primary: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_relationship(mut self, relationship: &str) -> Self {
        self.relationship = Some(relationship.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_has_hotline_and_emergency() {
        let res = CrisisResources::bundled();
        assert_eq!(res.hotline.number, "988");
        assert_eq!(res.emergency_number, "911");
        assert!(res.text_line.instructions.contains("741741"));
        assert!(res.is_offline());
        assert!(!res.coping_strategies.is_empty());
    }

    #[test]
    fn test_resources_deserialize_with_defaults() {
        let json = serde_json::json!({
            "hotline": {"name": "Local", "number": "555", "availability": "24/7"},
            "emergency_number": "112",
            "text_line": {"name": "T", "number": "1", "keyword": "HI", "instructions": "text"},
            "safety_message": "stay safe"
        });
        let res: CrisisResources = serde_json::from_value(json).unwrap();
        assert_eq!(res.emergency_number, "112");
        assert!(res.additional_hotlines.is_empty());
        assert_eq!(res.source, ResourceSource::Offline);
    }
}
