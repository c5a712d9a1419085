//! Host-facing contracts: what the engine asks the host to do, and where it
//! reads resources and contacts from.
//!
//! The engine never dials, texts or renders itself. Every intervention is a
//! [`HostRequest`] handed to the injected [`InterventionDispatcher`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::fallback::FallbackSink;
use crate::resources::{CrisisResources, EmergencyContact};

/// One action for the host to perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    /// Place a phone call: `{"type": "tel", "number": "988"}`
    Tel { number: String },
    /// Open a pre-filled text message
    Sms { number: String, body: String },
    /// Send a crisis notification to one emergency contact
    NotifyContact {
        contact_id: String,
        name: String,
        phone: String,
        message: String,
    },
    ShowSafetyPlan,
    ShowCopingStrategies { strategies: Vec<String> },
    /// Render the bundled offline crisis message
    ShowOfflineMessage { message: String },
}

impl HostRequest {
    pub fn tel(number: &str) -> Self {
        Self::Tel {
            number: number.to_string(),
        }
    }

    pub fn request_type(&self) -> &'static str {
        match self {
            Self::Tel { .. } => "tel",
            Self::Sms { .. } => "sms",
            Self::NotifyContact { .. } => "notify_contact",
            Self::ShowSafetyPlan => "show_safety_plan",
            Self::ShowCopingStrategies { .. } => "show_coping_strategies",
            Self::ShowOfflineMessage { .. } => "show_offline_message",
        }
    }
}

/// Executes host requests.
///
/// Also the sink for the minimum viable notice, which must be presented
/// synchronously without awaiting anything.
#[async_trait]
pub trait InterventionDispatcher: FallbackSink {
    async fn dispatch(&self, request: HostRequest) -> EngineResult<()>;
}

/// Read side of the host's encrypted store
#[async_trait]
pub trait CrisisDataStore: Send + Sync {
    async fn load_resources(&self) -> EngineResult<CrisisResources>;

    async fn load_contacts(&self) -> EngineResult<Vec<EmergencyContact>>;
}

pub type SharedDispatcher = Arc<dyn InterventionDispatcher>;
pub type SharedDataStore = Arc<dyn CrisisDataStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tel_request_wire_shape() {
        let json = serde_json::to_value(HostRequest::tel("988")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "tel", "number": "988"}));
    }

    #[test]
    fn test_request_type_matches_tag() {
        let requests = [
            HostRequest::tel("911"),
            HostRequest::Sms {
                number: "741741".to_string(),
                body: "HOME".to_string(),
            },
            HostRequest::ShowSafetyPlan,
            HostRequest::ShowOfflineMessage {
                message: "call 988".to_string(),
            },
        ];
        for request in requests {
            let json = serde_json::to_value(&request).unwrap();
            assert_eq!(json["type"], request.request_type());
        }
    }
}
