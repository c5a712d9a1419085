//! Test doubles for hosts and tests
//!
//! `RecordingDispatcher` stands in for the host's dial/SMS/render layer and
//! `StaticDataStore` for its encrypted store. Both are deterministic and
//! work with paused tokio time.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::fallback::{FallbackNotice, FallbackSink};
use crate::orchestrator::{CrisisDataStore, HostRequest, InterventionDispatcher};
use crate::resources::{CrisisResources, EmergencyContact};

/// Records every request and fallback notice it receives.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    attempted: Mutex<Vec<HostRequest>>,
    delivered: Mutex<Vec<HostRequest>>,
    fallbacks: Mutex<Vec<String>>,
    delays: HashMap<String, Duration>,
    failing_types: HashSet<String>,
    failing_numbers: HashSet<String>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay requests of this type (`"tel"`, `"sms"`, ...).
    pub fn with_delay(mut self, request_type: &str, delay: Duration) -> Self {
        self.delays.insert(request_type.to_string(), delay);
        self
    }

    /// Fail every request of this type.
    pub fn fail_type(mut self, request_type: &str) -> Self {
        self.failing_types.insert(request_type.to_string());
        self
    }

    /// Fail calls, texts and notifications addressed to this number.
    pub fn fail_phone(mut self, number: &str) -> Self {
        self.failing_numbers.insert(number.to_string());
        self
    }

    /// Requests that completed successfully, in completion order
    pub fn requests(&self) -> Vec<HostRequest> {
        self.delivered.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Every request received, in arrival order
    pub fn attempts(&self) -> Vec<HostRequest> {
        self.attempted.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_of(&self, request_type: &str) -> Vec<HostRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.request_type() == request_type)
            .collect()
    }

    /// Reasons passed with each minimum viable notice
    pub fn fallbacks(&self) -> Vec<String> {
        self.fallbacks.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn should_fail(&self, request: &HostRequest) -> bool {
        if self.failing_types.contains(request.request_type()) {
            return true;
        }
        let number = match request {
            HostRequest::Tel { number } | HostRequest::Sms { number, .. } => Some(number),
            HostRequest::NotifyContact { phone, .. } => Some(phone),
            _ => None,
        };
        number.is_some_and(|n| self.failing_numbers.contains(n))
    }
}

impl FallbackSink for RecordingDispatcher {
    fn present_fallback(&self, _notice: &FallbackNotice, reason: &str) {
        if let Ok(mut fallbacks) = self.fallbacks.lock() {
            fallbacks.push(reason.to_string());
        }
    }
}

#[async_trait]
impl InterventionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: HostRequest) -> EngineResult<()> {
        if let Ok(mut attempted) = self.attempted.lock() {
            attempted.push(request.clone());
        }
        if let Some(delay) = self.delays.get(request.request_type()) {
            tokio::time::sleep(*delay).await;
        }
        if self.should_fail(&request) {
            return Err(EngineError::unavailable(
                "host",
                format!("{} request rejected", request.request_type()),
            ));
        }
        self.delivered
            .lock()
            .map_err(|_| EngineError::lock_poisoned("recording dispatcher"))?
            .push(request);
        Ok(())
    }
}

/// Fixed resources and contacts, with optional latency and failure.
#[derive(Debug)]
pub struct StaticDataStore {
    resources: CrisisResources,
    contacts: Vec<EmergencyContact>,
    resource_delay: Option<Duration>,
    contact_delay: Option<Duration>,
    failing: AtomicBool,
}

impl Default for StaticDataStore {
    fn default() -> Self {
        Self {
            resources: CrisisResources::bundled(),
            contacts: Vec::new(),
            resource_delay: None,
            contact_delay: None,
            failing: AtomicBool::new(false),
        }
    }
}

impl StaticDataStore {
    pub fn with_resources(mut self, resources: CrisisResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_contacts(mut self, contacts: Vec<EmergencyContact>) -> Self {
        self.contacts = contacts;
        self
    }

    pub fn with_resource_delay(mut self, delay: Duration) -> Self {
        self.resource_delay = Some(delay);
        self
    }

    pub fn with_contact_delay(mut self, delay: Duration) -> Self {
        self.contact_delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> EngineResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::unavailable("data_store", "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl CrisisDataStore for StaticDataStore {
    async fn load_resources(&self) -> EngineResult<CrisisResources> {
        if let Some(delay) = self.resource_delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.resources.clone())
    }

    async fn load_contacts(&self) -> EngineResult<Vec<EmergencyContact>> {
        if let Some(delay) = self.contact_delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.contacts.clone())
    }
}
