//! Cross-system integration: typed events, the bus, and collaborator hooks

pub mod availability;
pub mod bus;
pub mod hooks;
pub mod log;
pub mod types;

pub use availability::AvailabilityBoard;
pub use bus::{EventFilter, FilteredReceiver, IntegrationBus, SharedIntegrationBus};
pub use hooks::{CalendarStatus, IntegrationHooks};
pub use log::{IntegrationLog, IntegrationLogReview, DEFAULT_LOG_CAPACITY};
pub use types::{
    CrisisAccessImpact, EventSeverity, FailureSeverity, IntegrationEvent, IntegrationEventKind,
    SystemFailure,
};
