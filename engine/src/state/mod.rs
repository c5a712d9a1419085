//! Crisis state machine, event ledger and persistence

pub mod audit;
pub mod ledger;
pub mod machine;
pub mod store;
pub mod types;

pub use audit::{AuditAction, AuditError, AuditRecord, AuditSnapshot, AuditTrail, OutcomePath};
pub use ledger::{CrisisStats, InterventionEffectiveness, Ledger};
pub use machine::{
    lock_machine, CrisisStateMachine, ResolveOutcome, SharedStateMachine, Transition,
};
pub use store::{
    InMemoryRepository, JsonFileRepository, LedgerRepository, PersistedLedger, SharedRepository,
    StoreError, StoreResult,
};
pub use types::{
    ButtonPosition, CrisisEvent, CrisisFeedback, CrisisSettings, CrisisState, CrisisTrigger,
    EventId, InterventionKind, ResolutionKind,
};
