//! Ledger persistence
//!
//! The engine saves deliberately at checkpoints through [`LedgerRepository`].
//! Only the event history, the audit trail and settings are persisted;
//! `CrisisState` never is, so every boot starts idle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::audit::AuditSnapshot;
use super::types::{CrisisEvent, CrisisSettings};
use crate::error::EngineError;

/// Error type for ledger store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unsupported ledger version {found} (newest known is {supported})")]
    VersionMismatch { supported: u32, found: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockPoisoned => EngineError::lock_poisoned("ledger store"),
            StoreError::Deserialization(_) | StoreError::VersionMismatch { .. } => {
                EngineError::internal(err.to_string())
            }
            other => EngineError::unavailable("ledger_store", other.to_string()),
        }
    }
}

/// Everything written at a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedLedger {
    /// Schema version for forward compatibility
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Oldest first
    pub events: Vec<CrisisEvent>,
    #[serde(default)]
    pub audit: AuditSnapshot,
    #[serde(default)]
    pub settings: CrisisSettings,
}

impl PersistedLedger {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(events: Vec<CrisisEvent>, audit: AuditSnapshot, settings: CrisisSettings) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at: Utc::now(),
            events,
            audit,
            settings,
        }
    }

    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        let ledger: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Deserialization(e.to_string()))?;
        if ledger.version > Self::CURRENT_VERSION {
            return Err(StoreError::VersionMismatch {
                supported: Self::CURRENT_VERSION,
                found: ledger.version,
            });
        }
        Ok(ledger)
    }
}

/// Load/save contract for the ledger
pub trait LedgerRepository: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> StoreResult<Option<PersistedLedger>>;

    fn save(&self, ledger: &PersistedLedger) -> StoreResult<()>;
}

/// Shared reference to a repository
pub type SharedRepository = Arc<dyn LedgerRepository>;

/// Pretty JSON on disk. Writes go to a sibling temp file that is then renamed
/// over the target, so a crash mid-write leaves the previous ledger intact.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerRepository for JsonFileRepository {
    fn load(&self) -> StoreResult<Option<PersistedLedger>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        PersistedLedger::from_json(&json).map(Some)
    }

    fn save(&self, ledger: &PersistedLedger) -> StoreResult<()> {
        let json = ledger.to_json()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.temp_path();
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Repository held in memory; can be told to fail for degradation tests.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    stored: Mutex<Option<PersistedLedger>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: PersistedLedger) -> Self {
        Self {
            stored: Mutex::new(Some(ledger)),
            ..Self::default()
        }
    }

    /// Make every subsequent load/save fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<PersistedLedger> {
        self.stored.lock().ok().and_then(|s| s.clone())
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store set to fail".to_string()));
        }
        Ok(())
    }
}

impl LedgerRepository for InMemoryRepository {
    fn load(&self) -> StoreResult<Option<PersistedLedger>> {
        self.check()?;
        let stored = self.stored.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(stored.clone())
    }

    fn save(&self, ledger: &PersistedLedger) -> StoreResult<()> {
        self.check()?;
        let mut stored = self.stored.lock().map_err(|_| StoreError::LockPoisoned)?;
        *stored = Some(ledger.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::CrisisSeverity;
    use crate::state::types::{ButtonPosition, CrisisTrigger};
    use tempfile::TempDir;

    fn sample() -> PersistedLedger {
        let event = CrisisEvent::new(CrisisTrigger::UserActivated, CrisisSeverity::Severe, None);
        let settings = CrisisSettings {
            button_position: ButtonPosition::TopLeft,
            ..Default::default()
        };
        PersistedLedger::new(vec![event], AuditSnapshot::default(), settings)
    }

    #[test]
    fn test_json_repository_roundtrip() {
        let dir = TempDir::new().unwrap();
        let repo = JsonFileRepository::new(dir.path().join("nested").join("ledger.json"));

        assert!(repo.load().unwrap().is_none());

        let ledger = sample();
        repo.save(&ledger).unwrap();
        assert!(!repo.temp_path().exists());

        let loaded = repo.load().unwrap().unwrap();
        assert_eq!(loaded, ledger);
    }

    #[test]
    fn test_json_repository_rejects_newer_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = sample();
        ledger.version = PersistedLedger::CURRENT_VERSION + 1;
        std::fs::write(&path, serde_json::to_string(&ledger).unwrap()).unwrap();

        let err = JsonFileRepository::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { .. }));
    }

    #[test]
    fn test_json_repository_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileRepository::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Deserialization(_)));
        assert!(matches!(EngineError::from(err), EngineError::Internal { .. }));
    }

    #[test]
    fn test_settings_default_when_missing() {
        let json = r#"{"version":1,"saved_at":"2026-01-01T00:00:00Z","events":[]}"#;
        let ledger = PersistedLedger::from_json(json).unwrap();
        assert_eq!(ledger.settings, CrisisSettings::default());
        assert!(ledger.audit.records.is_empty());
    }

    #[test]
    fn test_in_memory_failing_toggle() {
        let repo = InMemoryRepository::new();
        repo.save(&sample()).unwrap();
        assert_eq!(repo.save_count(), 1);

        repo.set_failing(true);
        let err = repo.save(&sample()).unwrap_err();
        assert!(matches!(
            EngineError::from(err),
            EngineError::Unavailable { .. }
        ));
        assert!(repo.load().is_err());

        repo.set_failing(false);
        assert!(repo.load().unwrap().is_some());
        assert_eq!(repo.save_count(), 1);
    }
}
