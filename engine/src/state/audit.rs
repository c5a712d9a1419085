//! Hash-chained audit trail
//!
//! Every state change is appended as a record whose hash covers the previous
//! record's hash and a digest of the event as it stood after the change.
//! Editing, reordering or dropping a retained record breaks the chain, and
//! editing a ledger event no longer matches its latest record's digest.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::types::{CrisisTrigger, EventId, InterventionKind, ResolutionKind};
use crate::executor::ActionStatus;
use crate::scoring::CrisisSeverity;

/// Hash preceding the very first record
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub const DEFAULT_AUDIT_CAPACITY: usize = 4096;

/// Which completion wrote an action outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomePath {
    /// The work itself finished
    Work,
    /// The deadline fired first
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditAction {
    Opened {
        trigger: CrisisTrigger,
        severity: CrisisSeverity,
    },
    Escalated {
        from_event: EventId,
        from_severity: CrisisSeverity,
        to_severity: CrisisSeverity,
    },
    InterventionDispatched {
        kind: InterventionKind,
        attempt: u32,
    },
    OutcomeRecorded {
        kind: InterventionKind,
        attempt: u32,
        status: ActionStatus,
        path: OutcomePath,
    },
    OfflineFallbackUsed {
        reason: String,
    },
    Resolved {
        resolution: ResolutionKind,
    },
    Reactivated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event_id: EventId,
    pub action: AuditAction,
    /// `CrisisEvent::content_digest` after the action was applied; None
    /// when the event was not in the ledger yet
    #[serde(default)]
    pub event_digest: Option<String>,
    pub prev_hash: String,
    pub hash: String,
}

impl AuditRecord {
    fn compute_hash(
        seq: u64,
        at: &DateTime<Utc>,
        event_id: &str,
        action: &AuditAction,
        event_digest: Option<&str>,
        prev_hash: &str,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
        hasher.update(event_id.as_bytes());
        // Serializing a plain enum cannot fail; an empty payload would still break the chain.
        hasher.update(&serde_json::to_vec(action).unwrap_or_default());
        if let Some(digest) = event_digest {
            hasher.update(digest.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    fn expected_hash(&self) -> String {
        Self::compute_hash(
            self.seq,
            &self.at,
            &self.event_id,
            &self.action,
            self.event_digest.as_deref(),
            &self.prev_hash,
        )
    }
}

/// Where verification failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("audit record {seq} does not link to its predecessor")]
    BrokenLink { seq: u64 },

    #[error("audit record {seq} content does not match its hash")]
    HashMismatch { seq: u64 },

    #[error("audit record {seq} is out of sequence (expected {expected})")]
    OutOfSequence { seq: u64, expected: u64 },

    #[error("audit trail ends before sequence {next_seq}")]
    Truncated { next_seq: u64 },

    #[error("crisis event {event_id} does not match its audit records")]
    EventMismatch { event_id: String },

    #[error("crisis event {event_id} has no audit records")]
    Unaudited { event_id: String },

    #[error("crisis event {event_id} is audited but missing from the ledger")]
    MissingEvent { event_id: String },
}

/// Serializable form of the trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    /// prev_hash of the oldest retained record
    pub anchor: String,
    pub next_seq: u64,
    pub records: Vec<AuditRecord>,
}

impl Default for AuditSnapshot {
    fn default() -> Self {
        Self {
            anchor: GENESIS_HASH.to_string(),
            next_seq: 0,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditTrail {
    records: VecDeque<AuditRecord>,
    anchor: String,
    next_seq: u64,
    capacity: usize,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            anchor: GENESIS_HASH.to_string(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn from_snapshot(snapshot: AuditSnapshot, capacity: usize) -> Self {
        let mut trail = Self {
            records: snapshot.records.into(),
            anchor: snapshot.anchor,
            next_seq: snapshot.next_seq,
            capacity: capacity.max(1),
        };
        trail.rotate();
        trail
    }

    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            anchor: self.anchor.clone(),
            next_seq: self.next_seq,
            records: self.records.iter().cloned().collect(),
        }
    }

    pub fn append(
        &mut self,
        event_id: &str,
        action: AuditAction,
        event_digest: Option<String>,
    ) -> &AuditRecord {
        let prev_hash = self
            .records
            .back()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| self.anchor.clone());
        let seq = self.next_seq;
        let at = Utc::now();
        let hash = AuditRecord::compute_hash(
            seq,
            &at,
            event_id,
            &action,
            event_digest.as_deref(),
            &prev_hash,
        );

        self.next_seq += 1;
        self.records.push_back(AuditRecord {
            seq,
            at,
            event_id: event_id.to_string(),
            action,
            event_digest,
            prev_hash,
            hash,
        });
        self.rotate();
        // rotate never drops the record just pushed
        &self.records[self.records.len() - 1]
    }

    fn rotate(&mut self) {
        while self.records.len() > self.capacity {
            if let Some(dropped) = self.records.pop_front() {
                self.anchor = dropped.hash;
            }
        }
    }

    /// Check every retained link and hash, and that nothing was cut off
    /// the end.
    pub fn verify(&self) -> Result<(), AuditError> {
        let mut expected_prev = self.anchor.as_str();
        let mut expected_seq = self.records.front().map(|r| r.seq);

        for record in &self.records {
            if let Some(seq) = expected_seq {
                if record.seq != seq {
                    return Err(AuditError::OutOfSequence {
                        seq: record.seq,
                        expected: seq,
                    });
                }
            }
            if record.prev_hash != expected_prev {
                return Err(AuditError::BrokenLink { seq: record.seq });
            }
            if record.hash != record.expected_hash() {
                return Err(AuditError::HashMismatch { seq: record.seq });
            }
            expected_prev = &record.hash;
            expected_seq = Some(record.seq + 1);
        }
        if expected_seq.unwrap_or(0) != self.next_seq {
            return Err(AuditError::Truncated {
                next_seq: self.next_seq,
            });
        }
        Ok(())
    }

    /// Whether records have been rotated out since the first append
    pub fn has_rotated(&self) -> bool {
        self.anchor != GENESIS_HASH
    }

    /// Digest carried by the newest retained record for an event
    pub fn latest_digest(&self, event_id: &str) -> Option<Option<&str>> {
        self.records
            .iter()
            .rev()
            .find(|r| r.event_id == event_id)
            .map(|r| r.event_digest.as_deref())
    }

    pub fn records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    pub fn records_for<'a>(&'a self, event_id: &'a str) -> impl Iterator<Item = &'a AuditRecord> {
        self.records.iter().filter(move |r| r.event_id == event_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> AuditAction {
        AuditAction::Opened {
            trigger: CrisisTrigger::UserActivated,
            severity: CrisisSeverity::Severe,
        }
    }

    #[test]
    fn test_chain_verifies() {
        let mut trail = AuditTrail::default();
        trail.append("evt-1", opened(), None);
        trail.append(
            "evt-1",
            AuditAction::InterventionDispatched {
                kind: InterventionKind::Hotline,
                attempt: 0,
            },
            Some("digest".to_string()),
        );
        assert_eq!(trail.len(), 2);
        assert!(trail.verify().is_ok());
    }

    #[test]
    fn test_edit_detected() {
        let mut trail = AuditTrail::default();
        trail.append("evt-1", opened(), None);
        trail.append("evt-1", opened(), None);

        let mut snapshot = trail.snapshot();
        snapshot.records[0].event_id = "evt-forged".to_string();
        let tampered = AuditTrail::from_snapshot(snapshot, DEFAULT_AUDIT_CAPACITY);
        assert_eq!(tampered.verify(), Err(AuditError::HashMismatch { seq: 0 }));
    }

    #[test]
    fn test_dropped_record_detected() {
        let mut trail = AuditTrail::default();
        for _ in 0..3 {
            trail.append("evt-1", opened(), None);
        }
        let mut snapshot = trail.snapshot();
        snapshot.records.remove(1);
        let tampered = AuditTrail::from_snapshot(snapshot, DEFAULT_AUDIT_CAPACITY);
        assert!(matches!(
            tampered.verify(),
            Err(AuditError::OutOfSequence { seq: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_dropped_tail_detected() {
        let mut trail = AuditTrail::default();
        for _ in 0..3 {
            trail.append("evt-1", opened(), None);
        }
        let mut snapshot = trail.snapshot();
        snapshot.records.pop();
        let tampered = AuditTrail::from_snapshot(snapshot, DEFAULT_AUDIT_CAPACITY);
        assert_eq!(tampered.verify(), Err(AuditError::Truncated { next_seq: 3 }));
    }

    #[test]
    fn test_digest_edit_detected() {
        let mut trail = AuditTrail::default();
        trail.append("evt-1", opened(), Some("before".to_string()));

        let mut snapshot = trail.snapshot();
        snapshot.records[0].event_digest = Some("after".to_string());
        let tampered = AuditTrail::from_snapshot(snapshot, DEFAULT_AUDIT_CAPACITY);
        assert_eq!(tampered.verify(), Err(AuditError::HashMismatch { seq: 0 }));
        assert_eq!(tampered.latest_digest("evt-1"), Some(Some("after")));
        assert_eq!(tampered.latest_digest("evt-2"), None);
    }

    #[test]
    fn test_rotation_keeps_chain_valid() {
        let mut trail = AuditTrail::new(3);
        for i in 0..10 {
            trail.append(&format!("evt-{i}"), opened(), None);
        }
        assert_eq!(trail.len(), 3);
        assert!(trail.has_rotated());
        assert!(trail.verify().is_ok());
    }

    #[test]
    fn test_snapshot_roundtrip_verifies() {
        let mut trail = AuditTrail::default();
        trail.append("evt-1", opened(), None);
        trail.append(
            "evt-1",
            AuditAction::Resolved {
                resolution: ResolutionKind::Resolved,
            },
            Some("digest".to_string()),
        );

        let json = serde_json::to_string(&trail.snapshot()).unwrap();
        let restored: AuditSnapshot = serde_json::from_str(&json).unwrap();
        let trail = AuditTrail::from_snapshot(restored, DEFAULT_AUDIT_CAPACITY);
        assert!(trail.verify().is_ok());
        assert_eq!(trail.records_for("evt-1").count(), 2);
    }
}
