// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Audit boundary for escalation decisions.
//!
//! Every escalation the engine takes (throttle, block, release) is
//! reported to an [`AuditSink`] supplied by the host. The engine only ever
//! writes to the sink; failures surface to the caller but never roll back
//! the in-memory decision that was already applied.

use crate::error::BoxError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Kind of audited escalation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    /// The caller was throttled (window exceeded the sleep threshold).
    Sleep,
    /// The client was blocked (window exceeded the block threshold).
    Block,
    /// An expired block was released.
    Unblock,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sleep => write!(f, "SLEEP"),
            Self::Block => write!(f, "BLOCK"),
            Self::Unblock => write!(f, "UNBLOCK"),
        }
    }
}

/// One audited escalation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    /// Client identity the decision applies to.
    pub client: String,
    /// Rule that fired; absent for releases, which are not rule-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Whole minutes until the block expires; `Block` records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_to_expire: Option<u64>,
    /// Supporting evidence: the rendered event window at decision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// When the decision was taken.
    pub at: DateTime<Utc>,
}

/// Durable sink for escalation records.
///
/// Implementations decide where records go (database, log pipeline,
/// message bus). Writes are synchronous from the engine's perspective and
/// must be cheap enough to run inline on the request path.
pub trait AuditSink: Send + Sync {
    /// Persist one record. Failures propagate to the engine caller.
    fn record(&self, record: AuditRecord) -> Result<(), BoxError>;
}

/// In-memory sink retaining every record, oldest first.
///
/// Useful for tests and for hosts that forward records out of band.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records written so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit sink poisoned").clone()
    }

    /// Number of records of the given kind.
    pub fn count(&self, kind: AuditKind) -> usize {
        self.records
            .lock()
            .expect("audit sink poisoned")
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), BoxError> {
        self.records.lock().expect("audit sink poisoned").push(record);
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn record(&self, record: AuditRecord) -> Result<(), BoxError> {
        (**self).record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_matches_log_types() {
        assert_eq!(AuditKind::Sleep.to_string(), "SLEEP");
        assert_eq!(AuditKind::Block.to_string(), "BLOCK");
        assert_eq!(AuditKind::Unblock.to_string(), "UNBLOCK");
    }

    #[test]
    fn memory_sink_retains_order_and_counts() {
        let sink = MemoryAuditSink::new();
        for kind in [AuditKind::Sleep, AuditKind::Block, AuditKind::Sleep] {
            sink.record(AuditRecord {
                kind,
                client: "10.0.0.1".into(),
                rule: Some("bad-login".into()),
                minutes_to_expire: None,
                details: None,
                at: Utc::now(),
            })
            .unwrap();
        }
        assert_eq!(sink.count(AuditKind::Sleep), 2);
        assert_eq!(sink.count(AuditKind::Block), 1);
        assert_eq!(sink.count(AuditKind::Unblock), 0);
        assert_eq!(sink.records()[1].kind, AuditKind::Block);
    }
}
