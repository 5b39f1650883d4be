// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the abuse-mitigation engine.

use crate::audit::AuditKind;
use thiserror::Error;

/// Boxed error returned by audit sink implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rule configuration errors, raised when a rule is validated.
///
/// These fire at construction/load time, never while processing an
/// infraction: the engine assumes the rules it is handed are valid.
#[derive(Debug, Error)]
pub enum RuleConfigError {
    #[error("rule {0:?} has a zero-length event window")]
    ZeroEventWindow(String),

    #[error("rule {name:?} sets {threshold} without a paired {duration}")]
    MissingDuration {
        name: String,
        threshold: &'static str,
        duration: &'static str,
    },
}

/// Errors surfaced by [`RuleEngine`](crate::engine::RuleEngine) operations.
///
/// The in-memory state change that preceded the failure is never rolled
/// back; the engine favors availability of the protection mechanism over
/// guaranteed audit durability.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audit write failed for {kind} event (client {client:?}, rule {rule:?}): {source}")]
    AuditWrite {
        kind: AuditKind,
        client: String,
        rule: Option<String>,
        source: BoxError,
    },
}
