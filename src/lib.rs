// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse-Mitigation Engine
//!
//! This crate provides an in-process abuse-mitigation engine for ingress
//! services: a keyed, time-windowed infraction tracker that escalates a
//! client's treatment from allowed to throttled to blocked:
//!
//! - Sliding per-(rule, client) infraction windows with lazy pruning
//! - Configurable sleep (throttle) and block thresholds per rule
//! - Lazy, expiry-based block release with audit reporting
//! - Single reader-writer lock over all shared state
//! - Pluggable audit sink and runtime throttle gate

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use audit::{AuditKind, AuditRecord, AuditSink, MemoryAuditSink};
pub use config::RuleDescriptor;
pub use engine::{RuleEngine, ThrottleGate};
pub use error::{BoxError, EngineError, RuleConfigError};
pub use store::{BlockQuery, BlockRecord, EventStore, EventWindow, InfractionEvent};
