// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Escalation policy on top of [`EventStore`].
//!
//! [`RuleEngine`] is the only component that knows about thresholds,
//! durations, and escalation order. Callers report infractions via
//! [`RuleEngine::on_infraction`] and gate admission on
//! [`RuleEngine::is_blocked`]; everything else is internal.

use crate::audit::{AuditKind, AuditRecord, AuditSink};
use crate::config::RuleDescriptor;
use crate::error::EngineError;
use crate::store::{BlockQuery, BlockRecord, EventStore, EventWindow};
use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Feature flag gating whether a sleep escalation actually delays the
/// caller. Re-read on every infraction, never cached, so hosts can flip
/// it at runtime.
pub trait ThrottleGate: Send + Sync {
    fn throttling_enabled(&self) -> bool;
}

/// Fixed gate; handy for hosts without runtime toggling.
impl ThrottleGate for bool {
    fn throttling_enabled(&self) -> bool {
        *self
    }
}

/// Runtime-togglable gate.
impl ThrottleGate for AtomicBool {
    fn throttling_enabled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<G: ThrottleGate + ?Sized> ThrottleGate for std::sync::Arc<G> {
    fn throttling_enabled(&self) -> bool {
        (**self).throttling_enabled()
    }
}

/// Policy orchestrator: records infractions, escalates to throttling and
/// blocking, and answers block queries with lazy expiry.
///
/// Owns its [`EventStore`]; independent engines are fully isolated.
pub struct RuleEngine<S, G> {
    store: EventStore,
    sink: S,
    gate: G,
}

impl<S: AuditSink, G: ThrottleGate> RuleEngine<S, G> {
    pub fn new(sink: S, gate: G) -> Self {
        Self {
            store: EventStore::new(),
            sink,
            gate,
        }
    }

    /// Report one infraction for `client` under `rule`.
    ///
    /// Appends the event, then evaluates both thresholds against the new
    /// window size. Sleep and block decisions are independent; the sleep,
    /// if any, is applied last so audit records reflect the instant of
    /// detection rather than the end of an artificial delay. The delay
    /// runs outside the store lock and suspends only the calling task.
    pub async fn on_infraction(
        &self,
        client: &str,
        rule: &RuleDescriptor,
    ) -> Result<(), EngineError> {
        let size = self
            .store
            .add_event(client, rule, rule.event_reason())
            .await;

        let mut delay = None;
        if let Some(threshold) = rule.sleep_threshold {
            let threshold = threshold as usize;
            if size > threshold {
                // Audit only the first crossing; later calls in the same
                // window are still throttled but not re-logged.
                if size == threshold + 1 {
                    warn!(client, rule = %rule.name, size, "sleep threshold exceeded");
                    self.audit(AuditKind::Sleep, client, Some(&rule.name), None, None)?;
                }
                delay = rule.sleep_delay();
            }
        }

        if rule.block_threshold.is_some_and(|t| size > t as usize) {
            self.block_client(
                client,
                &rule.name,
                rule.block_duration().unwrap_or_default(),
            )
            .await?;
        }

        if let Some(delay) = delay {
            if self.gate.throttling_enabled() {
                debug!(client, rule = %rule.name, ?delay, "throttling caller");
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }

    /// Block `client` for `duration`, attributing the block to `rule_name`.
    ///
    /// A no-op while the client is already blocked: an active block is
    /// neither extended nor re-logged. The blocked-check and the write are
    /// deliberately not atomic; two racing callers can both write, and the
    /// second overwrites the first with an equal-or-later expiry.
    pub async fn block_client(
        &self,
        client: &str,
        rule_name: &str,
        duration: Duration,
    ) -> Result<(), EngineError> {
        if self.is_blocked(client).await? {
            return Ok(());
        }

        let lifetime = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let expire_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
        self.store
            .block(
                client,
                BlockRecord {
                    rule: rule_name.to_string(),
                    expire_at,
                },
            )
            .await;

        let evidence = self.store.describe_window(rule_name, client).await;
        let minutes = duration.as_secs() / 60;
        info!(client, rule = rule_name, minutes, "client blocked");
        self.audit(
            AuditKind::Block,
            client,
            Some(rule_name),
            Some(minutes),
            Some(evidence),
        )
    }

    /// Is the client currently blocked?
    ///
    /// Performs lazy expiry: an expired block is released here, its window
    /// cleared, and exactly one `UNBLOCK` audit record emitted for the
    /// transition.
    pub async fn is_blocked(&self, client: &str) -> Result<bool, EngineError> {
        match self.store.try_release_block(client).await {
            BlockQuery::Unblocked => Ok(false),
            BlockQuery::StillBlocked => Ok(true),
            BlockQuery::Released => {
                info!(client, "block expired, client released");
                self.audit(AuditKind::Unblock, client, None, None, None)?;
                Ok(false)
            }
        }
    }

    /// Clear a client's history for one rule without touching block state.
    pub async fn reset_client(&self, rule_name: &str, client: &str) {
        self.store.reset_window(rule_name, client).await;
    }

    /// Diagnostic snapshot of a client's window for one rule.
    ///
    /// May contain stale entries; see [`EventStore::window`].
    pub async fn window(&self, rule_name: &str, client: &str) -> Option<EventWindow> {
        self.store.window(rule_name, client).await
    }

    fn audit(
        &self,
        kind: AuditKind,
        client: &str,
        rule: Option<&str>,
        minutes_to_expire: Option<u64>,
        details: Option<String>,
    ) -> Result<(), EngineError> {
        self.sink
            .record(AuditRecord {
                kind,
                client: client.to_string(),
                rule: rule.map(str::to_string),
                minutes_to_expire,
                details,
                at: Utc::now(),
            })
            .map_err(|source| EngineError::AuditWrite {
                kind,
                client: client.to_string(),
                rule: rule.map(str::to_string),
                source,
            })
    }
}
