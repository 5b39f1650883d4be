// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Rule configuration for the abuse-mitigation engine.
//!
//! A [`RuleDescriptor`] is an immutable configuration value supplied per
//! call; it is not persisted by this crate. Durations are carried as
//! millisecond fields so rules can be loaded from host configuration, with
//! [`Duration`] accessors for call sites.

use crate::error::RuleConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One abuse rule: how long infractions stay active and at which counts
/// the engine escalates.
///
/// A rule with no thresholds never escalates; it only accumulates a
/// window. Thresholds are strict: escalation fires when the window size
/// *exceeds* the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// Rule name; part of the window key.
    pub name: String,

    /// How long one infraction stays active, in milliseconds.
    pub event_window_ms: u64,

    /// Window size above which the caller is throttled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_threshold: Option<u32>,

    /// Throttle delay in milliseconds; required when `sleep_threshold` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_ms: Option<u64>,

    /// Window size above which the client is blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_threshold: Option<u32>,

    /// Block lifetime in milliseconds; required when `block_threshold` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_ms: Option<u64>,

    /// Human-readable description recorded with each infraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Extra detail appended to `reason` in audit evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
}

impl RuleDescriptor {
    /// Create a rule that tracks infractions but never escalates.
    pub fn new(name: impl Into<String>, event_window: Duration) -> Self {
        Self {
            name: name.into(),
            event_window_ms: event_window.as_millis() as u64,
            sleep_threshold: None,
            sleep_ms: None,
            block_threshold: None,
            block_ms: None,
            reason: None,
            reason_detail: None,
        }
    }

    /// Throttle the caller once the window exceeds `threshold`.
    pub fn sleep_after(mut self, threshold: u32, delay: Duration) -> Self {
        self.sleep_threshold = Some(threshold);
        self.sleep_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Block the client once the window exceeds `threshold`.
    pub fn block_after(mut self, threshold: u32, duration: Duration) -> Self {
        self.block_threshold = Some(threshold);
        self.block_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Attach a human-readable reason to the rule's infractions.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach extra detail appended to the reason.
    pub fn with_reason_detail(mut self, detail: impl Into<String>) -> Self {
        self.reason_detail = Some(detail.into());
        self
    }

    /// Check the rule's internal consistency.
    ///
    /// Hosts should call this once after loading rules from configuration.
    pub fn validate(&self) -> Result<(), RuleConfigError> {
        if self.event_window_ms == 0 {
            return Err(RuleConfigError::ZeroEventWindow(self.name.clone()));
        }
        if self.sleep_threshold.is_some() && self.sleep_ms.is_none() {
            return Err(RuleConfigError::MissingDuration {
                name: self.name.clone(),
                threshold: "sleep_threshold",
                duration: "sleep_ms",
            });
        }
        if self.block_threshold.is_some() && self.block_ms.is_none() {
            return Err(RuleConfigError::MissingDuration {
                name: self.name.clone(),
                threshold: "block_threshold",
                duration: "block_ms",
            });
        }
        Ok(())
    }

    /// Get the event window duration.
    pub fn event_window(&self) -> Duration {
        Duration::from_millis(self.event_window_ms)
    }

    /// Get the throttle delay, if throttling is configured.
    pub fn sleep_delay(&self) -> Option<Duration> {
        self.sleep_ms.map(Duration::from_millis)
    }

    /// Get the block lifetime, if blocking is configured.
    pub fn block_duration(&self) -> Option<Duration> {
        self.block_ms.map(Duration::from_millis)
    }

    /// Compose the reason string recorded with each infraction.
    ///
    /// Empty when the rule carries no reason; detail is only rendered
    /// alongside a reason, never on its own.
    pub(crate) fn event_reason(&self) -> String {
        match (&self.reason, &self.reason_detail) {
            (Some(reason), Some(detail)) => format!("{reason}: {detail}"),
            (Some(reason), None) => reason.clone(),
            (None, _) => String::new(),
        }
    }
}
