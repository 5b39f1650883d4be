// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared event-window and block storage.
//!
//! [`EventStore`] owns all mutable state of the engine: per-(rule, client)
//! sliding windows of infractions and per-client block records. Both maps
//! live behind a single `RwLock` so that a block release can clear the
//! record and its window atomically; two independent locks would let a
//! reader observe a window whose owning block was already released.
//!
//! Pruning is lazy: every write against an existing window drops events
//! older than the window's lifetime before appending. There is no
//! background sweep; a window is only ever stale by at most one call.

use crate::config::RuleDescriptor;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// One ingested infraction.
#[derive(Debug, Clone)]
pub struct InfractionEvent {
    /// When the infraction was recorded.
    pub at: DateTime<Utc>,
    /// Composed rule reason; may be empty.
    pub reason: String,
}

/// Rolling set of one client's active infractions for one rule.
///
/// Events are ordered oldest first. The window carries the lifetime of the
/// rule that created it; events older than the lifetime are dropped on the
/// next write.
#[derive(Debug, Clone)]
pub struct EventWindow {
    lifetime_ms: u64,
    events: Vec<InfractionEvent>,
}

impl EventWindow {
    fn new(lifetime_ms: u64) -> Self {
        Self {
            lifetime_ms,
            events: Vec::new(),
        }
    }

    /// Event lifetime this window was created with, in milliseconds.
    pub fn lifetime_ms(&self) -> u64 {
        self.lifetime_ms
    }

    /// Active events, oldest first. May contain stale entries if the
    /// window was read without a preceding write.
    pub fn events(&self) -> &[InfractionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop events older than the window lifetime relative to `now`.
    fn prune(&mut self, now: DateTime<Utc>) {
        let lifetime = TimeDelta::milliseconds(self.lifetime_ms as i64);
        self.events
            .retain(|event| now.signed_duration_since(event.at) <= lifetime);
    }

    /// Render events for audit evidence: one per line, oldest first,
    /// `reason: timestamp` (timestamp alone when the reason is empty).
    fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            if !out.is_empty() {
                out.push('\n');
            }
            if !event.reason.is_empty() {
                out.push_str(&event.reason);
                out.push_str(": ");
            }
            out.push_str(&event.at.to_rfc3339());
        }
        out
    }
}

/// Active block for one client. At most one per client.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    /// Rule that ordered the block; its window is cleared on release.
    pub rule: String,
    /// Instant after which the block may be released.
    pub expire_at: DateTime<Utc>,
}

/// Outcome of a block query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockQuery {
    /// No block record exists for the client.
    Unblocked,
    /// A block exists and has not yet expired.
    StillBlocked,
    /// A block existed, expired, and was removed together with its window.
    Released,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Windows keyed by (rule name, client identity).
    windows: HashMap<(String, String), EventWindow>,
    /// Blocks keyed by client identity.
    blocks: HashMap<String, BlockRecord>,
}

/// Thread-safe storage for event windows and block records.
///
/// An owned instance, not a process-wide singleton: independent stores can
/// be created for independent engines or tests.
#[derive(Debug, Default)]
pub struct EventStore {
    state: RwLock<StoreState>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an infraction and return the resulting window size.
    ///
    /// Fetches or creates the `(rule.name, client)` window; a new window
    /// is stamped with the rule's event lifetime, an existing one is
    /// pruned first so stale events never count toward a threshold.
    pub async fn add_event(&self, client: &str, rule: &RuleDescriptor, reason: String) -> usize {
        let now = Utc::now();
        let key = (rule.name.clone(), client.to_string());

        let mut state = self.state.write().await;
        let window = state
            .windows
            .entry(key)
            .or_insert_with(|| EventWindow::new(rule.event_window_ms));
        window.prune(now);
        window.events.push(InfractionEvent { at: now, reason });

        let size = window.len();
        trace!(client, rule = %rule.name, size, "infraction recorded");
        size
    }

    /// Snapshot of a window, if one exists.
    ///
    /// Read-only: no pruning happens, so the snapshot may contain stale
    /// entries. Intended for diagnostics, not threshold decisions.
    pub async fn window(&self, rule_name: &str, client: &str) -> Option<EventWindow> {
        let state = self.state.read().await;
        state
            .windows
            .get(&(rule_name.to_string(), client.to_string()))
            .cloned()
    }

    /// Remove a window entirely, regardless of contents.
    pub async fn reset_window(&self, rule_name: &str, client: &str) {
        let mut state = self.state.write().await;
        state
            .windows
            .remove(&(rule_name.to_string(), client.to_string()));
        debug!(client, rule = rule_name, "event window reset");
    }

    /// Insert or overwrite a block record unconditionally.
    ///
    /// Idempotency is the caller's responsibility; the store performs no
    /// "already blocked" check. Last write wins, including across rules.
    pub async fn block(&self, client: &str, record: BlockRecord) {
        let mut state = self.state.write().await;
        state.blocks.insert(client.to_string(), record);
    }

    /// Query a client's block state, releasing it if expired.
    ///
    /// Takes the write lock even though this is conceptually a query: a
    /// release removes the block record and its associated window, and
    /// both removals must be atomic.
    pub async fn try_release_block(&self, client: &str) -> BlockQuery {
        let mut state = self.state.write().await;
        let record = match state.blocks.get(client) {
            None => return BlockQuery::Unblocked,
            Some(record) => record,
        };
        if record.expire_at > Utc::now() {
            return BlockQuery::StillBlocked;
        }

        let rule = record.rule.clone();
        state.blocks.remove(client);
        state.windows.remove(&(rule.clone(), client.to_string()));
        debug!(client, rule = %rule, "expired block released");
        BlockQuery::Released
    }

    /// Render a window's events for audit evidence; empty string when the
    /// window is absent or empty.
    pub async fn describe_window(&self, rule_name: &str, client: &str) -> String {
        let state = self.state.read().await;
        state
            .windows
            .get(&(rule_name.to_string(), client.to_string()))
            .map(EventWindow::render)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn rule(name: &str, window: Duration) -> RuleDescriptor {
        RuleDescriptor::new(name, window)
    }

    #[tokio::test]
    async fn add_event_counts_per_key() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_secs(60));

        assert_eq!(store.add_event("ip1", &r, String::new()).await, 1);
        assert_eq!(store.add_event("ip1", &r, String::new()).await, 2);
        assert_eq!(store.add_event("ip2", &r, String::new()).await, 1);

        let other = rule("flood", Duration::from_secs(60));
        assert_eq!(store.add_event("ip1", &other, String::new()).await, 1);
    }

    #[tokio::test]
    async fn stale_events_are_pruned_on_write() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_millis(40));

        store.add_event("ip1", &r, String::new()).await;
        store.add_event("ip1", &r, String::new()).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Both old events are outside the window now; only the new one counts.
        assert_eq!(store.add_event("ip1", &r, String::new()).await, 1);

        let window = store.window("probe", "ip1").await.unwrap();
        let now = Utc::now();
        for event in window.events() {
            assert!(now.signed_duration_since(event.at) <= TimeDelta::milliseconds(40));
        }
    }

    #[tokio::test]
    async fn read_path_does_not_prune() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_millis(10));

        store.add_event("ip1", &r, String::new()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The stale event is still visible to the read-only snapshot.
        let window = store.window("probe", "ip1").await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn reset_removes_window() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_secs(60));

        store.add_event("ip1", &r, String::new()).await;
        store.reset_window("probe", "ip1").await;
        assert!(store.window("probe", "ip1").await.is_none());

        // Fresh infraction starts over at 1.
        assert_eq!(store.add_event("ip1", &r, String::new()).await, 1);
    }

    #[tokio::test]
    async fn try_release_block_tristate() {
        let store = EventStore::new();
        assert_eq!(store.try_release_block("ip1").await, BlockQuery::Unblocked);

        store
            .block(
                "ip1",
                BlockRecord {
                    rule: "probe".into(),
                    expire_at: Utc::now() + TimeDelta::milliseconds(60),
                },
            )
            .await;
        assert_eq!(
            store.try_release_block("ip1").await,
            BlockQuery::StillBlocked
        );

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(store.try_release_block("ip1").await, BlockQuery::Released);
        // Released means gone; a second query sees no record.
        assert_eq!(store.try_release_block("ip1").await, BlockQuery::Unblocked);
    }

    #[tokio::test]
    async fn release_clears_the_owning_window() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_secs(60));

        store.add_event("ip1", &r, String::new()).await;
        store.add_event("ip1", &r, String::new()).await;
        store
            .block(
                "ip1",
                BlockRecord {
                    rule: "probe".into(),
                    expire_at: Utc::now() - TimeDelta::milliseconds(1),
                },
            )
            .await;

        assert_eq!(store.try_release_block("ip1").await, BlockQuery::Released);
        assert!(store.window("probe", "ip1").await.is_none());
    }

    #[tokio::test]
    async fn describe_window_renders_reasons_oldest_first() {
        let store = EventStore::new();
        let r = rule("probe", Duration::from_secs(60));

        assert_eq!(store.describe_window("probe", "ip1").await, "");

        store.add_event("ip1", &r, "first".into()).await;
        store.add_event("ip1", &r, String::new()).await;
        store.add_event("ip1", &r, "third".into()).await;

        let rendered = store.describe_window("probe", "ip1").await;
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("first: "));
        // Second event had no reason: line is the bare timestamp.
        assert!(!lines[1].contains(": "));
        assert!(lines[2].starts_with("third: "));
    }
}
