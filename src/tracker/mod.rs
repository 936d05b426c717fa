//! Lifecycle ledger for concurrent tool calls
//!
//! A script can abandon a tool call (issued but never awaited, or the losing
//! side of a race). Nothing in the host forces settlement, so the tracker
//! turns abandonment into an explicit, time-bounded, reportable condition:
//! every call registers here with a cancellation token, settlement is
//! recorded by observers, and [`CallTracker::ensure_all_settled`] converts
//! survivors into a [`ScriptError::DetachedPromise`].

use crate::errors::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Status of one tracked call: `Pending` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Resolved,
    Rejected,
    Aborted,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Pending)
    }
}

/// Ledger entry for one tool call
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Sequential id, `tool_<n>`, never reused within a tracker
    pub id: String,
    pub tool_name: String,
    pub status: CallStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    token: CancellationToken,
}

impl CallRecord {
    /// Cancellation token owned by this call
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A successfully resolved call, in registration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCall {
    pub tool_name: String,
    pub result: Value,
}

/// Per-tracker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub total: usize,
    pub pending: usize,
    pub resolved: usize,
    pub rejected: usize,
    pub aborted: usize,
}

#[derive(Debug, Default)]
struct TrackerInner {
    records: Vec<CallRecord>,
    next_id: usize,
}

impl TrackerInner {
    fn find_mut(&mut self, id: &str) -> Option<&mut CallRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }
}

/// Tracks every tool call of exactly one script execution
#[derive(Debug, Clone)]
pub struct CallTracker {
    inner: Arc<Mutex<TrackerInner>>,
    notify: Arc<Notify>,
    max_concurrent: usize,
}

impl CallTracker {
    /// Create a tracker with a fixed concurrency ceiling
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner::default())),
            notify: Arc::new(Notify::new()),
            max_concurrent,
        }
    }

    /// Register a call and take ownership of its cancellation token.
    ///
    /// Ids are sequential per tracker and never reused, including across
    /// [`clear`](Self::clear).
    pub fn register(&self, tool_name: &str, token: CancellationToken) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("tool_{}", inner.next_id);
        inner.records.push(CallRecord {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            status: CallStatus::Pending,
            result: None,
            error: None,
            token,
        });
        id
    }

    /// Record successful settlement. Ignored for unknown or terminal ids.
    pub fn mark_complete(&self, id: &str, result: Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.find_mut(id) {
            if record.status == CallStatus::Pending {
                record.status = CallStatus::Resolved;
                record.result = Some(result);
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Record failed settlement. Ignored for unknown or terminal ids.
    pub fn mark_failed(&self, id: &str, error: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.find_mut(id) {
            if record.status == CallStatus::Pending {
                record.status = CallStatus::Rejected;
                record.error = Some(error.into());
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Cancel a pending call's token and force it terminal. No-op if the
    /// call already settled.
    pub fn abort(&self, id: &str, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.find_mut(id) {
            if record.status == CallStatus::Pending {
                record.token.cancel();
                record.status = CallStatus::Aborted;
                record.error = Some(reason.to_string());
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Abort every pending call
    pub fn abort_all(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        for record in inner.records.iter_mut() {
            if record.status == CallStatus::Pending {
                record.token.cancel();
                record.status = CallStatus::Aborted;
                record.error = Some(reason.to_string());
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Wait up to `grace` for every pending call to settle.
    ///
    /// Survivors are aborted and reported as a
    /// [`ScriptError::DetachedPromise`] listing `"<id> (<tool_name>)"` per
    /// orphan. Resolves cleanly with zero pending calls and is idempotent
    /// across repeated invocations.
    pub async fn ensure_all_settled(&self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.notify.notified();
            if self.pending_count() == 0 {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }

        let orphaned: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner
                .records
                .iter()
                .filter(|r| r.status == CallStatus::Pending)
                .map(|r| format!("{} ({})", r.id, r.tool_name))
                .collect()
        };

        if orphaned.is_empty() {
            // Settled during the final poll
            return Ok(());
        }

        self.abort_all("orphaned after settlement grace period");
        Err(ScriptError::DetachedPromise { orphaned })
    }

    /// Successfully resolved `{tool_name, result}` pairs in registration
    /// order. This is the partial-output channel when a script fails midway.
    pub fn completed_results(&self) -> Vec<CompletedCall> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .iter()
            .filter(|r| r.status == CallStatus::Resolved)
            .map(|r| CompletedCall {
                tool_name: r.tool_name.clone(),
                result: r.result.clone().unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Ids of every settled call (resolved or rejected), registration order
    pub fn completed_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .iter()
            .filter(|r| matches!(r.status, CallStatus::Resolved | CallStatus::Rejected))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Snapshot of one record
    pub fn get(&self, id: &str) -> Option<CallRecord> {
        let inner = self.inner.lock().unwrap();
        inner.records.iter().find(|r| r.id == id).cloned()
    }

    /// Calls still pending
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .iter()
            .filter(|r| r.status == CallStatus::Pending)
            .count()
    }

    /// Whether the pending count has reached the constructor-fixed ceiling
    pub fn is_at_concurrency_limit(&self) -> bool {
        self.pending_count() >= self.max_concurrent
    }

    /// Concurrency ceiling
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Abort everything and drop all records. The id sequence continues so
    /// ids are never reused.
    pub fn clear(&self) {
        self.abort_all("tracker cleared");
        let mut inner = self.inner.lock().unwrap();
        inner.records.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Counters over the current ledger
    pub fn stats(&self) -> TrackerStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = TrackerStats {
            total: inner.records.len(),
            ..Default::default()
        };
        for record in &inner.records {
            match record.status {
                CallStatus::Pending => stats.pending += 1,
                CallStatus::Resolved => stats.resolved += 1,
                CallStatus::Rejected => stats.rejected += 1,
                CallStatus::Aborted => stats.aborted += 1,
            }
        }
        stats
    }
}
