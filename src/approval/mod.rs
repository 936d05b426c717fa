//! Human-in-the-loop approval gating for risky tool calls
//!
//! The bridge sits between a running script and the approval UI: each
//! request gets a sanitized copy of the tool arguments, a bounded wait, and
//! exactly one terminal outcome (approve, deny, timeout, or cancel). A
//! second response for a settled request is a silent no-op.

use crate::errors::{Result, ScriptError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Default wait for a human decision
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 60_000;

/// Longest string preserved verbatim in sanitized arguments
const MAX_SANITIZED_STRING_LEN: usize = 256;

/// Longest array preserved in sanitized arguments
const MAX_SANITIZED_ARRAY_LEN: usize = 10;

/// Key substrings whose values are redacted, matched case-insensitively.
/// Loaded once into a read-only table.
const REDACTED_KEY_SUBSTRINGS: &[&str] = &["password", "secret", "token", "key", "auth"];

/// What a script asks the bridge to approve
#[derive(Debug, Clone)]
pub struct ApprovalQuery {
    pub tool_name: String,
    pub args: Value,
    pub script_id: String,
    pub tool_call_id: String,
    pub context: Option<String>,
}

/// The sanitized request handed to the approval UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub tool_name: String,
    pub sanitized_args: Value,
    pub script_id: String,
    pub tool_call_id: String,
    pub created_at: DateTime<Utc>,
}

/// Per-bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub denied: usize,
    pub timed_out: usize,
}

#[derive(Debug)]
enum Decision {
    Approved,
    Denied(Option<String>),
    Cancelled,
}

struct PendingApproval {
    tx: oneshot::Sender<Decision>,
    request: ApprovalRequest,
}

#[derive(Default)]
struct BridgeInner {
    pending: HashMap<String, PendingApproval>,
    stats: ApprovalStats,
}

/// Callback invoked with each outbound (sanitized) approval request
pub type ApprovalHandler = Arc<dyn Fn(ApprovalRequest) + Send + Sync>;

/// Async request/response mediation for gated tool calls.
///
/// Reusable across sequential scripts only after [`cancel_all`]
/// (`Self::cancel_all`) has run between them.
#[derive(Clone)]
pub struct ApprovalBridge {
    inner: Arc<Mutex<BridgeInner>>,
    on_request: ApprovalHandler,
    timeout_ms: u64,
}

impl ApprovalBridge {
    /// Create a bridge with the default decision timeout
    pub fn new(on_request: impl Fn(ApprovalRequest) + Send + Sync + 'static) -> Self {
        Self::with_timeout(on_request, DEFAULT_APPROVAL_TIMEOUT_MS)
    }

    /// Create a bridge with a custom decision timeout
    pub fn with_timeout(
        on_request: impl Fn(ApprovalRequest) + Send + Sync + 'static,
        timeout_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeInner::default())),
            on_request: Arc::new(on_request),
            timeout_ms,
        }
    }

    /// Request a decision for one tool call.
    ///
    /// Resolves `Ok(true)`/`Ok(false)` for an explicit approve/deny, fails
    /// with [`ScriptError::ApprovalTimeout`] when no decision arrives in
    /// time, and with [`ScriptError::ApprovalDenied`] when the request is
    /// cancelled.
    pub async fn request_approval(&self, query: ApprovalQuery) -> Result<bool> {
        let request = ApprovalRequest {
            request_id: Uuid::new_v4().to_string(),
            tool_name: query.tool_name.clone(),
            sanitized_args: sanitize_args(&query.args),
            script_id: query.script_id,
            tool_call_id: query.tool_call_id,
            created_at: Utc::now(),
        };
        let request_id = request.request_id.clone();

        let (tx, mut rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.total += 1;
            inner.stats.pending += 1;
            inner.pending.insert(
                request_id.clone(),
                PendingApproval {
                    tx,
                    request: request.clone(),
                },
            );
        }

        // Handler runs outside the lock; it only ever sees sanitized args
        (self.on_request)(request);

        let wait = Duration::from_millis(self.timeout_ms);
        match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(decision)) => self.settle(&query.tool_name, decision),
            Ok(Err(_)) => Err(ScriptError::ApprovalDenied {
                tool: query.tool_name,
                reason: Some("approval channel closed".to_string()),
            }),
            Err(_) => {
                // Claim the entry; a concurrent response may have beaten us
                let claimed = {
                    let mut inner = self.inner.lock().unwrap();
                    let entry = inner.pending.remove(&request_id);
                    if entry.is_some() {
                        inner.stats.pending -= 1;
                        inner.stats.timed_out += 1;
                    }
                    entry
                };
                if claimed.is_some() {
                    Err(ScriptError::ApprovalTimeout {
                        tool: query.tool_name,
                        timeout_ms: self.timeout_ms,
                    })
                } else {
                    match rx.try_recv() {
                        Ok(decision) => self.settle(&query.tool_name, decision),
                        Err(_) => Err(ScriptError::ApprovalDenied {
                            tool: query.tool_name,
                            reason: Some("approval channel closed".to_string()),
                        }),
                    }
                }
            }
        }
    }

    fn settle(&self, tool_name: &str, decision: Decision) -> Result<bool> {
        match decision {
            Decision::Approved => Ok(true),
            Decision::Denied(_) => Ok(false),
            Decision::Cancelled => Err(ScriptError::ApprovalDenied {
                tool: tool_name.to_string(),
                reason: Some("request cancelled".to_string()),
            }),
        }
    }

    /// Deliver a user decision. Silent no-op for unknown or already settled
    /// request ids.
    pub fn on_user_response(&self, request_id: &str, approved: bool, reason: Option<&str>) {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.pending.remove(request_id);
            if entry.is_some() {
                inner.stats.pending -= 1;
                if approved {
                    inner.stats.approved += 1;
                } else {
                    inner.stats.denied += 1;
                }
            }
            entry
        };
        if let Some(pending) = entry {
            let decision = if approved {
                Decision::Approved
            } else {
                Decision::Denied(reason.map(str::to_string))
            };
            let _ = pending.tx.send(decision);
        }
    }

    /// Cancel one pending request, rejecting its waiter
    pub fn cancel_request(&self, request_id: &str) {
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.pending.remove(request_id);
            if entry.is_some() {
                inner.stats.pending -= 1;
                inner.stats.denied += 1;
            }
            entry
        };
        if let Some(pending) = entry {
            let _ = pending.tx.send(Decision::Cancelled);
        }
    }

    /// Cancel every pending request
    pub fn cancel_all(&self) {
        let entries: Vec<PendingApproval> = {
            let mut inner = self.inner.lock().unwrap();
            let drained: Vec<PendingApproval> =
                inner.pending.drain().map(|(_, v)| v).collect();
            inner.stats.pending -= drained.len();
            inner.stats.denied += drained.len();
            drained
        };
        for pending in entries {
            let _ = pending.tx.send(Decision::Cancelled);
        }
    }

    /// Requests still awaiting a decision
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let inner = self.inner.lock().unwrap();
        inner.pending.values().map(|p| p.request.clone()).collect()
    }

    /// Current counters
    pub fn stats(&self) -> ApprovalStats {
        self.inner.lock().unwrap().stats
    }
}

/// Produce a sanitized copy of tool arguments for display to a human.
///
/// Never mutates the input: long strings truncate with a `...<truncated>`
/// marker, long arrays truncate to their first elements, values under
/// sensitive keys are replaced with `<redacted>`, and nested objects/arrays
/// are sanitized recursively. Primitives and null pass through.
pub fn sanitize_args(args: &Value) -> Value {
    match args {
        Value::String(s) => Value::String(truncate_string(s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_SANITIZED_ARRAY_LEN)
                .map(sanitize_args)
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), Value::String("<redacted>".to_string()))
                    } else {
                        (k.clone(), sanitize_args(v))
                    }
                })
                .collect(),
        ),
        primitive => primitive.clone(),
    }
}

fn truncate_string(s: &str) -> String {
    if s.chars().count() <= MAX_SANITIZED_STRING_LEN {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(MAX_SANITIZED_STRING_LEN).collect();
        format!("{}...<truncated>", truncated)
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    REDACTED_KEY_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}
