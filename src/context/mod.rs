//! Execution context construction
//!
//! A [`ScriptContext`] is built once per execution attempt from a validated
//! seed, handed to the interpreter behind `Arc`, and never mutated or reused.
//! Every field is checked with a specific error; limits merge against fixed
//! defaults; the tool list is cloned, never aliased. The progress emitter is
//! the only part with interior state (rate limiting and a lifetime cap) and
//! its callback stays invocable after construction.

use crate::config::ExecutionMode;
use crate::errors::{Result, ScriptError};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Fixed sandbox defaults merged with per-attempt overrides
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MEMORY_MB: u64 = 96;
pub const DEFAULT_MAX_CONCURRENT_TOOL_CALLS: usize = 4;

/// Progress emitter bounds
const MAX_PROGRESS_MESSAGE_LEN: usize = 1_000;
const PROGRESS_RATE_WINDOW: Duration = Duration::from_millis(500);
const MAX_PROGRESS_FORWARDS: usize = 50;

/// Raw inputs from the conversation layer, validated at build time
#[derive(Debug, Clone)]
pub struct ContextSeed {
    pub conversation_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub working_directory: String,
    pub provider: String,
    pub model: String,
    pub tools: Vec<String>,
    pub approvals_required: bool,
    /// Mode string, one of `disabled`, `dry-run`, `enabled`
    pub mode: String,
}

/// Sandbox limit overrides; unset fields take the defaults
#[derive(Debug, Clone, Default)]
pub struct LimitOverrides {
    pub timeout_ms: Option<u64>,
    pub memory_mb: Option<u64>,
    pub max_concurrent_tool_calls: Option<usize>,
}

/// Per-attempt build options
#[derive(Default)]
pub struct ContextOptions {
    pub script_id: String,
    pub remaining_tool_budget: usize,
    pub limits: LimitOverrides,
    pub on_progress: Option<ProgressCallback>,
}

/// Who is executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptIdentity {
    pub conversation_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub script_id: String,
}

/// Where it is executing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEnvironment {
    pub working_directory: String,
    pub provider: String,
    pub model: String,
}

/// Resource bounds for the attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SandboxState {
    pub timeout_ms: u64,
    pub memory_mb: u64,
    pub remaining_tool_budget: usize,
    pub max_concurrent_tool_calls: usize,
    pub mode: ExecutionMode,
}

/// Tools visible to the script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: Vec<String>,
}

/// Approval policy snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub required: bool,
    pub last_request_id: Option<String>,
}

/// Message severity for progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Info,
    Warning,
    Error,
}

impl Default for ProgressKind {
    fn default() -> Self {
        Self::Info
    }
}

/// Host callback receiving forwarded progress messages
pub type ProgressCallback = Arc<dyn Fn(&str, ProgressKind) + Send + Sync>;

#[derive(Debug, Default)]
struct EmitterState {
    last_forwarded: Option<Instant>,
    forwarded: usize,
}

/// Rate-limited, capped conduit from the script to the host UI.
///
/// At most one forwarded call per 500ms window (excess dropped, not queued)
/// and at most 50 forwarded calls over the context's lifetime. A panicking
/// callback never propagates into the script.
pub struct ProgressEmitter {
    callback: Option<ProgressCallback>,
    state: Mutex<EmitterState>,
}

impl ProgressEmitter {
    fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            state: Mutex::new(EmitterState::default()),
        }
    }

    /// Emit with the default `Info` kind
    pub fn emit_info(&self, message: &str) -> bool {
        self.emit(message, ProgressKind::Info)
    }

    /// Forward a progress message to the host. Returns whether the message
    /// was forwarded (dropped messages are not an error).
    pub fn emit(&self, message: &str, kind: ProgressKind) -> bool {
        let Some(callback) = &self.callback else {
            return false;
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.forwarded >= MAX_PROGRESS_FORWARDS {
                return false;
            }
            let now = Instant::now();
            if let Some(last) = state.last_forwarded {
                if now.duration_since(last) < PROGRESS_RATE_WINDOW {
                    return false;
                }
            }
            state.last_forwarded = Some(now);
            state.forwarded += 1;
        }

        let message = if message.chars().count() > MAX_PROGRESS_MESSAGE_LEN {
            message.chars().take(MAX_PROGRESS_MESSAGE_LEN).collect()
        } else {
            message.to_string()
        };

        // A misbehaving host callback must not take the script down
        let _ = catch_unwind(AssertUnwindSafe(|| callback(&message, kind)));
        true
    }

    /// Messages forwarded so far
    pub fn forwarded_count(&self) -> usize {
        self.state.lock().unwrap().forwarded
    }
}

impl std::fmt::Debug for ProgressEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEmitter")
            .field("has_callback", &self.callback.is_some())
            .field("forwarded", &self.forwarded_count())
            .finish()
    }
}

/// Immutable execution context for exactly one script attempt.
///
/// Handed out as `Arc<ScriptContext>`; there is no mutable surface after
/// construction.
#[derive(Debug)]
pub struct ScriptContext {
    pub identity: ScriptIdentity,
    pub environment: ScriptEnvironment,
    pub sandbox: SandboxState,
    pub capabilities: Capabilities,
    pub approvals: ApprovalPolicy,
    pub telemetry: ProgressEmitter,
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(ScriptError::ContextField {
            field: field.to_string(),
            reason: "must be a non-empty string".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Build and validate the context for one execution attempt.
///
/// Each seed field fails with its own [`ScriptError::ContextField`]; limits
/// merge against the fixed defaults; the tool list is cloned.
pub fn build_script_context(
    seed: &ContextSeed,
    options: ContextOptions,
) -> Result<Arc<ScriptContext>> {
    require_non_empty("conversation_id", &seed.conversation_id)?;
    require_non_empty("session_id", &seed.session_id)?;
    require_non_empty("turn_id", &seed.turn_id)?;
    require_non_empty("working_directory", &seed.working_directory)?;
    require_non_empty("provider", &seed.provider)?;
    require_non_empty("model", &seed.model)?;
    require_non_empty("script_id", &options.script_id)?;

    for (i, tool) in seed.tools.iter().enumerate() {
        if tool.trim().is_empty() {
            return Err(ScriptError::ContextField {
                field: format!("tools[{}]", i),
                reason: "tool names must be non-empty strings".to_string(),
            });
        }
    }

    let mode: ExecutionMode = seed.mode.parse().map_err(|reason| ScriptError::ContextField {
        field: "mode".to_string(),
        reason,
    })?;

    let sandbox = SandboxState {
        timeout_ms: options.limits.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        memory_mb: options.limits.memory_mb.unwrap_or(DEFAULT_MEMORY_MB),
        remaining_tool_budget: options.remaining_tool_budget,
        max_concurrent_tool_calls: options
            .limits
            .max_concurrent_tool_calls
            .unwrap_or(DEFAULT_MAX_CONCURRENT_TOOL_CALLS),
        mode,
    };

    Ok(Arc::new(ScriptContext {
        identity: ScriptIdentity {
            conversation_id: seed.conversation_id.clone(),
            session_id: seed.session_id.clone(),
            turn_id: seed.turn_id.clone(),
            script_id: options.script_id,
        },
        environment: ScriptEnvironment {
            working_directory: seed.working_directory.clone(),
            provider: seed.provider.clone(),
            model: seed.model.clone(),
        },
        sandbox,
        capabilities: Capabilities {
            tools: seed.tools.clone(),
        },
        approvals: ApprovalPolicy {
            required: seed.approvals_required,
            last_request_id: None,
        },
        telemetry: ProgressEmitter::new(options.on_progress),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seed() -> ContextSeed {
        ContextSeed {
            conversation_id: "conv_1".to_string(),
            session_id: "sess_1".to_string(),
            turn_id: "turn_1".to_string(),
            working_directory: "/work".to_string(),
            provider: "anthropic".to_string(),
            model: "claude-sonnet".to_string(),
            tools: vec!["read_file".to_string(), "list_dir".to_string()],
            approvals_required: true,
            mode: "enabled".to_string(),
        }
    }

    fn options() -> ContextOptions {
        ContextOptions {
            script_id: "script_1".to_string(),
            remaining_tool_budget: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_valid_context() {
        let ctx = build_script_context(&seed(), options()).unwrap();
        assert_eq!(ctx.identity.script_id, "script_1");
        assert_eq!(ctx.sandbox.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(ctx.sandbox.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(ctx.sandbox.max_concurrent_tool_calls, 4);
        assert_eq!(ctx.sandbox.remaining_tool_budget, 10);
        assert_eq!(ctx.sandbox.mode, ExecutionMode::Enabled);
        assert!(ctx.approvals.required);
        assert!(ctx.approvals.last_request_id.is_none());
        assert_eq!(ctx.capabilities.tools.len(), 2);
    }

    #[test]
    fn test_each_missing_field_names_itself() {
        let cases: Vec<(&str, Box<dyn Fn(&mut ContextSeed)>)> = vec![
            ("conversation_id", Box::new(|s| s.conversation_id.clear())),
            ("session_id", Box::new(|s| s.session_id.clear())),
            ("turn_id", Box::new(|s| s.turn_id.clear())),
            ("working_directory", Box::new(|s| s.working_directory.clear())),
            ("provider", Box::new(|s| s.provider.clear())),
            ("model", Box::new(|s| s.model.clear())),
        ];

        for (field, mutate) in cases {
            let mut s = seed();
            mutate(&mut s);
            let err = build_script_context(&s, options()).unwrap_err();
            match err {
                ScriptError::ContextField { field: got, .. } => {
                    assert_eq!(got, field);
                }
                other => panic!("expected ContextField for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_empty_script_id_rejected() {
        let mut opts = options();
        opts.script_id = "  ".to_string();
        let err = build_script_context(&seed(), opts).unwrap_err();
        assert!(matches!(err, ScriptError::ContextField { ref field, .. } if field == "script_id"));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let mut s = seed();
        s.mode = "turbo".to_string();
        let err = build_script_context(&s, options()).unwrap_err();
        match err {
            ScriptError::ContextField { field, reason } => {
                assert_eq!(field, "mode");
                assert!(reason.contains("turbo"));
            }
            other => panic!("expected ContextField, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_tool_name_rejected() {
        let mut s = seed();
        s.tools.push(String::new());
        let err = build_script_context(&s, options()).unwrap_err();
        assert!(matches!(err, ScriptError::ContextField { ref field, .. } if field == "tools[2]"));
    }

    #[test]
    fn test_limits_merge_against_defaults() {
        let mut opts = options();
        opts.limits = LimitOverrides {
            timeout_ms: Some(5_000),
            memory_mb: None,
            max_concurrent_tool_calls: Some(2),
        };
        let ctx = build_script_context(&seed(), opts).unwrap();
        assert_eq!(ctx.sandbox.timeout_ms, 5_000);
        assert_eq!(ctx.sandbox.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(ctx.sandbox.max_concurrent_tool_calls, 2);
    }

    #[test]
    fn test_tool_list_cloned_not_aliased() {
        let mut s = seed();
        let ctx = build_script_context(&s, options()).unwrap();
        s.tools.push("write_file".to_string());
        assert_eq!(ctx.capabilities.tools.len(), 2);
    }

    #[test]
    fn test_emitter_without_callback_drops_everything() {
        let ctx = build_script_context(&seed(), options()).unwrap();
        assert!(!ctx.telemetry.emit_info("nobody listening"));
        assert_eq!(ctx.telemetry.forwarded_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitter_rate_limits_within_window() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut opts = options();
        opts.on_progress = Some(Arc::new(move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let ctx = build_script_context(&seed(), opts).unwrap();

        assert!(ctx.telemetry.emit_info("first"));
        assert!(!ctx.telemetry.emit_info("dropped, same window"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(501)).await;
        assert!(ctx.telemetry.emit_info("second window"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emitter_lifetime_cap() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut opts = options();
        opts.on_progress = Some(Arc::new(move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let ctx = build_script_context(&seed(), opts).unwrap();

        for _ in 0..60 {
            ctx.telemetry.emit_info("tick");
            tokio::time::advance(Duration::from_millis(600)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);
        assert_eq!(ctx.telemetry.forwarded_count(), 50);
    }

    #[test]
    fn test_emitter_truncates_long_messages() {
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_clone = seen.clone();
        let mut opts = options();
        opts.on_progress = Some(Arc::new(move |msg, _| {
            *seen_clone.lock().unwrap() = msg.to_string();
        }));
        let ctx = build_script_context(&seed(), opts).unwrap();

        let long = "m".repeat(2_000);
        assert!(ctx.telemetry.emit_info(&long));
        assert_eq!(seen.lock().unwrap().chars().count(), 1_000);
    }

    #[test]
    fn test_emitter_swallows_callback_panics() {
        let mut opts = options();
        opts.on_progress = Some(Arc::new(|_, _| panic!("host bug")));
        let ctx = build_script_context(&seed(), opts).unwrap();

        // Counted as forwarded; the panic never reaches the script
        assert!(ctx.telemetry.emit("still fine", ProgressKind::Warning));
        assert_eq!(ctx.telemetry.forwarded_count(), 1);
    }
}
