//! Per-attempt assembly and execution
//!
//! Ties the pieces together for one model response: detect blocks, parse
//! each one, assemble a fresh tracker/bridge/context/facade set, hand the
//! source to the interpreter, then settle outstanding calls and collect
//! partial results. Nothing is shared between attempts.

use crate::approval::{ApprovalBridge, ApprovalRequest};
use crate::config::ScriptConfig;
use crate::context::{
    build_script_context, ContextOptions, ContextSeed, LimitOverrides, ProgressCallback,
};
use crate::detector::detect_script_blocks;
use crate::errors::ErrorInfo;
use crate::interpreter::{ExecutionLimits, ScriptInterpreter, ScriptOutcome};
use crate::parser::{parse_script, ParseOptions};
use crate::tools::{ToolRegistry, ToolsFacade};
use crate::tracker::{CallTracker, CompletedCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Default grace for outstanding tool calls after the interpreter returns
pub const DEFAULT_SETTLE_GRACE: Duration = Duration::from_millis(1_000);

/// Host callback for approval requests. Receives the sanitized request and
/// a handle to the bridge that issued it, for delivering the decision via
/// `ApprovalBridge::on_user_response`.
pub type ApprovalDispatcher = Arc<dyn Fn(ApprovalRequest, ApprovalBridge) + Send + Sync>;

/// Result of executing one detected script block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    /// Position of the block in the model response
    pub block_index: usize,

    /// SHA-256 of the executed source; empty when parsing failed
    pub source_hash: String,

    pub success: bool,

    /// Script return value on success
    pub return_value: Option<Value>,

    /// Normalized failure, from any phase
    pub error: Option<ErrorInfo>,

    /// Successfully resolved tool calls in registration order; populated
    /// even when the script failed partway through
    pub completed_calls: Vec<CompletedCall>,

    pub duration_ms: u64,
}

/// Everything that happened for one model response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub attempts: Vec<AttemptReport>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.attempts.iter().all(|a| a.success)
    }
}

/// Orchestrates script execution attempts.
///
/// One harness serves a conversation; each attempt gets its own
/// tracker/bridge/context/facade set.
pub struct ScriptHarness {
    registry: Arc<ToolRegistry>,
    interpreter: Arc<dyn ScriptInterpreter>,
    config: ScriptConfig,
    seed: ContextSeed,
    on_approval: Option<ApprovalDispatcher>,
    on_progress: Option<ProgressCallback>,
    settle_grace: Duration,
}

impl ScriptHarness {
    pub fn new(
        registry: Arc<ToolRegistry>,
        interpreter: Arc<dyn ScriptInterpreter>,
        config: ScriptConfig,
        seed: ContextSeed,
    ) -> Self {
        Self {
            registry,
            interpreter,
            config,
            seed,
            on_approval: None,
            on_progress: None,
            settle_grace: DEFAULT_SETTLE_GRACE,
        }
    }

    /// Route approval requests to the given dispatcher; without one,
    /// approval gating is skipped entirely
    pub fn with_approval_handler(mut self, handler: ApprovalDispatcher) -> Self {
        self.on_approval = Some(handler);
        self
    }

    /// Forward script progress messages to the given callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Override the post-execution settlement grace
    pub fn with_settle_grace(mut self, grace: Duration) -> Self {
        self.settle_grace = grace;
        self
    }

    /// Detect and execute every script block in a model response
    pub async fn run_text(&self, text: &str) -> RunReport {
        let blocks = detect_script_blocks(text);
        let mut attempts = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            attempts.push(self.run_block(index, &block.code).await);
        }
        RunReport { attempts }
    }

    /// Execute one script block through the full pipeline
    pub async fn run_block(&self, block_index: usize, code: &str) -> AttemptReport {
        let started = Instant::now();

        let parse_opts = ParseOptions {
            max_source_bytes: self.config.max_source_bytes,
        };
        let parsed = match parse_script(code, Some(parse_opts)) {
            Ok(parsed) => parsed,
            Err(err) => {
                // Parser failures are data, not panics
                return AttemptReport {
                    block_index,
                    source_hash: String::new(),
                    success: false,
                    return_value: None,
                    error: Some(ErrorInfo::from(&err)),
                    completed_calls: Vec::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let attempt_id = format!("{}_{}", self.config.script_id, block_index);
        let tracker = CallTracker::new(self.config.max_concurrent_tool_calls);
        let bridge = self.on_approval.as_ref().map(|dispatch| {
            let dispatch = dispatch.clone();
            // The handler needs the bridge it belongs to; close the cycle
            // through a cell that is filled before execution starts.
            let cell: Arc<OnceLock<ApprovalBridge>> = Arc::new(OnceLock::new());
            let handler_cell = cell.clone();
            let bridge = ApprovalBridge::with_timeout(
                move |req| {
                    if let Some(bridge) = handler_cell.get() {
                        dispatch(req, bridge.clone());
                    }
                },
                self.config.approval_timeout_ms,
            );
            let _ = cell.set(bridge.clone());
            bridge
        });

        let context = match build_script_context(
            &self.seed,
            ContextOptions {
                script_id: attempt_id.clone(),
                remaining_tool_budget: self.config.max_tool_invocations,
                limits: LimitOverrides {
                    max_concurrent_tool_calls: Some(self.config.max_concurrent_tool_calls),
                    ..Default::default()
                },
                on_progress: self.on_progress.clone(),
            },
        ) {
            Ok(context) => context,
            Err(err) => {
                return AttemptReport {
                    block_index,
                    source_hash: parsed.source_hash,
                    success: false,
                    return_value: None,
                    error: Some(ErrorInfo::from(&err)),
                    completed_calls: Vec::new(),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let mut attempt_config = self.config.clone();
        attempt_config.script_id = attempt_id;
        let facade = ToolsFacade::new(
            self.registry.clone(),
            tracker.clone(),
            attempt_config,
            bridge.clone(),
        );

        let limits = ExecutionLimits::from(&context.sandbox);
        let outcome = self
            .interpreter
            .execute(&parsed.source_code, context, &facade, &limits)
            .await;

        let settle_result = tracker.ensure_all_settled(self.settle_grace).await;
        if let Some(bridge) = &bridge {
            bridge.cancel_all();
        }

        // Execution errors win over settlement errors
        let (success, return_value, error) = match (&outcome, settle_result) {
            (ScriptOutcome::Success { return_value, .. }, Ok(())) => {
                (true, Some(return_value.clone()), None)
            }
            (ScriptOutcome::Success { .. }, Err(settle_err)) => {
                (false, None, Some(ErrorInfo::from(&settle_err)))
            }
            _ => (false, None, outcome.error_info()),
        };

        AttemptReport {
            block_index,
            source_hash: parsed.source_hash,
            success,
            return_value,
            error,
            completed_calls: tracker.completed_results(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
