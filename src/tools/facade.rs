//! Policy-enforced tool call surface
//!
//! The facade is what a running script actually calls. Every invocation runs
//! the same pipeline: mode gate, argument validation, budget, concurrency,
//! approval, then execution with a fresh cancellation token registered in
//! the tracker. Calls rejected by any gate never reach the tool.
//!
//! There is no dynamic-dispatch hook to intercept here: the capability table
//! is explicit, `call` is the single entry point, and unknown names fail
//! with `ToolNotFoundError` before any async work. Immutability of the
//! surface is by construction; nothing can be assigned or deleted.

use crate::approval::{ApprovalBridge, ApprovalQuery};
use crate::config::{ExecutionMode, ScriptConfig};
use crate::errors::{Result, ScriptError};
use crate::tools::registry::ToolRegistry;
use crate::tracker::CallTracker;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// The `tools` object handed to the interpreter for one script execution.
///
/// Single-use: one facade per attempt, sharing its tracker and bridge with
/// nothing else.
pub struct ToolsFacade {
    registry: Arc<ToolRegistry>,
    tracker: CallTracker,
    config: ScriptConfig,
    bridge: Option<ApprovalBridge>,
    used_invocations: Arc<Mutex<usize>>,
}

impl ToolsFacade {
    pub fn new(
        registry: Arc<ToolRegistry>,
        tracker: CallTracker,
        config: ScriptConfig,
        bridge: Option<ApprovalBridge>,
    ) -> Self {
        Self {
            registry,
            tracker,
            config,
            bridge,
            used_invocations: Arc::new(Mutex::new(0)),
        }
    }

    /// Whether `name` is callable through this facade
    pub fn has_tool(&self, name: &str) -> bool {
        self.config.allows_tool(name) && self.registry.contains(name)
    }

    /// Callable tool names, the script-visible capability list
    pub fn tool_names(&self) -> Vec<String> {
        self.config
            .allowed_tools
            .iter()
            .filter(|name| self.registry.contains(name.as_str()))
            .cloned()
            .collect()
    }

    /// Invocations left in this script's budget
    pub fn remaining_budget(&self) -> usize {
        self.config
            .max_tool_invocations
            .saturating_sub(*self.used_invocations.lock().unwrap())
    }

    /// The tracker shared with this facade
    pub fn tracker(&self) -> &CallTracker {
        &self.tracker
    }

    /// Invoke a tool on behalf of the script.
    ///
    /// # Pipeline
    /// 1. name lookup: unknown or unlisted names fail before any async work
    /// 2. mode: disabled fails, dry-run returns a simulated result
    /// 3. argument validation
    /// 4. budget: exhausted fails here; a unit is consumed only once the
    ///    call passes every gate, so rejected calls burn nothing
    /// 5. concurrency: rejected immediately, never queued
    /// 6. approval: only if the tool asks and a bridge is configured; the
    ///    wait holds no concurrency slot
    /// 7. execution on a spawned task with a fresh tracked token, so
    ///    settlement is recorded even when the caller abandons the future
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        if !self.has_tool(name) {
            return Err(ScriptError::ToolNotFound {
                tool: name.to_string(),
            });
        }
        // has_tool guarantees presence
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ScriptError::ToolNotFound {
                tool: name.to_string(),
            })?;

        match self.config.mode {
            ExecutionMode::Disabled => {
                return Err(ScriptError::ToolExecution {
                    tool: name.to_string(),
                    reason: "tool execution is disabled for this script".to_string(),
                });
            }
            ExecutionMode::DryRun => {
                // No tool, no budget, no tracker, no approval bridge
                return Ok(json!({
                    "__dryRun": true,
                    "toolName": name,
                    "args": args,
                    "message": format!("Dry run: {} was not executed", name),
                }));
            }
            ExecutionMode::Enabled => {}
        }

        let validation = tool.validate_args(&args);
        if !validation.valid {
            return Err(ScriptError::ToolValidation {
                tool: name.to_string(),
                errors: validation.errors,
            });
        }

        self.check_budget()?;

        if self.tracker.is_at_concurrency_limit() {
            return Err(ScriptError::ConcurrencyLimit {
                max_concurrent: self.tracker.max_concurrent(),
            });
        }

        if tool.requires_approval(&args) {
            if let Some(bridge) = &self.bridge {
                let approved = bridge
                    .request_approval(ApprovalQuery {
                        tool_name: name.to_string(),
                        args: args.clone(),
                        script_id: self.config.script_id.clone(),
                        // Ledger ids are assigned at execution; a call
                        // awaiting a decision has none yet
                        tool_call_id: "pending".to_string(),
                        context: None,
                    })
                    .await?;
                if !approved {
                    return Err(ScriptError::ApprovalDenied {
                        tool: name.to_string(),
                        reason: None,
                    });
                }
            }
        }

        self.consume_budget()?;

        let token = CancellationToken::new();
        let call_id = self.tracker.register(name, token.clone());

        // Drive execution on its own task: settlement lands in the tracker
        // even if the script never awaits this call.
        let tracker = self.tracker.clone();
        let task_id = call_id.clone();
        let handle = tokio::spawn(async move {
            match tool.execute(args, token).await {
                Ok(value) => {
                    tracker.mark_complete(&task_id, value.clone());
                    Ok(value)
                }
                Err(err) => {
                    let message = err.to_string();
                    tracker.mark_failed(&task_id, message.clone());
                    Err(message)
                }
            }
        });

        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ScriptError::ToolExecution {
                tool: name.to_string(),
                reason: message,
            }),
            Err(join_err) => {
                let reason = format!("tool task failed: {}", join_err);
                self.tracker.mark_failed(&call_id, reason.clone());
                Err(ScriptError::ToolExecution {
                    tool: name.to_string(),
                    reason,
                })
            }
        }
    }

    fn check_budget(&self) -> Result<()> {
        let used = self.used_invocations.lock().unwrap();
        if *used >= self.config.max_tool_invocations {
            return Err(ScriptError::ToolBudgetExceeded {
                max_invocations: self.config.max_tool_invocations,
            });
        }
        Ok(())
    }

    fn consume_budget(&self) -> Result<()> {
        let mut used = self.used_invocations.lock().unwrap();
        if *used >= self.config.max_tool_invocations {
            return Err(ScriptError::ToolBudgetExceeded {
                max_invocations: self.config.max_tool_invocations,
            });
        }
        *used += 1;
        Ok(())
    }
}
