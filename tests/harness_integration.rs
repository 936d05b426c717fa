//! Integration tests for the script execution harness
//!
//! Runs the full pipeline end to end with a stub interpreter and stub tools:
//! detection, parsing, context assembly, the facade call pipeline, approval
//! gating, and post-execution settlement.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolscript::context::{ContextSeed, ScriptContext};
use toolscript::interpreter::{ExecutionLimits, ExecutionMetadata};
use toolscript::tools::registry::ArgValidation;
use toolscript::{
    ApprovalBridge, ScriptConfig, ScriptHarness, ScriptInterpreter, ScriptOutcome, Tool,
    ToolRegistry, ToolsFacade,
};

/// Tool that echoes its arguments and counts executions
struct CountingTool {
    name: String,
    executions: Arc<AtomicUsize>,
    needs_approval: bool,
}

impl CountingTool {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            executions: Arc::new(AtomicUsize::new(0)),
            needs_approval: false,
        }
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: Value, _signal: CancellationToken) -> anyhow::Result<Value> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"tool": self.name, "args": args}))
    }

    fn validate_args(&self, args: &Value) -> ArgValidation {
        if args.is_object() {
            ArgValidation::valid()
        } else {
            ArgValidation::invalid(vec!["arguments must be an object".to_string()])
        }
    }

    fn requires_approval(&self, _args: &Value) -> bool {
        self.needs_approval
    }
}

/// Interpreter that reads one call per line: `tool_name {json args}`
struct CommandInterpreter;

#[async_trait]
impl ScriptInterpreter for CommandInterpreter {
    async fn execute(
        &self,
        source: &str,
        _context: Arc<ScriptContext>,
        tools: &ToolsFacade,
        _limits: &ExecutionLimits,
    ) -> ScriptOutcome {
        let mut results = Vec::new();
        for line in source.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (name, rest) = line.split_once(' ').unwrap_or((line, "{}"));
            let args: Value = serde_json::from_str(rest).unwrap_or(json!({}));
            match tools.call(name, args).await {
                Ok(value) => results.push(value),
                Err(err) => {
                    return ScriptOutcome::Failure {
                        error: json!({"code": err.code(), "message": err.to_string()}),
                        metadata: ExecutionMetadata::default(),
                    };
                }
            }
        }
        ScriptOutcome::Success {
            return_value: json!(results),
            metadata: ExecutionMetadata::default(),
        }
    }
}

fn seed(approvals_required: bool) -> ContextSeed {
    ContextSeed {
        conversation_id: "conv_42".to_string(),
        session_id: "sess_42".to_string(),
        turn_id: "turn_1".to_string(),
        working_directory: "/project".to_string(),
        provider: "anthropic".to_string(),
        model: "claude-sonnet".to_string(),
        tools: vec!["read_file".to_string(), "write_file".to_string()],
        approvals_required,
        mode: "enabled".to_string(),
    }
}

fn build_harness(tools: Vec<CountingTool>, config: ScriptConfig) -> ScriptHarness {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(Arc::new(tool));
    }
    ScriptHarness::new(
        Arc::new(registry),
        Arc::new(CommandInterpreter),
        config,
        seed(false),
    )
    .with_settle_grace(Duration::from_millis(100))
}

#[tokio::test]
async fn test_full_pipeline_success() {
    let read = CountingTool::named("read_file");
    let reads = read.executions.clone();
    let config = ScriptConfig::new(
        "script_main",
        vec!["read_file".to_string(), "write_file".to_string()],
    );
    let harness = build_harness(vec![read, CountingTool::named("write_file")], config);

    let text = concat!(
        "Let me look at those files.\n",
        "<tool-calls>\n",
        "read_file {\"path\": \"a.txt\"}\n",
        "write_file {\"path\": \"b.txt\", \"content\": \"hi\"}\n",
        "</tool-calls>\n",
        "Done."
    );
    let report = harness.run_text(text).await;

    assert_eq!(report.attempts.len(), 1);
    let attempt = &report.attempts[0];
    assert!(attempt.success, "unexpected error: {:?}", attempt.error);
    assert_eq!(attempt.completed_calls.len(), 2);
    assert_eq!(attempt.completed_calls[0].tool_name, "read_file");
    assert_eq!(attempt.completed_calls[1].tool_name, "write_file");
    assert_eq!(attempt.source_hash.len(), 64);
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let results = attempt.return_value.as_ref().unwrap().as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["args"]["path"], "a.txt");
}

#[tokio::test]
async fn test_multiple_blocks_run_independently() {
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()])
        .with_max_invocations(1);
    let harness = build_harness(vec![CountingTool::named("read_file")], config);

    let text = concat!(
        "<tool-calls>read_file {\"path\": \"a\"}</tool-calls>",
        " and ",
        "<tool-calls>read_file {\"path\": \"b\"}</tool-calls>"
    );
    let report = harness.run_text(text).await;

    // Each block gets its own budget and tracker
    assert_eq!(report.attempts.len(), 2);
    assert!(report.all_succeeded());
    assert_ne!(report.attempts[0].source_hash, report.attempts[1].source_hash);
}

#[tokio::test]
async fn test_banned_identifier_rejected_before_execution() {
    let read = CountingTool::named("read_file");
    let executions = read.executions.clone();
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()]);
    let harness = build_harness(vec![read], config);

    let report = harness
        .run_text("<tool-calls>require(\"fs\")</tool-calls>")
        .await;

    let attempt = &report.attempts[0];
    assert!(!attempt.success);
    let error = attempt.error.as_ref().unwrap();
    assert_eq!(error.code, "BannedIdentifierError");
    assert!(error.message.contains("require"));
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_tool_fails_but_prior_results_survive() {
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()]);
    let harness = build_harness(vec![CountingTool::named("read_file")], config);

    let report = harness
        .run_block(0, "read_file {\"path\": \"a\"}\nnot_a_tool {}")
        .await;

    assert!(!report.success);
    assert_eq!(report.error.as_ref().unwrap().code, "ToolNotFoundError");
    // The first call completed before the failure
    assert_eq!(report.completed_calls.len(), 1);
    assert_eq!(report.completed_calls[0].tool_name, "read_file");
}

#[tokio::test]
async fn test_validation_failure_surfaces_as_tool_validation() {
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()]);
    let harness = build_harness(vec![CountingTool::named("read_file")], config);

    let report = harness.run_block(0, "read_file 7").await;

    assert!(!report.success);
    assert_eq!(report.error.as_ref().unwrap().code, "ToolValidationError");
}

fn gated_harness(dispatcher: toolscript::ApprovalDispatcher) -> (ScriptHarness, Arc<AtomicUsize>) {
    let mut gated = CountingTool::named("write_file");
    gated.needs_approval = true;
    let executions = gated.executions.clone();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(gated));

    let harness = ScriptHarness::new(
        Arc::new(registry),
        Arc::new(CommandInterpreter),
        ScriptConfig::new("script_main", vec!["write_file".to_string()])
            .with_approval_timeout_ms(5_000),
        seed(true),
    )
    .with_settle_grace(Duration::from_millis(100))
    .with_approval_handler(dispatcher);
    (harness, executions)
}

#[tokio::test]
async fn test_approval_granted_end_to_end() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let (harness, executions) = gated_harness(Arc::new(move |req, bridge: ApprovalBridge| {
        seen_clone.lock().unwrap().push(req.tool_name.clone());
        bridge.on_user_response(&req.request_id, true, None);
    }));

    let report = harness.run_block(0, "write_file {\"path\": \"x\"}").await;

    assert!(report.success, "unexpected error: {:?}", report.error);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["write_file".to_string()]);
}

#[tokio::test]
async fn test_approval_denied_end_to_end() {
    let (harness, executions) = gated_harness(Arc::new(|req, bridge: ApprovalBridge| {
        bridge.on_user_response(&req.request_id, false, Some("not in this directory"));
    }));

    let report = harness.run_block(0, "write_file {\"path\": \"x\"}").await;

    assert!(!report.success);
    assert_eq!(report.error.as_ref().unwrap().code, "ApprovalDeniedError");
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    // The denied call never reached execution, so nothing was tracked
    assert!(report.completed_calls.is_empty());
}

#[tokio::test]
async fn test_approval_request_carries_sanitized_args() {
    let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let captured_clone = captured.clone();
    let (harness, _executions) = gated_harness(Arc::new(move |req, bridge: ApprovalBridge| {
        *captured_clone.lock().unwrap() = Some(req.sanitized_args.clone());
        bridge.on_user_response(&req.request_id, true, None);
    }));

    let report = harness
        .run_block(0, "write_file {\"path\": \"x\", \"api_token\": \"sk-123\"}")
        .await;

    assert!(report.success);
    let args = captured.lock().unwrap().clone().unwrap();
    assert_eq!(args["path"], "x");
    assert_eq!(args["api_token"], "<redacted>");
}

#[tokio::test]
async fn test_dry_run_simulates_without_executing() {
    let tool = CountingTool::named("read_file");
    let executions = tool.executions.clone();
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()])
        .with_mode(toolscript::ExecutionMode::DryRun);
    let harness = build_harness(vec![tool], config);

    let report = harness.run_block(0, "read_file {\"path\": \"a\"}").await;

    assert!(report.success);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
    let results = report.return_value.unwrap();
    assert_eq!(results[0]["__dryRun"], true);
    assert_eq!(results[0]["toolName"], "read_file");
}

#[tokio::test]
async fn test_plain_text_produces_empty_report() {
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()]);
    let harness = build_harness(vec![CountingTool::named("read_file")], config);

    let report = harness
        .run_text("Just narration, no script block here.")
        .await;
    assert!(report.attempts.is_empty());
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let config = ScriptConfig::new("script_main", vec!["read_file".to_string()]);
    let harness = build_harness(vec![CountingTool::named("read_file")], config);

    let report = harness
        .run_text("<tool-calls>read_file {\"path\": \"a\"}</tool-calls>")
        .await;
    let encoded = serde_json::to_value(&report).unwrap();
    assert_eq!(encoded["attempts"][0]["success"], true);
    assert_eq!(
        encoded["attempts"][0]["completed_calls"][0]["tool_name"],
        "read_file"
    );
}
