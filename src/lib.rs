//! toolscript - Script Execution Harness
//!
//! Lets a language model emit one bounded script per response instead of a
//! chain of single tool calls. The harness detects the script block, runs
//! lexical safety checks, assembles an immutable execution context, and hands
//! the source to an external interpreter together with a policy-enforced
//! tool facade.
//!
//! # Architecture
//!
//! - **Detection**: `<tool-calls>` block extraction and segmentation
//! - **Parsing**: lexical validation, banned identifiers, source hashing
//! - **Tracking**: tool call lifecycle and post-execution settlement
//! - **Approval**: human-in-the-loop gating with sanitized arguments
//! - **Context**: frozen per-attempt execution context
//! - **Tools**: registry, capability table, and call pipeline
//! - **Harness**: per-attempt assembly and reporting

pub mod errors;
pub mod config;
pub mod detector;
pub mod parser;
pub mod tracker;
pub mod approval;
pub mod context;
pub mod tools;
pub mod interpreter;
pub mod harness;

// Re-export commonly used types
pub use errors::{ErrorInfo, Phase, Result, ScriptError};
pub use config::{ExecutionMode, ScriptConfig};
pub use detector::{detect_script_blocks, ScriptBlock};
pub use parser::{parse_script, ParsedScript};
pub use tracker::{CallStatus, CallTracker, CompletedCall};
pub use approval::{ApprovalBridge, ApprovalHandler, ApprovalRequest};
pub use context::{build_script_context, ContextSeed, ProgressCallback, ScriptContext};
pub use tools::{Tool, ToolRegistry, ToolsFacade};
pub use interpreter::{ExecutionLimits, ScriptInterpreter, ScriptOutcome};
pub use harness::{ApprovalDispatcher, AttemptReport, RunReport, ScriptHarness};
