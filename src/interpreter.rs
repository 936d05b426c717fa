//! Interpreter boundary
//!
//! The harness validates scripts and assembles their execution environment;
//! actually running the source is an external concern behind
//! [`ScriptInterpreter`]. Implementations receive the frozen context, the
//! policy-enforced tool facade, and the sandbox limits, and report a single
//! [`ScriptOutcome`].

use crate::context::{SandboxState, ScriptContext};
use crate::errors::{extract_error_info, ErrorInfo};
use crate::tools::ToolsFacade;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Resource limits the interpreter must enforce
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Total wall-clock budget for the script
    pub timeout_ms: u64,
    /// Heap ceiling for the VM
    pub memory_mb: u64,
}

impl From<&SandboxState> for ExecutionLimits {
    fn from(sandbox: &SandboxState) -> Self {
        Self {
            timeout_ms: sandbox.timeout_ms,
            memory_mb: sandbox.memory_mb,
        }
    }
}

/// Measurements reported back by the interpreter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

/// Terminal result of one interpreter run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptOutcome {
    Success {
        return_value: Value,
        metadata: ExecutionMetadata,
    },
    Failure {
        error: Value,
        metadata: ExecutionMetadata,
    },
}

impl ScriptOutcome {
    pub fn ok(&self) -> bool {
        matches!(self, ScriptOutcome::Success { .. })
    }

    pub fn metadata(&self) -> &ExecutionMetadata {
        match self {
            ScriptOutcome::Success { metadata, .. } => metadata,
            ScriptOutcome::Failure { metadata, .. } => metadata,
        }
    }

    /// Normalized error for failed outcomes
    pub fn error_info(&self) -> Option<ErrorInfo> {
        match self {
            ScriptOutcome::Success { .. } => None,
            ScriptOutcome::Failure { error, .. } => Some(extract_error_info(error)),
        }
    }
}

/// External VM that runs validated source against a frozen context.
///
/// The interpreter owns the wall-clock timeout (`limits.timeout_ms`); the
/// harness owns the other two timeouts (approval wait, settlement grace).
#[async_trait]
pub trait ScriptInterpreter: Send + Sync {
    async fn execute(
        &self,
        source: &str,
        context: Arc<ScriptContext>,
        tools: &ToolsFacade,
        limits: &ExecutionLimits,
    ) -> ScriptOutcome;
}
