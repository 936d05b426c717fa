//! Error types for the toolscript harness
//!
//! Every failure the harness can produce derives from [`ScriptError`], which
//! carries a stable wire code, the execution phase it occurred in, and a
//! retryability classification. Parser and detector failures are returned as
//! values; facade and approval failures surface at the call site so a
//! script's own error handling can participate.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Phase of script processing in which an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Detection, lexical validation, context construction
    Parsing,
    /// Script running against the interpreter and tool facade
    Executing,
    /// Post-execution settlement and cleanup
    Finalizing,
}

/// Main error type for the script execution harness
#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    /// Lexical validation failures (unclosed strings, mismatched brackets)
    #[error("Script syntax error: {reason}")]
    ScriptSyntax {
        reason: String,
        position: Option<usize>,
    },

    /// Source exceeds the configured byte ceiling
    #[error("Script too large: {size_bytes} bytes exceeds maximum {max_bytes} bytes")]
    ScriptTooLarge { size_bytes: usize, max_bytes: usize },

    /// Banned identifiers found outside strings and comments
    #[error("Banned identifiers in script: {}", identifiers.join(", "))]
    BannedIdentifier { identifiers: Vec<String> },

    /// Wall-clock limit exceeded (reported by the interpreter)
    #[error("Script timed out after {timeout_ms}ms")]
    ScriptTimeout { timeout_ms: u64 },

    /// Memory limit exceeded (reported by the interpreter)
    #[error("Script exceeded memory limit of {memory_mb}MB")]
    MemoryLimit { memory_mb: u64 },

    /// Tool name not in the registry or not in the allowed list
    #[error("Tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// Tool rejected the supplied arguments
    #[error("Invalid arguments for tool {tool}: {}", errors.join("; "))]
    ToolValidation { tool: String, errors: Vec<String> },

    /// Tool execution failed, or tools are disabled for this script
    #[error("Tool {tool} failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// Per-script invocation budget exhausted
    #[error("Tool budget exceeded: maximum {max_invocations} invocations per script")]
    ToolBudgetExceeded { max_invocations: usize },

    /// Too many tool calls in flight at once
    #[error("Concurrency limit reached: maximum {max_concurrent} concurrent tool calls")]
    ConcurrencyLimit { max_concurrent: usize },

    /// Human reviewer denied the tool call
    #[error("Approval denied for tool {tool}{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ApprovalDenied {
        tool: String,
        reason: Option<String>,
    },

    /// No approval decision arrived in time
    #[error("Approval for tool {tool} timed out after {timeout_ms}ms")]
    ApprovalTimeout { tool: String, timeout_ms: u64 },

    /// Tool calls still pending after the settlement grace period
    #[error("Script finished with {} unsettled tool calls: {}", orphaned.len(), orphaned.join(", "))]
    DetachedPromise { orphaned: Vec<String> },

    /// Context seed or options failed validation
    #[error("Invalid context field {field}: {reason}")]
    ContextField { field: String, reason: String },

    /// Execution was cancelled before completion
    #[error("Script execution cancelled: {reason}")]
    Cancelled { reason: String },
}

impl ScriptError {
    /// Stable wire code, mirrored into `ErrorInfo.code`
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScriptSyntax { .. } => "ScriptSyntaxError",
            Self::ScriptTooLarge { .. } => "ScriptTooLargeError",
            Self::BannedIdentifier { .. } => "BannedIdentifierError",
            Self::ScriptTimeout { .. } => "ScriptTimeoutError",
            Self::MemoryLimit { .. } => "MemoryLimitError",
            Self::ToolNotFound { .. } => "ToolNotFoundError",
            Self::ToolValidation { .. } => "ToolValidationError",
            Self::ToolExecution { .. } => "ToolExecutionError",
            Self::ToolBudgetExceeded { .. } => "ToolBudgetExceededError",
            Self::ConcurrencyLimit { .. } => "ConcurrencyLimitError",
            Self::ApprovalDenied { .. } => "ApprovalDeniedError",
            Self::ApprovalTimeout { .. } => "ApprovalTimeoutError",
            Self::DetachedPromise { .. } => "DetachedPromiseError",
            Self::ContextField { .. } => "ContextFieldError",
            Self::Cancelled { .. } => "CancellationError",
        }
    }

    /// Phase the error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Self::ScriptSyntax { .. }
            | Self::ScriptTooLarge { .. }
            | Self::BannedIdentifier { .. }
            | Self::ContextField { .. } => Phase::Parsing,
            Self::DetachedPromise { .. } => Phase::Finalizing,
            _ => Phase::Executing,
        }
    }

    /// Whether resubmission with a fixed script may succeed.
    ///
    /// Non-retryable errors reproduce the same outcome for the same request:
    /// denials, exhausted budgets, banned identifiers, cancellation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ScriptSyntax { .. }
                | Self::ScriptTooLarge { .. }
                | Self::ScriptTimeout { .. }
                | Self::MemoryLimit { .. }
                | Self::ToolNotFound { .. }
                | Self::ToolValidation { .. }
        )
    }

    /// Structured metadata for reporting
    pub fn metadata(&self) -> Value {
        match self {
            Self::ScriptSyntax { reason, position } => {
                json!({ "reason": reason, "position": position })
            }
            Self::ScriptTooLarge {
                size_bytes,
                max_bytes,
            } => json!({ "sizeBytes": size_bytes, "maxBytes": max_bytes }),
            Self::BannedIdentifier { identifiers } => json!({ "identifiers": identifiers }),
            Self::ScriptTimeout { timeout_ms } => json!({ "timeoutMs": timeout_ms }),
            Self::MemoryLimit { memory_mb } => json!({ "memoryMb": memory_mb }),
            Self::ToolNotFound { tool } => json!({ "tool": tool }),
            Self::ToolValidation { tool, errors } => json!({ "tool": tool, "errors": errors }),
            Self::ToolExecution { tool, reason } => json!({ "tool": tool, "reason": reason }),
            Self::ToolBudgetExceeded { max_invocations } => {
                json!({ "maxInvocations": max_invocations })
            }
            Self::ConcurrencyLimit { max_concurrent } => {
                json!({ "maxConcurrent": max_concurrent })
            }
            Self::ApprovalDenied { tool, reason } => json!({ "tool": tool, "reason": reason }),
            Self::ApprovalTimeout { tool, timeout_ms } => {
                json!({ "tool": tool, "timeoutMs": timeout_ms })
            }
            Self::DetachedPromise { orphaned } => json!({ "orphanedPromises": orphaned }),
            Self::ContextField { field, reason } => json!({ "field": field, "reason": reason }),
            Self::Cancelled { reason } => json!({ "reason": reason }),
        }
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Normalized error shape for reporting across the interpreter boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&ScriptError> for ErrorInfo {
    fn from(err: &ScriptError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            stack: None,
        }
    }
}

/// Normalize an arbitrary error value into an [`ErrorInfo`].
///
/// Interpreters report failures as JSON: a string, a `{code, message}` shaped
/// object, or anything else. Unrecognized shapes get code `"UnknownError"`.
pub fn extract_error_info(value: &Value) -> ErrorInfo {
    match value {
        Value::String(message) => ErrorInfo {
            code: "UnknownError".to_string(),
            message: message.clone(),
            stack: None,
        },
        Value::Object(map) => {
            let code = map
                .get("code")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("UnknownError")
                .to_string();
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            let stack = map
                .get("stack")
                .and_then(Value::as_str)
                .map(str::to_string);
            ErrorInfo {
                code,
                message,
                stack,
            }
        }
        other => ErrorInfo {
            code: "UnknownError".to_string(),
            message: other.to_string(),
            stack: None,
        },
    }
}

/// Normalize any host-side error, preserving typed codes where present
pub fn extract_error_info_from(err: &(dyn std::error::Error + 'static)) -> ErrorInfo {
    if let Some(script_err) = err.downcast_ref::<ScriptError>() {
        ErrorInfo::from(script_err)
    } else {
        ErrorInfo {
            code: "UnknownError".to_string(),
            message: err.to_string(),
            stack: None,
        }
    }
}
