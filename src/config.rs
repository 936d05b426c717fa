//! Harness configuration
//!
//! One [`ScriptConfig`] governs a single script execution attempt: which
//! tools are reachable, how many calls the script may make, how many may run
//! at once, and how the harness behaves around approval and source size.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Execution mode for tool calls made by a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Every tool call fails immediately
    Disabled,
    /// Tool calls return a simulated result without side effects
    DryRun,
    /// Tool calls run for real
    Enabled,
}

impl ExecutionMode {
    /// String form used in context seeds and wire payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::DryRun => "dry-run",
            Self::Enabled => "enabled",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "dry-run" => Ok(Self::DryRun),
            "enabled" => Ok(Self::Enabled),
            other => Err(format!(
                "invalid mode '{}': expected disabled, dry-run, or enabled",
                other
            )),
        }
    }
}

/// Configuration for one script execution attempt
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Tool names the script may call (capability table)
    pub allowed_tools: Vec<String>,

    /// Maximum tool invocations for the whole script
    pub max_tool_invocations: usize,

    /// Maximum tool calls in flight at once
    pub max_concurrent_tool_calls: usize,

    /// Identifier of the script being executed
    pub script_id: String,

    /// Execution mode
    pub mode: ExecutionMode,

    /// How long to wait for a human approval decision
    pub approval_timeout_ms: u64,

    /// Maximum script source size in bytes
    pub max_source_bytes: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            allowed_tools: Vec::new(),
            max_tool_invocations: 10,
            max_concurrent_tool_calls: 4,
            script_id: "script_0".to_string(),
            mode: ExecutionMode::Enabled,
            approval_timeout_ms: 60_000,
            max_source_bytes: 20_000,
        }
    }
}

impl ScriptConfig {
    /// Create config for a named script with the given capability list
    pub fn new(script_id: impl Into<String>, allowed_tools: Vec<String>) -> Self {
        Self {
            script_id: script_id.into(),
            allowed_tools,
            ..Default::default()
        }
    }

    /// Set invocation budget
    pub fn with_max_invocations(mut self, max: usize) -> Self {
        self.max_tool_invocations = max;
        self
    }

    /// Set concurrency ceiling
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_tool_calls = max;
        self
    }

    /// Set execution mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set approval timeout
    pub fn with_approval_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.approval_timeout_ms = timeout_ms;
        self
    }

    /// Set source size ceiling
    pub fn with_max_source_bytes(mut self, max: usize) -> Self {
        self.max_source_bytes = max;
        self
    }

    /// Whether a tool name is in the capability table
    pub fn allows_tool(&self, name: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == name)
    }
}
