//! Tool registry and the external tool contract
//!
//! Concrete tool implementations live outside the harness; they plug in
//! through the [`Tool`] trait and are looked up by name. The registry is the
//! full set of installed tools; the per-script capability table
//! (`ScriptConfig::allowed_tools`) narrows it further.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of argument validation
#[derive(Debug, Clone, Default)]
pub struct ArgValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ArgValidation {
    /// Arguments accepted
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Arguments rejected with reasons
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Contract every tool implementation satisfies.
///
/// `execute` receives a cancellation token; cancellation is cooperative and
/// the tool is responsible for honoring it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registered tool name
    fn name(&self) -> &str;

    /// Run the tool against validated arguments
    async fn execute(&self, args: Value, signal: CancellationToken) -> anyhow::Result<Value>;

    /// Check arguments before execution; accepts everything by default
    fn validate_args(&self, _args: &Value) -> ArgValidation {
        ArgValidation::valid()
    }

    /// Whether this call needs a human decision before executing
    fn requires_approval(&self, _args: &Value) -> bool {
        false
    }
}

/// Lookup table of installed tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a tool under its own name, replacing any previous entry
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is installed
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All installed tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Number of installed tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            args: Value,
            _signal: CancellationToken,
        ) -> anyhow::Result<Value> {
            Ok(args)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(!registry.contains("missing"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_tool_defaults() {
        let tool = EchoTool;
        assert!(tool.validate_args(&json!({})).valid);
        assert!(!tool.requires_approval(&json!({})));
    }

    #[tokio::test]
    async fn test_execute_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let tool = registry.get("echo").unwrap();
        let out = tool
            .execute(json!({"hello": "world"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out["hello"], "world");
    }
}
