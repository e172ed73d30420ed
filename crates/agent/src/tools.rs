use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("tool `{tool}` timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },
    #[error("tool `{tool}` failed: {message}")]
    Failed { tool: String, message: String },
}

/// Catalog of invocable tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(
        &self,
        tool_name: &str,
        parameters: Value,
        timeout: Duration,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        debug!(
            event_name = "agent.tools.invoke",
            tool_name,
            timeout_ms = timeout.as_millis() as u64,
            "invoking tool"
        );

        match tokio::time::timeout(timeout, tool.execute(parameters)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                Err(ToolError::Failed { tool: tool_name.to_string(), message: error.to_string() })
            }
            Err(_) => Err(ToolError::Timeout {
                tool: tool_name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}

/// Stand-in tool that acknowledges its input. Used by the CLI and smoke checks.
#[derive(Clone, Debug)]
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let message = input.get("message").and_then(Value::as_str).unwrap_or_default();
        Ok(json!({
            "tool": self.name,
            "status": "ok",
            "summary": format!("{} handled: {message}", self.name),
        }))
    }
}
