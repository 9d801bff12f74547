//! Tool abstraction for model function calling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::llm::ToolDefinition;

/// A capability the model may invoke.
///
/// `execute` never fails at the type level: internal errors are reported to
/// the model as an `{"error": ...}` value so a broken collaborator cannot
/// abort the conversation turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> serde_json::Value;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool under its name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Run a named tool; unknown names come back as an error value.
    pub async fn execute(&self, name: &str, params: serde_json::Value) -> serde_json::Value {
        match self.get(name).await {
            Some(tool) => tool.execute(params).await,
            None => {
                tracing::warn!(tool = %name, "Model requested an unknown tool");
                serde_json::json!({"error": format!("unknown tool: {name}")})
            }
        }
    }

    /// Tool definitions for model function calling.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
