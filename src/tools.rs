//! Tools the agent can call.
//!
//! A [`Tool`] describes itself to the language model (name, description,
//! JSON Schema of its parameters) and executes with the arguments the model
//! supplies. The agent dispatches by name through a fixed [`ToolRegistry`].
//!
//! The only built-in tool is [`SearchDocumentsTool`], which answers a
//! question from the document index.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::BuddyError;
use crate::models::ToolDefinition;
use crate::retrieval::RetrievalEngine;

/// A capability the agent can invoke.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use boardgame_buddy::tools::Tool;
///
/// pub struct DiceTool;
///
/// #[async_trait]
/// impl Tool for DiceTool {
///     fn name(&self) -> &str { "roll_dice" }
///     fn description(&self) -> &str { "Roll a six-sided die" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {}, "required": [] })
///     }
///
///     async fn execute(&self, _params: Value) -> Result<Value> {
///         Ok(json!(4))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"search_documents"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call the tool.
    fn description(&self) -> &str;

    /// Function-calling JSON Schema for the parameters.
    ///
    /// Must be an object schema with `properties` and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Execute with the model-supplied arguments (always a JSON object).
    ///
    /// Errors that wrap a [`BuddyError`] keep their variant when the agent
    /// reports them; any other error becomes [`BuddyError::ToolInvocation`].
    async fn execute(&self, params: Value) -> Result<Value>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Answers a board game question from the indexed documents.
pub struct SearchDocumentsTool {
    engine: Arc<RetrievalEngine>,
}

impl SearchDocumentsTool {
    pub const NAME: &'static str = "search_documents";

    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Searches the board game documents (rules, player counts, durations, \
         strategies) and returns an answer based only on their content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user's question about a board game"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("").trim();
        if query.is_empty() {
            return Err(BuddyError::ToolInvocation {
                tool: Self::NAME.to_string(),
                message: "query must not be empty".to_string(),
            }
            .into());
        }

        let result = self.engine.retrieve(query).await?;
        Ok(Value::String(result.answer))
    }
}

/// Tools available to the agent, looked up by name.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding only the document search tool.
    pub fn with_retrieval(engine: Arc<RetrievalEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocumentsTool::new(engine)));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions advertised to the language model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            Ok(params["text"].clone())
        }
    }

    #[test]
    fn test_registry_find_and_definitions() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.find("echo").is_some());
        assert!(registry.find("missing").is_none());
        assert_eq!(registry.names(), vec!["echo"]);

        let defs = registry.definitions();
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_execute_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let out = registry
            .find("echo")
            .unwrap()
            .execute(json!({ "text": "Carcassonne" }))
            .await
            .unwrap();
        assert_eq!(out, json!("Carcassonne"));
    }
}
