//! Chat completion providers with tool calling.
//!
//! [`ChatProvider`] is the narrow interface the agent and the retrieval
//! synthesizer talk to. Two backends are provided:
//!
//! - **[`OllamaChat`]**: `POST /api/chat` on a local Ollama instance
//!   (default model `mistral`). Tool-call arguments arrive as JSON objects.
//! - **[`OpenAiChat`]**: `POST /v1/chat/completions` on OpenAI or any
//!   compatible endpoint. Tool-call arguments arrive as JSON strings.
//!
//! Requests are non-streaming. Every call is bounded by `llm.timeout_secs`;
//! expiry surfaces as [`BuddyError::ProviderTimeout`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::{BuddyError, Result};
use crate::http;
use crate::models::{ChatMessage, Completion, Role, ToolCall, ToolDefinition};

/// A language model that completes a chat, optionally requesting tool calls.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name used in errors and logs (e.g. `"ollama"`).
    fn name(&self) -> &str;
    /// Model identifier (e.g. `"mistral"`).
    fn model(&self) -> &str;
    /// Complete `messages`. An empty `tools` slice disables tool calling.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolDefinition])
        -> Result<Completion>;
}

/// Create the chat provider selected by `config.provider`.
pub fn create_chat_provider(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

fn tool_specs(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    url: String,
    temperature: Option<f32>,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model: config.model_or_default(),
            url,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client("ollama", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(ollama_message).collect::<Vec<_>>(),
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tool_specs(tools));
        }
        if let Some(temperature) = self.temperature {
            body["options"] = json!({ "temperature": temperature });
        }

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "ollama chat"
        );
        let response = http::post_json(
            &self.client,
            "ollama",
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;
        parse_ollama_completion(&response)
    }
}

fn ollama_message(message: &ChatMessage) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        value["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|c| json!({ "function": { "name": c.name, "arguments": c.arguments } }))
                .collect(),
        );
    }
    if let Some(name) = &message.tool_name {
        value["tool_name"] = json!(name);
    }
    value
}

fn parse_ollama_completion(json: &Value) -> Result<Completion> {
    let message = json
        .get("message")
        .ok_or_else(|| BuddyError::provider("ollama", "invalid response: missing message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .filter(|c| !c.trim().is_empty());

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for (i, call) in calls.iter().enumerate() {
            let function = call.get("function").ok_or_else(|| {
                BuddyError::provider("ollama", "invalid response: tool call without function")
            })?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| {
                    BuddyError::provider("ollama", "invalid response: tool call without name")
                })?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments("ollama", raw)?,
                Some(value) => value.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", i)),
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(Completion {
        content,
        tool_calls,
    })
}

// ============ OpenAI ============

pub struct OpenAiChat {
    model: String,
    url: String,
    api_key: String,
    temperature: Option<f32>,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model: config.model_or_default(),
            url,
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client("openai", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(openai_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tool_specs(tools));
            body["tool_choice"] = json!("auto");
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "openai chat"
        );
        let response = http::post_json(
            &self.client,
            "openai",
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;
        parse_openai_completion(&response)
    }
}

fn openai_message(message: &ChatMessage) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if message.role == Role::Assistant && !message.tool_calls.is_empty() {
        value["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

fn parse_openai_completion(json: &Value) -> Result<Completion> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| BuddyError::provider("openai", "invalid response: missing choices"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .filter(|c| !c.trim().is_empty());

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();
            let function = call.get("function").ok_or_else(|| {
                BuddyError::provider("openai", "invalid response: tool call without function")
            })?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| {
                    BuddyError::provider("openai", "invalid response: tool call without name")
                })?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments("openai", raw)?,
                Some(value) => value.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(Completion {
        content,
        tool_calls,
    })
}

fn parse_arguments(provider: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| {
        BuddyError::provider(provider, format!("tool call arguments are not JSON: {}", e))
    })
}
