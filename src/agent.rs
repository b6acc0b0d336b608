//! The conversational agent.
//!
//! Each turn runs a bounded tool-calling loop against the chat model:
//!
//! 1. Empty input is answered with the clarification message; the model is
//!    not called and the context is left untouched.
//! 2. The model receives the system policy, the recent conversation, and the
//!    tool definitions. The policy tells it to search the documents for game
//!    questions, redirect off-topic questions, and ask for a rephrase when
//!    the question is unclear.
//! 3. Requested tool calls are dispatched through the [`ToolRegistry`] until
//!    the per-turn budget is spent; after that tools are withdrawn and
//!    extra calls get a "budget spent" reply.
//! 4. The final text is scrubbed of sentences that mention a tool, then the
//!    user message and the answer are committed to the [`SessionContext`].
//!
//! A provider or tool error aborts the turn without touching the context.

use std::sync::Arc;

use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::{BuddyError, Result};
use crate::llm::ChatProvider;
use crate::models::{ChatMessage, ToolCall, ToolDefinition};
use crate::session::SessionContext;
use crate::settings::Settings;
use crate::tools::ToolRegistry;

/// Static persona and behaviour rules.
#[derive(Debug, Clone)]
pub struct AgentPolicy {
    pub name: String,
    pub language: String,
    /// Rendered system prompt.
    pub system_prompt: String,
    pub redirect_message: String,
    pub clarification_message: String,
    pub fallback_message: String,
    pub greeting_instruction: String,
    pub max_tool_calls: usize,
    pub max_rounds: usize,
    pub max_history_messages: usize,
}

impl AgentPolicy {
    /// Render the configured prompt template for `tool_name`.
    pub fn from_config(config: &AgentConfig, tool_name: &str) -> Self {
        let system_prompt = render(
            &config.system_prompt,
            &[
                ("name", config.name.as_str()),
                ("language", config.language.as_str()),
                ("tool", tool_name),
                ("redirect_message", config.redirect_message.as_str()),
            ],
        );

        Self {
            name: config.name.clone(),
            language: config.language.clone(),
            system_prompt,
            redirect_message: config.redirect_message.clone(),
            clarification_message: config.clarification_message.clone(),
            fallback_message: config.fallback_message.clone(),
            greeting_instruction: config.greeting_instruction.clone(),
            max_tool_calls: config.max_tool_calls,
            max_rounds: config.max_rounds,
            max_history_messages: config.max_history_messages,
        }
    }

    /// Drop every sentence that names one of `tool_names`.
    ///
    /// Returns the fallback message when nothing is left.
    pub fn scrub(&self, text: &str, tool_names: &[&str]) -> String {
        let needles: Vec<String> = tool_names
            .iter()
            .flat_map(|name| {
                let lower = name.to_lowercase();
                let spaced = lower.replace('_', " ");
                [lower, spaced]
            })
            .collect();

        let kept: String = sentences(text)
            .into_iter()
            .filter(|sentence| {
                let lower = sentence.to_lowercase();
                !needles.iter().any(|n| lower.contains(n.as_str()))
            })
            .collect();

        let kept = kept.trim();
        if kept.is_empty() {
            self.fallback_message.clone()
        } else {
            kept.to_string()
        }
    }
}

/// Fill `{key}` placeholders in one pass; substituted text is never rescanned.
///
/// Unknown placeholders and lone braces are kept as written.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split text after `.`, `!`, `?` runs and newlines, keeping every byte.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?' | '\n') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, d)) = chars.peek() {
            if matches!(d, '.' | '!' | '?') {
                end = j + d.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        out.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

pub struct Agent {
    llm: Arc<dyn ChatProvider>,
    tools: ToolRegistry,
    policy: AgentPolicy,
}

impl Agent {
    pub fn new(settings: &Settings, tools: ToolRegistry, policy: AgentPolicy) -> Self {
        Self {
            llm: Arc::clone(&settings.llm),
            tools,
            policy,
        }
    }

    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Introduce the assistant, as a regular turn.
    pub async fn greet(&self, ctx: &mut SessionContext) -> Result<String> {
        self.run(&self.policy.greeting_instruction, ctx).await
    }

    /// Answer one user message.
    pub async fn run(&self, input: &str, ctx: &mut SessionContext) -> Result<String> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(self.policy.clarification_message.clone());
        }

        let definitions = self.tools.definitions();
        let tool_names = self.tools.names();
        let max_rounds = self.policy.max_rounds.max(1);
        let mut turn = vec![ChatMessage::user(input)];
        let mut calls_made = 0usize;

        for round in 0..max_rounds {
            let tools_open = calls_made < self.policy.max_tool_calls && round + 1 < max_rounds;
            let offered: &[ToolDefinition] = if tools_open { &definitions } else { &[] };

            let messages = self.prompt(ctx, &turn);
            let completion = self.llm.complete(&messages, offered).await?;

            if completion.tool_calls.is_empty() {
                let text = completion.content.unwrap_or_default();
                let answer = self.policy.scrub(&text, &tool_names);
                ctx.record_turn(input, &answer);
                return Ok(answer);
            }

            tracing::info!(
                round = round + 1,
                max_rounds,
                calls = completion.tool_calls.len(),
                "tool round"
            );
            turn.push(ChatMessage::assistant_tool_calls(
                completion.content.unwrap_or_default(),
                completion.tool_calls.clone(),
            ));

            for call in &completion.tool_calls {
                let reply = self.dispatch(call, &mut calls_made).await?;
                turn.push(ChatMessage::tool_result(call, reply));
            }
        }

        tracing::warn!(max_rounds, "round budget exhausted without a final answer");
        let answer = self.policy.fallback_message.clone();
        ctx.record_turn(input, &answer);
        Ok(answer)
    }

    async fn dispatch(&self, call: &ToolCall, calls_made: &mut usize) -> Result<String> {
        if *calls_made >= self.policy.max_tool_calls {
            tracing::debug!(tool = %call.name, "tool budget spent, call refused");
            return Ok(
                "Tool budget for this turn is spent. Answer with the information already gathered."
                    .to_string(),
            );
        }

        let Some(tool) = self.tools.find(&call.name) else {
            tracing::warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(format!(
                "Unknown tool '{}'. Available tools: {}.",
                call.name,
                self.tools.names().join(", ")
            ));
        };

        *calls_made += 1;
        tracing::info!(tool = %call.name, arguments = %call.arguments, "calling tool");
        let arguments = match &call.arguments {
            Value::Object(_) => call.arguments.clone(),
            _ => Value::Object(Default::default()),
        };
        let output = tool
            .execute(arguments)
            .await
            .map_err(|e| tool_error(&call.name, e))?;

        Ok(match output {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    /// System policy, recent history, then the in-progress turn.
    fn prompt(&self, ctx: &SessionContext, turn: &[ChatMessage]) -> Vec<ChatMessage> {
        let history = ctx.recent(self.policy.max_history_messages);
        let mut messages = Vec::with_capacity(1 + history.len() + turn.len());
        messages.push(ChatMessage::system(&self.policy.system_prompt));
        messages.extend_from_slice(history);
        messages.extend_from_slice(turn);
        messages
    }
}

fn tool_error(tool: &str, err: anyhow::Error) -> BuddyError {
    match err.downcast::<BuddyError>() {
        Ok(err) => err,
        Err(other) => BuddyError::ToolInvocation {
            tool: tool.to_string(),
            message: format!("{:#}", other),
        },
    }
}
