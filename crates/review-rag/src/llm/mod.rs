//! LLM module - chat message model, provider trait, and client wrapper.
//!
//! The model call itself is opaque to the rest of the engine: a provider
//! either answers with text, requests tool calls, or (for analysis tools)
//! returns a record conforming to a supplied JSON schema.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub mod external;

pub use external::ExternalProvider;

use crate::config::LLMConfig;
use crate::usage::UsageMeter;

/// Generation configuration for a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&LLMConfig> for GenerationConfig {
    fn from(config: &LLMConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

// ==================== Chat + tool-calling types ====================

/// A chat message with role, content, and optional tool call metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant (only present when role=Assistant)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (only present when role=Tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool (only present when role=Tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls: Some(tool_calls), tool_call_id: None, name: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: None, tool_call_id: Some(tool_call_id.into()), name: Some(name.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call emitted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (used to correlate with tool result)
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// JSON arguments string
    pub arguments: String,
}

/// Schema describing a tool the LLM can call (OpenAI-compatible format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (must match what the LLM will emit)
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: JsonValue,
}

/// The result of a chat completion — either text content or tool call requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatResponse {
    /// LLM produced text content (final answer)
    Content(String),
    /// LLM wants to call tools before answering
    ToolCalls(Vec<ToolCall>),
}

/// A streaming event from the chat completion.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    /// A token of text content
    ContentDelta(String),
    /// A tool call was fully received (streamed tool calls are assembled first)
    ToolCallComplete(ToolCall),
    /// Stream is done
    Done,
}

/// Provider information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_streaming: bool,
    pub supports_functions: bool,
}

/// Core trait for LLM providers.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Chat completion with full message history and optional tool schemas.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse>;

    /// Streaming chat completion with tool support.
    /// Returns a channel that yields ChatStreamEvent items.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>>;

    /// Schema-constrained call: the returned value conforms to `schema` or
    /// the call fails. Validation is the provider's responsibility.
    async fn structured(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &JsonValue,
        config: &GenerationConfig,
    ) -> Result<JsonValue>;

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Client wrapper: one provider plus the generation defaults and the
/// injected usage meter query surface.
pub struct LLMClient {
    provider: Box<dyn LLMProvider>,
    config: GenerationConfig,
    meter: Arc<UsageMeter>,
}

impl LLMClient {
    pub fn new(config: &LLMConfig, meter: Arc<UsageMeter>) -> Result<Self> {
        let provider = ExternalProvider::new(config, meter.clone())?;
        Ok(Self {
            provider: Box::new(provider),
            config: GenerationConfig::from(config),
            meter,
        })
    }

    /// Build a client around an existing provider (used by tests with
    /// scripted providers).
    pub fn with_provider(
        provider: Box<dyn LLMProvider>,
        config: GenerationConfig,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            provider,
            config,
            meter,
        }
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ChatResponse> {
        self.provider.chat(messages, tools, &self.config).await
    }

    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>> {
        self.provider
            .chat_stream(messages, tools, &self.config)
            .await
    }

    /// Typed schema-constrained call.
    pub async fn structured<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &JsonValue,
    ) -> Result<T> {
        let value = self
            .provider
            .structured(prompt, schema_name, schema, &self.config)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| anyhow!("Structured output did not match schema '{}': {}", schema_name, e))
    }

    pub fn usage(&self) -> crate::usage::UsageSnapshot {
        self.meter.snapshot()
    }

    pub fn info(&self) -> ProviderInfo {
        self.provider.info()
    }
}
