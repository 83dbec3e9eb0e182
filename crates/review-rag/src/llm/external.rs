//! External OpenAI-compatible chat-completions provider.
//!
//! Implements non-streaming chat with tool calling, SSE streaming with
//! incremental tool-call assembly, and schema-constrained structured output
//! via `response_format: json_schema`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

use super::{
    ChatMessage, ChatResponse, ChatRole, ChatStreamEvent, GenerationConfig, LLMProvider,
    ProviderInfo, ToolCall, ToolSchema,
};
use crate::config::LLMConfig;
use crate::usage::{TokenUsage, UsageMeter};

pub struct ExternalProvider {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    meter: Arc<UsageMeter>,
}

impl ExternalProvider {
    pub fn new(config: &LLMConfig, meter: Arc<UsageMeter>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(300))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(model = %config.model, "Creating ExternalProvider (connect_timeout=15s)");

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            meter,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// returned HTML (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response(response: reqwest::Response, endpoint: &str) -> Result<JsonValue> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') || trimmed.starts_with("<!") {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}) — the service may be down or misconfigured. Response: {}",
                endpoint, status, preview
            ));
        }

        serde_json::from_str::<JsonValue>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    fn record_usage(&self, body: &JsonValue) {
        let usage = &body["usage"];
        if usage.is_object() {
            self.meter.record(TokenUsage {
                prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
                total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
            });
        }
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<JsonValue> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };
                let mut msg = json!({ "role": role });
                if let Some(ref content) = m.content {
                    msg["content"] = json!(content);
                }
                if let Some(ref calls) = m.tool_calls {
                    msg["tool_calls"] = json!(calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            }
                        }))
                        .collect::<Vec<_>>());
                }
                if let Some(ref id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(id);
                }
                if let Some(ref name) = m.name {
                    msg["name"] = json!(name);
                }
                msg
            })
            .collect()
    }

    fn format_tools(tools: &[ToolSchema]) -> Vec<JsonValue> {
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

    async fn post(&self, request: &JsonValue) -> Result<reqwest::Response> {
        let endpoint = self.endpoint();
        self.client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request to {} timed out — check network connectivity", endpoint)
                } else if e.is_connect() {
                    anyhow!("Failed to connect to {} — check network/firewall/proxy: {}", endpoint, e)
                } else {
                    anyhow!("Request to {} failed: {}", endpoint, e)
                }
            })
    }
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let mut request = json!({
            "model": self.model,
            "messages": Self::format_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false
        });

        if !tools.is_empty() {
            request["tools"] = json!(Self::format_tools(tools));
            request["tool_choice"] = json!("auto");
        }

        let endpoint = self.endpoint();
        let response = self.post(&request).await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Chat API error ({}): {}", status, error));
        }

        let body = Self::parse_json_response(response, &endpoint).await?;
        self.record_usage(&body);

        let choice = &body["choices"][0]["message"];

        if let Some(tool_calls) = choice["tool_calls"].as_array() {
            let calls: Vec<ToolCall> = tool_calls
                .iter()
                .filter_map(|tc| {
                    Some(ToolCall {
                        id: tc["id"].as_str()?.to_string(),
                        name: tc["function"]["name"].as_str()?.to_string(),
                        arguments: tc["function"]["arguments"].as_str()?.to_string(),
                    })
                })
                .collect();
            if !calls.is_empty() {
                return Ok(ChatResponse::ToolCalls(calls));
            }
        }

        let content = choice["content"].as_str().unwrap_or("").to_string();
        Ok(ChatResponse::Content(content))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>> {
        use futures::StreamExt;

        let mut request = json!({
            "model": self.model,
            "messages": Self::format_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": true
        });

        if !tools.is_empty() {
            request["tools"] = json!(Self::format_tools(tools));
            request["tool_choice"] = json!("auto");
        }

        let response = self.post(&request).await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !status.is_success() || content_type.contains("text/html") {
            let error = response.text().await?;
            let preview: String = error.chars().take(300).collect();
            return Err(anyhow!(
                "Chat streaming error (HTTP {}, content-type: {}): {}",
                status,
                content_type,
                preview
            ));
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<ChatStreamEvent>(256);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            // Accumulate streamed tool calls: index -> (id, name, arguments_buffer)
            let mut tool_call_acc: std::collections::HashMap<u64, (String, String, String)> =
                std::collections::HashMap::new();

            let flush_tool_calls =
                |acc: &mut std::collections::HashMap<u64, (String, String, String)>| {
                    let mut calls: Vec<(u64, ToolCall)> = acc
                        .drain()
                        .map(|(idx, (id, name, args))| {
                            (idx, ToolCall { id, name, arguments: args })
                        })
                        .collect();
                    calls.sort_by_key(|(idx, _)| *idx);
                    calls.into_iter().map(|(_, tc)| tc).collect::<Vec<_>>()
                };

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(_) => break,
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || !line.starts_with("data: ") {
                        continue;
                    }
                    let data = &line[6..];
                    if data == "[DONE]" {
                        for tc in flush_tool_calls(&mut tool_call_acc) {
                            let _ = tx.send(ChatStreamEvent::ToolCallComplete(tc)).await;
                        }
                        let _ = tx.send(ChatStreamEvent::Done).await;
                        return;
                    }

                    if let Ok(parsed) = serde_json::from_str::<JsonValue>(data) {
                        let delta = &parsed["choices"][0]["delta"];

                        if let Some(content) = delta["content"].as_str() {
                            if !content.is_empty()
                                && tx
                                    .send(ChatStreamEvent::ContentDelta(content.to_string()))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }

                        if let Some(tcs) = delta["tool_calls"].as_array() {
                            for tc_delta in tcs {
                                let idx = tc_delta["index"].as_u64().unwrap_or(0);
                                let entry = tool_call_acc.entry(idx).or_insert_with(|| {
                                    (
                                        tc_delta["id"].as_str().unwrap_or("").to_string(),
                                        tc_delta["function"]["name"]
                                            .as_str()
                                            .unwrap_or("")
                                            .to_string(),
                                        String::new(),
                                    )
                                });
                                if let Some(id) = tc_delta["id"].as_str() {
                                    if !id.is_empty() {
                                        entry.0 = id.to_string();
                                    }
                                }
                                if let Some(name) = tc_delta["function"]["name"].as_str() {
                                    if !name.is_empty() {
                                        entry.1 = name.to_string();
                                    }
                                }
                                if let Some(args) = tc_delta["function"]["arguments"].as_str() {
                                    entry.2.push_str(args);
                                }
                            }
                        }
                    }
                }
            }

            // Stream ended without [DONE] — flush accumulated tool calls
            for tc in flush_tool_calls(&mut tool_call_acc) {
                let _ = tx.send(ChatStreamEvent::ToolCallComplete(tc)).await;
            }
            let _ = tx.send(ChatStreamEvent::Done).await;
        });

        Ok(rx)
    }

    async fn structured(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: &JsonValue,
        config: &GenerationConfig,
    ) -> Result<JsonValue> {
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "schema": schema,
                    "strict": true
                }
            }
        });

        let endpoint = self.endpoint();
        let response = self.post(&request).await?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await?;
            return Err(anyhow!("Structured output API error ({}): {}", status, error));
        }

        let body = Self::parse_json_response(response, &endpoint).await?;
        self.record_usage(&body);

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Structured output response had no content"))?;

        serde_json::from_str(content).map_err(|e| {
            let preview: String = content.chars().take(200).collect();
            anyhow!(
                "Structured output was not valid JSON for schema '{}': {}. Content: {}",
                schema_name,
                e,
                preview
            )
        })
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "OpenAI-compatible".to_string(),
            model: self.model.clone(),
            supports_streaming: true,
            supports_functions: true,
        }
    }
}
