//! The reasoning / tool-execution loop.
//!
//! Alternates between a reasoning step (model sees the history plus the
//! toolbox) and a tool-execution step, until the model answers with plain
//! text. Control always returns to reasoning after tool execution; a hard
//! round cap bounds nonterminating tool-call chains.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::state::ConversationState;
use super::toolbox::{RetrieveDefaults, ToolId, Toolbox};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatResponse, ChatStreamEvent, LLMClient, ToolCall};
use crate::prompts::AGENT_SYSTEM_PROMPT;

/// Answer used when the round cap is hit and the model still wants tools.
const CAP_FALLBACK_ANSWER: &str =
    "I was unable to complete the analysis within the allowed number of tool \
     calls. Here is what I found so far based on the tool results above.";

/// Receiver of state snapshots; the controller persists them under the
/// thread key. Persistence failures are logged, not fatal to the turn.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn persist(&self, state: &ConversationState) -> Result<()>;
}

/// No-op sink for callers without durable state (tests, one-shot use).
pub struct NullSink;

#[async_trait]
impl StateSink for NullSink {
    async fn persist(&self, _state: &ConversationState) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// The model's final text answer.
    pub answer: String,
    /// Number of reasoning steps taken.
    pub rounds: usize,
}

async fn checkpoint(sink: &dyn StateSink, state: &ConversationState) {
    if let Err(e) = sink.persist(state).await {
        tracing::warn!(error = %e, "Failed to checkpoint conversation state");
    }
}

fn ensure_system_prompt(state: &mut ConversationState) {
    if !state.has_system_message() {
        state
            .messages
            .insert(0, ChatMessage::system(AGENT_SYSTEM_PROMPT));
    }
}

/// Run the loop to completion. The state must already contain the new user
/// message; accumulated logs and messages are appended in place.
pub async fn run_agent_loop(
    llm: &LLMClient,
    toolbox: &Toolbox,
    state: &mut ConversationState,
    defaults: &RetrieveDefaults,
    config: &AgentConfig,
    sink: &dyn StateSink,
) -> Result<LoopOutcome> {
    ensure_system_prompt(state);
    let schemas = Toolbox::schemas();
    let mut rounds = 0usize;

    loop {
        rounds += 1;
        if rounds > config.max_rounds {
            tracing::warn!(max = config.max_rounds, "Agent loop hit round cap, forcing text answer");
            let response = llm.chat(&state.messages, &[]).await?;
            let answer = match response {
                ChatResponse::Content(text) => text,
                ChatResponse::ToolCalls(_) => CAP_FALLBACK_ANSWER.to_string(),
            };
            state.messages.push(ChatMessage::assistant(answer.clone()));
            checkpoint(sink, state).await;
            return Ok(LoopOutcome { answer, rounds });
        }

        tracing::debug!(round = rounds, "Agent loop: reasoning step");
        let response = llm.chat(&state.messages, &schemas).await?;

        match response {
            ChatResponse::Content(text) => {
                state.messages.push(ChatMessage::assistant(text.clone()));
                checkpoint(sink, state).await;
                return Ok(LoopOutcome {
                    answer: text,
                    rounds,
                });
            }
            ChatResponse::ToolCalls(tool_calls) => {
                tracing::info!(
                    round = rounds,
                    count = tool_calls.len(),
                    tools = ?tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>(),
                    "Agent loop: model requested tool calls"
                );

                state
                    .messages
                    .push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
                checkpoint(sink, state).await;

                execute_tool_batch(toolbox, state, &tool_calls, defaults, config).await;
                checkpoint(sink, state).await;
            }
        }
    }
}

/// Execute one batch of requested tool calls in call order, appending
/// tool-result messages and accumulating the logs. Tool calls in one batch
/// are independent; ordering of the logs reflects call order.
async fn execute_tool_batch(
    toolbox: &Toolbox,
    state: &mut ConversationState,
    tool_calls: &[ToolCall],
    defaults: &RetrieveDefaults,
    config: &AgentConfig,
) {
    for tc in tool_calls {
        let content = match ToolId::from_name(&tc.name) {
            None => {
                tracing::warn!(tool = %tc.name, "Unknown tool requested");
                format!("Error: Unknown tool '{}'", tc.name)
            }
            Some(id) => {
                let args: serde_json::Value =
                    serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::json!({}));

                let timeout = std::time::Duration::from_secs(config.tool_timeout_secs);
                match tokio::time::timeout(timeout, toolbox.execute(id, &args, defaults)).await {
                    Ok(execution) => {
                        state.snippets.extend(execution.snippets);
                        if let Some(output) = execution.output {
                            state.tool_outputs.push(output);
                        }
                        execution.content
                    }
                    Err(_) => {
                        tracing::warn!(tool = %tc.name, "Tool execution timed out");
                        format!(
                            "Error executing {}: timed out after {}s",
                            tc.name, config.tool_timeout_secs
                        )
                    }
                }
            }
        };

        state
            .messages
            .push(ChatMessage::tool_result(&tc.id, &tc.name, content));
    }
}

/// Streaming variant: text increments go to `text_tx` as they arrive; the
/// outcome resolves through the returned future as with `run_agent_loop`.
pub async fn run_agent_loop_stream(
    llm: &LLMClient,
    toolbox: &Toolbox,
    state: &mut ConversationState,
    defaults: &RetrieveDefaults,
    config: &AgentConfig,
    sink: &dyn StateSink,
    text_tx: mpsc::Sender<String>,
) -> Result<LoopOutcome> {
    ensure_system_prompt(state);
    let schemas = Toolbox::schemas();
    let mut rounds = 0usize;

    loop {
        rounds += 1;
        if rounds > config.max_rounds {
            let response = llm.chat(&state.messages, &[]).await?;
            let answer = match response {
                ChatResponse::Content(text) => text,
                ChatResponse::ToolCalls(_) => CAP_FALLBACK_ANSWER.to_string(),
            };
            let _ = text_tx.send(answer.clone()).await;
            state.messages.push(ChatMessage::assistant(answer.clone()));
            checkpoint(sink, state).await;
            return Ok(LoopOutcome { answer, rounds });
        }

        let mut rx = llm.chat_stream(&state.messages, &schemas).await?;

        let mut content_acc = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        while let Some(event) = rx.recv().await {
            match event {
                ChatStreamEvent::ContentDelta(delta) => {
                    content_acc.push_str(&delta);
                    let _ = text_tx.send(delta).await;
                }
                ChatStreamEvent::ToolCallComplete(tc) => {
                    tool_calls.push(tc);
                }
                ChatStreamEvent::Done => break,
            }
        }

        if tool_calls.is_empty() {
            state
                .messages
                .push(ChatMessage::assistant(content_acc.clone()));
            checkpoint(sink, state).await;
            return Ok(LoopOutcome {
                answer: content_acc,
                rounds,
            });
        }

        state
            .messages
            .push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
        checkpoint(sink, state).await;

        execute_tool_batch(toolbox, state, &tool_calls, defaults, config).await;
        checkpoint(sink, state).await;
    }
}
