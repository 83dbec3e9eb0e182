//! Agent controller: the per-question entry point.
//!
//! Stateless across invocations — conversation continuity lives entirely in
//! the checkpoint store, keyed by the caller's opaque thread identifier.
//! Never returns an error to the caller: the worst case is a reply whose
//! `response` is a human-readable error sentence with empty logs.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::state::ConversationState;
use super::tool_loop::{self, StateSink};
use super::toolbox::{RetrieveDefaults, Toolbox};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, LLMClient};
use crate::retrieval::Retriever;
use crate::storage::CheckpointStore;
use crate::types::{Snippet, ToolOutput};

/// The caller-facing result record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub response: String,
    pub tool_outputs: Vec<ToolOutput>,
    pub snippets: Vec<Snippet>,
}

impl AgentReply {
    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            response: format!("Error processing your question: {}", message),
            tool_outputs: Vec::new(),
            snippets: Vec::new(),
        }
    }
}

/// Two-channel streaming handle: a sequence of text increments, plus the
/// full reply resolved once the sequence is exhausted.
pub struct AgentStream {
    pub text: mpsc::Receiver<String>,
    pub reply: oneshot::Receiver<AgentReply>,
}

struct CheckpointSink {
    store: Arc<CheckpointStore>,
    thread_id: String,
}

#[async_trait]
impl StateSink for CheckpointSink {
    async fn persist(&self, state: &ConversationState) -> Result<()> {
        self.store.save(&self.thread_id, state).await
    }
}

pub struct AgentController {
    llm: Arc<LLMClient>,
    toolbox: Arc<Toolbox>,
    checkpoints: Arc<CheckpointStore>,
    config: AgentConfig,
}

impl AgentController {
    pub fn new(
        llm: Arc<LLMClient>,
        retriever: Arc<Retriever>,
        checkpoints: Arc<CheckpointStore>,
        config: AgentConfig,
    ) -> Self {
        let toolbox = Arc::new(Toolbox::new(retriever, llm.clone()));
        Self {
            llm,
            toolbox,
            checkpoints,
            config,
        }
    }

    /// Answer one question within the given conversation thread. The
    /// defaults apply to retrieval tool calls whenever the model omits the
    /// corresponding argument.
    pub async fn respond(
        &self,
        question: &str,
        defaults: &RetrieveDefaults,
        thread_id: &str,
    ) -> AgentReply {
        // At-most-one-writer-per-thread: serialize invocations on this id.
        // The id is captured here; a concurrent clear of the thread does not
        // redirect this invocation's writes.
        let lock = self.checkpoints.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let mut state = match self.checkpoints.load(thread_id).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                tracing::error!(thread_id, error = %e, "Failed to load conversation state");
                return AgentReply::error(e);
            }
        };

        state.messages.push(ChatMessage::user(question));

        let sink = CheckpointSink {
            store: self.checkpoints.clone(),
            thread_id: thread_id.to_string(),
        };

        match tool_loop::run_agent_loop(
            &self.llm,
            &self.toolbox,
            &mut state,
            defaults,
            &self.config,
            &sink,
        )
        .await
        {
            Ok(outcome) => AgentReply {
                response: outcome.answer,
                tool_outputs: state.tool_outputs,
                snippets: state.snippets,
            },
            Err(e) => {
                tracing::error!(thread_id, error = %e, "Agent loop failed");
                AgentReply::error(e)
            }
        }
    }

    /// Streaming variant of [`respond`]: returns immediately with the text
    /// channel; the reply resolves when generation finishes.
    pub fn respond_stream(
        self: &Arc<Self>,
        question: String,
        defaults: RetrieveDefaults,
        thread_id: String,
    ) -> AgentStream {
        let (text_tx, text_rx) = mpsc::channel::<String>(256);
        let (reply_tx, reply_rx) = oneshot::channel::<AgentReply>();

        let controller = self.clone();
        tokio::spawn(async move {
            let lock = controller.checkpoints.thread_lock(&thread_id);
            let _guard = lock.lock().await;

            let mut state = match controller.checkpoints.load(&thread_id).await {
                Ok(state) => state.unwrap_or_default(),
                Err(e) => {
                    let _ = reply_tx.send(AgentReply::error(e));
                    return;
                }
            };

            state.messages.push(ChatMessage::user(&question));

            let sink = CheckpointSink {
                store: controller.checkpoints.clone(),
                thread_id: thread_id.clone(),
            };

            let result = tool_loop::run_agent_loop_stream(
                &controller.llm,
                &controller.toolbox,
                &mut state,
                &defaults,
                &controller.config,
                &sink,
                text_tx,
            )
            .await;

            let reply = match result {
                Ok(outcome) => AgentReply {
                    response: outcome.answer,
                    tool_outputs: state.tool_outputs,
                    snippets: state.snippets,
                },
                Err(e) => {
                    tracing::error!(thread_id = %thread_id, error = %e, "Agent stream failed");
                    AgentReply::error(e)
                }
            };
            let _ = reply_tx.send(reply);
        });

        AgentStream {
            text: text_rx,
            reply: reply_rx,
        }
    }

    /// Discard a thread's persisted conversation. Callers start a new
    /// thread id afterwards; an in-flight loop keeps writing under the id it
    /// captured at start.
    pub async fn clear_thread(&self, thread_id: &str) -> Result<()> {
        self.checkpoints.delete(thread_id).await
    }
}
