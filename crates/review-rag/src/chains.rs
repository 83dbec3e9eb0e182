//! Non-agentic answer path: retrieve once, format, answer.
//!
//! The simple alternative to the agent loop for callers that want a single
//! grounded answer without tool routing.

use crate::agent::AgentReply;
use crate::llm::{ChatMessage, ChatResponse, LLMClient};
use crate::prompts;
use crate::retrieval::{format_snippets_to_text, Retriever};
use crate::types::ChunkKind;

/// Answer a question from a single retrieval pass. Mirrors the agent entry
/// point's contract: always returns a reply, never an error.
pub async fn simple_response(
    retriever: &Retriever,
    llm: &LLMClient,
    question: &str,
    chunk_kind: ChunkKind,
    vendor: Option<&str>,
    top_k: Option<usize>,
    fetch_k: Option<usize>,
) -> AgentReply {
    let snippets = match retriever
        .retrieve(question, chunk_kind, vendor, top_k, fetch_k)
        .await
    {
        Ok(snippets) => snippets,
        Err(e) => {
            tracing::error!(error = %e, "Simple RAG retrieval failed");
            return AgentReply {
                response: format!("Error processing your question: {}", e),
                tool_outputs: Vec::new(),
                snippets: Vec::new(),
            };
        }
    };

    let context = format_snippets_to_text(&snippets);
    let prompt = prompts::rag_prompt(&context, question);

    match llm.chat(&[ChatMessage::user(prompt)], &[]).await {
        Ok(ChatResponse::Content(text)) => AgentReply {
            response: text,
            tool_outputs: Vec::new(),
            snippets,
        },
        Ok(ChatResponse::ToolCalls(_)) => AgentReply {
            // No tools were offered; treat a tool-call response as a failure.
            response: "Error processing your question: model returned tool calls".to_string(),
            tool_outputs: Vec::new(),
            snippets,
        },
        Err(e) => {
            tracing::error!(error = %e, "Simple RAG generation failed");
            AgentReply {
                response: format!("Error processing your question: {}", e),
                tool_outputs: Vec::new(),
                snippets: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embeddings::EmbeddingModel;
    use crate::llm::{
        ChatStreamEvent, GenerationConfig, LLMProvider, ProviderInfo, ToolSchema,
    };
    use crate::storage::{VectorHit, VectorIndex};
    use crate::types::DocRecord;
    use crate::usage::UsageMeter;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EmptyIndex;

    #[async_trait]
    impl VectorIndex for EmptyIndex {
        async fn upsert(&self, _docs: Vec<DocRecord>) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _query: &[f32],
            _k: usize,
            _filter: Option<&str>,
        ) -> Result<Vec<VectorHit>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
        fn dimension(&self) -> usize {
            1
        }
    }

    struct StaticProvider {
        answer: Option<String>,
    }

    #[async_trait]
    impl LLMProvider for StaticProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _config: &GenerationConfig,
        ) -> Result<ChatResponse> {
            match &self.answer {
                Some(text) => Ok(ChatResponse::Content(text.clone())),
                None => Err(anyhow!("model unavailable")),
            }
        }
        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _config: &GenerationConfig,
        ) -> Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn structured(
            &self,
            _prompt: &str,
            _schema_name: &str,
            _schema: &serde_json::Value,
            _config: &GenerationConfig,
        ) -> Result<serde_json::Value> {
            Err(anyhow!("not supported"))
        }
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "static".to_string(),
                model: "test".to_string(),
                supports_streaming: false,
                supports_functions: false,
            }
        }
    }

    fn stack(answer: Option<&str>) -> (Retriever, LLMClient) {
        let retriever = Retriever::new(
            Arc::new(EmptyIndex),
            Arc::new(FixedEmbedder),
            RetrievalConfig {
                top_k: 12,
                fetch_k: 30,
                mmr_lambda: 0.5,
            },
        );
        let llm = LLMClient::with_provider(
            Box::new(StaticProvider {
                answer: answer.map(str::to_string),
            }),
            GenerationConfig {
                max_tokens: 256,
                temperature: 0.2,
                top_p: 0.95,
            },
            Arc::new(UsageMeter::new()),
        );
        (retriever, llm)
    }

    #[tokio::test]
    async fn answers_even_with_no_snippets() {
        let (retriever, llm) = stack(Some("No relevant reviews were found."));
        let reply = simple_response(
            &retriever,
            &llm,
            "How is pricing?",
            ChunkKind::Sentence,
            None,
            None,
            None,
        )
        .await;

        assert_eq!(reply.response, "No relevant reviews were found.");
        assert!(reply.snippets.is_empty());
        assert!(reply.tool_outputs.is_empty());
    }

    #[tokio::test]
    async fn model_failure_becomes_an_error_reply() {
        let (retriever, llm) = stack(None);
        let reply = simple_response(
            &retriever,
            &llm,
            "How is pricing?",
            ChunkKind::Sentence,
            None,
            None,
            None,
        )
        .await;

        assert!(reply.response.starts_with("Error processing your question:"));
        assert!(reply.snippets.is_empty());
    }
}
