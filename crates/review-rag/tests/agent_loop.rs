//! End-to-end agent loop tests with a scripted model provider and an
//! in-memory vector index.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use review_rag::agent::{
    run_agent_loop, AgentController, ConversationState, NullSink, RetrieveDefaults, Toolbox,
};
use review_rag::config::{AgentConfig, RetrievalConfig};
use review_rag::embeddings::EmbeddingModel;
use review_rag::llm::{
    ChatMessage, ChatResponse, ChatStreamEvent, GenerationConfig, LLMClient, LLMProvider,
    ProviderInfo, ToolCall, ToolSchema,
};
use review_rag::retrieval::{cosine_similarity, Retriever};
use review_rag::storage::{open_sqlite, CheckpointStore, VectorHit, VectorIndex};
use review_rag::types::{ChunkKind, DocRecord};
use review_rag::usage::UsageMeter;

// ==================== Test doubles ====================

struct ScriptedProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    structured_response: JsonValue,
    chat_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            structured_response: json!({}),
            chat_calls: AtomicUsize::new(0),
        }
    }

    fn with_structured(mut self, value: JsonValue) -> Self {
        self.structured_response = value;
        self
    }

    fn next_response(&self) -> ChatResponse {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| ChatResponse::Content("script exhausted".to_string()))
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_response())
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _config: &GenerationConfig,
    ) -> Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            match response {
                ChatResponse::Content(text) => {
                    for word in text.split_inclusive(' ') {
                        if tx
                            .send(ChatStreamEvent::ContentDelta(word.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                ChatResponse::ToolCalls(calls) => {
                    for tc in calls {
                        if tx.send(ChatStreamEvent::ToolCallComplete(tc)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(ChatStreamEvent::Done).await;
        });
        Ok(rx)
    }

    async fn structured(
        &self,
        _prompt: &str,
        _schema_name: &str,
        _schema: &JsonValue,
        _config: &GenerationConfig,
    ) -> Result<JsonValue> {
        Ok(self.structured_response.clone())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".to_string(),
            model: "test".to_string(),
            supports_streaming: true,
            supports_functions: true,
        }
    }
}

struct MemoryIndex {
    docs: Mutex<Vec<DocRecord>>,
}

impl MemoryIndex {
    fn new(docs: Vec<DocRecord>) -> Self {
        Self {
            docs: Mutex::new(docs),
        }
    }

    fn matches(doc: &DocRecord, filter: Option<&str>) -> bool {
        let Some(predicate) = filter else {
            return true;
        };
        predicate.split(" AND ").all(|clause| {
            let Some((key, value)) = clause.split_once(" = ") else {
                return false;
            };
            let value = value.trim_matches('\'');
            match key.trim() {
                "chunk_type" => doc.chunk_kind.as_str() == value,
                "vendor" => doc.vendor == value,
                _ => false,
            }
        })
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, docs: Vec<DocRecord>) -> Result<()> {
        self.docs.lock().extend(docs);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        let mut hits: Vec<VectorHit> = self
            .docs
            .lock()
            .iter()
            .filter(|d| Self::matches(d, filter))
            .map(|d| VectorHit {
                id: d.id.clone(),
                review_id: d.review_id.clone(),
                chunk_type: d.chunk_kind.as_str().to_string(),
                sentence_idx: d.sentence_idx,
                text: d.text.clone(),
                name: d.name.clone(),
                country: d.country.clone(),
                date: d.date.clone(),
                rating: d.rating,
                vendor: d.vendor.clone(),
                review_header: d.review_header.clone(),
                vector: d.vector.clone(),
                score: cosine_similarity(query, &d.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.docs.lock().len())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.lock().clear();
        Ok(())
    }
}

struct FixedEmbedder;

#[async_trait]
impl EmbeddingModel for FixedEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
    fn dimension(&self) -> usize {
        2
    }
}

// ==================== Helpers ====================

fn sentence_doc(review_id: &str, idx: u32, text: &str) -> DocRecord {
    DocRecord {
        id: format!("{}::s{}", review_id, idx),
        review_id: review_id.to_string(),
        chunk_kind: ChunkKind::Sentence,
        sentence_idx: idx,
        text: text.to_string(),
        name: "Reviewer".to_string(),
        country: "FR".to_string(),
        date: "2024-04-01".to_string(),
        rating: 4,
        vendor: "ovh".to_string(),
        review_header: "Header".to_string(),
        vector: vec![1.0, 0.0],
        created_at: 0,
    }
}

fn agent_config() -> AgentConfig {
    AgentConfig {
        max_rounds: 8,
        tool_timeout_secs: 5,
    }
}

fn generation_config() -> GenerationConfig {
    GenerationConfig {
        max_tokens: 512,
        temperature: 0.2,
        top_p: 0.95,
    }
}

fn build_stack(
    provider: ScriptedProvider,
    docs: Vec<DocRecord>,
) -> (Arc<LLMClient>, Arc<Retriever>) {
    let llm = Arc::new(LLMClient::with_provider(
        Box::new(provider),
        generation_config(),
        Arc::new(UsageMeter::new()),
    ));
    let retriever = Arc::new(Retriever::new(
        Arc::new(MemoryIndex::new(docs)),
        Arc::new(FixedEmbedder),
        RetrievalConfig {
            top_k: 12,
            fetch_k: 30,
            mmr_lambda: 0.5,
        },
    ));
    (llm, retriever)
}

fn retrieve_call(id: &str, question: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "retrieve_reviews".to_string(),
        arguments: json!({ "question": question }).to_string(),
    }
}

// ==================== Tests ====================

#[tokio::test]
async fn retrieval_then_answer_accumulates_snippets_only() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::ToolCalls(vec![retrieve_call("call_1", "pricing")]),
        ChatResponse::Content("Customers find pricing fair.".to_string()),
    ]);
    let docs = vec![sentence_doc("ovh_0", 0, "Pricing is fair.")];
    let (llm, retriever) = build_stack(provider, docs);
    let toolbox = Toolbox::new(retriever, llm.clone());

    let mut state = ConversationState::default();
    state.messages.push(ChatMessage::user("How is pricing?"));

    let outcome = run_agent_loop(
        &llm,
        &toolbox,
        &mut state,
        &RetrieveDefaults::default(),
        &agent_config(),
        &NullSink,
    )
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.answer, "Customers find pricing fair.");
    assert_eq!(state.snippets.len(), 1);
    assert!(state.tool_outputs.is_empty());

    // The tool-result message echoes the call id and carries the count.
    let tool_msg = state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .expect("tool result message");
    assert!(tool_msg.content.as_deref().unwrap().contains("\"count\":1"));
}

#[tokio::test]
async fn unknown_tool_is_reported_and_loop_still_terminates() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::ToolCalls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "make_coffee".to_string(),
            arguments: "{}".to_string(),
        }]),
        ChatResponse::Content("done".to_string()),
    ]);
    let (llm, retriever) = build_stack(provider, Vec::new());
    let toolbox = Toolbox::new(retriever, llm.clone());

    let mut state = ConversationState::default();
    state.messages.push(ChatMessage::user("anything"));

    let outcome = run_agent_loop(
        &llm,
        &toolbox,
        &mut state,
        &RetrieveDefaults::default(),
        &agent_config(),
        &NullSink,
    )
        .await
        .unwrap();

    assert_eq!(outcome.answer, "done");
    let tool_msg = state
        .messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
        .expect("tool result message");
    assert!(tool_msg
        .content
        .as_deref()
        .unwrap()
        .contains("Unknown tool 'make_coffee'"));
}

#[tokio::test]
async fn analysis_call_feeds_the_tool_output_log() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::ToolCalls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "sentiment_analysis".to_string(),
            arguments: json!({
                "snippets": [{"text": "Great service", "rating": 5}],
                "question": "How do customers feel?"
            })
            .to_string(),
        }]),
        ChatResponse::Content("Mostly positive.".to_string()),
    ])
    .with_structured(json!({
        "total_reviews": 1,
        "mean_rating": 5.0,
        "positive_share": 100.0,
        "negative_share": 0.0,
        "positive_themes": ["service"],
        "negative_themes": []
    }));
    let (llm, retriever) = build_stack(provider, Vec::new());
    let toolbox = Toolbox::new(retriever, llm.clone());

    let mut state = ConversationState::default();
    state.messages.push(ChatMessage::user("How do customers feel?"));

    run_agent_loop(
        &llm,
        &toolbox,
        &mut state,
        &RetrieveDefaults::default(),
        &agent_config(),
        &NullSink,
    )
        .await
        .unwrap();

    assert!(state.snippets.is_empty());
    assert_eq!(state.tool_outputs.len(), 1);
    assert_eq!(state.tool_outputs[0].name, "sentiment_analysis");
}

#[tokio::test]
async fn round_cap_forces_a_text_answer() {
    // The model insists on tools forever, including the final no-tools call.
    let endless: Vec<ChatResponse> = (0..10)
        .map(|i| ChatResponse::ToolCalls(vec![retrieve_call(&format!("call_{}", i), "pricing")]))
        .collect();
    let provider = ScriptedProvider::new(endless);
    let (llm, retriever) = build_stack(provider, Vec::new());
    let toolbox = Toolbox::new(retriever, llm.clone());

    let config = AgentConfig {
        max_rounds: 2,
        tool_timeout_secs: 5,
    };

    let mut state = ConversationState::default();
    state.messages.push(ChatMessage::user("loop forever"));

    let outcome = run_agent_loop(
        &llm,
        &toolbox,
        &mut state,
        &RetrieveDefaults::default(),
        &config,
        &NullSink,
    )
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 3);
    assert!(outcome.answer.contains("allowed number of tool"));
}

#[tokio::test]
async fn controller_resumes_a_thread_and_accumulates_logs() {
    let provider = ScriptedProvider::new(vec![
        ChatResponse::ToolCalls(vec![retrieve_call("call_1", "pricing")]),
        ChatResponse::Content("First answer.".to_string()),
        ChatResponse::Content("Second answer.".to_string()),
    ]);
    let docs = vec![sentence_doc("ovh_0", 0, "Pricing is fair.")];
    let (llm, retriever) = build_stack(provider, docs);

    let dir = tempfile::tempdir().unwrap();
    let pool = open_sqlite(&dir.path().join("checkpoints.db")).await.unwrap();
    let checkpoints = Arc::new(CheckpointStore::new(pool).await.unwrap());

    let controller = AgentController::new(llm, retriever, checkpoints.clone(), agent_config());

    let first = controller
        .respond("How is pricing?", &RetrieveDefaults::default(), "thread-1").await;
    assert_eq!(first.response, "First answer.");
    assert_eq!(first.snippets.len(), 1);

    let second = controller
        .respond("And support?", &RetrieveDefaults::default(), "thread-1").await;
    assert_eq!(second.response, "Second answer.");
    // Accumulated logs carry over from the first turn.
    assert_eq!(second.snippets.len(), 1);

    // The persisted history contains both turns.
    let state = checkpoints.load("thread-1").await.unwrap().unwrap();
    let user_messages = state
        .messages
        .iter()
        .filter(|m| {
            m.content.as_deref() == Some("How is pricing?")
                || m.content.as_deref() == Some("And support?")
        })
        .count();
    assert_eq!(user_messages, 2);

    // A fresh thread starts empty.
    assert!(checkpoints.load("thread-2").await.unwrap().is_none());
}

#[tokio::test]
async fn streaming_yields_deltas_then_reply() {
    let provider = ScriptedProvider::new(vec![ChatResponse::Content(
        "streamed final answer".to_string(),
    )]);
    let (llm, retriever) = build_stack(provider, Vec::new());

    let dir = tempfile::tempdir().unwrap();
    let pool = open_sqlite(&dir.path().join("checkpoints.db")).await.unwrap();
    let checkpoints = Arc::new(CheckpointStore::new(pool).await.unwrap());

    let controller = Arc::new(AgentController::new(
        llm,
        retriever,
        checkpoints,
        agent_config(),
    ));

    let mut stream = controller.respond_stream(
        "question".to_string(),
        RetrieveDefaults::default(),
        "t".to_string(),
    );

    let mut streamed = String::new();
    while let Some(chunk) = stream.text.recv().await {
        streamed.push_str(&chunk);
    }
    let reply = stream.reply.await.unwrap();

    assert_eq!(streamed, "streamed final answer");
    assert_eq!(reply.response, "streamed final answer");
}
