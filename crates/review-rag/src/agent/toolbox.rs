//! The agent's toolbox: a closed set of tool identifiers dispatched to
//! handlers over shared engine resources.
//!
//! Dispatch is by enumerated identifier rather than an open string-keyed
//! registry; an unknown tool name is a handled variant, not a crash.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

use crate::analysis::{self, SnippetInput};
use crate::llm::{LLMClient, ToolSchema};
use crate::retrieval::{RetrievalError, Retriever};
use crate::types::{ChunkKind, RetrievalResult, Snippet, ToolOutput, ToolPayload};

/// The closed set of tools the model may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolId {
    RetrieveReviews,
    SentimentAnalysis,
    AspectExtraction,
    JtbdAnalysis,
}

impl ToolId {
    pub const ALL: [ToolId; 4] = [
        ToolId::RetrieveReviews,
        ToolId::SentimentAnalysis,
        ToolId::AspectExtraction,
        ToolId::JtbdAnalysis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RetrieveReviews => "retrieve_reviews",
            Self::SentimentAnalysis => "sentiment_analysis",
            Self::AspectExtraction => "aspect_extraction",
            Self::JtbdAnalysis => "jtbd_analysis",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "retrieve_reviews" => Some(Self::RetrieveReviews),
            "sentiment_analysis" => Some(Self::SentimentAnalysis),
            "aspect_extraction" => Some(Self::AspectExtraction),
            "jtbd_analysis" => Some(Self::JtbdAnalysis),
            _ => None,
        }
    }

    pub fn schema(&self) -> ToolSchema {
        match self {
            Self::RetrieveReviews => ToolSchema {
                name: self.name().to_string(),
                description: "Retrieve relevant review snippets from the vector store to best \
                    answer the question. Always use this tool first; optionally use it between \
                    analyses to get more context."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "Natural-language query"
                        },
                        "chunk_type": {
                            "type": "string",
                            "enum": ["sentence", "review"],
                            "description": "Granularity; use \"review\" for broader context",
                            "default": "sentence"
                        },
                        "vendor": {
                            "type": "string",
                            "description": "Optional provider filter; set if the user names a provider (e.g. \"ovh\", \"scaleway\", \"hetzner\", \"digital_ocean\", \"vultr\", \"cherry_servers\")"
                        },
                        "top_k": {
                            "type": "integer",
                            "description": "Number of results to return"
                        },
                        "fetch_k": {
                            "type": "integer",
                            "description": "Candidate pool size before diversification; 1.5 to 3 times top_k"
                        }
                    },
                    "required": ["question"]
                }),
            },
            Self::SentimentAnalysis => ToolSchema {
                name: self.name().to_string(),
                description: "Analyze overall sentiment and emotional tone of customer reviews: \
                    satisfaction levels, positive vs negative distribution, rating statistics, \
                    and key emotional themes."
                    .to_string(),
                parameters: analysis_parameters(),
            },
            Self::AspectExtraction => ToolSchema {
                name: self.name().to_string(),
                description: "Identify and rank specific product/service aspects mentioned in \
                    customer reviews (performance, pricing, support, reliability, ...), with \
                    per-aspect frequency, sentiment, and example quotes."
                    .to_string(),
                parameters: analysis_parameters(),
            },
            Self::JtbdAnalysis => ToolSchema {
                name: self.name().to_string(),
                description: "Analyze customer goals, motivations, and Jobs-to-Be-Done from \
                    reviews: what customers are trying to accomplish, why, expected outcomes, \
                    and pain points."
                    .to_string(),
                parameters: analysis_parameters(),
            },
        }
    }
}

fn analysis_parameters() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "snippets": {
                "type": "array",
                "description": "Review snippets to analyze, as {text, rating} objects or plain strings",
                "items": {}
            },
            "question": {
                "type": "string",
                "description": "The user's question, to focus the analysis"
            }
        },
        "required": ["snippets", "question"]
    })
}

/// Caller-supplied defaults for the retrieval tool, applied when the model
/// omits the corresponding argument.
#[derive(Debug, Clone, Default)]
pub struct RetrieveDefaults {
    pub chunk_kind: Option<ChunkKind>,
    pub vendor: Option<String>,
    pub top_k: Option<usize>,
    pub fetch_k: Option<usize>,
}

/// Result of one tool invocation: the tool-message content for the model,
/// plus whatever belongs in the conversation's accumulated logs.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    /// Content echoed back to the model in the tool-result message.
    pub content: String,
    /// Entry for the tool-output log (analysis tools only).
    pub output: Option<ToolOutput>,
    /// Entries for the snippet log (retrieval tool only).
    pub snippets: Vec<Snippet>,
}

impl ToolExecution {
    fn content_only(content: String) -> Self {
        Self {
            content,
            output: None,
            snippets: Vec::new(),
        }
    }
}

/// Shared resources the tools run against.
pub struct Toolbox {
    retriever: Arc<Retriever>,
    llm: Arc<LLMClient>,
}

impl Toolbox {
    pub fn new(retriever: Arc<Retriever>, llm: Arc<LLMClient>) -> Self {
        Self { retriever, llm }
    }

    /// Schemas for every tool, in declaration order.
    pub fn schemas() -> Vec<ToolSchema> {
        ToolId::ALL.iter().map(|id| id.schema()).collect()
    }

    /// Execute one tool. Infallible by contract: every failure is reported
    /// as error content in the returned execution.
    pub async fn execute(
        &self,
        id: ToolId,
        args: &JsonValue,
        defaults: &RetrieveDefaults,
    ) -> ToolExecution {
        match id {
            ToolId::RetrieveReviews => self.execute_retrieve(args, defaults).await,
            ToolId::SentimentAnalysis | ToolId::AspectExtraction | ToolId::JtbdAnalysis => {
                self.execute_analysis(id, args).await
            }
        }
    }

    async fn execute_retrieve(&self, args: &JsonValue, defaults: &RetrieveDefaults) -> ToolExecution {
        let Some(question) = args["question"].as_str().filter(|q| !q.trim().is_empty()) else {
            return ToolExecution::content_only(
                json!({"error": "Error retrieving reviews: missing question"}).to_string(),
            );
        };

        let chunk_kind = match args["chunk_type"].as_str() {
            Some(chunk_type) => match ChunkKind::parse(chunk_type) {
                Some(kind) => kind,
                None => {
                    return ToolExecution::content_only(
                        json!({
                            "error": format!(
                                "Error retrieving reviews: unknown chunk_type '{}'",
                                chunk_type
                            )
                        })
                        .to_string(),
                    );
                }
            },
            None => defaults.chunk_kind.unwrap_or(ChunkKind::Sentence),
        };

        let vendor = args["vendor"]
            .as_str()
            .filter(|v| !v.trim().is_empty())
            .or(defaults.vendor.as_deref());
        let top_k = args["top_k"].as_u64().map(|v| v as usize).or(defaults.top_k);
        let fetch_k = args["fetch_k"]
            .as_u64()
            .map(|v| v as usize)
            .or(defaults.fetch_k);

        match self
            .retriever
            .retrieve(question, chunk_kind, vendor, top_k, fetch_k)
            .await
        {
            Ok(snippets) => {
                let result = RetrievalResult {
                    count: snippets.len(),
                    snippets: snippets.clone(),
                };
                let content = serde_json::to_string(&ToolPayload::Retrieval(result))
                    .unwrap_or_else(|_| "{\"snippets\": [], \"count\": 0}".to_string());
                ToolExecution {
                    content,
                    output: None,
                    snippets,
                }
            }
            Err(e @ RetrievalError::InvalidParams(_)) => ToolExecution::content_only(
                json!({"error": format!("Error retrieving reviews: {}", e)}).to_string(),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Retrieval tool failed");
                ToolExecution::content_only(
                    json!({"error": format!("Error retrieving reviews: {}", e)}).to_string(),
                )
            }
        }
    }

    async fn execute_analysis(&self, id: ToolId, args: &JsonValue) -> ToolExecution {
        let snippets: Vec<SnippetInput> = args
            .get("snippets")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();
        let question = args["question"].as_str().unwrap_or("");

        let payload = match id {
            ToolId::SentimentAnalysis => {
                analysis::summarize_sentiment(&self.llm, &snippets, question).await
            }
            ToolId::AspectExtraction => {
                analysis::extract_top_aspects(&self.llm, &snippets, question).await
            }
            ToolId::JtbdAnalysis => analysis::infer_jtbd(&self.llm, &snippets, question).await,
            ToolId::RetrieveReviews => unreachable!("retrieval handled separately"),
        };

        let content = serde_json::to_string(&payload)
            .unwrap_or_else(|_| "{\"error\": \"Failed to serialize tool output\"}".to_string());

        ToolExecution {
            content,
            output: Some(ToolOutput {
                name: id.name().to_string(),
                output: payload,
            }),
            snippets: Vec::new(),
        }
    }
}
