//! Analysis tools: sentiment summary, aspect ranking, and JTBD inference.
//!
//! Each tool normalizes its snippet input, populates a fixed analysis
//! prompt, and delegates the extraction to a schema-constrained model call.
//! Tools never raise to their caller: every failure becomes an error
//! payload.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::llm::LLMClient;
use crate::prompts;
use crate::types::ToolPayload;

// ==================== Structured outputs ====================

/// Sentiment analysis summary of reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSummary {
    /// Total number of reviews analyzed.
    pub total_reviews: i64,
    /// Average rating score.
    pub mean_rating: Option<f64>,
    /// Percentage of positive reviews (rating >= 4).
    pub positive_share: Option<f64>,
    /// Percentage of negative reviews (rating <= 2).
    pub negative_share: Option<f64>,
    #[serde(default)]
    pub positive_themes: Vec<String>,
    #[serde(default)]
    pub negative_themes: Vec<String>,
}

/// A single product/service aspect mentioned in reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aspect {
    /// Name of the aspect (e.g. "performance", "pricing").
    pub name: String,
    /// Number of times mentioned.
    pub frequency: i64,
    /// Average sentiment score for this aspect.
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub positive_examples: Vec<String>,
    #[serde(default)]
    pub neutral_examples: Vec<String>,
    #[serde(default)]
    pub negative_examples: Vec<String>,
}

/// Complete aspect analysis results from reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectAnalysis {
    pub total_aspects: i64,
    pub aspects: Vec<Aspect>,
}

/// Jobs-to-Be-Done insight from customer reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JtbdInsight {
    /// The functional job customers are trying to accomplish.
    pub job: String,
    /// The context/situation when this job arises.
    pub situation: String,
    /// Why customers want to accomplish this job.
    pub motivation: String,
    /// What success looks like for customers.
    pub expected_outcome: String,
    #[serde(default)]
    pub frustrations: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
    #[serde(default)]
    pub total_reviews: i64,
}

// ==================== Input normalization ====================

/// Tool input as the model supplies it: either plain strings or partial
/// snippet records.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SnippetInput {
    Text(String),
    Record {
        #[serde(default)]
        text: String,
        #[serde(default)]
        rating: Option<i64>,
    },
}

/// Normalized `{text, rating}` pair fed to the analysis prompts.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewInput {
    pub text: String,
    pub rating: Option<i64>,
}

/// Coerce raw tool input to `{text, rating}` pairs, dropping entries
/// without non-empty text.
pub fn normalize_snippets(inputs: &[SnippetInput]) -> Vec<ReviewInput> {
    inputs
        .iter()
        .filter_map(|input| match input {
            SnippetInput::Text(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| ReviewInput {
                    text: text.to_string(),
                    rating: None,
                })
            }
            SnippetInput::Record { text, rating } => {
                let text = text.trim();
                (!text.is_empty()).then(|| ReviewInput {
                    text: text.to_string(),
                    rating: *rating,
                })
            }
        })
        .collect()
}

// ==================== Output schemas ====================

fn sentiment_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "total_reviews": { "type": "integer", "description": "Total number of reviews analyzed" },
            "mean_rating": { "type": ["number", "null"], "description": "Average rating score" },
            "positive_share": { "type": ["number", "null"], "description": "Percentage of positive reviews (rating >= 4)" },
            "negative_share": { "type": ["number", "null"], "description": "Percentage of negative reviews (rating <= 2)" },
            "positive_themes": { "type": "array", "items": { "type": "string" } },
            "negative_themes": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["total_reviews", "mean_rating", "positive_share", "negative_share", "positive_themes", "negative_themes"],
        "additionalProperties": false
    })
}

fn aspects_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "total_aspects": { "type": "integer", "description": "Total number of aspects found" },
            "aspects": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "frequency": { "type": "integer" },
                        "sentiment_score": { "type": ["number", "null"] },
                        "positive_examples": { "type": "array", "items": { "type": "string" } },
                        "neutral_examples": { "type": "array", "items": { "type": "string" } },
                        "negative_examples": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["name", "frequency", "sentiment_score", "positive_examples", "neutral_examples", "negative_examples"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["total_aspects", "aspects"],
        "additionalProperties": false
    })
}

fn jtbd_schema() -> JsonValue {
    json!({
        "type": "object",
        "properties": {
            "job": { "type": "string", "description": "The functional job customers are trying to accomplish" },
            "situation": { "type": "string", "description": "The context/situation when this job arises" },
            "motivation": { "type": "string", "description": "Why customers want to accomplish this job" },
            "expected_outcome": { "type": "string", "description": "What success looks like for customers" },
            "frustrations": { "type": "array", "items": { "type": "string" } },
            "quotes": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["job", "situation", "motivation", "expected_outcome", "frustrations", "quotes"],
        "additionalProperties": false
    })
}

// ==================== Tools ====================

/// Summarize overall sentiment and emotional tone of customer reviews.
pub async fn summarize_sentiment(
    llm: &LLMClient,
    snippets: &[SnippetInput],
    question: &str,
) -> ToolPayload {
    let reviews = normalize_snippets(snippets);
    if reviews.is_empty() {
        return ToolPayload::error("No review data available for sentiment analysis.");
    }

    let result: anyhow::Result<SentimentSummary> = async {
        let reviews_json = serde_json::to_string(&reviews)?;
        let prompt = prompts::sentiment_prompt(&reviews_json, question);
        llm.structured(&prompt, "sentiment_summary", &sentiment_schema())
            .await
    }
    .await;

    match result {
        Ok(summary) if summary.total_reviews == 0 => {
            // Defensive double-check: a model that analyzed nothing is no data.
            ToolPayload::error("No review data available for sentiment analysis.")
        }
        Ok(summary) => ToolPayload::Sentiment(summary),
        Err(e) => {
            tracing::error!(error = %e, "Sentiment analysis failed");
            ToolPayload::error(format!("Error analyzing sentiment: {}", e))
        }
    }
}

/// Identify and rank specific product/service aspects mentioned in reviews.
pub async fn extract_top_aspects(
    llm: &LLMClient,
    snippets: &[SnippetInput],
    question: &str,
) -> ToolPayload {
    let reviews = normalize_snippets(snippets);
    if reviews.is_empty() {
        return ToolPayload::error("No review data available for aspect extraction.");
    }

    let result: anyhow::Result<AspectAnalysis> = async {
        let reviews_json = serde_json::to_string(&reviews)?;
        let prompt = prompts::aspects_prompt(&reviews_json, question);
        llm.structured(&prompt, "aspect_analysis", &aspects_schema())
            .await
    }
    .await;

    match result {
        Ok(analysis) if analysis.total_aspects == 0 || analysis.aspects.is_empty() => {
            ToolPayload::error("No specific aspects were identified in the reviews.")
        }
        Ok(analysis) => ToolPayload::Aspects(analysis),
        Err(e) => {
            tracing::error!(error = %e, "Aspect extraction failed");
            ToolPayload::error(format!("Error extracting aspects: {}", e))
        }
    }
}

/// Infer customer goals, motivations, and Jobs-to-Be-Done from reviews.
/// Always best-effort: a job description is inferable from any non-empty set.
pub async fn infer_jtbd(
    llm: &LLMClient,
    snippets: &[SnippetInput],
    question: &str,
) -> ToolPayload {
    let reviews = normalize_snippets(snippets);
    if reviews.is_empty() {
        return ToolPayload::error("No review data available for JTBD analysis.");
    }
    let total_reviews = reviews.len() as i64;

    let result: anyhow::Result<JtbdInsight> = async {
        let reviews_json = serde_json::to_string(&reviews)?;
        let prompt = prompts::jtbd_prompt(&reviews_json, question);
        llm.structured(&prompt, "jtbd_insight", &jtbd_schema()).await
    }
    .await;

    match result {
        Ok(mut insight) => {
            insight.total_reviews = total_reviews;
            ToolPayload::Jtbd(insight)
        }
        Err(e) => {
            tracing::error!(error = %e, "JTBD analysis failed");
            ToolPayload::error(format!("Error performing JTBD analysis: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        ChatMessage, ChatResponse, ChatStreamEvent, GenerationConfig, LLMProvider, ProviderInfo,
        ToolSchema,
    };
    use crate::usage::UsageMeter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider that counts calls and fails if invoked when not expected.
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        response: JsonValue,
    }

    #[async_trait]
    impl LLMProvider for CountingProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _config: &GenerationConfig,
        ) -> anyhow::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse::Content(String::new()))
        }

        async fn chat_stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSchema],
            _config: &GenerationConfig,
        ) -> anyhow::Result<tokio::sync::mpsc::Receiver<ChatStreamEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn structured(
            &self,
            _prompt: &str,
            _schema_name: &str,
            _schema: &JsonValue,
            _config: &GenerationConfig,
        ) -> anyhow::Result<JsonValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "counting".to_string(),
                model: "test".to_string(),
                supports_streaming: false,
                supports_functions: false,
            }
        }
    }

    fn client(calls: Arc<AtomicUsize>, response: JsonValue) -> LLMClient {
        LLMClient::with_provider(
            Box::new(CountingProvider { calls, response }),
            GenerationConfig {
                max_tokens: 512,
                temperature: 0.2,
                top_p: 0.95,
            },
            Arc::new(UsageMeter::new()),
        )
    }

    #[test]
    fn normalization_coerces_and_drops() {
        let inputs = vec![
            SnippetInput::Text("plain text".to_string()),
            SnippetInput::Text("   ".to_string()),
            SnippetInput::Record {
                text: "rated".to_string(),
                rating: Some(4),
            },
            SnippetInput::Record {
                text: String::new(),
                rating: Some(1),
            },
        ];

        let normalized = normalize_snippets(&inputs);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].text, "plain text");
        assert_eq!(normalized[0].rating, None);
        assert_eq!(normalized[1].rating, Some(4));
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_model_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = client(calls.clone(), json!({}));

        let sentiment = summarize_sentiment(&llm, &[], "q").await;
        let aspects = extract_top_aspects(&llm, &[], "q").await;
        let jtbd = infer_jtbd(&llm, &[], "q").await;

        assert!(sentiment.is_error());
        assert!(aspects.is_error());
        assert!(jtbd.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_reviews_from_model_is_treated_as_no_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = client(
            calls.clone(),
            json!({
                "total_reviews": 0,
                "mean_rating": null,
                "positive_share": null,
                "negative_share": null,
                "positive_themes": [],
                "negative_themes": []
            }),
        );

        let input = vec![SnippetInput::Text("some review".to_string())];
        let payload = summarize_sentiment(&llm, &input, "q").await;
        assert!(payload.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sentiment_returns_summary_on_valid_output() {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = client(
            calls.clone(),
            json!({
                "total_reviews": 3,
                "mean_rating": 3.7,
                "positive_share": 66.7,
                "negative_share": 33.3,
                "positive_themes": ["fast setup"],
                "negative_themes": ["slow support"]
            }),
        );

        let input = vec![SnippetInput::Record {
            text: "Setup was fast".to_string(),
            rating: Some(5),
        }];
        match summarize_sentiment(&llm, &input, "how do customers feel?").await {
            ToolPayload::Sentiment(summary) => {
                assert_eq!(summary.total_reviews, 3);
                assert_eq!(summary.positive_themes, vec!["fast setup"]);
            }
            other => panic!("expected sentiment payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn zero_aspects_is_an_error_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = client(calls, json!({ "total_aspects": 0, "aspects": [] }));

        let input = vec![SnippetInput::Text("review".to_string())];
        let payload = extract_top_aspects(&llm, &input, "q").await;
        assert!(payload.is_error());
    }

    #[tokio::test]
    async fn jtbd_fills_in_review_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let llm = client(
            calls,
            json!({
                "job": "host production workloads cheaply",
                "situation": "scaling past a hobby VPS",
                "motivation": "cost control",
                "expected_outcome": "reliable servers without surprises",
                "frustrations": ["billing opacity"],
                "quotes": ["moved everything elsewhere"]
            }),
        );

        let input = vec![
            SnippetInput::Text("one".to_string()),
            SnippetInput::Text("two".to_string()),
        ];
        match infer_jtbd(&llm, &input, "why do customers choose this?").await {
            ToolPayload::Jtbd(insight) => {
                assert_eq!(insight.total_reviews, 2);
                assert_eq!(insight.job, "host production workloads cheaply");
            }
            other => panic!("expected jtbd payload, got {:?}", other),
        }
    }
}
