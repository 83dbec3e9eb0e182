use serde::{Deserialize, Serialize};

use crate::analysis::{AspectAnalysis, JtbdInsight, SentimentSummary};

/// One raw customer review as ingested from a vendor table.
/// Immutable once stored; replaced only by a full re-ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Synthetic identifier `{vendor}_{row_index}`.
    pub review_id: String,
    pub name: String,
    pub country: String,
    pub date: String,
    /// Review score, 1-5.
    pub rating: i64,
    pub header: String,
    pub body: String,
    pub vendor: String,
}

/// Granularity of an indexed unit: whole reviews or individual sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Review,
    Sentence,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Sentence => "sentence",
        }
    }

    /// Parse a caller-supplied granularity string. Unknown values are a
    /// validation error, not a silent default.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "review" => Some(Self::Review),
            "sentence" => Some(Self::Sentence),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexable unit derived from a review: either the whole review
/// (header + body) or a single sentence from the body. Sentence-level
/// records carry the parent's metadata plus their 0-based sentence index.
#[derive(Debug, Clone)]
pub struct DocRecord {
    pub id: String,
    pub review_id: String,
    pub chunk_kind: ChunkKind,
    /// 0-based index within the parent body; 0 for review-level records.
    pub sentence_idx: u32,
    pub text: String,
    pub name: String,
    pub country: String,
    pub date: String,
    pub rating: i64,
    pub vendor: String,
    /// Parent header, carried on sentence-level records for display.
    pub review_header: String,
    pub vector: Vec<f32>,
    pub created_at: i64,
}

/// A retrieved unit of review text plus display metadata.
/// One per distinct source review in any retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub review_header: String,
}

/// Payload returned by the retrieval tool to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub snippets: Vec<Snippet>,
    pub count: usize,
}

/// The closed set of structured results a tool invocation can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPayload {
    Sentiment(SentimentSummary),
    Aspects(AspectAnalysis),
    Jtbd(JtbdInsight),
    Retrieval(RetrievalResult),
    Error { error: String },
}

impl ToolPayload {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// One accumulated analysis result, tagged with the tool that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,
    pub output: ToolPayload,
}

/// Metadata predicate for vector-index queries: always constrains the chunk
/// granularity, optionally the vendor as well.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub chunk_kind: ChunkKind,
    pub vendor: Option<String>,
}

impl MetadataFilter {
    pub fn new(chunk_kind: ChunkKind, vendor: Option<String>) -> Self {
        Self { chunk_kind, vendor }
    }

    /// Render as a Lance SQL predicate: a single equality without a vendor,
    /// a conjunction with one.
    pub fn to_predicate(&self) -> String {
        let mut predicates = vec![format!("chunk_type = '{}'", self.chunk_kind.as_str())];
        if let Some(ref vendor) = self.vendor {
            predicates.push(format!("vendor = '{}'", vendor.replace('\'', "''")));
        }
        predicates.join(" AND ")
    }
}
