//! Diversified review retrieval.
//!
//! Queries the vector index under a metadata filter, reranks the candidate
//! pool with MMR, deduplicates by source review, and maps the survivors to
//! display snippets.

pub mod mmr;

use std::sync::Arc;
use thiserror::Error;

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingModel;
use crate::storage::{VectorHit, VectorIndex};
use crate::types::{ChunkKind, MetadataFilter, Snippet};

pub use mmr::{cosine_similarity, mmr_select};

/// Rendered in place of snippets when retrieval finds nothing.
pub const NO_RESULTS_SENTINEL: &str = "No relevant reviews found.";

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Malformed caller-supplied parameters; retrieval was not attempted.
    #[error("invalid retrieval parameters: {0}")]
    InvalidParams(String),
    /// Index or connectivity failure.
    #[error("retrieval failed: {0}")]
    Index(#[from] anyhow::Error),
}

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingModel>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `top_k` snippets for `query`, diversified over a pool
    /// of `fetch_k` candidates and deduplicated by source review.
    ///
    /// `None` for `top_k`/`fetch_k` uses the configured defaults. Zero
    /// matches is an empty `Ok`, never an error.
    pub async fn retrieve(
        &self,
        query: &str,
        chunk_kind: ChunkKind,
        vendor: Option<&str>,
        top_k: Option<usize>,
        fetch_k: Option<usize>,
    ) -> Result<Vec<Snippet>, RetrievalError> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        let fetch_k = fetch_k.unwrap_or(self.config.fetch_k);

        if top_k == 0 {
            return Err(RetrievalError::InvalidParams(
                "top_k must be positive".to_string(),
            ));
        }
        if fetch_k < top_k {
            return Err(RetrievalError::InvalidParams(format!(
                "fetch_k ({}) must be >= top_k ({})",
                fetch_k, top_k
            )));
        }

        let vendor = vendor.map(|v| v.trim()).filter(|v| !v.is_empty());
        let filter = MetadataFilter::new(chunk_kind, vendor.map(str::to_string));
        let predicate = filter.to_predicate();

        let query_vector = self.embedder.embed_query(query).await?;
        let candidates = self
            .index
            .search(&query_vector, fetch_k, Some(&predicate))
            .await?;

        tracing::debug!(
            query = %query,
            chunk_type = %chunk_kind,
            candidates = candidates.len(),
            "Retrieved candidate pool"
        );

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let selected = mmr_select(&query_vector, candidates, self.config.mmr_lambda, top_k);
        Ok(dedup_and_map(selected))
    }
}

/// Deduplicate an ordered hit list by source review (first occurrence wins)
/// and map the survivors to snippets.
fn dedup_and_map(hits: Vec<VectorHit>) -> Vec<Snippet> {
    let mut seen = std::collections::HashSet::new();
    let mut snippets = Vec::new();

    for hit in hits {
        if !seen.insert(hit.review_id.clone()) {
            continue;
        }
        snippets.push(Snippet {
            text: hit.text,
            rating: hit.rating,
            date: hit.date,
            source: hit.name,
            vendor: hit.vendor,
            review_header: hit.review_header,
        });
    }

    snippets
}

/// Format snippets for model consumption: one bracketed source line per
/// snippet, blank-line separated. Empty input renders as a fixed sentinel.
pub fn format_snippets_to_text(snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return NO_RESULTS_SENTINEL.to_string();
    }

    snippets
        .iter()
        .map(|snippet| {
            let date = if snippet.date.is_empty() {
                "Unknown date"
            } else {
                &snippet.date
            };
            let rating = if snippet.rating == 0 {
                "N/A".to_string()
            } else {
                snippet.rating.to_string()
            };
            format!(
                "[{} | {} | Score: {}] {}",
                snippet.source,
                date,
                rating,
                snippet.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
