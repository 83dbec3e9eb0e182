//! Ingestion pipeline: vendor review tables to indexed documents.
//!
//! Hybrid chunking emits two kinds of indexable units per review: one
//! review-level document (header + body) and, for non-trivial bodies, one
//! sentence-level document per sentence. Documents are embedded and upserted
//! into the vector index in fixed-size batches.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::IngestConfig;
use crate::embeddings::EmbeddingModel;
use crate::storage::{ReviewStore, VectorIndex};
use crate::types::{ChunkKind, DocRecord, ReviewRecord};

/// Bodies at or below this whitespace-token count are not sentence-chunked.
const MIN_BODY_WORDS: usize = 5;
/// Sentences at or below this trimmed length are skipped.
const MIN_SENTENCE_CHARS: usize = 3;

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    review_score: Option<f64>,
    #[serde(default)]
    review_header: Option<String>,
    #[serde(default)]
    review_body: Option<String>,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub reviews: usize,
    pub review_docs: usize,
    pub sentence_docs: usize,
    /// Reviews whose sentence segmentation failed (review-level doc kept).
    pub skipped_sentence_splits: usize,
    /// Batches that failed after all retries.
    pub failed_batches: usize,
}

/// Read every `*.csv` in `dir` as one vendor table; the vendor tag is the
/// file stem. Missing cells become empty strings / rating 0.
pub fn load_review_tables(dir: &Path) -> Result<Vec<ReviewRecord>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read review directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(anyhow!("No review tables (*.csv) found in {}", dir.display()));
    }

    let mut records = Vec::new();
    let mut row_index = 0usize;

    for path in paths {
        let vendor = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        for row in reader.deserialize::<RawRow>() {
            let row = row.with_context(|| format!("Malformed row in {}", path.display()))?;
            records.push(ReviewRecord {
                review_id: format!("{}_{}", vendor, row_index),
                name: row.name.unwrap_or_default(),
                country: row.country.unwrap_or_default(),
                date: row.date.unwrap_or_default(),
                rating: row.review_score.map(|s| s.round() as i64).unwrap_or(0),
                header: row.review_header.unwrap_or_default(),
                body: row.review_body.unwrap_or_default(),
                vendor: vendor.clone(),
            });
            row_index += 1;
        }

        tracing::info!(vendor = %vendor, "Loaded review table");
    }

    Ok(records)
}

/// Split text on UAX #29 sentence boundaries.
pub fn split_sentences(text: &str) -> Result<Vec<String>> {
    let sentences: Vec<String> = text
        .unicode_sentences()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() && !text.trim().is_empty() {
        return Err(anyhow!("Sentence segmentation produced no sentences"));
    }

    Ok(sentences)
}

/// Build the flat document sequence for a set of reviews. Vectors are left
/// empty here and filled at embed time.
///
/// Returns the documents plus the number of reviews whose sentence
/// segmentation failed.
pub fn build_documents(records: &[ReviewRecord]) -> (Vec<DocRecord>, usize) {
    let now = chrono::Utc::now().timestamp();
    let mut docs = Vec::new();
    let mut skipped = 0usize;

    for record in records {
        let header = record.header.trim();
        let body = record.body.trim();

        let full_content = if body.is_empty() {
            header.to_string()
        } else {
            format!("{}\n\n{}", header, body)
        };

        docs.push(DocRecord {
            id: format!("{}::review", record.review_id),
            review_id: record.review_id.clone(),
            chunk_kind: ChunkKind::Review,
            sentence_idx: 0,
            text: full_content,
            name: record.name.clone(),
            country: record.country.clone(),
            date: record.date.clone(),
            rating: record.rating,
            vendor: record.vendor.clone(),
            review_header: header.to_string(),
            vector: Vec::new(),
            created_at: now,
        });

        if body.is_empty() || body.split_whitespace().count() <= MIN_BODY_WORDS {
            continue;
        }

        let sentences = match split_sentences(body) {
            Ok(sentences) => sentences,
            Err(e) => {
                tracing::warn!(
                    review_id = %record.review_id,
                    error = %e,
                    "Skipping sentence chunks for review"
                );
                skipped += 1;
                continue;
            }
        };

        for (i, sentence) in sentences.iter().enumerate() {
            if sentence.chars().count() <= MIN_SENTENCE_CHARS {
                continue;
            }
            docs.push(DocRecord {
                id: format!("{}::s{}", record.review_id, i),
                review_id: record.review_id.clone(),
                chunk_kind: ChunkKind::Sentence,
                sentence_idx: i as u32,
                text: sentence.clone(),
                name: record.name.clone(),
                country: record.country.clone(),
                date: record.date.clone(),
                rating: record.rating,
                vendor: record.vendor.clone(),
                review_header: header.to_string(),
                vector: Vec::new(),
                created_at: now,
            });
        }
    }

    (docs, skipped)
}

/// Drives a full ingestion: raw rows into the review store, documents into
/// the vector index.
pub struct Ingestor {
    review_store: Arc<ReviewStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingModel>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        review_store: Arc<ReviewStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingModel>,
        config: IngestConfig,
    ) -> Self {
        Self {
            review_store,
            index,
            embedder,
            config,
        }
    }

    /// Full re-ingestion: replaces the stored rows and rebuilds the index.
    pub async fn ingest(&self, records: &[ReviewRecord]) -> Result<IngestReport> {
        self.review_store.replace_all(records).await?;

        let (mut docs, skipped) = build_documents(records);
        let review_docs = docs
            .iter()
            .filter(|d| d.chunk_kind == ChunkKind::Review)
            .count();
        let sentence_docs = docs.len() - review_docs;

        tracing::info!(
            reviews = records.len(),
            review_docs,
            sentence_docs,
            "Ingesting documents"
        );

        self.index.clear().await?;

        let mut failed_batches = 0usize;
        let batch_size = self.config.batch_size;
        let total_batches = (docs.len() + batch_size - 1) / batch_size;

        let mut batch_no = 0usize;
        while !docs.is_empty() {
            let rest = docs.split_off(batch_size.min(docs.len()));
            let batch = std::mem::replace(&mut docs, rest);
            batch_no += 1;

            if self.ingest_batch(batch).await.is_err() {
                failed_batches += 1;
            } else {
                tracing::debug!(batch = batch_no, total = total_batches, "Processed batch");
            }
        }

        if failed_batches > 0 {
            tracing::warn!(failed_batches, "Some ingestion batches failed after retries");
        }

        Ok(IngestReport {
            reviews: records.len(),
            review_docs,
            sentence_docs,
            skipped_sentence_splits: skipped,
            failed_batches,
        })
    }

    /// Convenience: load the tables from a directory and ingest them.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport> {
        let records = load_review_tables(dir)?;
        self.ingest(&records).await
    }

    async fn ingest_batch(&self, mut batch: Vec<DocRecord>) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();

        let mut last_err = None;
        for attempt in 1..=self.config.batch_retries {
            let result = async {
                let vectors = self.embedder.embed_documents(&texts).await?;
                if vectors.len() != batch.len() {
                    return Err(anyhow!(
                        "Embedder returned {} vectors for {} documents",
                        vectors.len(),
                        batch.len()
                    ));
                }
                for (doc, vector) in batch.iter_mut().zip(vectors) {
                    doc.vector = vector;
                }
                self.index.upsert(batch.clone()).await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Ingestion batch failed");
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(250 * attempt as u64))
                        .await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Ingestion batch failed")))
    }
}
