pub mod checkpoints;
pub mod lance_store;
pub mod review_store;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

pub use checkpoints::CheckpointStore;
pub use lance_store::LanceStore;
pub use review_store::ReviewStore;

use crate::types::DocRecord;

/// Open (creating if missing) the SQLite database backing the review and
/// checkpoint stores.
pub async fn open_sqlite(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// One candidate returned from a nearest-neighbor query. Carries the stored
/// vector so the caller can run diversity reranking over the pool.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub review_id: String,
    pub chunk_type: String,
    pub sentence_idx: u32,
    pub text: String,
    pub name: String,
    pub country: String,
    pub date: String,
    pub rating: i64,
    pub vendor: String,
    pub review_header: String,
    pub vector: Vec<f32>,
    pub score: f32,
}

/// Nearest-neighbor index with metadata filtering. The engine consumes the
/// index through this seam; `LanceStore` is the production implementation.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a batch of documents with their vectors.
    async fn upsert(&self, docs: Vec<DocRecord>) -> Result<()>;

    /// Return the `k` nearest neighbors to `query` under an optional SQL
    /// predicate over the metadata columns.
    async fn search(&self, query: &[f32], k: usize, filter: Option<&str>)
        -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}
