use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use super::{VectorHit, VectorIndex};
use crate::types::DocRecord;

pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    table_name: String,
}

impl LanceStore {
    pub async fn new(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let store = Self {
            db,
            dimension,
            table_name: "reviews".to_string(),
        };

        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("review_id", DataType::Utf8, false),
            Field::new("chunk_type", DataType::Utf8, false),
            Field::new("sentence_idx", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("country", DataType::Utf8, false),
            Field::new("date", DataType::Utf8, false),
            Field::new("score", DataType::Int64, false),
            Field::new("vendor", DataType::Utf8, false),
            Field::new("review_header", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            // Create with a single empty-ish seed record, then delete it
            let schema = self.schema();
            let seed_vec = vec![0.0f32; self.dimension];
            let values = Float32Array::from(seed_vec);
            let vector_field = Field::new("item", DataType::Float32, true);
            let vector_array = FixedSizeListArray::new(
                Arc::new(vector_field),
                self.dimension as i32,
                Arc::new(values) as Arc<dyn Array>,
                None,
            );

            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                    Arc::new(StringArray::from(vec!["__seed__"])),
                    Arc::new(StringArray::from(vec!["review"])),
                    Arc::new(UInt32Array::from(vec![0u32])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(Int64Array::from(vec![0i64])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(vector_array) as Arc<dyn Array>,
                    Arc::new(Int64Array::from(vec![0i64])),
                ],
            )
            .context("Failed to create seed RecordBatch")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await
                .context("Failed to create reviews table")?;

            // Remove seed record
            let table = self.db.open_table(&self.table_name).execute().await?;
            table.delete("id = '__seed__'").await.ok();
        }
        Ok(())
    }

    /// Delete every document belonging to one vendor (used on re-ingestion).
    pub async fn delete_by_vendor(&self, vendor: &str) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let count_before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!("vendor = '{}'", vendor.replace('\'', "''"));
        table.delete(&predicate).await?;
        let count_after = table.count_rows(None).await.unwrap_or(0);
        Ok(count_before - count_after)
    }

    pub async fn create_index_if_needed(&self) -> Result<()> {
        let count = VectorIndex::count(self).await?;
        if count >= 1_000 {
            let table = self.db.open_table(&self.table_name).execute().await?;
            table
                .create_index(&["vector"], lancedb::index::Index::Auto)
                .execute()
                .await
                .context("Failed to create vector index")?;
            tracing::info!("Created IVF-PQ index on {} rows", count);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceStore {
    async fn upsert(&self, docs: Vec<DocRecord>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let table = self
            .db
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open reviews table")?;

        let len = docs.len();
        let schema = self.schema();

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        let review_ids: Vec<&str> = docs.iter().map(|d| d.review_id.as_str()).collect();
        let chunk_types: Vec<&str> = docs.iter().map(|d| d.chunk_kind.as_str()).collect();
        let sentence_idxs: Vec<u32> = docs.iter().map(|d| d.sentence_idx).collect();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        let countries: Vec<&str> = docs.iter().map(|d| d.country.as_str()).collect();
        let dates: Vec<&str> = docs.iter().map(|d| d.date.as_str()).collect();
        let scores: Vec<i64> = docs.iter().map(|d| d.rating).collect();
        let vendors: Vec<&str> = docs.iter().map(|d| d.vendor.as_str()).collect();
        let headers: Vec<&str> = docs.iter().map(|d| d.review_header.as_str()).collect();
        let created_ats: Vec<i64> = docs.iter().map(|d| d.created_at).collect();

        // Build FixedSizeListArray for vectors
        let flat_vectors: Vec<f32> = docs.iter().flat_map(|d| d.vector.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(review_ids)),
                Arc::new(StringArray::from(chunk_types)),
                Arc::new(UInt32Array::from(sentence_idxs)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(names)),
                Arc::new(StringArray::from(countries)),
                Arc::new(StringArray::from(dates)),
                Arc::new(Int64Array::from(scores)),
                Arc::new(StringArray::from(vendors)),
                Arc::new(StringArray::from(headers)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .context("Failed to create RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert documents")?;

        tracing::debug!("Inserted {} documents into LanceDB", len);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;

        let mut query_builder = table.query().nearest_to(query)?;
        query_builder = query_builder
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(predicate) = filter {
            query_builder = query_builder.only_if(predicate);
        }

        let results = query_builder
            .execute()
            .await
            .context("LanceDB vector search failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits_from_batches(&batches))
    }

    async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let count = table.count_rows(None).await?;
        Ok(count)
    }

    async fn clear(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.db.drop_table(&self.table_name, &[]).await?;
        }
        self.ensure_table().await?;
        Ok(())
    }
}

/// Extract VectorHit records from Arrow RecordBatches.
fn extract_hits_from_batches(batches: &[RecordBatch]) -> Vec<VectorHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let review_ids = batch.column_by_name("review_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let chunk_types = batch.column_by_name("chunk_type").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let sentence_idxs = batch.column_by_name("sentence_idx").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let names = batch.column_by_name("name").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let countries = batch.column_by_name("country").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let dates = batch.column_by_name("date").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let scores = batch.column_by_name("score").and_then(|c| c.as_any().downcast_ref::<Int64Array>());
        let vendors = batch.column_by_name("vendor").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let headers = batch.column_by_name("review_header").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let vectors = batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(texts), Some(review_ids)) = (ids, texts, review_ids) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let score = distances.map(|d| (1.0 - d.value(i)).max(0.0)).unwrap_or(0.0);

            let vector = vectors
                .map(|v| {
                    let item = v.value(i);
                    item.as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|f| f.values().to_vec())
                        .unwrap_or_default()
                })
                .unwrap_or_default();

            hits.push(VectorHit {
                id: ids.value(i).to_string(),
                review_id: review_ids.value(i).to_string(),
                chunk_type: chunk_types.map(|c| c.value(i).to_string()).unwrap_or_default(),
                sentence_idx: sentence_idxs.map(|s| s.value(i)).unwrap_or(0),
                text: texts.value(i).to_string(),
                name: names.map(|n| n.value(i).to_string()).unwrap_or_default(),
                country: countries.map(|c| c.value(i).to_string()).unwrap_or_default(),
                date: dates.map(|d| d.value(i).to_string()).unwrap_or_default(),
                rating: scores.map(|s| s.value(i)).unwrap_or(0),
                vendor: vendors.map(|v| v.value(i).to_string()).unwrap_or_default(),
                review_header: headers.map(|h| h.value(i).to_string()).unwrap_or_default(),
                vector,
                score,
            });
        }
    }
    hits
}
