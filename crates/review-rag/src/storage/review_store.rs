//! SQLite store of raw review rows.
//!
//! Holds the ingested `ReviewRecord`s exactly as loaded from the vendor
//! tables. Rows are immutable; a vendor's rows are replaced wholesale on
//! re-ingestion.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::types::ReviewRecord;

pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reviews (
                review_id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                date TEXT NOT NULL DEFAULT '',
                review_score INTEGER NOT NULL DEFAULT 0,
                review_header TEXT NOT NULL DEFAULT '',
                review_body TEXT NOT NULL DEFAULT '',
                vendor TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Replace all rows for the vendors present in `records`, then insert.
    pub async fn replace_all(&self, records: &[ReviewRecord]) -> Result<()> {
        let mut vendors: Vec<&str> = records.iter().map(|r| r.vendor.as_str()).collect();
        vendors.sort_unstable();
        vendors.dedup();

        let mut tx = self.pool.begin().await?;

        for vendor in vendors {
            sqlx::query("DELETE FROM reviews WHERE vendor = ?")
                .bind(vendor)
                .execute(&mut *tx)
                .await?;
        }

        for record in records {
            sqlx::query(
                "INSERT OR REPLACE INTO reviews
                 (review_id, name, country, date, review_score, review_header, review_body, vendor)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.review_id)
            .bind(&record.name)
            .bind(&record.country)
            .bind(&record.date)
            .bind(record.rating)
            .bind(&record.header)
            .bind(&record.body)
            .bind(&record.vendor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Review counts grouped by vendor, ordered by descending count.
    pub async fn get_review_stats(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT vendor, COUNT(*) as count
             FROM reviews
             GROUP BY vendor
             ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("vendor"), row.get::<i64, _>("count")))
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_sqlite;

    fn review(vendor: &str, idx: usize, rating: i64) -> ReviewRecord {
        ReviewRecord {
            review_id: format!("{}_{}", vendor, idx),
            name: "Tester".to_string(),
            country: "FR".to_string(),
            date: "2024-01-01".to_string(),
            rating,
            header: "Header".to_string(),
            body: "Body".to_string(),
            vendor: vendor.to_string(),
        }
    }

    #[tokio::test]
    async fn stats_are_ordered_by_descending_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_sqlite(&dir.path().join("reviews.db")).await.unwrap();
        let store = ReviewStore::new(pool).await.unwrap();

        let mut records = Vec::new();
        for i in 0..3 {
            records.push(review("ovh", i, 4));
        }
        records.push(review("hetzner", 0, 5));
        store.replace_all(&records).await.unwrap();

        let stats = store.get_review_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0], ("ovh".to_string(), 3));
        assert_eq!(stats[1], ("hetzner".to_string(), 1));
    }

    #[tokio::test]
    async fn reingestion_replaces_vendor_rows() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_sqlite(&dir.path().join("reviews.db")).await.unwrap();
        let store = ReviewStore::new(pool).await.unwrap();

        store
            .replace_all(&[review("ovh", 0, 4), review("ovh", 1, 2)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        store.replace_all(&[review("ovh", 0, 5)]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
