use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::BackendError;
use crate::models::{TransactionFilter, TransactionRecord, VendorCount};
use crate::traits::TransactionIndex;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY,
    facility_id    TEXT NOT NULL,
    facility_type  TEXT,
    region         TEXT,
    bed_size       TEXT,
    month          INTEGER,
    year           INTEGER,
    load_date      TEXT NOT NULL,
    vendor         TEXT,
    vendor_id      TEXT,
    manufacturer   TEXT,
    catalog_number TEXT,
    item_desc      TEXT,
    quantity       INTEGER NOT NULL,
    price_paid     REAL NOT NULL,
    total_spend    REAL NOT NULL,
    unit_cost      REAL
)";

const UPSERT: &str = "INSERT OR REPLACE INTO transactions (
    transaction_id, facility_id, facility_type, region, bed_size,
    month, year, load_date, vendor, vendor_id, manufacturer,
    catalog_number, item_desc, quantity, price_paid, total_spend, unit_cost
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Relational transaction store backed by SQLite. The pool is created once
/// at startup and injected; there is no lazy construction.
#[derive(Debug, Clone)]
pub struct SqliteTransactionStore {
    pool: SqlitePool,
}

impl SqliteTransactionStore {
    pub async fn connect(database_path: &str) -> Result<Self, BackendError> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection of a larger
    /// pool would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, BackendError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TransactionIndex for SqliteTransactionStore {
    async fn upsert_transactions(
        &self,
        records: &[TransactionRecord],
    ) -> Result<usize, BackendError> {
        let mut stored = 0usize;

        for record in records {
            let result = sqlx::query(UPSERT)
                .bind(&record.transaction_id)
                .bind(&record.facility_id)
                .bind(&record.facility_type)
                .bind(&record.region)
                .bind(&record.bed_size)
                .bind(record.month)
                .bind(record.year)
                .bind(record.load_date)
                .bind(&record.vendor)
                .bind(&record.vendor_id)
                .bind(&record.manufacturer)
                .bind(&record.catalog_number)
                .bind(&record.item_desc)
                .bind(record.quantity)
                .bind(record.price_paid)
                .bind(record.total_spend)
                .bind(record.unit_cost)
                .execute(&self.pool)
                .await;

            match result {
                Ok(_) => stored += 1,
                Err(error) => {
                    warn!(
                        transaction_id = %record.transaction_id,
                        %error,
                        "transaction upsert failed, continuing with remainder"
                    );
                }
            }
        }

        Ok(stored)
    }

    async fn search_keyword(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<TransactionRecord>, BackendError> {
        let pattern = format!("%{}%", term.to_lowercase());

        let records = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions
             WHERE LOWER(COALESCE(vendor, '')) LIKE ?
                OR LOWER(COALESCE(facility_type, '')) LIKE ?
             LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, BackendError> {
        let vendor_pattern = filter
            .vendor
            .as_ref()
            .map(|vendor| format!("%{}%", vendor.to_lowercase()));

        let records = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions
             WHERE (? IS NULL OR year = ?)
               AND (? IS NULL OR LOWER(COALESCE(vendor, '')) LIKE ?)
             ORDER BY load_date DESC, transaction_id
             LIMIT ? OFFSET ?",
        )
        .bind(filter.year)
        .bind(filter.year)
        .bind(&vendor_pattern)
        .bind(&vendor_pattern)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionRecord>, BackendError> {
        let record = sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE transaction_id = ?",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn vendor_counts(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<VendorCount>, BackendError> {
        let counts = sqlx::query_as::<_, VendorCount>(
            "SELECT vendor, COUNT(*) AS transactions FROM transactions
             WHERE vendor IS NOT NULL
               AND (? IS NULL OR load_date >= ?)
               AND (? IS NULL OR load_date <= ?)
             GROUP BY vendor
             ORDER BY transactions DESC, vendor",
        )
        .bind(from)
        .bind(from)
        .bind(to)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteTransactionStore;
    use crate::models::{TransactionFilter, TransactionRecord};
    use crate::traits::TransactionIndex;
    use chrono::NaiveDate;

    fn record(transaction_id: &str, vendor: &str, year: i32) -> TransactionRecord {
        TransactionRecord {
            transaction_id: transaction_id.to_string(),
            facility_id: "F-1".to_string(),
            facility_type: Some("HOSPITAL".to_string()),
            region: Some("West".to_string()),
            bed_size: None,
            month: Some(6),
            year: Some(year),
            load_date: NaiveDate::from_ymd_opt(year, 6, 14).unwrap(),
            vendor: Some(vendor.to_string()),
            vendor_id: None,
            manufacturer: None,
            catalog_number: None,
            item_desc: Some("Aspirin".to_string()),
            quantity: 5,
            price_paid: 10.0,
            total_spend: 50.0,
            unit_cost: Some(10.0),
        }
    }

    async fn store_with_schema() -> SqliteTransactionStore {
        let store = SqliteTransactionStore::in_memory().await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let store = store_with_schema().await;
        let stored = store
            .upsert_transactions(&[record("T-1", "VendorA", 2023)])
            .await
            .unwrap();
        assert_eq!(stored, 1);

        let found = store.find_transaction("T-1").await.unwrap().unwrap();
        assert_eq!(found, record("T-1", "VendorA", 2023));
        assert!(store.find_transaction("T-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_ids_overwrite_in_place() {
        let store = store_with_schema().await;
        store
            .upsert_transactions(&[record("T-1", "VendorA", 2023)])
            .await
            .unwrap();
        store
            .upsert_transactions(&[record("T-1", "VendorB", 2023)])
            .await
            .unwrap();

        let found = store.find_transaction("T-1").await.unwrap().unwrap();
        assert_eq!(found.vendor.as_deref(), Some("VendorB"));
    }

    #[tokio::test]
    async fn keyword_search_is_case_insensitive_substring() {
        let store = store_with_schema().await;
        store
            .upsert_transactions(&[
                record("T-1", "Cencora", 2023),
                record("T-2", "VendorB", 2023),
            ])
            .await
            .unwrap();

        let hits = store.search_keyword("cenCOR", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].transaction_id, "T-1");

        // facility_type column participates too
        let hits = store.search_keyword("hospital", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn listing_filters_by_year_and_vendor() {
        let store = store_with_schema().await;
        store
            .upsert_transactions(&[
                record("T-1", "VendorA", 2022),
                record("T-2", "VendorA", 2023),
                record("T-3", "VendorB", 2023),
            ])
            .await
            .unwrap();

        let filter = TransactionFilter {
            year: Some(2023),
            vendor: Some("vendora".to_string()),
            offset: 0,
            limit: 100,
        };
        let rows = store.list_transactions(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, "T-2");
    }

    #[tokio::test]
    async fn vendor_counts_group_and_rank() {
        let store = store_with_schema().await;
        store
            .upsert_transactions(&[
                record("T-1", "VendorA", 2023),
                record("T-2", "VendorA", 2023),
                record("T-3", "VendorB", 2023),
            ])
            .await
            .unwrap();

        let counts = store.vendor_counts(None, None).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].vendor, "VendorA");
        assert_eq!(counts[0].transactions, 2);
    }
}
