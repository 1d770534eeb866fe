use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Pool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
    types::Json,
};

use super::{
    error::{DbError, Result},
    models::{ElemQuery, Filter, Record},
    repositories::{Storage, StorageTransaction},
};

mod queries;

fn decode_rows(table: &str, rows: Vec<PgRow>) -> Result<Vec<Record>> {
    rows.into_iter()
        .map(|row| {
            let Json(value) = row
                .try_get::<Json<Value>, _>("row")
                .map_err(DbError::Query)?;

            match value {
                Value::Object(record) => Ok(record),
                other => Err(DbError::UnexpectedRow {
                    table: table.to_string(),
                    reason: format!("expected a JSON object, got {other}"),
                }),
            }
        })
        .collect()
}

/// [`Storage`] over a PostgreSQL pool.
///
/// Queries are built at runtime, since table names come from the collection registry. Rows travel
/// as JSON: reads go through `to_jsonb` and writes through `jsonb_populate_recordset`, letting the
/// target table's column types drive conversions. Upserts need a unique constraint over the
/// collection's unique key.
pub struct PgStorage {
    pool: Arc<Pool<Postgres>>,
}

impl PgStorage {
    /// Establishes a connection pool to the PostgreSQL database.
    ///
    /// Tables for every registered collection, and the bookkeeping tables, are expected to exist.
    pub async fn connect(postgres_db_url: &str) -> Result<Arc<Self>> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(postgres_db_url)
            .await
            .map_err(DbError::Connection)?;

        Ok(Arc::new(Self::new(Arc::new(pool))))
    }

    pub fn new(pool: Arc<Pool<Postgres>>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &Pool<Postgres> {
        self.pool.as_ref()
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(queries::TABLE_EXISTS)
            .bind(table)
            .fetch_one(self.pool())
            .await
            .map_err(DbError::Query)
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(queries::TABLES_WITH_PREFIX)
            .bind(prefix)
            .fetch_all(self.pool())
            .await
            .map_err(DbError::Query)
    }

    async fn create_table_like(&self, table: &str, template: &str) -> Result<()> {
        sqlx::query(&queries::create_table_like(table, template)?)
            .execute(self.pool())
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        sqlx::query(&queries::drop_table(table)?)
            .execute(self.pool())
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }

    async fn get_elems(&self, table: &str, query: &ElemQuery) -> Result<Vec<Record>> {
        let mut qb = queries::select_elems(table, query)?;

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(DbError::Query)?;

        decode_rows(table, rows)
    }

    async fn insert_replacing(
        &self,
        table: &str,
        rows: &[Record],
        unique_key: &[String],
    ) -> Result<u64> {
        let statements = queries::insert_replacing(table, rows, unique_key)?;
        if statements.len() <= 1 {
            let mut written = 0;
            for mut qb in statements {
                written += qb
                    .build()
                    .execute(self.pool())
                    .await
                    .map_err(DbError::Query)?
                    .rows_affected();
            }
            return Ok(written);
        }

        // Several column sets must land together
        let mut tx = self.begin().await?;
        let written = tx.insert_replacing(table, rows, unique_key).await?;
        tx.commit().await?;

        Ok(written)
    }

    async fn update_where(&self, table: &str, filter: &Filter, patch: &Record) -> Result<u64> {
        let Some(mut qb) = queries::update_where(table, filter, patch)? else {
            return Ok(0);
        };

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    async fn delete_where(&self, table: &str, filter: &Filter) -> Result<u64> {
        let result = queries::delete_where(table, filter)?
            .build()
            .execute(self.pool())
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        let tx = self.pool.begin().await.map_err(DbError::TransactionBegin)?;

        Ok(Box::new(PgStorageTransaction { tx }))
    }
}

struct PgStorageTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StorageTransaction for PgStorageTransaction {
    async fn insert_replacing(
        &mut self,
        table: &str,
        rows: &[Record],
        unique_key: &[String],
    ) -> Result<u64> {
        let mut written = 0;

        for mut qb in queries::insert_replacing(table, rows, unique_key)? {
            written += qb
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(DbError::Query)?
                .rows_affected();
        }

        Ok(written)
    }

    async fn update_where(&mut self, table: &str, filter: &Filter, patch: &Record) -> Result<u64> {
        let Some(mut qb) = queries::update_where(table, filter, patch)? else {
            return Ok(0);
        };

        let result = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64> {
        let result = queries::delete_where(table, filter)?
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    async fn merge_table(&mut self, from: &str, into: &str, unique_key: &[String]) -> Result<u64> {
        let columns = sqlx::query_scalar::<_, String>(queries::TABLE_COLUMNS)
            .bind(from)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Query)?;

        let sql = queries::merge_table(from, into, &columns, unique_key)?;

        let result = sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected())
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        sqlx::query(&queries::drop_table(table)?)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Query)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(DbError::TransactionCommit)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(DbError::TransactionRollback)
    }
}
