use async_trait::async_trait;

use super::{
    error::Result,
    models::{ElemQuery, Filter, Record},
};

/// Generic CRUD surface the synchronization engine needs from the store.
///
/// Table and column names are plain identifiers (`[A-Za-z0-9_]`). Writes outside a transaction
/// are applied immediately; cross-table mutations that must be atomic go through
/// [`Storage::begin`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Lists tables whose name starts with `prefix`.
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;

    /// Creates `table` with the same columns and unique constraints as `template`, if it does not
    /// exist yet.
    async fn create_table_like(&self, table: &str, template: &str) -> Result<()>;

    /// Drops `table` if it exists.
    async fn drop_table(&self, table: &str) -> Result<()>;

    async fn get_elems(&self, table: &str, query: &ElemQuery) -> Result<Vec<Record>>;

    /// Inserts `rows`, replacing the provided columns of any existing row with the same
    /// `unique_key` values. An empty `unique_key` performs plain inserts.
    ///
    /// Returns the number of rows written.
    async fn insert_replacing(&self, table: &str, rows: &[Record], unique_key: &[String])
    -> Result<u64>;

    /// Sets the columns in `patch` on every row matching `filter`. Returns the number of rows
    /// updated.
    async fn update_where(&self, table: &str, filter: &Filter, patch: &Record) -> Result<u64>;

    async fn delete_where(&self, table: &str, filter: &Filter) -> Result<u64>;

    /// Opens a transaction. Changes made through it are invisible to other readers until
    /// [`StorageTransaction::commit`], and discarded on [`StorageTransaction::rollback`] or drop.
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>>;
}

#[async_trait]
pub trait StorageTransaction: Send {
    async fn insert_replacing(
        &mut self,
        table: &str,
        rows: &[Record],
        unique_key: &[String],
    ) -> Result<u64>;

    async fn update_where(&mut self, table: &str, filter: &Filter, patch: &Record) -> Result<u64>;

    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64>;

    /// Copies every row of `from` into `into`, replacing rows with the same `unique_key` values.
    /// The internal id of `into` is assigned by the target table.
    async fn merge_table(&mut self, from: &str, into: &str, unique_key: &[String]) -> Result<u64>;

    async fn drop_table(&mut self, table: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
