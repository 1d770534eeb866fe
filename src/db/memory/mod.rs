use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    error::Result,
    models::{ElemQuery, Filter, FilterOp, ID_FIELD, Record, SortDirection, record_i64},
    repositories::{Storage, StorageTransaction},
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: Vec<Record>,
    next_id: i64,
}

impl MemoryTable {
    fn push(&mut self, mut row: Record) {
        self.next_id += 1;
        row.insert(ID_FIELD.to_string(), Value::from(self.next_id));
        self.rows.push(row);
    }

    fn matches_key(existing: &Record, row: &Record, unique_key: &[String]) -> bool {
        unique_key.iter().all(|field| {
            let left = existing.get(field).unwrap_or(&Value::Null);
            let right = row.get(field).unwrap_or(&Value::Null);
            values_equal(left, right)
        })
    }

    fn upsert(&mut self, row: &Record, unique_key: &[String]) {
        let mut row = row.clone();
        row.remove(ID_FIELD);

        if !unique_key.is_empty()
            && let Some(existing) = self
                .rows
                .iter_mut()
                .find(|existing| Self::matches_key(existing, &row, unique_key))
        {
            for (field, value) in row {
                existing.insert(field, value);
            }
            return;
        }

        self.push(row);
    }

    fn update(&mut self, filter: &Filter, patch: &Record) -> u64 {
        let mut updated = 0;
        for row in self.rows.iter_mut().filter(|row| matches_filter(row, filter)) {
            for (field, value) in patch {
                row.insert(field.clone(), value.clone());
            }
            updated += 1;
        }
        updated
    }

    fn delete(&mut self, filter: &Filter) -> u64 {
        let before = self.rows.len();
        self.rows.retain(|row| !matches_filter(row, filter));
        (before - self.rows.len()) as u64
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
}

impl MemoryState {
    fn table_mut(&mut self, table: &str) -> &mut MemoryTable {
        self.tables.entry(table.to_string()).or_default()
    }

    fn insert_replacing(&mut self, table: &str, rows: &[Record], unique_key: &[String]) -> u64 {
        let target = self.table_mut(table);
        for row in rows {
            target.upsert(row, unique_key);
        }
        rows.len() as u64
    }

    fn update_where(&mut self, table: &str, filter: &Filter, patch: &Record) -> u64 {
        self.tables
            .get_mut(table)
            .map_or(0, |target| target.update(filter, patch))
    }

    fn delete_where(&mut self, table: &str, filter: &Filter) -> u64 {
        self.tables
            .get_mut(table)
            .map_or(0, |target| target.delete(filter))
    }

    fn get_elems(&self, table: &str, query: &ElemQuery) -> Vec<Record> {
        let Some(source) = self.tables.get(table) else {
            return Vec::new();
        };

        let mut rows: Vec<Record> = source
            .rows
            .iter()
            .filter(|row| matches_filter(row, &query.filter))
            .cloned()
            .collect();

        if !query.sort.is_empty() {
            rows.sort_by(|a, b| {
                for key in &query.sort {
                    let ord = compare_for_sort(
                        a.get(&key.field).unwrap_or(&Value::Null),
                        b.get(&key.field).unwrap_or(&Value::Null),
                    );
                    let ord = match key.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        } else {
            rows.sort_by_key(|row| record_i64(row, ID_FIELD));
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }

        rows
    }
}

/// In-process [`Storage`] backed by ordered maps.
///
/// Tables are created on first write; reading a table that was never written returns no rows.
/// Transactions work on a snapshot of the whole store and replace it on commit, so the store must
/// have a single writer while a transaction is open, which the sync queue guarantees.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .expect("`MemoryStorage` mutex can't be poisoned")
    }

    /// Returns every row of `table`, ordered by internal id.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock().get_elems(table, &ElemQuery::default())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_table_like(&self, table: &str, _template: &str) -> Result<()> {
        let _ = self.lock().table_mut(table);
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.lock().tables.remove(table);
        Ok(())
    }

    async fn get_elems(&self, table: &str, query: &ElemQuery) -> Result<Vec<Record>> {
        Ok(self.lock().get_elems(table, query))
    }

    async fn insert_replacing(
        &self,
        table: &str,
        rows: &[Record],
        unique_key: &[String],
    ) -> Result<u64> {
        Ok(self.lock().insert_replacing(table, rows, unique_key))
    }

    async fn update_where(&self, table: &str, filter: &Filter, patch: &Record) -> Result<u64> {
        Ok(self.lock().update_where(table, filter, patch))
    }

    async fn delete_where(&self, table: &str, filter: &Filter) -> Result<u64> {
        Ok(self.lock().delete_where(table, filter))
    }

    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        let working = self.lock().clone();

        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            working,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn insert_replacing(
        &mut self,
        table: &str,
        rows: &[Record],
        unique_key: &[String],
    ) -> Result<u64> {
        Ok(self.working.insert_replacing(table, rows, unique_key))
    }

    async fn update_where(&mut self, table: &str, filter: &Filter, patch: &Record) -> Result<u64> {
        Ok(self.working.update_where(table, filter, patch))
    }

    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64> {
        Ok(self.working.delete_where(table, filter))
    }

    async fn merge_table(&mut self, from: &str, into: &str, unique_key: &[String]) -> Result<u64> {
        let rows = self.working.get_elems(from, &ElemQuery::default());
        Ok(self.working.insert_replacing(into, &rows, unique_key))
    }

    async fn drop_table(&mut self, table: &str) -> Result<()> {
        self.working.tables.remove(table);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { state, working } = *self;
        *state
            .lock()
            .expect("`MemoryStorage` mutex can't be poisoned") = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// SQL-like comparison: `None` whenever either side is `NULL` or the types differ.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort order with `NULL` ranked above every value, as Postgres does.
fn compare_for_sort(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
    }
}

fn matches_filter(row: &Record, filter: &Filter) -> bool {
    filter.conditions().iter().all(|condition| {
        let value = row.get(&condition.field).unwrap_or(&Value::Null);
        let cmp = |expected: &Value| compare_values(value, expected);

        match &condition.op {
            FilterOp::IsNull => value.is_null(),
            FilterOp::IsNotNull => !value.is_null(),
            FilterOp::Eq(expected) => cmp(expected) == Some(Ordering::Equal),
            FilterOp::Ne(expected) => cmp(expected).is_some_and(|ord| ord != Ordering::Equal),
            FilterOp::Gt(expected) => cmp(expected) == Some(Ordering::Greater),
            FilterOp::Gte(expected) => cmp(expected).is_some_and(|ord| ord != Ordering::Less),
            FilterOp::Lt(expected) => cmp(expected) == Some(Ordering::Less),
            FilterOp::Lte(expected) => cmp(expected).is_some_and(|ord| ord != Ordering::Greater),
            FilterOp::In(candidates) => candidates
                .iter()
                .any(|expected| cmp(expected) == Some(Ordering::Equal)),
        }
    })
}

#[cfg(test)]
mod tests;
