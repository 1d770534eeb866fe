use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    db::{Storage, StorageTransaction},
    sync::context::RunId,
};

use super::{checker::PendingSchema, error::Result};

/// Prefix shared by every staging table.
pub const TEMP_TABLE_PREFIX: &str = "tmp_sync_";

/// Staging table of `main` for the pass `run_id`.
pub fn temp_name(main: &str, run_id: &RunId) -> String {
    format!("{TEMP_TABLE_PREFIX}{run_id}_{main}")
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CleanupScope<'a> {
    Run(&'a RunId),
    /// Every staging table, of any pass.
    All,
}

pub(crate) struct TempTables {
    storage: Arc<dyn Storage>,
}

impl TempTables {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_temp_schema_for(&self, pending: &PendingSchema, run_id: &RunId) -> Result<()> {
        for collection in pending.collections() {
            let main = collection.schema.name();
            self.storage
                .create_table_like(&temp_name(main, run_id), main)
                .await?;
        }

        Ok(())
    }

    /// Moves the staged rows of `pending` into the main tables and drops the staging tables.
    ///
    /// Append-only rows replace main rows with the same unique key. A snapshot replaces every main
    /// row of its selector, and only once its fetch completed; an incomplete snapshot is dropped.
    pub async fn promote(
        tx: &mut dyn StorageTransaction,
        pending: &PendingSchema,
        run_id: &RunId,
    ) -> Result<u64> {
        let mut promoted = 0;

        for collection in pending.collections() {
            let schema = &collection.schema;
            let temp = temp_name(schema.name(), run_id);

            if schema.is_append_only() {
                promoted += tx
                    .merge_table(&temp, schema.name(), schema.unique_key())
                    .await?;
            } else {
                let completed: Vec<_> = collection
                    .steps
                    .iter()
                    .filter(|step| step.is_base_step_ready)
                    .collect();

                if !completed.is_empty() {
                    for step in completed {
                        tx.delete_where(schema.name(), &step.selector.row_filter(schema))
                            .await?;
                    }

                    promoted += tx
                        .merge_table(&temp, schema.name(), schema.unique_key())
                        .await?;
                }
            }

            tx.drop_table(&temp).await?;

            debug!(collection = schema.name(), %run_id, "promoted staged rows");
        }

        Ok(promoted)
    }

    /// Drops staging tables. Returns how many were dropped.
    pub async fn cleanup(&self, scope: CleanupScope<'_>) -> Result<usize> {
        let prefix = match scope {
            CleanupScope::Run(run_id) => format!("{TEMP_TABLE_PREFIX}{run_id}_"),
            CleanupScope::All => TEMP_TABLE_PREFIX.to_string(),
        };

        let tables = self.storage.list_tables(&prefix).await?;

        for table in &tables {
            self.storage.drop_table(table).await?;
        }

        if !tables.is_empty() {
            info!(dropped = tables.len(), "discarded staging tables");
        }

        Ok(tables.len())
    }
}
