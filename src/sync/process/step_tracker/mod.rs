use std::sync::Arc;

use tracing::debug;

use crate::{
    db::{
        Storage, StorageTransaction,
        models::{ElemQuery, Filter, SortKey, record_i64},
    },
    sync::{
        config::{StepTrackerConfig, SyncConfig},
        schema::{CollectionSchema, SYNC_USER_STEPS_TABLE},
    },
    util::MtsExt,
};

use super::error::Result;

pub(crate) mod step_data;

use step_data::{StepSelector, SyncUserStepData};

/// Everything the readiness rules look at, gathered from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StepObservation {
    pub stored: Option<SyncUserStepData>,
    pub oldest_main: Option<i64>,
    pub newest_main: Option<i64>,
    pub newest_temp: Option<i64>,
}

/// Decides which halves of a step are pending. Pure.
pub(crate) fn evaluate_step(
    config: &StepTrackerConfig,
    schema: &CollectionSchema,
    selector: &StepSelector,
    observation: &StepObservation,
    start: i64,
    now: i64,
) -> SyncUserStepData {
    let mut step = SyncUserStepData {
        collection: schema.name().to_string(),
        selector: selector.clone(),
        base_start: start,
        base_end: now,
        is_base_step_ready: false,
        curr_start: now,
        curr_end: now,
        is_curr_step_ready: true,
        synced_at: observation.stored.as_ref().and_then(|s| s.synced_at),
    };

    if !schema.is_append_only() {
        // Snapshots only have a base half: the whole current state
        step.is_base_step_ready = step
            .synced_at
            .is_some_and(|at| now - at < config.snapshot_staleness_ms());
        return step;
    }

    let newest = observation.newest_main.max(observation.newest_temp);

    let Some(stored) = &observation.stored else {
        if let Some(oldest) = observation.oldest_main {
            let newest = newest.unwrap_or(oldest);

            step.base_end = oldest;
            step.is_base_step_ready = start >= oldest;
            step.curr_start = newest;
            step.is_curr_step_ready = now - newest < config.current_staleness_ms();
        }
        return step;
    };

    // Rows above a ready `curr_end` were fetched newest first by earlier passes
    let last_point = if stored.is_curr_step_ready {
        stored.curr_end.max(newest.unwrap_or(i64::MIN))
    } else {
        stored.curr_start.max(observation.newest_temp.unwrap_or(i64::MIN))
    };

    // A partial fetch left `[curr_start, curr_end]` missing under rows already stored
    let curr_gap = !stored.is_curr_step_ready && newest.is_some_and(|n| n >= stored.curr_end);

    if !stored.is_base_step_ready {
        step.base_start = start.min(stored.base_start);
        step.base_end = stored.base_end;
    } else if start < stored.base_start {
        step.base_end = stored.base_start;
    } else if stored
        .synced_at
        .is_none_or(|at| now - at >= config.base_recheck_ms())
    {
        step.base_end = last_point;
    } else {
        step.base_start = stored.base_start;
        step.base_end = stored.base_end;
        step.is_base_step_ready = true;
    }

    step.is_curr_step_ready =
        stored.is_curr_step_ready && now - last_point < config.current_staleness_ms();

    if step.is_curr_step_ready || curr_gap {
        step.curr_start = stored.curr_start;
        step.curr_end = stored.curr_end;
    } else {
        step.curr_start = last_point;
    }

    step
}

pub(crate) struct StepTracker {
    storage: Arc<dyn Storage>,
    config: StepTrackerConfig,
}

impl StepTracker {
    pub fn new(config: &SyncConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            config: config.into(),
        }
    }

    async fn load_stored(&self, step_key: &str) -> Result<Option<SyncUserStepData>> {
        let rows = self
            .storage
            .get_elems(
                SYNC_USER_STEPS_TABLE,
                &ElemQuery::new(Filter::new().eq("stepKey", step_key)).limit(1),
            )
            .await?;

        rows.first().map(SyncUserStepData::from_record).transpose()
    }

    async fn edge_mts(
        &self,
        table: &str,
        schema: &CollectionSchema,
        selector: &StepSelector,
        newest: bool,
    ) -> Result<Option<i64>> {
        let Some(date_field) = schema.date_field() else {
            return Ok(None);
        };

        let sort = if newest {
            SortKey::desc(date_field)
        } else {
            SortKey::asc(date_field)
        };

        let rows = self
            .storage
            .get_elems(
                table,
                &ElemQuery::new(selector.row_filter(schema).is_not_null(date_field))
                    .sorted_by(sort)
                    .limit(1),
            )
            .await?;

        Ok(rows.first().and_then(|row| record_i64(row, date_field)))
    }

    /// Returns the step state of `selector` in `schema`, and the newest row already staged in
    /// `temp_table` by the running pass.
    pub async fn get_last_synced_info(
        &self,
        schema: &CollectionSchema,
        selector: &StepSelector,
        start: i64,
        now: i64,
        temp_table: &str,
    ) -> Result<(SyncUserStepData, Option<i64>)> {
        let step_key = format!("{}:{}", schema.name(), selector);

        let mut observation = StepObservation {
            stored: self.load_stored(&step_key).await?,
            ..Default::default()
        };

        if schema.is_append_only() {
            observation.oldest_main = self.edge_mts(schema.name(), schema, selector, false).await?;
            observation.newest_main = self.edge_mts(schema.name(), schema, selector, true).await?;

            if self.storage.table_exists(temp_table).await? {
                observation.newest_temp = self.edge_mts(temp_table, schema, selector, true).await?;
            }
        }

        let step = evaluate_step(&self.config, schema, selector, &observation, start, now);

        debug!(
            step_key,
            base_start = %step.base_start.format_mts(),
            base_ready = step.is_base_step_ready,
            curr_ready = step.is_curr_step_ready,
            "evaluated sync step"
        );

        Ok((step, observation.newest_temp))
    }

    /// Persists the step state. Runs inside the promotion transaction.
    pub async fn record_step_result(
        tx: &mut dyn StorageTransaction,
        step: &SyncUserStepData,
    ) -> Result<()> {
        tx.insert_replacing(
            SYNC_USER_STEPS_TABLE,
            &[step.to_record()],
            &["stepKey".to_string()],
        )
        .await?;

        Ok(())
    }
}
